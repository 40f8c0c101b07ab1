//! First-run (and on-demand) configuration wizard.
//!
//! A [`WizardSession`] is a finite state machine driven by the interactive
//! surface: `Welcome → ProviderChoice → ProviderConfig → Summary →
//! Committed`, with `Cancelled` reachable from any non-terminal state.
//! Validation failures keep the machine in `ProviderConfig`; the single
//! config write happens in [`WizardSession::commit`] and nowhere else.

use crate::config::{
    mask_secret, ConfigError, ConfigHandle, ConfigStore, Configuration, LocalSettings,
    ProviderKind, RemoteSettings,
};
use crate::providers::{validate_local, validate_remote};
use desk_agent_sdk::ValidationError;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Welcome,
    ProviderChoice,
    ProviderConfig,
    Summary,
    Committed,
    Cancelled,
}

impl WizardStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WizardStep::Committed | WizardStep::Cancelled)
    }
}

/// Wrong action for the current step
#[derive(Debug, thiserror::Error)]
#[error("cannot {action} from {from:?}")]
pub struct InvalidTransition {
    pub from: WizardStep,
    pub action: &'static str,
}

/// Why a commit did not reach `Committed`
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Store(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

/// Masked view of the draft shown before commit.
///
/// The API key is never echoed in full; only the persisted file carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct WizardSummary {
    pub provider: ProviderKind,
    pub model: String,
    /// Remote only
    pub api_key_masked: Option<String>,
    /// Local only
    pub base_url: Option<String>,
}

/// Transient wizard state. Owned by the surface for the duration of one
/// configuration flow; dropped on completion or cancel, never partially
/// persisted.
pub struct WizardSession {
    step: WizardStep,
    provider_choice: Option<ProviderKind>,
    fields: HashMap<String, String>,
    validation_errors: Vec<ValidationError>,
    /// Carried into the committed Configuration so ui/paths/timeout and the
    /// inactive provider block survive a re-run
    base: Configuration,
}

impl WizardSession {
    /// Fresh first-run session
    pub fn start() -> Self {
        Self {
            step: WizardStep::Welcome,
            provider_choice: None,
            fields: HashMap::new(),
            validation_errors: Vec::new(),
            base: Configuration::default(),
        }
    }

    /// Re-entrant session seeded from the persisted configuration
    pub fn resume(existing: &Configuration) -> Self {
        Self {
            step: WizardStep::Welcome,
            provider_choice: None,
            fields: HashMap::new(),
            validation_errors: Vec::new(),
            base: existing.clone(),
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn provider_choice(&self) -> Option<ProviderKind> {
        self.provider_choice
    }

    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.validation_errors
    }

    /// Seeded default for the provider selection prompt
    pub fn suggested_provider(&self) -> ProviderKind {
        self.base.provider
    }

    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// `Welcome → ProviderChoice`. No input required.
    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        self.expect(WizardStep::Welcome, "begin")?;
        self.step = WizardStep::ProviderChoice;
        Ok(())
    }

    /// `ProviderChoice → ProviderConfig`. Selecting a different provider
    /// than before discards the abandoned variant's draft fields.
    pub fn choose_provider(&mut self, kind: ProviderKind) -> Result<(), InvalidTransition> {
        self.expect(WizardStep::ProviderChoice, "choose a provider")?;

        if self.provider_choice != Some(kind) {
            self.fields.clear();
            self.seed_fields(kind);
        }
        self.provider_choice = Some(kind);
        self.validation_errors.clear();
        self.step = WizardStep::ProviderConfig;
        debug!(provider = %kind, "wizard provider chosen");
        Ok(())
    }

    /// `ProviderConfig → ProviderChoice`, keeping the current variant's
    /// drafts until a different provider is actually chosen
    pub fn back_to_provider_choice(&mut self) -> Result<(), InvalidTransition> {
        self.expect(WizardStep::ProviderConfig, "return to provider choice")?;
        self.step = WizardStep::ProviderChoice;
        Ok(())
    }

    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.expect(WizardStep::ProviderConfig, "edit fields")?;
        self.fields.insert(name.into(), value.into());
        Ok(())
    }

    /// `ProviderConfig → Summary`, gated on validation. On failure the
    /// machine stays where it is and the field-level errors are returned;
    /// it never advances with invalid data.
    pub fn advance_to_summary(&mut self) -> Result<(), Vec<ValidationError>> {
        if self.step != WizardStep::ProviderConfig {
            return Err(vec![ValidationError::new(
                "state",
                format!("cannot advance from {:?}", self.step),
            )]);
        }

        let errors = self.validate_draft();
        if errors.is_empty() {
            self.validation_errors.clear();
            self.step = WizardStep::Summary;
            Ok(())
        } else {
            self.validation_errors = errors.clone();
            Err(errors)
        }
    }

    /// Masked view of the draft, available from Summary on
    pub fn summary(&self) -> Result<WizardSummary, InvalidTransition> {
        if self.step != WizardStep::Summary && self.step != WizardStep::Committed {
            return Err(InvalidTransition {
                from: self.step,
                action: "read the summary",
            });
        }
        let provider = self.provider_choice.expect("summary implies a choice");
        Ok(match provider {
            ProviderKind::Remote => WizardSummary {
                provider,
                model: self.field("model").to_string(),
                api_key_masked: Some(mask_secret(self.field("api_key"))),
                base_url: None,
            },
            ProviderKind::Local => WizardSummary {
                provider,
                model: self.field("model").to_string(),
                api_key_masked: None,
                base_url: Some(self.field("base_url").to_string()),
            },
        })
    }

    /// `Summary → Committed`: exactly one write to the config store. A store
    /// failure leaves the session in `Summary` so the user retries without
    /// re-entering fields; on success the live handle is swapped under its
    /// write lock.
    pub fn commit(
        &mut self,
        store: &dyn ConfigStore,
        handle: &ConfigHandle,
    ) -> Result<Configuration, CommitError> {
        self.expect(WizardStep::Summary, "commit")?;

        let config = self.build_configuration();
        store.save(&config)?;

        let mut live = handle.write().expect("config handle poisoned");
        *live = config.clone();
        drop(live);

        self.step = WizardStep::Committed;
        info!(provider = %config.provider, "configuration committed");
        Ok(config)
    }

    /// Any non-terminal state `→ Cancelled`. No write happens.
    pub fn cancel(&mut self) {
        if !self.step.is_terminal() {
            self.step = WizardStep::Cancelled;
            self.fields.clear();
        }
    }

    /// Remote settings as currently drafted
    pub fn remote_draft(&self) -> RemoteSettings {
        RemoteSettings {
            api_key: self.field("api_key").to_string(),
            model: self.field("model").to_string(),
        }
    }

    /// Local settings as currently drafted
    pub fn local_draft(&self) -> LocalSettings {
        LocalSettings {
            base_url: self.field("base_url").to_string(),
            model: self.field("model").to_string(),
        }
    }

    fn expect(&self, step: WizardStep, action: &'static str) -> Result<(), InvalidTransition> {
        if self.step == step {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.step,
                action,
            })
        }
    }

    fn seed_fields(&mut self, kind: ProviderKind) {
        // Seed from the persisted config when re-configuring the same
        // provider, otherwise from variant defaults
        match kind {
            ProviderKind::Remote => {
                let seed = if self.base.provider == ProviderKind::Remote {
                    self.base.remote.clone()
                } else {
                    RemoteSettings::default()
                };
                self.fields.insert("api_key".to_string(), seed.api_key);
                self.fields.insert("model".to_string(), seed.model);
            }
            ProviderKind::Local => {
                let seed = if self.base.provider == ProviderKind::Local {
                    self.base.local.clone()
                } else {
                    LocalSettings::default()
                };
                self.fields.insert("base_url".to_string(), seed.base_url);
                self.fields.insert("model".to_string(), seed.model);
            }
        }
    }

    fn validate_draft(&self) -> Vec<ValidationError> {
        let provider = match self.provider_choice {
            Some(provider) => provider,
            None => return vec![ValidationError::new("provider", "no provider selected")],
        };

        let required: &[&str] = match provider {
            ProviderKind::Remote => &["api_key", "model"],
            ProviderKind::Local => &["base_url", "model"],
        };

        let mut errors: Vec<ValidationError> = required
            .iter()
            .filter(|name| self.field(name).trim().is_empty())
            .map(|name| ValidationError::new(*name, "must not be empty"))
            .collect();

        // Well-formedness only once all required fields are present
        if errors.is_empty() {
            let check = match provider {
                ProviderKind::Remote => validate_remote(&self.remote_draft()),
                ProviderKind::Local => validate_local(&self.local_draft()),
            };
            if let Err(e) = check {
                errors.push(e);
            }
        }
        errors
    }

    fn build_configuration(&self) -> Configuration {
        let provider = self.provider_choice.expect("commit implies a choice");
        let mut config = self.base.clone();
        config.provider = provider;
        match provider {
            ProviderKind::Remote => config.remote = self.remote_draft(),
            ProviderKind::Local => config.local = self.local_draft(),
        }
        config
    }
}
