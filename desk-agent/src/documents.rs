//! Document/presentation rendering collaborator.
//!
//! Rendering fidelity is not this crate's concern; the shipped renderer
//! writes Markdown. Workers treat `render_*` as a single blocking call.

use desk_agent_sdk::SlideContent;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait DocumentRenderer: Send + Sync {
    fn render_document(&self, title: &str, content: &str, path: &Path) -> Result<(), RenderError>;

    fn render_presentation(
        &self,
        title: &str,
        slides: &[SlideContent],
        path: &Path,
    ) -> Result<(), RenderError>;
}

/// Markdown file renderer
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn write(path: &Path, body: String) -> Result<(), RenderError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        Ok(())
    }
}

impl DocumentRenderer for MarkdownRenderer {
    fn render_document(&self, title: &str, content: &str, path: &Path) -> Result<(), RenderError> {
        let mut body = String::new();
        body.push_str(&format!("# {title}\n\n"));
        body.push_str(&format!(
            "Generated: {}\n\n---\n\n",
            chrono::Local::now().format("%d/%m/%Y %H:%M")
        ));
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() {
                body.push_str(line);
                body.push_str("\n\n");
            }
        }
        Self::write(path, body)
    }

    fn render_presentation(
        &self,
        title: &str,
        slides: &[SlideContent],
        path: &Path,
    ) -> Result<(), RenderError> {
        let mut body = String::new();
        body.push_str(&format!("# {title}\n\n"));
        body.push_str(&format!(
            "Generated: {}\n",
            chrono::Local::now().format("%d/%m/%Y")
        ));

        for (index, slide) in slides.iter().enumerate() {
            body.push_str(&format!("\n## Slide {}: {}\n\n", index + 1, slide.title));
            for line in slide.content.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    body.push_str(&format!("- {line}\n"));
                }
            }
        }
        Self::write(path, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_contains_title_and_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");

        MarkdownRenderer
            .render_document("Quarterly Report", "First point\n\n  Second point\n", &path)
            .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("# Quarterly Report\n"));
        assert!(body.contains("First point"));
        assert!(body.contains("Second point"));
    }

    #[test]
    fn presentation_numbers_slides_and_bullets_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.md");

        let slides = vec![
            SlideContent {
                title: "Intro".to_string(),
                content: "one\ntwo".to_string(),
            },
            SlideContent {
                title: "Wrap-up".to_string(),
                content: "done".to_string(),
            },
        ];
        MarkdownRenderer
            .render_presentation("Kickoff", &slides, &path)
            .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("## Slide 1: Intro"));
        assert!(body.contains("## Slide 2: Wrap-up"));
        assert!(body.contains("- one"));
        assert!(body.contains("- two"));
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("doc.md");
        MarkdownRenderer
            .render_document("T", "body", &path)
            .unwrap();
        assert!(path.exists());
    }
}
