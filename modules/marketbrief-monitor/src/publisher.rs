//! Rendering and persistence of an accepted briefing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use marketbrief_common::{Article, Draft, Event};

/// Everything the rendered artifact needs beyond the draft text: which
/// events it covered, the corpus behind them, and how many audit passes
/// the draft survived.
pub struct Provenance<'a> {
    pub run_id: Uuid,
    pub events: &'a [Event],
    pub articles: &'a [Article],
    pub audit_passes: u32,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, draft: &Draft, provenance: &Provenance<'_>) -> Result<PathBuf>;
}

// --- Markdown file publisher ---

pub struct MarkdownPublisher {
    output_dir: PathBuf,
}

impl MarkdownPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Publisher for MarkdownPublisher {
    async fn publish(&self, draft: &Draft, provenance: &Provenance<'_>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let run_short = provenance.run_id.simple().to_string();
        let filename = format!(
            "briefing-{}-{}.md",
            Utc::now().format("%Y-%m-%d"),
            &run_short[..8]
        );
        let path = self.output_dir.join(filename);

        tokio::fs::write(&path, render(draft, provenance))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            path = %path.display(),
            version = draft.version,
            audit_passes = provenance.audit_passes,
            "Briefing published"
        );
        Ok(path)
    }
}

pub fn render(draft: &Draft, provenance: &Provenance<'_>) -> String {
    let mut out = String::new();
    out.push_str(&draft.content);
    out.push_str("\n\n---\n\n## Sources\n");

    for event in provenance.events {
        if !draft.cited_event_ids.contains(&event.id) {
            continue;
        }
        out.push_str(&format!("\n### {}\n", event.label));
        for article_id in &event.member_article_ids {
            if let Some(article) = provenance
                .articles
                .iter()
                .find(|a| a.id == *article_id)
            {
                out.push_str(&format!(
                    "- [{}] {} — {} ({})\n",
                    article.tier, article.source_domain, article.title, article.url
                ));
            }
        }
    }

    out.push_str(&format!(
        "\n*Verified in {} audit pass{}. Run {}.*\n",
        provenance.audit_passes,
        if provenance.audit_passes == 1 { "" } else { "es" },
        provenance.run_id.simple(),
    ));
    out
}
