//! Briefing generation from the ranked event set.
//!
//! The prose comes from the completion collaborator; this module owns the
//! sourcing contract: the draft is derived only from cited events, and a
//! correction pass threads the auditor's prioritized fix list back into
//! the prompt.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use ai_client::{util, CompletionClient, CompletionRequest, Message};
use marketbrief_common::{AuditResult, Draft, Event, MarketBriefError, PipelineState, RunConfig};

use crate::completion::complete_bounded;

const DRAFT_SYSTEM_PROMPT: &str = "You are a macroeconomic research writer producing a briefing from source material. \
Rules: every figure, date, and institution name must come from the source material verbatim; \
no speculation, no invented numbers; neutral register. \
Respond with a single JSON object: {\"title\": \"...\", \"summary\": \"...\", \"analysis\": \"...\", \"outlook\": \"...\"}.";

/// Bytes of article body quoted per source in the prompt.
const SOURCE_CLIP_BYTES: usize = 800;

#[derive(Debug, Deserialize)]
struct DraftResponse {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    outlook: String,
}

pub struct Journalist {
    completion: Arc<dyn CompletionClient>,
    timeout: Duration,
    max_events: usize,
}

impl Journalist {
    pub fn new(completion: Arc<dyn CompletionClient>, config: &RunConfig) -> Self {
        Self {
            completion,
            timeout: config.completion_timeout(),
            max_events: config.report_max_events,
        }
    }

    /// Produce the next draft version from the run's top events. When the
    /// latest audit failed, its issues become the correction instructions.
    pub async fn draft(&self, state: &PipelineState) -> Result<Draft, MarketBriefError> {
        let events: Vec<&Event> = state.events.iter().take(self.max_events).collect();
        let cited_event_ids: BTreeSet<Uuid> = events.iter().map(|e| e.id).collect();
        let version = state.draft_history().len() as u32 + 1;

        let mut messages = vec![
            Message::system(DRAFT_SYSTEM_PROMPT),
            Message::user(source_context(state, &events)),
        ];
        if let Some(audit) = state.latest_audit().filter(|a| !a.passed()) {
            info!(
                failed_version = audit.draft_version,
                issues = audit.issues.len(),
                "Drafting correction from audit feedback"
            );
            messages.push(Message::user(fix_list(audit)));
        }

        let request = CompletionRequest::new(messages).with_temperature(0.3).json();
        let response = complete_bounded(&*self.completion, request, self.timeout).await?;
        let parsed: DraftResponse = serde_json::from_str(util::strip_fences(&response))
            .map_err(|e| MarketBriefError::Completion(format!("unparseable draft response: {e}")))?;

        Ok(Draft {
            id: Uuid::new_v4(),
            version,
            content: assemble(parsed),
            cited_event_ids,
        })
    }
}

fn source_context(state: &PipelineState, events: &[&Event]) -> String {
    let mut context = String::from("Source material, grouped by event:\n");
    for event in events {
        context.push_str(&format!(
            "\n## {} (impact {:.1})\n",
            event.label, event.impact_score
        ));
        for article_id in &event.member_article_ids {
            if let Some(article) = state.article(*article_id) {
                context.push_str(&format!(
                    "- Source: {} [{}]\n  {}\n",
                    article.source_domain,
                    article.tier,
                    util::clip_utf8(&article.body, SOURCE_CLIP_BYTES),
                ));
            }
        }
    }
    context
}

/// The auditor's issues, already ordered by severity and position.
fn fix_list(audit: &AuditResult) -> String {
    let mut lines =
        vec!["The previous draft failed verification. Fix these issues, in order:".to_string()];
    for (idx, issue) in audit.issues.iter().enumerate() {
        let line = match &issue.expected {
            Some(expected) => format!(
                "{}. [{}] {}: source states {}, draft claims {}",
                idx + 1,
                issue.kind,
                issue.entity_ref,
                expected,
                issue.found
            ),
            None => format!(
                "{}. [{}] {}: no source supports {}",
                idx + 1,
                issue.kind,
                issue.entity_ref,
                issue.found
            ),
        };
        lines.push(line);
    }
    if let Some(hint) = &audit.corrected_hint {
        lines.push(format!("Correction hint: {hint}"));
    }
    lines.join("\n")
}

fn assemble(parsed: DraftResponse) -> String {
    let mut sections = vec![format!("# {}", parsed.title.trim())];
    for section in [parsed.summary, parsed.analysis, parsed.outlook] {
        let trimmed = section.trim().to_string();
        if !trimmed.is_empty() {
            sections.push(trimmed);
        }
    }
    sections.join("\n\n")
}
