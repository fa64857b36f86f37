//! Fact verification of a draft against its cited source material.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use uuid::Uuid;

use marketbrief_common::{
    AuditResult, Draft, EntityEntry, Issue, IssueKind, PipelineState, RunConfig, Verdict,
};

use crate::verify::entity::{align, extract_claims, AlignmentOutcome, Claim};

pub struct Auditor {
    entities: Vec<EntityEntry>,
    rel_tol: f64,
}

impl Auditor {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            entities: config.entities.clone(),
            rel_tol: config.numeral_tolerance,
        }
    }

    /// Verify one draft against the member articles of its cited events.
    /// Pure and synchronous: the same draft and corpus always produce the
    /// same result, so re-auditing a passed draft passes again.
    pub fn audit(&self, draft: &Draft, state: &PipelineState) -> AuditResult {
        let cited_article_ids: BTreeSet<Uuid> = draft
            .cited_event_ids
            .iter()
            .filter_map(|event_id| state.event(*event_id))
            .flat_map(|event| event.member_article_ids.iter().copied())
            .collect();

        let mut source_claims: Vec<Claim> = Vec::new();
        for article_id in cited_article_ids {
            let Some(article) = state.article(article_id) else {
                continue;
            };
            let text = format!("{}\n{}", article.title, article.body);
            let extraction = extract_claims(&text, &self.entities);
            for unverifiable in extraction.unverifiable {
                debug!(
                    article = article.source_domain.as_str(),
                    claim = unverifiable.as_str(),
                    "Source numeral not canonicalizable"
                );
            }
            source_claims.extend(extraction.claims);
        }

        let draft_extraction = extract_claims(&draft.content, &self.entities);
        for unverifiable in &draft_extraction.unverifiable {
            warn!(claim = unverifiable.as_str(), "Draft claim is unverifiable");
        }

        let alignments = align(&draft_extraction.claims, &source_claims, self.rel_tol);

        let mut issues = Vec::new();
        for alignment in alignments {
            match alignment.outcome {
                AlignmentOutcome::Mismatch => issues.push(Issue {
                    kind: IssueKind::Mismatch,
                    entity_ref: alignment.entity_ref,
                    expected: alignment.expected,
                    found: alignment.draft_text.unwrap_or_default(),
                    offset: alignment.offset.unwrap_or(0),
                }),
                AlignmentOutcome::Unsourced => issues.push(Issue {
                    kind: IssueKind::Unsourced,
                    entity_ref: alignment.entity_ref,
                    expected: None,
                    found: alignment.draft_text.unwrap_or_default(),
                    offset: alignment.offset.unwrap_or(0),
                }),
                // Source self-disagreement is not the draft's error.
                AlignmentOutcome::SourceAmbiguous => info!(
                    entity = alignment.entity_ref.as_str(),
                    sources = alignment.expected.as_deref().unwrap_or(""),
                    "Sources disagree, skipping claim"
                ),
                AlignmentOutcome::Uncited => debug!(
                    entity = alignment.entity_ref.as_str(),
                    "Sourced claim not covered by the draft"
                ),
                AlignmentOutcome::Match => {}
            }
        }

        // Severity before position: every mismatch outranks every
        // unsourced claim in the fix list.
        issues.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.offset.cmp(&b.offset)));

        let verdict = if issues.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        let corrected_hint = (verdict == Verdict::Fail).then(|| self.hint(&issues));

        AuditResult {
            draft_version: draft.version,
            verdict,
            issues,
            unverifiable: draft_extraction.unverifiable,
            corrected_hint,
        }
    }

    fn hint(&self, issues: &[Issue]) -> String {
        issues
            .iter()
            .map(|issue| {
                let name = self.display_name(&issue.entity_ref);
                match &issue.expected {
                    Some(expected) => {
                        format!("{name}: source states {expected}, draft claims {}", issue.found)
                    }
                    None => format!("{name}: no source supports {}", issue.found),
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn display_name(&self, entity_ref: &str) -> String {
        self.entities
            .iter()
            .find(|e| e.id == entity_ref)
            .map(|e| e.canonical_name.clone())
            .unwrap_or_else(|| entity_ref.to_string())
    }
}
