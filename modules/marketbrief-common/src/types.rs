use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source tiers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Unranked,
}

impl Tier {
    /// Only tier-1/tier-2 articles feed the Analyst and Journalist.
    /// Unranked articles stay in the corpus for the audit trail.
    pub fn eligible(&self) -> bool {
        !matches!(self, Tier::Unranked)
    }

    /// Dedup preference: lower rank wins a duplicate group.
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Tier1 => 0,
            Tier::Tier2 => 1,
            Tier::Unranked => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Tier1 => write!(f, "tier1"),
            Tier::Tier2 => write!(f, "tier2"),
            Tier::Unranked => write!(f, "unranked"),
        }
    }
}

// --- Corpus ---

/// One retrieved source article. Immutable once fetched; everything
/// downstream references it by id rather than copying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub body: String,
    pub source_domain: String,
    pub tier: Tier,
    pub fetched_at: DateTime<Utc>,
}

/// A query whose retrieval failed. Recorded for the audit trail; the run
/// proceeds on partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFailure {
    pub query: String,
    pub message: String,
}

// --- Events ---

/// A cluster of articles judged to describe the same underlying occurrence.
/// The impact score is recomputed from member count and tier mix, never
/// patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub label: String,
    pub summary: String,
    pub category: String,
    pub member_article_ids: BTreeSet<Uuid>,
    pub impact_score: f64,
}

// --- Drafts ---

/// One version of the briefing. A correction produces a new Draft with a
/// bumped version; prior versions live on in the draft history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub version: u32,
    pub content: String,
    pub cited_event_ids: BTreeSet<Uuid>,
}

// --- Audit results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Draft value contradicts the sourced value. Ordered first in the fix
    /// list.
    Mismatch,
    /// Draft claim has no counterpart anywhere in the cited sources.
    Unsourced,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueKind::Mismatch => write!(f, "mismatch"),
            IssueKind::Unsourced => write!(f, "unsourced"),
        }
    }
}

/// One discrepancy between the draft and its sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub entity_ref: String,
    /// Sourced value. None for unsourced claims.
    pub expected: Option<String>,
    /// What the draft says.
    pub found: String,
    /// Byte offset of the claim in the draft, for deterministic ordering.
    pub offset: usize,
}

/// Outcome of one audit pass over one draft version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub draft_version: u32,
    pub verdict: Verdict,
    /// Mismatches before unsourced claims, each group in draft order.
    pub issues: Vec<Issue>,
    /// Claims whose numerals could not be canonicalized. Logged, never
    /// blocking.
    pub unverifiable: Vec<String>,
    /// Prioritized fix list handed to the Journalist on retry.
    pub corrected_hint: Option<String>,
}

impl AuditResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

// --- Pipeline phases ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gathering,
    Analyzing,
    Drafting,
    Auditing,
    Fixing,
    Publishing,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Gathering => write!(f, "gathering"),
            Phase::Analyzing => write!(f, "analyzing"),
            Phase::Drafting => write!(f, "drafting"),
            Phase::Auditing => write!(f, "auditing"),
            Phase::Fixing => write!(f, "fixing"),
            Phase::Publishing => write!(f, "publishing"),
            Phase::Done => write!(f, "done"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

// --- Pipeline state ---

/// The single mutable aggregate for one run, owned by the orchestrator.
/// Stage components receive read views and return new sub-objects; the
/// orchestrator applies each stage's result atomically. Draft and audit
/// histories are append-only so every correction is reconstructable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub queries: Vec<String>,
    pub articles: Vec<Article>,
    pub fetch_failures: Vec<FetchFailure>,
    pub events: Vec<Event>,
    draft_history: Vec<Draft>,
    audit_history: Vec<AuditResult>,
    pub cycle_count: u32,
    pub phase: Phase,
}

impl PipelineState {
    pub fn new(queries: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            queries,
            articles: Vec::new(),
            fetch_failures: Vec::new(),
            events: Vec::new(),
            draft_history: Vec::new(),
            audit_history: Vec::new(),
            cycle_count: 0,
            phase: Phase::Gathering,
        }
    }

    /// Articles eligible as Analyst/Journalist input (tier 1 or 2).
    pub fn eligible_articles(&self) -> Vec<&Article> {
        self.articles.iter().filter(|a| a.tier.eligible()).collect()
    }

    pub fn article(&self, id: Uuid) -> Option<&Article> {
        self.articles.iter().find(|a| a.id == id)
    }

    pub fn event(&self, id: Uuid) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn record_draft(&mut self, draft: Draft) {
        self.draft_history.push(draft);
    }

    pub fn record_audit(&mut self, audit: AuditResult) {
        self.audit_history.push(audit);
    }

    pub fn draft_history(&self) -> &[Draft] {
        &self.draft_history
    }

    pub fn audit_history(&self) -> &[AuditResult] {
        &self.audit_history
    }

    pub fn latest_draft(&self) -> Option<&Draft> {
        self.draft_history.last()
    }

    pub fn latest_audit(&self) -> Option<&AuditResult> {
        self.audit_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unranked_articles_are_not_eligible() {
        let mut state = PipelineState::new(vec!["q".to_string()]);
        state.articles.push(Article {
            id: Uuid::new_v4(),
            url: "https://pbc.gov.cn/a".to_string(),
            title: "a".to_string(),
            body: "".to_string(),
            source_domain: "pbc.gov.cn".to_string(),
            tier: Tier::Tier1,
            fetched_at: Utc::now(),
        });
        state.articles.push(Article {
            id: Uuid::new_v4(),
            url: "https://blog.example.com/b".to_string(),
            title: "b".to_string(),
            body: "".to_string(),
            source_domain: "blog.example.com".to_string(),
            tier: Tier::Unranked,
            fetched_at: Utc::now(),
        });
        assert_eq!(state.eligible_articles().len(), 1);
        assert_eq!(state.articles.len(), 2);
    }

    #[test]
    fn histories_accumulate_in_order() {
        let mut state = PipelineState::new(vec![]);
        for version in 1..=3 {
            state.record_draft(Draft {
                id: Uuid::new_v4(),
                version,
                content: String::new(),
                cited_event_ids: BTreeSet::new(),
            });
        }
        let versions: Vec<u32> = state.draft_history().iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(state.latest_draft().unwrap().version, 3);
    }

    #[test]
    fn mismatch_sorts_before_unsourced() {
        assert!(IssueKind::Mismatch < IssueKind::Unsourced);
    }
}
