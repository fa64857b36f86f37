//! The pipeline state machine.
//!
//! One run walks `Gathering → Analyzing → Drafting → Auditing` and then
//! either publishes or loops back through `Fixing → Drafting`, at most
//! `max_cycles` times. Every stage result is applied to `PipelineState`
//! atomically; histories only ever grow, so a run is replayable from its
//! final state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use ai_client::CompletionClient;
use marketbrief_common::{MarketBriefError, Phase, PipelineState, RunConfig, Verdict};

use crate::analyst::Analyst;
use crate::auditor::Auditor;
use crate::gatherer::{Gatherer, WebSearcher};
use crate::journalist::Journalist;
use crate::publisher::{Provenance, Publisher};

// --- Run report ---

#[derive(Debug)]
pub enum TerminalOutcome {
    Published { path: PathBuf, audit_passes: u32 },
    Failed { error: MarketBriefError },
}

/// Final state of a run: the terminal outcome plus the full pipeline state
/// so callers can inspect exactly which audit issues were never resolved.
pub struct RunReport {
    pub state: PipelineState,
    pub outcome: TerminalOutcome,
    pub stats: RunStats,
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub queries: usize,
    pub failed_queries: usize,
    pub articles_gathered: usize,
    pub articles_eligible: usize,
    pub events: usize,
    pub drafts: usize,
    pub audits: usize,
    pub correction_cycles: u32,
    pub open_issues: usize,
    pub final_phase: Option<Phase>,
}

impl RunStats {
    fn from_state(state: &PipelineState) -> Self {
        Self {
            queries: state.queries.len(),
            failed_queries: state.fetch_failures.len(),
            articles_gathered: state.articles.len(),
            articles_eligible: state.eligible_articles().len(),
            events: state.events.len(),
            drafts: state.draft_history().len(),
            audits: state.audit_history().len(),
            correction_cycles: state.cycle_count,
            open_issues: state
                .latest_audit()
                .map(|a| a.issues.len())
                .unwrap_or(0),
            final_phase: Some(state.phase),
        }
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        writeln!(f, "Queries:            {} ({} failed)", self.queries, self.failed_queries)?;
        writeln!(f, "Articles gathered:  {}", self.articles_gathered)?;
        writeln!(f, "Articles eligible:  {}", self.articles_eligible)?;
        writeln!(f, "Events:             {}", self.events)?;
        writeln!(f, "Drafts:             {}", self.drafts)?;
        writeln!(f, "Audit passes:       {}", self.audits)?;
        writeln!(f, "Correction cycles:  {}", self.correction_cycles)?;
        writeln!(f, "Open issues:        {}", self.open_issues)?;
        if let Some(phase) = self.final_phase {
            writeln!(f, "Final phase:        {phase}")?;
        }
        Ok(())
    }
}

// --- Orchestrator ---

pub struct Orchestrator {
    gatherer: Gatherer,
    analyst: Analyst,
    journalist: Journalist,
    auditor: Auditor,
    publisher: Arc<dyn Publisher>,
    config: RunConfig,
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        completion: Arc<dyn CompletionClient>,
        publisher: Arc<dyn Publisher>,
        config: RunConfig,
    ) -> Self {
        Self {
            gatherer: Gatherer::new(searcher),
            analyst: Analyst::new(Arc::clone(&completion), &config),
            journalist: Journalist::new(completion, &config),
            auditor: Auditor::new(&config),
            publisher,
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative abort: set between stages, checked before each stage
    /// transition, so no stage result is ever half-applied.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Execute one full run. Never panics across a stage boundary and
    /// never discards accumulated state: a fatal error lands in the
    /// report's outcome with the state attached.
    pub async fn run(&self, queries: Vec<String>) -> RunReport {
        let mut state = PipelineState::new(queries);
        info!(run_id = %state.run_id, queries = state.queries.len(), "Pipeline run starting");

        let outcome = match self.drive(&mut state).await {
            Ok((path, audit_passes)) => {
                state.phase = Phase::Done;
                info!(run_id = %state.run_id, path = %path.display(), "Run complete");
                TerminalOutcome::Published { path, audit_passes }
            }
            Err(err) => {
                state.phase = Phase::Failed;
                error!(run_id = %state.run_id, error = %err, "Run failed");
                TerminalOutcome::Failed { error: err }
            }
        };

        let stats = RunStats::from_state(&state);
        RunReport {
            state,
            outcome,
            stats,
        }
    }

    async fn drive(
        &self,
        state: &mut PipelineState,
    ) -> Result<(PathBuf, u32), MarketBriefError> {
        // Gathering
        self.enter(state, Phase::Gathering)?;
        let queries = state.queries.clone();
        let gathered = self.gatherer.gather(&queries, &self.config).await;
        state.articles = gathered.articles;
        state.fetch_failures = gathered.failures;
        if state.eligible_articles().is_empty() {
            // No meaningful pipeline can proceed from nothing.
            return Err(MarketBriefError::EmptyCorpus);
        }

        // Analyzing
        self.enter(state, Phase::Analyzing)?;
        let events = {
            let eligible = state.eligible_articles();
            self.analyst.cluster(&eligible).await?
        };
        for event in &events {
            for article_id in &event.member_article_ids {
                if state.article(*article_id).is_none() {
                    return Err(MarketBriefError::Validation(format!(
                        "event '{}' references an article outside this run's corpus",
                        event.label
                    )));
                }
            }
        }
        state.events = events;

        // Drafting / Auditing, with the bounded correction cycle
        loop {
            self.enter(state, Phase::Drafting)?;
            let draft = self.journalist.draft(state).await?;
            if draft
                .cited_event_ids
                .iter()
                .any(|id| state.event(*id).is_none())
            {
                return Err(MarketBriefError::Validation(format!(
                    "draft v{} cites an event outside this run",
                    draft.version
                )));
            }

            self.enter(state, Phase::Auditing)?;
            let audit = self.auditor.audit(&draft, state);
            info!(
                version = draft.version,
                verdict = %audit.verdict,
                issues = audit.issues.len(),
                unverifiable = audit.unverifiable.len(),
                "Audit complete"
            );
            let verdict = audit.verdict;
            state.record_draft(draft);
            state.record_audit(audit);

            match verdict {
                Verdict::Pass => break,
                Verdict::Fail if state.cycle_count < self.config.max_cycles => {
                    state.cycle_count += 1;
                    state.phase = Phase::Fixing;
                    info!(
                        cycle = state.cycle_count,
                        max_cycles = self.config.max_cycles,
                        "Audit failed, entering correction cycle"
                    );
                }
                Verdict::Fail => {
                    // Correctness over availability: never publish a draft
                    // that failed its final audit.
                    return Err(MarketBriefError::CycleExhausted {
                        cycles: state.cycle_count,
                    });
                }
            }
        }

        // Publishing
        self.enter(state, Phase::Publishing)?;
        let draft = state
            .latest_draft()
            .expect("publishing requires an audited draft");
        let audit_passes = state.audit_history().len() as u32;
        let provenance = Provenance {
            run_id: state.run_id,
            events: &state.events,
            articles: &state.articles,
            audit_passes,
        };
        let path = self.publisher.publish(draft, &provenance).await?;
        Ok((path, audit_passes))
    }

    fn enter(&self, state: &mut PipelineState, phase: Phase) -> Result<(), MarketBriefError> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(MarketBriefError::Aborted);
        }
        state.phase = phase;
        info!(phase = %phase, "Entering phase");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatherer::SearchHit;
    use crate::testing::{MemoryPublisher, ScriptedCompletion, StaticSearcher};

    const CLUSTER_JSON: &str = r#"{"events": [{"label": "央行降准", "summary": "s", "category": "policy", "article_indices": [0]}]}"#;
    const GOOD_DRAFT: &str = r#"{"title": "货币政策简报", "summary": "存款准备金率下调0.5个百分点", "analysis": "", "outlook": ""}"#;
    const BAD_DRAFT: &str = r#"{"title": "货币政策简报", "summary": "存款准备金率下调5个百分点", "analysis": "", "outlook": ""}"#;

    fn searcher() -> StaticSearcher {
        StaticSearcher::new().with_hits(
            "宏观政策",
            vec![SearchHit {
                url: "https://pbc.gov.cn/announce/1".to_string(),
                title: "降准公告".to_string(),
                content: "存款准备金率下调0.5个百分点。".to_string(),
            }],
        )
    }

    fn orchestrator(
        searcher: StaticSearcher,
        responses: Vec<&str>,
        max_cycles: u32,
    ) -> (Orchestrator, Arc<MemoryPublisher>) {
        let publisher = Arc::new(MemoryPublisher::new());
        let config = RunConfig {
            max_cycles,
            ..RunConfig::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(searcher),
            Arc::new(ScriptedCompletion::new(responses)),
            Arc::clone(&publisher) as Arc<dyn Publisher>,
            config,
        );
        (orchestrator, publisher)
    }

    #[tokio::test]
    async fn clean_draft_publishes_first_pass() {
        let (orchestrator, publisher) =
            orchestrator(searcher(), vec![CLUSTER_JSON, GOOD_DRAFT], 2);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert!(matches!(
            report.outcome,
            TerminalOutcome::Published { audit_passes: 1, .. }
        ));
        assert_eq!(report.state.phase, Phase::Done);
        assert_eq!(report.state.cycle_count, 0);
        assert_eq!(report.state.draft_history().len(), 1);
        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_audit_triggers_one_correction() {
        let (orchestrator, publisher) =
            orchestrator(searcher(), vec![CLUSTER_JSON, BAD_DRAFT, GOOD_DRAFT], 2);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert!(matches!(report.outcome, TerminalOutcome::Published { .. }));
        assert_eq!(report.state.cycle_count, 1);
        assert_eq!(report.state.draft_history().len(), 2);
        assert_eq!(report.state.audit_history().len(), 2);
        assert_eq!(report.state.latest_audit().unwrap().verdict, Verdict::Pass);
        // Only the corrected draft was published
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].version, 2);
    }

    #[tokio::test]
    async fn cycle_bound_is_exact() {
        // max_cycles = 2: drafts v1..v3, then Failed — never a fourth
        let (orchestrator, publisher) = orchestrator(
            searcher(),
            vec![CLUSTER_JSON, BAD_DRAFT, BAD_DRAFT, BAD_DRAFT, BAD_DRAFT],
            2,
        );
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        match report.outcome {
            TerminalOutcome::Failed {
                error: MarketBriefError::CycleExhausted { cycles },
            } => assert_eq!(cycles, 2),
            other => panic!("expected CycleExhausted, got {other:?}"),
        }
        assert_eq!(report.state.phase, Phase::Failed);
        assert_eq!(report.state.draft_history().len(), 3);
        assert_eq!(report.state.audit_history().len(), 3);
        // The failure retains the last draft and its issues for review
        assert_eq!(report.state.latest_audit().unwrap().verdict, Verdict::Fail);
        assert!(!report.state.latest_audit().unwrap().issues.is_empty());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_corpus_fails_from_gathering() {
        let empty = StaticSearcher::new().with_failure("宏观政策");
        let (orchestrator, publisher) = orchestrator(empty, vec![], 2);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert!(matches!(
            report.outcome,
            TerminalOutcome::Failed {
                error: MarketBriefError::EmptyCorpus
            }
        ));
        assert_eq!(report.state.phase, Phase::Failed);
        assert!(report.state.events.is_empty());
        assert!(report.state.draft_history().is_empty());
        assert_eq!(report.state.fetch_failures.len(), 1);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unranked_only_corpus_is_empty() {
        let unranked = StaticSearcher::new().with_hits(
            "宏观政策",
            vec![SearchHit {
                url: "https://random-blog.example.com/post".to_string(),
                title: "t".to_string(),
                content: "not whitelisted".to_string(),
            }],
        );
        let (orchestrator, _) = orchestrator(unranked, vec![], 2);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert!(matches!(
            report.outcome,
            TerminalOutcome::Failed {
                error: MarketBriefError::EmptyCorpus
            }
        ));
        // The unranked article is still retained for the audit trail
        assert_eq!(report.state.articles.len(), 1);
    }

    #[tokio::test]
    async fn abort_flag_stops_before_the_next_stage() {
        let (orchestrator, publisher) =
            orchestrator(searcher(), vec![CLUSTER_JSON, GOOD_DRAFT], 2);
        orchestrator.abort_flag().store(true, Ordering::Relaxed);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert!(matches!(
            report.outcome,
            TerminalOutcome::Failed {
                error: MarketBriefError::Aborted
            }
        ));
        assert!(report.state.articles.is_empty());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_reflect_the_run() {
        let (orchestrator, _) =
            orchestrator(searcher(), vec![CLUSTER_JSON, BAD_DRAFT, GOOD_DRAFT], 2);
        let report = orchestrator.run(vec!["宏观政策".to_string()]).await;

        assert_eq!(report.stats.queries, 1);
        assert_eq!(report.stats.articles_gathered, 1);
        assert_eq!(report.stats.events, 1);
        assert_eq!(report.stats.drafts, 2);
        assert_eq!(report.stats.audits, 2);
        assert_eq!(report.stats.correction_cycles, 1);
        assert_eq!(report.stats.open_issues, 0);
        let rendered = report.stats.to_string();
        assert!(rendered.contains("Correction cycles:  1"));
    }
}
