//! Clustering of the filtered corpus into scored events.
//!
//! The semantic grouping itself is delegated to the completion
//! collaborator; this module owns the contracts around it: the output
//! partitions the input article set, and impact scores form a total order
//! with an id tie-break so ranking is reproducible.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use ai_client::{util, CompletionClient, CompletionRequest, Message};
use marketbrief_common::{Article, Event, MarketBriefError, RunConfig, Tier};

use crate::completion::complete_bounded;

const CLUSTER_SYSTEM_PROMPT: &str = "You are a financial news analyst. Cluster the numbered article titles into core events. \
Respond with a single JSON object: \
{\"events\": [{\"label\": \"...\", \"summary\": \"...\", \"category\": \"policy|market|macro|industry|general\", \"article_indices\": [0, 1]}]}. \
Every index must refer to a listed article and each article belongs to exactly one event.";

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    #[serde(default)]
    events: Vec<ClusteredEvent>,
}

#[derive(Debug, Deserialize)]
struct ClusteredEvent {
    label: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    article_indices: Vec<usize>,
}

pub struct Analyst {
    completion: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl Analyst {
    pub fn new(completion: Arc<dyn CompletionClient>, config: &RunConfig) -> Self {
        Self {
            completion,
            timeout: config.completion_timeout(),
        }
    }

    /// Group articles into events. Whatever the collaborator returns, the
    /// result is coerced into a partition of the input set.
    pub async fn cluster(&self, articles: &[&Article]) -> Result<Vec<Event>, MarketBriefError> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let listing = articles
            .iter()
            .enumerate()
            .map(|(idx, a)| format!("{idx}: {}", a.title))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(vec![
            Message::system(CLUSTER_SYSTEM_PROMPT),
            Message::user(listing),
        ])
        .with_temperature(0.1)
        .json();

        let response = complete_bounded(&*self.completion, request, self.timeout).await?;
        let parsed: ClusterResponse = serde_json::from_str(util::strip_fences(&response))
            .map_err(|e| {
                MarketBriefError::Completion(format!("unparseable clustering response: {e}"))
            })?;

        Ok(partition(articles, parsed))
    }
}

/// Coerce collaborator output into a partition: out-of-range indices are
/// dropped, duplicate memberships resolve first-event-wins, and articles
/// the collaborator skipped become singleton events.
fn partition(articles: &[&Article], response: ClusterResponse) -> Vec<Event> {
    let mut assigned = vec![false; articles.len()];
    let mut events = Vec::new();

    for clustered in response.events {
        let mut member_ids = BTreeSet::new();
        let mut members = Vec::new();
        for idx in clustered.article_indices {
            match articles.get(idx) {
                Some(article) if !assigned[idx] => {
                    assigned[idx] = true;
                    member_ids.insert(article.id);
                    members.push(*article);
                }
                Some(_) => {}
                None => warn!(label = clustered.label.as_str(), idx, "Clustering index out of range"),
            }
        }
        if members.is_empty() {
            warn!(label = clustered.label.as_str(), "Dropping event with no valid members");
            continue;
        }
        events.push(Event {
            id: Uuid::new_v4(),
            label: clustered.label,
            summary: clustered.summary,
            category: clustered.category.unwrap_or_else(|| "general".to_string()),
            impact_score: impact_score(&members),
            member_article_ids: member_ids,
        });
    }

    for (idx, article) in articles.iter().enumerate() {
        if !assigned[idx] {
            events.push(Event {
                id: Uuid::new_v4(),
                label: article.title.clone(),
                summary: String::new(),
                category: "general".to_string(),
                impact_score: impact_score(&[article]),
                member_article_ids: BTreeSet::from([article.id]),
            });
        }
    }

    // Total order: score descending, id ascending, so ranking is stable
    // across runs over the same clustering.
    events.sort_by(|a, b| {
        b.impact_score
            .partial_cmp(&a.impact_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    events
}

/// Impact from member count and tier mix: tier-1 sourcing weighs double.
/// Adding a member never lowers the score.
fn impact_score(members: &[&Article]) -> f64 {
    members
        .iter()
        .map(|a| match a.tier {
            Tier::Tier1 => 2.0,
            Tier::Tier2 => 1.0,
            Tier::Unranked => 0.0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, ScriptedCompletion};
    use std::collections::HashSet;

    fn corpus() -> Vec<Article> {
        vec![
            article("pbc.gov.cn", "央行降准公告", "", Tier::Tier1),
            article("caixin.com", "降准解读", "", Tier::Tier2),
            article("yicai.com", "专项债加码", "", Tier::Tier2),
        ]
    }

    async fn cluster_with(response: &str, articles: &[Article]) -> Vec<Event> {
        let completion = Arc::new(ScriptedCompletion::new(vec![response]));
        let analyst = Analyst::new(completion, &RunConfig::default());
        let refs: Vec<&Article> = articles.iter().collect();
        analyst.cluster(&refs).await.unwrap()
    }

    #[test]
    fn tier_mix_drives_the_score() {
        let tier1 = article("pbc.gov.cn", "a", "", Tier::Tier1);
        let tier2 = article("caixin.com", "b", "", Tier::Tier2);
        assert_eq!(impact_score(&[&tier1, &tier2]), 3.0);
        assert!(impact_score(&[&tier1, &tier2]) > impact_score(&[&tier2]));
    }

    #[tokio::test]
    async fn events_partition_the_input_set() {
        // Index 0 claimed twice, index 9 out of range, index 2 never assigned
        let articles = corpus();
        let events = cluster_with(
            r#"{"events": [
                {"label": "降准", "summary": "s", "category": "policy", "article_indices": [0, 1, 0]},
                {"label": "幽灵", "article_indices": [0, 9]}
            ]}"#,
            &articles,
        )
        .await;

        let mut seen: HashSet<Uuid> = HashSet::new();
        for event in &events {
            for id in &event.member_article_ids {
                assert!(seen.insert(*id), "article assigned to two events");
            }
        }
        let all: HashSet<Uuid> = articles.iter().map(|a| a.id).collect();
        assert_eq!(seen, all, "every article belongs to exactly one event");
    }

    #[tokio::test]
    async fn unassigned_articles_become_singletons() {
        let articles = corpus();
        let events = cluster_with(
            r#"{"events": [{"label": "降准", "article_indices": [0, 1]}]}"#,
            &articles,
        )
        .await;
        assert_eq!(events.len(), 2);
        // The tier1+tier2 cluster (score 3.0) outranks the tier2 singleton
        assert_eq!(events[0].label, "降准");
        assert_eq!(events[0].impact_score, 3.0);
        assert_eq!(events[1].label, "专项债加码");
        assert_eq!(events[1].impact_score, 1.0);
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let articles = corpus();
        let events = cluster_with(
            "```json\n{\"events\": [{\"label\": \"全部\", \"article_indices\": [0, 1, 2]}]}\n```",
            &articles,
        )
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].member_article_ids.len(), 3);
    }

    #[tokio::test]
    async fn garbage_response_is_a_completion_error() {
        let completion = Arc::new(ScriptedCompletion::new(vec!["not json at all"]));
        let analyst = Analyst::new(completion, &RunConfig::default());
        let articles = corpus();
        let refs: Vec<&Article> = articles.iter().collect();
        let err = analyst.cluster(&refs).await.unwrap_err();
        assert!(matches!(err, MarketBriefError::Completion(_)));
    }

    #[tokio::test]
    async fn empty_input_skips_the_collaborator() {
        let completion = Arc::new(ScriptedCompletion::new(vec![]));
        let analyst = Analyst::new(completion.clone(), &RunConfig::default());
        let events = analyst.cluster(&[]).await.unwrap();
        assert!(events.is_empty());
        assert!(completion.calls.lock().unwrap().is_empty());
    }
}
