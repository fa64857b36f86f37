//! Mock collaborators and fixtures for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use ai_client::{CompletionClient, CompletionRequest};
use marketbrief_common::{Article, Draft, Tier};

use crate::gatherer::{SearchHit, WebSearcher};
use crate::publisher::{Provenance, Publisher};

pub fn article(domain: &str, title: &str, body: &str, tier: Tier) -> Article {
    Article {
        id: Uuid::new_v4(),
        url: format!("https://{domain}/{title}"),
        title: title.to_string(),
        body: body.to_string(),
        source_domain: domain.to_string(),
        tier,
        fetched_at: Utc::now(),
    }
}

// --- Search mock ---

/// Searcher with canned results per query.
#[derive(Default)]
pub struct StaticSearcher {
    hits: HashMap<String, Vec<SearchHit>>,
    failures: HashSet<String>,
}

impl StaticSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(query.to_string(), hits);
        self
    }

    pub fn with_failure(mut self, query: &str) -> Self {
        self.failures.insert(query.to_string());
        self
    }
}

#[async_trait]
impl WebSearcher for StaticSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        if self.failures.contains(query) {
            return Err(anyhow!("simulated search failure"));
        }
        let mut hits = self.hits.get(query).cloned().unwrap_or_default();
        hits.truncate(max_results);
        Ok(hits)
    }
}

// --- Completion mock ---

/// Completion collaborator that replays a fixed script of responses and
/// records every request it receives.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Concatenated text of one recorded call, for prompt assertions.
    pub fn call_text(&self, index: usize) -> String {
        let calls = self.calls.lock().unwrap();
        calls[index]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completion exhausted"))
    }
}

// --- Publisher mock ---

/// Publisher that records drafts instead of writing files.
#[derive(Default)]
pub struct MemoryPublisher {
    pub published: Mutex<Vec<Draft>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, draft: &Draft, _provenance: &Provenance<'_>) -> Result<PathBuf> {
        self.published.lock().unwrap().push(draft.clone());
        Ok(PathBuf::from(format!("memory://briefing-v{}.md", draft.version)))
    }
}
