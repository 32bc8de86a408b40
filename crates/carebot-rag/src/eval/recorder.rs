//! Chain call records and the per-app leaderboard

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::feedback::{FeedbackKind, FeedbackProvider};
use crate::chain::{ConversationalOutput, RetrievalOutput};
use crate::usage::TokenUsage;

/// What the recorder needs to know about a chain result.
pub trait Recordable {
    fn answer(&self) -> &str;
    fn contexts(&self) -> Vec<String>;
    fn usage(&self) -> TokenUsage;
}

impl Recordable for ConversationalOutput {
    fn answer(&self) -> &str {
        &self.answer
    }

    fn contexts(&self) -> Vec<String> {
        self.source_documents.iter().map(|d| d.page_content.clone()).collect()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }
}

impl Recordable for RetrievalOutput {
    fn answer(&self) -> &str {
        &self.answer
    }

    fn contexts(&self) -> Vec<String> {
        self.context.iter().map(|d| d.page_content.clone()).collect()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Pending,
    Done { score: f64 },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub app_id: String,
    pub input: String,
    pub output: String,
    pub contexts: Vec<String>,
    pub latency_ms: u64,
    pub usage: TokenUsage,
    pub timestamp: DateTime<Utc>,
    /// Keyed by feedback display name.
    pub feedback: BTreeMap<String, FeedbackOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub app_id: String,
    pub records: usize,
    /// Mean of completed scores per feedback name.
    pub feedback: BTreeMap<String, f64>,
    pub mean_latency_ms: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// All evaluation records of this process.
#[derive(Default)]
pub struct EvalStore {
    records: RwLock<Vec<Record>>,
}

impl EvalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.records.write().clear();
    }

    pub fn insert(&self, record: Record) {
        self.records.write().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Record> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Records in insertion order, optionally for one app only.
    pub fn records(&self, app_id: Option<&str>) -> Vec<Record> {
        self.records
            .read()
            .iter()
            .filter(|r| app_id.map_or(true, |id| r.app_id == id))
            .cloned()
            .collect()
    }

    /// Returns false when no record has `id`, e.g. after a reset.
    pub fn set_feedback(&self, id: Uuid, kind: FeedbackKind, outcome: FeedbackOutcome) -> bool {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.feedback.insert(kind.name().to_string(), outcome);
                true
            }
            None => {
                tracing::warn!(record_id = %id, feedback = kind.name(), "Dropping feedback for unknown record");
                false
            }
        }
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardRow> {
        let records = self.records.read();
        let mut by_app: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
        for record in records.iter() {
            by_app.entry(record.app_id.as_str()).or_default().push(record);
        }

        by_app
            .into_iter()
            .map(|(app_id, rows)| {
                let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
                let mut usage = TokenUsage::default();
                let mut latency = 0u64;

                for record in &rows {
                    latency += record.latency_ms;
                    usage += &record.usage;
                    for (name, outcome) in &record.feedback {
                        if let FeedbackOutcome::Done { score } = outcome {
                            let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                            entry.0 += score;
                            entry.1 += 1;
                        }
                    }
                }

                LeaderboardRow {
                    app_id: app_id.to_string(),
                    records: rows.len(),
                    feedback: sums
                        .into_iter()
                        .map(|(name, (sum, n))| (name, sum / n as f64))
                        .collect(),
                    mean_latency_ms: latency as f64 / rows.len() as f64,
                    total_tokens: usage.total_tokens,
                    total_cost: usage.total_cost,
                }
            })
            .collect()
    }
}

/// Result of a recorded chain call. `feedback` completes once every
/// feedback has been written back to the record.
pub struct Recorded<T> {
    pub output: T,
    pub record_id: Uuid,
    pub feedback: Option<JoinHandle<()>>,
}

/// Wraps chain calls: times them, stores a record and grades it in the background.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<EvalStore>,
    provider: Option<FeedbackProvider>,
    kinds: Vec<FeedbackKind>,
}

impl Recorder {
    /// Without a provider, calls are recorded but never graded.
    pub fn new(store: Arc<EvalStore>, provider: Option<FeedbackProvider>) -> Self {
        Self {
            store,
            provider,
            kinds: FeedbackKind::all().to_vec(),
        }
    }

    pub fn store(&self) -> &Arc<EvalStore> {
        &self.store
    }

    pub async fn record<T, F>(&self, app_id: &str, input: &str, call: F) -> Result<Recorded<T>>
    where
        T: Recordable,
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let output = call.await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let pending = if self.provider.is_some() {
            self.kinds
                .iter()
                .map(|k| (k.name().to_string(), FeedbackOutcome::Pending))
                .collect()
        } else {
            BTreeMap::new()
        };

        let record = Record {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            input: input.to_string(),
            output: output.answer().to_string(),
            contexts: output.contexts(),
            latency_ms,
            usage: output.usage(),
            timestamp: Utc::now(),
            feedback: pending,
        };
        let record_id = record.id;
        tracing::debug!(app_id = %app_id, record_id = %record_id, latency_ms, "Recorded chain call");

        let question = record.input.clone();
        let answer = record.output.clone();
        let contexts = record.contexts.clone();
        // Must be visible before the grading task writes back to it.
        self.store.insert(record);

        let feedback = self.provider.clone().map(|provider| {
            let store = self.store.clone();
            let kinds = self.kinds.clone();

            tokio::spawn(async move {
                for kind in kinds {
                    let outcome = match provider.evaluate(kind, &question, &answer, &contexts).await {
                        Ok(score) => FeedbackOutcome::Done { score },
                        Err(e) => {
                            tracing::warn!(feedback = kind.name(), "Feedback failed: {:#}", e);
                            FeedbackOutcome::Failed {
                                error: format!("{:#}", e),
                            }
                        }
                    };
                    store.set_feedback(record_id, kind, outcome);
                }
            })
        });

        Ok(Recorded {
            output,
            record_id,
            feedback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLLM;
    use crate::types::Document;
    use anyhow::anyhow;

    fn output(answer: &str, contexts: &[&str]) -> ConversationalOutput {
        ConversationalOutput {
            question: "q".into(),
            generated_question: "q".into(),
            answer: answer.into(),
            source_documents: contexts.iter().map(|c| Document::new(*c)).collect(),
            usage: TokenUsage::new(100, 20),
        }
    }

    #[tokio::test]
    async fn test_feedbacks_are_written_back() {
        // qa relevance, one context, no answer, groundedness
        let llm = ScriptedLLM::text(&["8", "6", "10", "not sure"]);
        let store = Arc::new(EvalStore::new());
        let recorder = Recorder::new(store.clone(), Some(FeedbackProvider::new(llm)));

        let recorded = recorder
            .record("app-a", "What is flu?", async { Ok(output("A virus.", &["Flu is viral."])) })
            .await
            .unwrap();
        assert_eq!(recorded.output.answer, "A virus.");
        recorded.feedback.unwrap().await.unwrap();

        let record = store.get(recorded.record_id).unwrap();
        assert_eq!(record.feedback["Relevance between Q/A"], FeedbackOutcome::Done { score: 0.8 });
        assert_eq!(record.feedback["Relevance between Q and Context"], FeedbackOutcome::Done { score: 0.6 });
        assert_eq!(record.feedback["Accuracy between Q/A"], FeedbackOutcome::Done { score: 1.0 });
        assert!(matches!(record.feedback["Groundedness"], FeedbackOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_failed_call_is_not_recorded() {
        let store = Arc::new(EvalStore::new());
        let recorder = Recorder::new(store.clone(), None);

        let result = recorder
            .record::<ConversationalOutput, _>("app-a", "q", async { Err(anyhow!("provider down")) })
            .await;
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_leaderboard_groups_by_app() {
        let store = Arc::new(EvalStore::new());
        let recorder = Recorder::new(store.clone(), None);

        for app in ["app-b", "app-a", "app-b"] {
            let recorded = recorder.record(app, "q", async { Ok(output("a", &[])) }).await.unwrap();
            assert!(recorded.feedback.is_none());
            assert!(store.set_feedback(recorded.record_id, FeedbackKind::NoAnswer, FeedbackOutcome::Done { score: 0.5 }));
        }
        let first_b = store.records(Some("app-b"))[0].id;
        store.set_feedback(first_b, FeedbackKind::NoAnswer, FeedbackOutcome::Done { score: 1.0 });

        let board = store.leaderboard();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].app_id, "app-a");
        assert_eq!(board[1].records, 2);
        assert_eq!(board[1].feedback["Accuracy between Q/A"], 0.75);
        assert_eq!(board[1].total_tokens, 240);

        store.reset();
        assert!(store.leaderboard().is_empty());
        assert!(!store.set_feedback(first_b, FeedbackKind::NoAnswer, FeedbackOutcome::Done { score: 1.0 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_feedbacks_land_on_multi_thread_runtime() {
        let store = Arc::new(EvalStore::new());

        let mut handles = Vec::new();
        for _ in 0..200 {
            let llm = ScriptedLLM::text(&["8", "6", "10", "7"]);
            let recorder = Recorder::new(store.clone(), Some(FeedbackProvider::new(llm)));
            let recorded = recorder
                .record("app-a", "What is flu?", async { Ok(output("A virus.", &["Flu is viral."])) })
                .await
                .unwrap();
            handles.push((recorded.record_id, recorded.feedback.unwrap()));
        }

        for (id, handle) in handles {
            handle.await.unwrap();
            let record = store.get(id).unwrap();
            assert_eq!(record.feedback.len(), 4);
            assert!(record
                .feedback
                .values()
                .all(|outcome| matches!(outcome, FeedbackOutcome::Done { .. })));
        }

        let board = store.leaderboard();
        assert_eq!(board[0].records, 200);
        assert!((board[0].feedback["Groundedness"] - 0.7).abs() < 1e-9);
    }
}
