//! Per-browser chat sessions.

use carebot_rag::chat::{ChatHistory, ChatTurn, ExchangeHistory, TurnRole};
use carebot_rag::{ChatMessage, UsageTracker};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// The chat pages of the UI. Each keeps its own transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
    Retriever,
    HistoryAware,
    Conversational,
    Agent,
}

impl Page {
    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Retriever => "retriever",
            Page::HistoryAware => "history-aware",
            Page::Conversational => "conversational",
            Page::Agent => "agent",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Page {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retriever" => Ok(Page::Retriever),
            "history-aware" => Ok(Page::HistoryAware),
            "conversational" => Ok(Page::Conversational),
            "agent" => Ok(Page::Agent),
            other => Err(format!("Unknown page: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageState {
    pub history: ChatHistory,
    /// Question/answer pairs fed to the conversational chain.
    pub exchanges: ExchangeHistory,
    pub usage: UsageTracker,
}

impl PageState {
    fn new(max_messages: usize) -> Self {
        Self {
            history: ChatHistory::new(max_messages),
            exchanges: ExchangeHistory::new(max_messages),
            usage: UsageTracker::new(),
        }
    }

    /// Record a completed exchange.
    pub fn push_exchange(&mut self, question: &str, answer: &str) {
        self.history.push(ChatTurn::user(question));
        self.history.push(ChatTurn::assistant(answer));
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pages: HashMap<Page, PageState>,
}

impl Session {
    fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_seen: now,
            pages: HashMap::new(),
        }
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_seen)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TurnRole,
    pub content: String,
}

pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    max_messages: usize,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_messages: usize, idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_messages,
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Return `id` if given, creating the session on first use; mint a new
    /// id otherwise.
    pub fn resolve(&self, id: Option<Uuid>) -> Uuid {
        let id = id.unwrap_or_else(Uuid::new_v4);
        if !self.sessions.contains_key(&id) {
            while self.sessions.len() >= self.max_sessions {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        let mut session = self.sessions.entry(id).or_insert_with(|| {
            tracing::debug!(session_id = %id, "Created session");
            Session::new(id)
        });
        session.last_seen = Utc::now();
        id
    }

    /// Drop sessions idle longer than the configured TTL as of `now`.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.idle_for(now) < self.idle_ttl);
        before.saturating_sub(self.sessions.len())
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| *entry.key());
        match oldest {
            Some(id) => {
                tracing::debug!(session_id = %id, "Evicted session to stay under the cap");
                self.sessions.remove(&id).is_some()
            }
            None => false,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `f` against one page of a session, creating either on demand.
    /// The session entry stays locked while `f` runs.
    pub fn with_page<R>(&self, id: Uuid, page: Page, f: impl FnOnce(&mut PageState) -> R) -> R {
        let max_messages = self.max_messages;
        let mut session = self.sessions.entry(id).or_insert_with(|| Session::new(id));
        session.last_seen = Utc::now();
        let state = session
            .pages
            .entry(page)
            .or_insert_with(|| PageState::new(max_messages));
        f(state)
    }

    /// Prior turns of a page as chat messages.
    pub fn history_messages(&self, id: Uuid, page: Page) -> Vec<ChatMessage> {
        self.with_page(id, page, |state| state.history.to_messages())
    }

    /// Displayable transcript, or `None` for an unknown session.
    pub fn transcript(&self, id: Uuid, page: Page) -> Option<Vec<TranscriptEntry>> {
        let session = self.sessions.get(&id)?;
        Some(
            session
                .pages
                .get(&page)
                .map(|state| {
                    state
                        .history
                        .displayable()
                        .map(|(role, content)| TranscriptEntry {
                            role,
                            content: content.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        )
    }

    pub fn clear_page(&self, id: Uuid, page: Page) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.pages.remove(&page);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_messages: usize) -> SessionStore {
        SessionStore::new(max_messages, Duration::from_secs(3600), 100)
    }

    #[test]
    fn test_resolve_creates_and_reuses() {
        let store = store(25);
        let id = store.resolve(None);
        assert!(store.contains(id));
        assert_eq!(store.resolve(Some(id)), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pages_are_independent() {
        let store = store(25);
        let id = store.resolve(None);
        store.with_page(id, Page::Agent, |s| s.push_exchange("hi", "hello"));

        assert_eq!(store.transcript(id, Page::Agent).unwrap().len(), 2);
        assert!(store.transcript(id, Page::Retriever).unwrap().is_empty());
        assert!(store.transcript(Uuid::new_v4(), Page::Agent).is_none());
    }

    #[test]
    fn test_transcript_is_bounded() {
        let store = store(4);
        let id = store.resolve(None);
        for i in 0..5 {
            store.with_page(id, Page::Retriever, |s| s.push_exchange(&format!("q{}", i), "a"));
        }

        let transcript = store.transcript(id, Page::Retriever).unwrap();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].content, "q3");
    }

    #[test]
    fn test_page_parsing() {
        assert_eq!("history-aware".parse::<Page>().unwrap(), Page::HistoryAware);
        assert!("gemini".parse::<Page>().is_err());
        assert_eq!(Page::Conversational.to_string(), "conversational");
    }

    #[test]
    fn test_idle_sessions_expire() {
        let store = store(25);
        let id = store.resolve(None);
        store.with_page(id, Page::Agent, |s| s.push_exchange("hi", "hello"));

        assert_eq!(store.evict_idle(Utc::now()), 0);
        assert!(store.contains(id));

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(store.evict_idle(later), 1);
        assert!(store.is_empty());
        assert!(store.transcript(id, Page::Agent).is_none());
    }

    #[test]
    fn test_session_count_is_capped() {
        let store = SessionStore::new(25, Duration::from_secs(3600), 2);
        store.resolve(None);
        store.resolve(None);
        let third = store.resolve(None);

        assert_eq!(store.len(), 2);
        assert!(store.contains(third));
        // Reusing a live id never evicts.
        store.resolve(Some(third));
        assert_eq!(store.len(), 2);
    }
}
