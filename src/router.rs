//! Routing and session engine
//!
//! Maps incoming text events to targets via cancel phrases, per-source
//! sessions, and wake-phrase matching, then fans matched events out over
//! HTTP. Sessions are keyed by `source_id`; at most one exists per source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::forwarder::{make_event_id, ForwardOutcome, ForwardPayload, TargetForwarder};
use crate::registry::{normalize as normalize_phrase, Registry};
use crate::Result;

/// An incoming text event from a source (microphone or `/text`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEvent {
    pub source_id: String,
    #[serde(default)]
    pub room: Option<String>,
    /// Unix milliseconds
    pub ts: i64,
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// What the router did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    SessionOpen,
    SessionContinue,
    SessionEnd,
    Ignored,
}

/// The router's verdict for one event
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub handled: bool,
    pub routed_to: Option<String>,
    pub mode: DecisionMode,
    pub session: Option<SessionSnapshot>,
    pub forwarded: bool,
    pub reason: String,
}

impl RouteDecision {
    fn ignored(reason: &str) -> Self {
        Self {
            handled: false,
            routed_to: None,
            mode: DecisionMode::Ignored,
            session: None,
            forwarded: false,
            reason: reason.to_string(),
        }
    }
}

/// A per-source open conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub target: String,
    pub source_id: String,
    pub room: Option<String>,
    /// Unix milliseconds
    pub opened_at: i64,
    /// Unix milliseconds
    pub last_ts: i64,
}

/// Serializable view of a session for decisions and the sessions endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub target: String,
    pub source_id: String,
    pub room: Option<String>,
    pub last_ts: i64,
    pub expires_in_s: i64,
}

/// Per-source session map with TTL expiry
pub struct SessionManager {
    ttl_seconds: i64,
    by_source: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: i64::try_from(ttl_seconds).unwrap_or(25),
            by_source: Mutex::new(HashMap::new()),
        }
    }

    /// Live session for a source; expired ones are removed on the way out
    #[must_use]
    pub fn get(&self, source_id: &str, now_ms: i64) -> Option<Session> {
        let Ok(mut map) = self.by_source.lock() else {
            return None;
        };

        match map.get(source_id) {
            Some(session) if now_ms - session.last_ts > self.ttl_seconds * 1000 => {
                tracing::debug!(source = source_id, "session expired");
                map.remove(source_id);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    /// Open a session, replacing any existing one for the source
    pub fn open(&self, source_id: &str, target: &str, room: Option<&str>, ts: i64) -> Session {
        let session = Session {
            id: format!("sess-{}", &Uuid::new_v4().simple().to_string()[..8]),
            target: target.to_string(),
            source_id: source_id.to_string(),
            room: room.map(String::from),
            opened_at: ts,
            last_ts: ts,
        };

        if let Ok(mut map) = self.by_source.lock() {
            map.insert(source_id.to_string(), session.clone());
        }
        tracing::debug!(source = source_id, target_name = target, session = %session.id, "session opened");
        session
    }

    /// Refresh a session's last-activity timestamp
    pub fn touch(&self, source_id: &str, ts: i64, room: Option<&str>) -> Option<Session> {
        let mut map = self.by_source.lock().ok()?;
        let session = map.get_mut(source_id)?;
        session.last_ts = ts;
        if let Some(room) = room {
            session.room = Some(room.to_string());
        }
        Some(session.clone())
    }

    /// Close a session; returns whether one existed
    pub fn end(&self, source_id: &str) -> bool {
        self.by_source
            .lock()
            .map(|mut map| map.remove(source_id).is_some())
            .unwrap_or(false)
    }

    /// All live sessions
    #[must_use]
    pub fn all(&self, now_ms: i64) -> Vec<Session> {
        let Ok(mut map) = self.by_source.lock() else {
            return Vec::new();
        };

        map.retain(|_, s| now_ms - s.last_ts <= self.ttl_seconds * 1000);
        map.values().cloned().collect()
    }

    /// Remove expired sessions; returns how many were dropped
    pub fn sweep(&self, now_ms: i64) -> usize {
        let Ok(mut map) = self.by_source.lock() else {
            return 0;
        };

        let before = map.len();
        map.retain(|_, s| now_ms - s.last_ts <= self.ttl_seconds * 1000);
        before - map.len()
    }

    /// Snapshot with remaining lifetime for wire output
    #[must_use]
    pub fn snapshot(&self, session: &Session, now_ms: i64) -> SessionSnapshot {
        let expires_in_s =
            (self.ttl_seconds - (now_ms - session.last_ts) / 1000).max(0);
        SessionSnapshot {
            id: session.id.clone(),
            target: session.target.clone(),
            source_id: session.source_id.clone(),
            room: session.room.clone(),
            last_ts: session.last_ts,
            expires_in_s,
        }
    }
}

/// Router policy knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Normalized phrases that end a session
    pub cancel_phrases: Vec<String>,
    pub session_ttl_seconds: u64,
    /// Remove the matched wake phrase from forwarded text
    pub strip_trigger: bool,
}

/// The routing engine
pub struct Router {
    registry: Arc<Registry>,
    forwarder: TargetForwarder,
    sessions: SessionManager,
    cancel_phrases: Vec<String>,
    strip_trigger: bool,
    /// Most-recently-used target, for active-mode routing without a session
    last_target: Mutex<Option<String>>,
}

/// Lowercase, strip punctuation, collapse whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    normalize_phrase(&cleaned)
}

impl Router {
    #[must_use]
    pub fn new(registry: Arc<Registry>, forwarder: TargetForwarder, config: RouterConfig) -> Self {
        let cancel_phrases = config
            .cancel_phrases
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            registry,
            forwarder,
            sessions: SessionManager::new(config.session_ttl_seconds),
            cancel_phrases,
            strip_trigger: config.strip_trigger,
            last_target: Mutex::new(None),
        }
    }

    /// The session map, for the sessions endpoints and the sweeper
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Route one event in trigger semantics
    ///
    /// Decision order: cancel phrase, live session, wake-phrase scan, ignore.
    ///
    /// # Errors
    ///
    /// Returns error only on registry read failures; delivery failures are
    /// folded into the decision.
    pub async fn route(&self, event: &TextEvent) -> Result<RouteDecision> {
        let normalized = normalize(&event.text);

        if let Some(decision) = self.check_cancel(event, &normalized) {
            return Ok(decision);
        }

        if let Some(decision) = self.continue_session(event).await? {
            return Ok(decision);
        }

        if let Some(decision) = self.match_wake_phrase(event, &normalized).await? {
            return Ok(decision);
        }

        Ok(RouteDecision::ignored("no_match"))
    }

    /// Route one event in active-mode semantics
    ///
    /// The wake-phrase requirement is waived: with no live session and no
    /// matching phrase, the event goes to the most-recently-used target.
    ///
    /// # Errors
    ///
    /// Returns error only on registry read failures
    pub async fn route_active(&self, event: &TextEvent) -> Result<RouteDecision> {
        let normalized = normalize(&event.text);

        if let Some(decision) = self.check_cancel(event, &normalized) {
            return Ok(decision);
        }

        if let Some(decision) = self.continue_session(event).await? {
            return Ok(decision);
        }

        // An explicit wake phrase still picks its own target
        if let Some(decision) = self.match_wake_phrase(event, &normalized).await? {
            return Ok(decision);
        }

        let mru = self
            .last_target
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        let Some(target_name) = mru else {
            return Ok(RouteDecision::ignored("no_target"));
        };
        let Some(target) = self.registry.get(&target_name)? else {
            return Ok(RouteDecision::ignored("no_target"));
        };

        let session = self
            .sessions
            .open(&event.source_id, &target.name, event.room.as_deref(), event.ts);
        let (forwarded, reason) = self
            .deliver(&target, event, &event.text, &session, "active_mode")
            .await;

        Ok(RouteDecision {
            handled: true,
            routed_to: Some(target.name),
            mode: DecisionMode::SessionOpen,
            session: Some(self.sessions.snapshot(&session, event.ts)),
            forwarded,
            reason,
        })
    }

    /// Step 1: cancel phrases end any session and are never forwarded
    fn check_cancel(&self, event: &TextEvent, normalized: &str) -> Option<RouteDecision> {
        let matched = self
            .cancel_phrases
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()));
        if !matched {
            return None;
        }

        self.sessions.end(&event.source_id);
        tracing::info!(source = %event.source_id, "session cancelled by phrase");
        Some(RouteDecision {
            handled: true,
            routed_to: None,
            mode: DecisionMode::SessionEnd,
            session: None,
            forwarded: false,
            reason: "cancel_phrase".to_string(),
        })
    }

    /// Step 2: a live session routes the event to its target
    async fn continue_session(&self, event: &TextEvent) -> Result<Option<RouteDecision>> {
        let Some(session) = self.sessions.get(&event.source_id, event.ts) else {
            return Ok(None);
        };

        let Some(target) = self.registry.get(&session.target)? else {
            // Target was deleted out from under the session
            self.sessions.end(&event.source_id);
            tracing::warn!(
                source = %event.source_id,
                target_name = %session.target,
                "session target unregistered, ending session"
            );
            return Ok(Some(RouteDecision {
                handled: false,
                routed_to: None,
                mode: DecisionMode::SessionEnd,
                session: None,
                forwarded: false,
                reason: "target_unregistered".to_string(),
            }));
        };

        let session = self
            .sessions
            .touch(&event.source_id, event.ts, event.room.as_deref())
            .unwrap_or(session);
        let (forwarded, reason) = self
            .deliver(&target, event, &event.text, &session, "session")
            .await;

        Ok(Some(RouteDecision {
            handled: true,
            routed_to: Some(target.name),
            mode: DecisionMode::SessionContinue,
            session: Some(self.sessions.snapshot(&session, event.ts)),
            forwarded,
            reason,
        }))
    }

    /// Step 3: longest-phrase-first wake scan opens or replaces a session
    async fn match_wake_phrase(
        &self,
        event: &TextEvent,
        normalized: &str,
    ) -> Result<Option<RouteDecision>> {
        let index = self.registry.phrase_map();
        let Some((phrase, target_name)) = index.find(normalized) else {
            return Ok(None);
        };
        let phrase = phrase.to_string();

        let Some(target) = self.registry.get(target_name)? else {
            tracing::warn!(target_name, "phrase index points at missing target");
            return Ok(Some(RouteDecision::ignored("trigger_target_missing")));
        };

        let session = self
            .sessions
            .open(&event.source_id, &target.name, event.room.as_deref(), event.ts);

        let text = if self.strip_trigger {
            strip_phrase(&event.text, &phrase)
        } else {
            event.text.clone()
        };
        let base_reason = format!("trigger_phrase:{phrase}");
        let (forwarded, reason) = self
            .deliver(&target, event, &text, &session, &base_reason)
            .await;

        Ok(Some(RouteDecision {
            handled: true,
            routed_to: Some(target.name),
            mode: DecisionMode::SessionOpen,
            session: Some(self.sessions.snapshot(&session, event.ts)),
            forwarded,
            reason,
        }))
    }

    /// Post to the target and fold the outcome into (forwarded, reason)
    async fn deliver(
        &self,
        target: &crate::db::Target,
        event: &TextEvent,
        text: &str,
        session: &Session,
        base_reason: &str,
    ) -> (bool, String) {
        if let Ok(mut guard) = self.last_target.lock() {
            *guard = Some(target.name.clone());
        }

        let payload = ForwardPayload {
            event_id: make_event_id(),
            source_id: event.source_id.clone(),
            room: event.room.clone().or_else(|| session.room.clone()),
            ts: event.ts,
            text: text.to_string(),
            confidence: event.confidence,
            session_id: session.id.clone(),
            target: target.name.clone(),
            reason: base_reason.to_string(),
        };

        match self.forwarder.forward(&target.listen_url(), &payload).await {
            ForwardOutcome::Delivered => (true, base_reason.to_string()),
            ForwardOutcome::Failed(kind) => (false, format!("target_error:{kind}")),
        }
    }
}

/// Remove the first case-insensitive occurrence of a phrase from raw text
fn strip_phrase(text: &str, phrase: &str) -> String {
    let lower = text.to_lowercase();
    let Some(idx) = lower.find(&phrase.to_lowercase()) else {
        return text.to_string();
    };

    let before = &text[..idx];
    let after = &text[idx + phrase.len()..];
    let joined = format!("{before} {after}");
    let stripped = joined
        .trim()
        .trim_start_matches([' ', ',', ':', '-'])
        .trim()
        .to_string();

    if stripped.is_empty() {
        text.to_string()
    } else {
        stripped
    }
}
