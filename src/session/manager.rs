//! In-memory conversation state manager.
//!
//! Sessions live in a sharded map of individually locked sessions, so two
//! requests for the same session are serialized while different sessions
//! proceed in parallel. Map shards are never held while a session lock is
//! taken: operations clone the session handle out of the map first.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::similarity::{ExactOrEditDistance, SimilarityComparator};
use super::types::{ConversationSession, FingerprintParams, Role, SessionState, SessionView, Turn};
use crate::config::ConversationConfig;
use crate::error::{Result, WayfarerError};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::normalize::normalize_phrase;

/// Turns included in views returned by the manager.
pub const VIEW_TAIL_TURNS: usize = 10;

type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Result of [`ConversationManager::append_user_turn`].
#[derive(Debug, Clone)]
pub struct UserTurnOutcome {
    pub view: SessionView,
    /// Cache key over the context right after the append.
    pub fingerprint: Option<String>,
    /// Turns for the completion prompt, oldest first.
    pub context: Vec<Turn>,
}

/// Owns every live [`ConversationSession`].
pub struct ConversationManager {
    sessions: DashMap<String, SessionHandle>,
    config: RwLock<ConversationConfig>,
    comparator: RwLock<Arc<dyn SimilarityComparator>>,
    /// `false` when the comparator was supplied by the caller and must
    /// survive config reloads.
    default_comparator: bool,
    clock: Arc<dyn Clock>,
}

impl ConversationManager {
    /// Manager on the system clock with the default comparator.
    pub fn new(config: ConversationConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Manager on an explicit clock with the default comparator.
    pub fn with_clock(config: ConversationConfig, clock: Arc<dyn Clock>) -> Self {
        let comparator: Arc<dyn SimilarityComparator> =
            Arc::new(ExactOrEditDistance::new(config.similarity_threshold));
        Self {
            sessions: DashMap::new(),
            config: RwLock::new(config),
            comparator: RwLock::new(comparator),
            default_comparator: true,
            clock,
        }
    }

    /// Manager with a caller-supplied similarity comparator.
    pub fn with_comparator(
        config: ConversationConfig,
        clock: Arc<dyn Clock>,
        comparator: Arc<dyn SimilarityComparator>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            config: RwLock::new(config),
            comparator: RwLock::new(comparator),
            default_comparator: false,
            clock,
        }
    }

    /// Append a turn, creating the session when absent.
    ///
    /// User turns are fingerprinted into the repetition window and drive
    /// the state machine; a termination phrase ends the session and removes
    /// it from the manager. History beyond `max_history_turns` is dropped.
    ///
    /// # Errors
    ///
    /// [`WayfarerError::InvalidSessionId`] for an empty id.
    pub fn append_turn(&self, session_id: &str, role: Role, text: &str) -> Result<SessionView> {
        self.append_with(session_id, role, text, |_, _| ())
            .map(|(view, _)| view)
    }

    /// Append a user turn and, under the same session lock, compute the
    /// cache key and the prompt context that follow from it.
    ///
    /// The key covers `cache_lookback_turns` and the context holds up to
    /// `prompt_context_turns` of the history kept after truncation. Both
    /// are empty once the turn ended the session.
    ///
    /// # Errors
    ///
    /// [`WayfarerError::InvalidSessionId`] for an empty id.
    pub fn append_user_turn(
        &self,
        session_id: &str,
        text: &str,
        params: &FingerprintParams,
    ) -> Result<UserTurnOutcome> {
        let (view, derived) = self.append_with(session_id, Role::User, text, |session, config| {
            (
                session.fingerprint(config.cache_lookback_turns, params),
                session.recent_turns(config.prompt_context_turns),
            )
        })?;
        let (fingerprint, context) = match derived {
            Some((key, turns)) => (Some(key), turns),
            None => (None, Vec::new()),
        };
        Ok(UserTurnOutcome {
            view,
            fingerprint,
            context,
        })
    }

    /// Shared append path. `derive` runs on the updated session before the
    /// lock is released; it is skipped when the turn terminated the session.
    fn append_with<T>(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
        derive: impl FnOnce(&ConversationSession, &ConversationConfig) -> T,
    ) -> Result<(SessionView, Option<T>)> {
        validate_session_id(session_id)?;
        let config = self.config.read().clone();
        let comparator = self.comparator.read().clone();
        let turn = Turn::new(role, text);

        loop {
            let handle = self.get_or_create(session_id, &config);
            let mut session = handle.lock();
            if session.closed {
                // Pruned or terminated between lookup and lock; start over
                // with whatever the map holds now.
                continue;
            }

            session.last_active_ms = self.clock.now_ms();
            session.push(turn.clone());

            if role == Role::User {
                if is_phrase_in(&config.termination_phrases, text) {
                    session.state = SessionState::Terminating;
                    session.closed = true;
                    let view = session.view(VIEW_TAIL_TURNS);
                    drop(session);
                    self.sessions
                        .remove_if(session_id, |_, v| Arc::ptr_eq(v, &handle));
                    info!(session = session_id, "Session terminated by user");
                    return Ok((view, None));
                }

                let previous = session.state;
                let repeating = session.detect_repetition(comparator.as_ref());
                if !repeating && previous == SessionState::Repeating {
                    session.state = SessionState::Active;
                }
                if session.state != previous {
                    info!(
                        session = session_id,
                        from = ?previous,
                        to = ?session.state,
                        occurrences = session.repeat_occurrences,
                        "Session state changed"
                    );
                }
            }

            let dropped = session.truncate(config.max_history_turns);
            if dropped > 0 {
                debug!(session = session_id, dropped, "Truncated session history");
            }
            let derived = derive(&*session, &config);
            return Ok((session.view(VIEW_TAIL_TURNS), Some(derived)));
        }
    }

    /// Snapshot of a session, creating an empty one when absent.
    pub fn open(&self, session_id: &str) -> Result<SessionView> {
        validate_session_id(session_id)?;
        let config = self.config.read().clone();
        loop {
            let handle = self.get_or_create(session_id, &config);
            let mut session = handle.lock();
            if session.closed {
                continue;
            }
            session.last_active_ms = self.clock.now_ms();
            return Ok(session.view(VIEW_TAIL_TURNS));
        }
    }

    /// Re-evaluate repetition for the newest user turn. `None` when the
    /// session does not exist.
    pub fn detect_repetition(&self, session_id: &str) -> Result<Option<bool>> {
        let comparator = self.comparator.read().clone();
        self.with_session(session_id, |session| {
            session.detect_repetition(comparator.as_ref())
        })
    }

    /// Cache lookup key over the last `lookback` turns and `params`.
    /// `None` when the session does not exist.
    pub fn build_fingerprint(
        &self,
        session_id: &str,
        lookback: usize,
        params: &FingerprintParams,
    ) -> Result<Option<String>> {
        self.with_session(session_id, |session| session.fingerprint(lookback, params))
    }

    /// Drop the oldest turns beyond `max_turns`. Returns the number dropped,
    /// or `None` when the session does not exist.
    pub fn truncate_history(&self, session_id: &str, max_turns: usize) -> Result<Option<usize>> {
        self.with_session(session_id, |session| session.truncate(max_turns))
    }

    /// Clear history and the repetition window and return to `Active`.
    /// `None` when the session does not exist.
    pub fn reset(&self, session_id: &str) -> Result<Option<SessionView>> {
        let now = self.clock.now_ms();
        let view = self.with_session(session_id, |session| {
            session.reset(now);
            session.view(VIEW_TAIL_TURNS)
        })?;
        if view.is_some() {
            info!(session = session_id, "Session reset");
        }
        Ok(view)
    }

    /// Snapshot of a session. `None` when the session does not exist.
    pub fn get(&self, session_id: &str) -> Result<Option<SessionView>> {
        self.with_session(session_id, |session| session.view(VIEW_TAIL_TURNS))
    }

    /// Remove a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        match self.sessions.remove(session_id) {
            Some((_, handle)) => {
                handle.lock().closed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every session idle for at least `session_idle_timeout_ms`.
    ///
    /// Works from a snapshot of handles; each session is re-checked under
    /// its own lock, so a session touched concurrently survives.
    pub fn prune_idle(&self) -> usize {
        let snapshot: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut pruned = 0usize;
        for (id, handle) in snapshot {
            let mut session = handle.lock();
            if session.closed || !self.is_idle(&session) {
                continue;
            }
            session.closed = true;
            drop(session);
            if self
                .sessions
                .remove_if(&id, |_, v| Arc::ptr_eq(v, &handle))
                .is_some()
            {
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(pruned, remaining = self.sessions.len(), "Pruned idle sessions");
        }
        pruned
    }

    /// `true` if `text` is one of the configured reset phrases.
    pub fn is_reset_request(&self, text: &str) -> bool {
        is_phrase_in(&self.config.read().reset_phrases, text)
    }

    /// Replace tunables. Existing sessions pick up the new window size and
    /// threshold immediately; a default comparator is rebuilt.
    pub fn apply_config(&self, config: ConversationConfig) {
        if self.default_comparator {
            *self.comparator.write() =
                Arc::new(ExactOrEditDistance::new(config.similarity_threshold));
        }
        let handles: Vec<SessionHandle> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for handle in handles {
            handle
                .lock()
                .guard
                .reconfigure(config.fingerprint_window_size, config.repeat_match_threshold);
        }
        info!(
            window = config.fingerprint_window_size,
            repeat_threshold = config.repeat_match_threshold,
            idle_timeout_ms = config.session_idle_timeout_ms,
            "Applying conversation configuration"
        );
        *self.config.write() = config;
    }

    pub fn config(&self) -> ConversationConfig {
        self.config.read().clone()
    }

    /// Number of live sessions (idle ones not yet pruned included).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all live sessions, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // -- private helpers ---------------------------------------------------

    fn get_or_create(&self, session_id: &str, config: &ConversationConfig) -> SessionHandle {
        if let Some(existing) = self.lookup(session_id) {
            return existing;
        }
        let now = self.clock.now_ms();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session = session_id, "Creating session");
                Arc::new(Mutex::new(ConversationSession::new(
                    session_id,
                    config.fingerprint_window_size,
                    config.repeat_match_threshold,
                    now,
                )))
            })
            .clone()
    }

    /// Live handle for `session_id`. An idle-expired session is removed and
    /// reported as absent, same as if the pruner had already run.
    fn lookup(&self, session_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.get(session_id).map(|e| Arc::clone(e.value()))?;
        let mut session = handle.lock();
        if session.closed {
            return None;
        }
        if self.is_idle(&session) {
            session.closed = true;
            drop(session);
            self.sessions
                .remove_if(session_id, |_, v| Arc::ptr_eq(v, &handle));
            debug!(session = session_id, "Session idle-expired on access");
            return None;
        }
        drop(session);
        Some(handle)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ConversationSession) -> T,
    ) -> Result<Option<T>> {
        validate_session_id(session_id)?;
        let Some(handle) = self.lookup(session_id) else {
            return Ok(None);
        };
        let mut session = handle.lock();
        if session.closed {
            return Ok(None);
        }
        Ok(Some(f(&mut *session)))
    }

    fn is_idle(&self, session: &ConversationSession) -> bool {
        let timeout = self.config.read().session_idle_timeout_ms;
        self.clock.now_ms().saturating_sub(session.last_active_ms) >= timeout
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(WayfarerError::InvalidSessionId(
            "session id must not be empty".into(),
        ));
    }
    Ok(())
}

fn is_phrase_in(phrases: &[String], text: &str) -> bool {
    let normalized = normalize_phrase(text);
    !normalized.is_empty() && phrases.iter().any(|p| normalize_phrase(p) == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::similarity::ExactMatch;
    use crate::utils::clock::ManualClock;

    fn config() -> ConversationConfig {
        ConversationConfig {
            session_idle_timeout_ms: 1_000,
            fingerprint_window_size: 5,
            repeat_match_threshold: 3,
            max_history_turns: 50,
            similarity_threshold: 0.2,
            ..ConversationConfig::default()
        }
    }

    fn manager() -> (ConversationManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (ConversationManager::with_clock(config(), clock.clone()), clock)
    }

    #[test]
    fn test_append_creates_session() {
        let (mgr, _) = manager();
        let view = mgr.append_turn("chat:1", Role::User, "Hotels in Lisbon").unwrap();
        assert_eq!(view.session_id, "chat:1");
        assert_eq!(view.state, SessionState::Active);
        assert_eq!(view.total_turns, 1);
        assert_eq!(view.recent_fingerprints.len(), 1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_open_creates_empty_session() {
        let (mgr, _) = manager();
        let view = mgr.open("fresh").unwrap();
        assert!(view.history.is_empty());
        assert_eq!(view.state, SessionState::Active);
        assert_eq!(mgr.len(), 1);
        mgr.append_turn("fresh", Role::User, "hi").unwrap();
        assert_eq!(mgr.open("fresh").unwrap().total_turns, 1);
    }

    #[test]
    fn test_empty_session_id_rejected() {
        let (mgr, _) = manager();
        assert!(matches!(
            mgr.append_turn("", Role::User, "hi"),
            Err(WayfarerError::InvalidSessionId(_))
        ));
        assert!(matches!(mgr.get(" "), Err(WayfarerError::InvalidSessionId(_))));
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_unknown_session_is_none() {
        let (mgr, _) = manager();
        assert_eq!(mgr.get("nope").unwrap(), None);
        assert_eq!(mgr.reset("nope").unwrap(), None);
        assert_eq!(mgr.detect_repetition("nope").unwrap(), None);
        assert_eq!(mgr.truncate_history("nope", 1).unwrap(), None);
        assert_eq!(
            mgr.build_fingerprint("nope", 3, &FingerprintParams::new())
                .unwrap(),
            None
        );
        assert!(!mgr.remove("nope").unwrap());
    }

    #[test]
    fn test_repetition_enters_and_leaves_repeating() {
        let (mgr, _) = manager();
        let mut view = mgr.append_turn("s", Role::User, "visa for japan").unwrap();
        assert_eq!(view.state, SessionState::Active);
        mgr.append_turn("s", Role::Assistant, "You may need one.").unwrap();
        mgr.append_turn("s", Role::User, "Visa for Japan?").unwrap();
        mgr.append_turn("s", Role::Assistant, "Depends on citizenship.").unwrap();
        view = mgr.append_turn("s", Role::User, "visa for japan!!").unwrap();
        assert_eq!(view.state, SessionState::Repeating);
        assert_eq!(view.repeat_occurrences, 3);

        // Assistant turns never change the state.
        view = mgr.append_turn("s", Role::Assistant, "Want options?").unwrap();
        assert_eq!(view.state, SessionState::Repeating);

        view = mgr
            .append_turn("s", Role::User, "what about train passes in osaka")
            .unwrap();
        assert_eq!(view.state, SessionState::Active);
    }

    #[test]
    fn test_near_duplicates_trigger_repeating() {
        let (mgr, _) = manager();
        mgr.append_turn("s", Role::User, "cheapest flights to lisbon").unwrap();
        mgr.append_turn("s", Role::User, "cheapest flight to lisbon").unwrap();
        let view = mgr
            .append_turn("s", Role::User, "cheapest flihgts to lisbon")
            .unwrap();
        assert_eq!(view.state, SessionState::Repeating);
    }

    #[test]
    fn test_custom_comparator_is_used() {
        let clock = Arc::new(ManualClock::new(0));
        let mgr = ConversationManager::with_comparator(config(), clock, Arc::new(ExactMatch));
        mgr.append_turn("s", Role::User, "cheapest flights to lisbon").unwrap();
        mgr.append_turn("s", Role::User, "cheapest flight to lisbon").unwrap();
        let view = mgr
            .append_turn("s", Role::User, "cheapest flihgts to lisbon")
            .unwrap();
        assert_eq!(view.state, SessionState::Active);
    }

    #[test]
    fn test_termination_phrase_removes_session() {
        let (mgr, _) = manager();
        mgr.append_turn("s", Role::User, "museums in berlin").unwrap();
        let view = mgr.append_turn("s", Role::User, "Goodbye!").unwrap();
        assert_eq!(view.state, SessionState::Terminating);
        assert_eq!(view.last_text(), Some("Goodbye!"));
        assert_eq!(mgr.get("s").unwrap(), None);
        assert!(mgr.is_empty());

        // A new message starts a fresh session.
        let view = mgr.append_turn("s", Role::User, "hello again").unwrap();
        assert_eq!(view.total_turns, 1);
        assert_eq!(view.state, SessionState::Active);
    }

    #[test]
    fn test_termination_needs_whole_message() {
        let (mgr, _) = manager();
        let view = mgr
            .append_turn("s", Role::User, "where should I end my trip")
            .unwrap();
        assert_eq!(view.state, SessionState::Active);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_reset_matches_new_session() {
        let (mgr, _) = manager();
        for _ in 0..3 {
            mgr.append_turn("s", Role::User, "visa for japan").unwrap();
        }
        let reset = mgr.reset("s").unwrap().unwrap();
        assert_eq!(reset.state, SessionState::Active);
        assert!(reset.history.is_empty());
        assert!(reset.recent_fingerprints.is_empty());

        let after_reset = mgr.append_turn("s", Role::User, "visa for japan").unwrap();
        let (fresh_mgr, _) = manager();
        let fresh = fresh_mgr
            .append_turn("s", Role::User, "visa for japan")
            .unwrap();
        assert_eq!(after_reset.state, fresh.state);
        assert_eq!(after_reset.total_turns, fresh.total_turns);
        assert_eq!(after_reset.recent_fingerprints, fresh.recent_fingerprints);
        assert_eq!(after_reset.repeat_occurrences, fresh.repeat_occurrences);
    }

    #[test]
    fn test_build_fingerprint_deterministic_across_managers() {
        let (a, _) = manager();
        let (b, clock_b) = manager();
        clock_b.advance(500);
        for mgr in [&a, &b] {
            mgr.append_turn("s", Role::User, "Day trips from Florence").unwrap();
            mgr.append_turn("s", Role::Assistant, "Siena and Pisa.").unwrap();
        }
        let params = FingerprintParams::new().with("language", "en");
        let fa = a.build_fingerprint("s", 2, &params).unwrap().unwrap();
        let fb = b.build_fingerprint("s", 2, &params).unwrap().unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_append_user_turn_derives_key_and_context() {
        let (mgr, _) = manager();
        for i in 0..8 {
            mgr.append_turn("s", Role::User, &format!("stop number {i} on the rail pass"))
                .unwrap();
            mgr.append_turn("s", Role::Assistant, &format!("answer {i}"))
                .unwrap();
        }
        let params = FingerprintParams::new().with("language", "de");
        let outcome = mgr
            .append_user_turn("s", "night trains from vienna", &params)
            .unwrap();

        // Context reaches past the view tail, up to the kept history.
        assert_eq!(outcome.context.len(), 17);
        assert_eq!(outcome.view.history.len(), VIEW_TAIL_TURNS);
        assert_eq!(
            outcome.context.last().map(|t| t.text.as_str()),
            Some("night trains from vienna")
        );
        let lookback = mgr.config().cache_lookback_turns;
        assert_eq!(
            outcome.fingerprint,
            mgr.build_fingerprint("s", lookback, &params).unwrap()
        );
    }

    #[test]
    fn test_append_user_turn_context_bounded_by_config() {
        let clock = Arc::new(ManualClock::new(0));
        let mgr = ConversationManager::with_clock(
            ConversationConfig {
                prompt_context_turns: 4,
                ..config()
            },
            clock,
        );
        for city in ["oslo", "bergen", "tromso", "stavanger", "alesund"] {
            mgr.append_turn("s", Role::User, &format!("ferries around {city}"))
                .unwrap();
        }
        let outcome = mgr
            .append_user_turn("s", "northern lights tours", &FingerprintParams::new())
            .unwrap();
        assert_eq!(outcome.context.len(), 4);
        assert_eq!(outcome.context[0].text, "ferries around tromso");
    }

    #[test]
    fn test_append_user_turn_termination_has_no_key() {
        let (mgr, _) = manager();
        mgr.append_turn("s", Role::User, "campsites in corsica").unwrap();
        let outcome = mgr
            .append_user_turn("s", "bye", &FingerprintParams::new())
            .unwrap();
        assert!(outcome.view.is_terminating());
        assert_eq!(outcome.fingerprint, None);
        assert!(outcome.context.is_empty());
    }

    #[test]
    fn test_truncate_history_keeps_fingerprints() {
        let (mgr, _) = manager();
        for i in 0..5 {
            mgr.append_turn("s", Role::User, &format!("question {i}")).unwrap();
        }
        let before = mgr.get("s").unwrap().unwrap().recent_fingerprints;
        assert_eq!(mgr.truncate_history("s", 2).unwrap(), Some(3));
        let after = mgr.get("s").unwrap().unwrap();
        assert_eq!(after.history.len(), 2);
        assert_eq!(after.recent_fingerprints, before);
    }

    #[test]
    fn test_append_enforces_max_history() {
        let clock = Arc::new(ManualClock::new(0));
        let mgr = ConversationManager::with_clock(
            ConversationConfig {
                max_history_turns: 3,
                ..config()
            },
            clock,
        );
        for i in 0..6 {
            mgr.append_turn("s", Role::User, &format!("q{i}")).unwrap();
        }
        let view = mgr.get("s").unwrap().unwrap();
        assert_eq!(view.history.len(), 3);
        assert_eq!(view.total_turns, 6);
        assert_eq!(view.history[0].text, "q3");
    }

    #[test]
    fn test_idle_sessions_pruned() {
        let (mgr, clock) = manager();
        mgr.append_turn("old", Role::User, "hi").unwrap();
        clock.advance(600);
        mgr.append_turn("fresh", Role::User, "hi").unwrap();
        clock.advance(500);

        assert_eq!(mgr.prune_idle(), 1);
        assert_eq!(mgr.session_ids(), vec!["fresh".to_string()]);
        assert_eq!(mgr.get("old").unwrap(), None);
        assert_eq!(mgr.prune_idle(), 0);
    }

    #[test]
    fn test_idle_session_not_found_before_prune() {
        let (mgr, clock) = manager();
        mgr.append_turn("s", Role::User, "hi").unwrap();
        clock.advance(1_000);
        assert_eq!(mgr.get("s").unwrap(), None);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_append_keeps_session_alive() {
        let (mgr, clock) = manager();
        for _ in 0..5 {
            mgr.append_turn("s", Role::User, "still here").unwrap();
            clock.advance(900);
        }
        assert_eq!(mgr.prune_idle(), 0);
        assert_eq!(mgr.get("s").unwrap().unwrap().total_turns, 5);
    }

    #[test]
    fn test_reset_phrase_detection() {
        let (mgr, _) = manager();
        assert!(mgr.is_reset_request("Start over!"));
        assert!(mgr.is_reset_request("reset"));
        assert!(!mgr.is_reset_request("reset my booking"));
    }

    #[test]
    fn test_apply_config_resizes_windows() {
        let (mgr, _) = manager();
        for i in 0..5 {
            mgr.append_turn("s", Role::User, &format!("q{i}")).unwrap();
        }
        mgr.apply_config(ConversationConfig {
            fingerprint_window_size: 2,
            repeat_match_threshold: 2,
            ..config()
        });
        assert_eq!(mgr.get("s").unwrap().unwrap().recent_fingerprints.len(), 2);
        mgr.append_turn("s", Role::User, "q4").unwrap();
        assert!(mgr.get("s").unwrap().unwrap().state == SessionState::Repeating);
    }

    #[test]
    fn test_concurrent_appends_serialize_per_session() {
        let mgr = Arc::new(ConversationManager::new(ConversationConfig {
            max_history_turns: 1_000,
            ..ConversationConfig::default()
        }));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mgr = Arc::clone(&mgr);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        mgr.append_turn("shared", Role::User, &format!("t{t} m{i}"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mgr.get("shared").unwrap().unwrap().total_turns, 200);
    }
}
