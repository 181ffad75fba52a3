// src/stream_stager/mod.rs
// Ephemeral streaming-reply assembly, keyed by runId (§4.4).
//
// Lives on the Hub's single-writer executor; no locking needed. Timeouts are
// driven by the Hub's own tick rather than a per-state timer task, mirroring
// how the teacher drives its heartbeat off one ticker (`heartbeat.rs`)
// instead of one timer per connection.

use std::collections::HashMap;

use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StreamState {
    pub run_id: String,
    pub session_key: String,
    pub thread_id: Option<String>,
    pub started_at_ms: i64,
    pub buffer: String,
    pub last_chunk_at_ms: i64,
}

/// A finalized reply ready to persist and fan to clients, produced either by
/// a normal `agent.text` or by stager-driven timeout/early-text resolution.
pub struct Finalized {
    pub run_id: String,
    pub session_key: String,
    pub thread_id: Option<String>,
    pub text: String,
    pub synthetic: bool,
}

#[derive(Default)]
pub struct StreamStager {
    states: HashMap<String, StreamState>,
}

impl StreamStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `agent.stream.start`. A second start for the same `runId` is idempotent
    /// only when `(sessionKey, threadId)` matches the existing run exactly
    /// (§8 invariant 2); a start that reuses `runId` for a different
    /// session/thread is a genuine conflict, not a duplicate, and is rejected
    /// instead. Either way the existing state is left untouched — the caller
    /// doesn't need to unwind anything.
    pub fn on_stream_start(&mut self, run_id: &str, session_key: &str, thread_id: Option<String>, now_ms: i64) {
        if let Some(existing) = self.states.get(run_id) {
            if existing.session_key == session_key && existing.thread_id == thread_id {
                debug!(run_id, "duplicate agent.stream.start for the same run, ignoring (idempotent)");
            } else {
                warn!(
                    run_id,
                    existing_session_key = %existing.session_key,
                    new_session_key = %session_key,
                    "agent.stream.start reused runId for a different session/thread, rejecting"
                );
            }
            return;
        }
        self.states.insert(
            run_id.to_string(),
            StreamState {
                run_id: run_id.to_string(),
                session_key: session_key.to_string(),
                thread_id,
                started_at_ms: now_ms,
                buffer: String::new(),
                last_chunk_at_ms: now_ms,
            },
        );
    }

    /// `agent.stream.chunk`. `text` is cumulative; overwrites rather than
    /// appends. A chunk for an unknown `runId` is dropped and logged.
    pub fn on_stream_chunk(&mut self, run_id: &str, text: String, now_ms: i64) {
        match self.states.get_mut(run_id) {
            Some(state) => {
                state.buffer = text;
                state.last_chunk_at_ms = now_ms;
            }
            None => warn!(run_id, "agent.stream.chunk for unknown run, dropping"),
        }
    }

    /// `agent.stream.end`. A no-op if the run was already cleared by an
    /// earlier terminal `agent.text` (§4.4 ordering quirk).
    pub fn on_stream_end(&mut self, run_id: &str) {
        self.states.remove(run_id);
    }

    /// `agent.text`. If a matching open stream exists — by `runId` when
    /// given, else by `(sessionKey, threadId)` — it is cleared and the
    /// caller should treat this text as the stream's resolution rather than
    /// a standalone message. Returns whether a stream was cleared.
    pub fn on_agent_text(
        &mut self,
        run_id: Option<&str>,
        session_key: &str,
        thread_id: Option<&str>,
    ) -> bool {
        if let Some(run_id) = run_id {
            return self.states.remove(run_id).is_some();
        }

        let matched = self
            .states
            .values()
            .find(|s| s.session_key == session_key && s.thread_id.as_deref() == thread_id)
            .map(|s| s.run_id.clone());

        match matched {
            Some(run_id) => {
                self.states.remove(&run_id);
                true
            }
            None => false,
        }
    }

    /// Sweeps states whose last chunk is older than `timeout_secs`, emitting
    /// a synthetic terminal for each and clearing it.
    pub fn sweep_timeouts(&mut self, now_ms: i64, timeout_secs: u64) -> Vec<Finalized> {
        let timeout_ms = (timeout_secs * 1000) as i64;
        let expired: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| now_ms - s.last_chunk_at_ms > timeout_ms)
            .map(|(run_id, _)| run_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|run_id| self.states.remove(&run_id))
            .map(|s| Finalized {
                run_id: s.run_id,
                session_key: s.session_key,
                thread_id: s.thread_id,
                text: format!("{}\n[stream timed out after {}s of inactivity]", s.buffer, timeout_secs),
                synthetic: true,
            })
            .collect()
    }

    pub fn active_states(&self) -> impl Iterator<Item = &StreamState> {
        self.states.values()
    }

    pub fn get(&self, run_id: &str) -> Option<&StreamState> {
        self.states.get(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_overwrites_rather_than_appends() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", None, 0);
        stager.on_stream_chunk("r1", "hello".to_string(), 10);
        stager.on_stream_chunk("r1", "hello world".to_string(), 20);
        assert_eq!(stager.get("r1").unwrap().buffer, "hello world");
    }

    #[test]
    fn chunk_for_unknown_run_is_dropped() {
        let mut stager = StreamStager::new();
        stager.on_stream_chunk("ghost", "x".to_string(), 0);
        assert!(stager.get("ghost").is_none());
    }

    #[test]
    fn duplicate_start_with_identical_session_and_thread_is_idempotent() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", Some("t1".to_string()), 0);
        stager.on_stream_chunk("r1", "hello".to_string(), 10);

        // Same runId, same (sessionKey, threadId): a safe no-op, not a conflict.
        stager.on_stream_start("r1", "s1", Some("t1".to_string()), 20);

        let state = stager.get("r1").unwrap();
        assert_eq!(state.session_key, "s1");
        assert_eq!(state.buffer, "hello");
    }

    #[test]
    fn start_reusing_run_id_for_a_different_session_is_rejected_not_applied() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", None, 0);

        // Same runId, different sessionKey: a conflict, not a duplicate — the
        // original run's state must be left untouched (§8 invariant 2).
        stager.on_stream_start("r1", "s2", None, 10);

        let state = stager.get("r1").unwrap();
        assert_eq!(state.session_key, "s1");
    }

    #[test]
    fn agent_text_clears_stream_even_before_stream_end() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", Some("t1".to_string()), 0);
        stager.on_stream_chunk("r1", "partial".to_string(), 10);

        let cleared = stager.on_agent_text(Some("r1"), "s1", Some("t1"));
        assert!(cleared);
        assert!(stager.get("r1").is_none());

        // A late stream.end for the same run is then a safe no-op.
        stager.on_stream_end("r1");
    }

    #[test]
    fn agent_text_falls_back_to_session_and_thread_match_without_run_id() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", Some("t1".to_string()), 0);

        let cleared = stager.on_agent_text(None, "s1", Some("t1"));
        assert!(cleared);
    }

    #[test]
    fn sweep_timeouts_finalizes_stale_runs_as_synthetic() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", None, 0);
        stager.on_stream_chunk("r1", "buffered".to_string(), 0);

        let finalized = stager.sweep_timeouts(70_000, 60);
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].synthetic);
        assert!(finalized[0].text.contains("buffered"));
        assert!(stager.get("r1").is_none());
    }

    #[test]
    fn sweep_timeouts_leaves_recently_active_runs_alone() {
        let mut stager = StreamStager::new();
        stager.on_stream_start("r1", "s1", None, 0);
        stager.on_stream_chunk("r1", "buffered".to_string(), 65_000);

        let finalized = stager.sweep_timeouts(70_000, 60);
        assert!(finalized.is_empty());
        assert!(stager.get("r1").is_some());
    }
}
