use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Session-wide state shared between the router, the engine, and the
/// agents. Everything here is cheap to read from the polling loop.
#[derive(Debug)]
pub struct SessionSignals {
    session_in_progress: AtomicBool,
    session_completed: AtomicBool,
    user_message_count: AtomicUsize,
    last_user_message: Mutex<Instant>,
}

impl SessionSignals {
    pub fn new() -> Self {
        Self {
            session_in_progress: AtomicBool::new(true),
            session_completed: AtomicBool::new(false),
            user_message_count: AtomicUsize::new(0),
            last_user_message: Mutex::new(Instant::now()),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.session_in_progress.load(Ordering::SeqCst)
    }

    /// Flip the session out of progress. The router drops every message
    /// posted after this.
    pub fn end_session(&self) {
        self.session_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn mark_completed(&self) {
        self.session_completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.session_completed.load(Ordering::SeqCst)
    }

    /// Called by the router on every fanned-out user message.
    pub fn note_user_message(&self) {
        self.user_message_count.fetch_add(1, Ordering::SeqCst);
        *self.last_user_message.lock().expect("signals lock poisoned") = Instant::now();
    }

    pub fn user_message_count(&self) -> usize {
        self.user_message_count.load(Ordering::SeqCst)
    }

    /// How long since the user last said anything (or since session start).
    pub fn idle_time(&self) -> Duration {
        self.last_user_message
            .lock()
            .expect("signals lock poisoned")
            .elapsed()
    }
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_progress_and_uncompleted() {
        let signals = SessionSignals::new();
        assert!(signals.is_in_progress());
        assert!(!signals.is_completed());
    }

    #[test]
    fn end_session_flips_progress_only() {
        let signals = SessionSignals::new();
        signals.end_session();
        assert!(!signals.is_in_progress());
        assert!(!signals.is_completed());
        signals.mark_completed();
        assert!(signals.is_completed());
    }

    #[test]
    fn user_messages_are_counted() {
        let signals = SessionSignals::new();
        signals.note_user_message();
        signals.note_user_message();
        assert_eq!(signals.user_message_count(), 2);
    }
}
