use parking_lot::Mutex;
use std::fmt;

use crate::{TransactionError, TransactionResult};

/// Lifecycle of a unit-of-work session.
///
/// `Open` moves to `Resolving` when a terminal action starts, then to
/// exactly one of the resolved states. There is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// A commit or rollback is in flight.
    Resolving,
    Committed,
    RolledBack,
    /// The terminal action reached the store and failed.
    FailedToResolve,
}

impl SessionState {
    pub fn is_open(self) -> bool {
        self == SessionState::Open
    }

    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::RolledBack | SessionState::FailedToResolve
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Resolving => "resolving",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled back",
            SessionState::FailedToResolve => "failed to resolve",
        };
        f.write_str(name)
    }
}

/// State shared between a session and the execution context its
/// repositories run against.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<SessionState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Open),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn ensure_open(&self) -> TransactionResult<()> {
        match self.state() {
            SessionState::Open => Ok(()),
            state => Err(TransactionError::Closed(state)),
        }
    }

    /// Claim the single terminal action. Returns the current state if
    /// another action already claimed it.
    pub(crate) fn try_begin_resolve(&self) -> Result<(), SessionState> {
        let mut state = self.state.lock();
        if *state != SessionState::Open {
            return Err(*state);
        }
        *state = SessionState::Resolving;
        Ok(())
    }

    /// Like [`Lifecycle::try_begin_resolve`], but the claim is held by the
    /// returned [`Resolution`]. Dropping it unfinished moves the session to
    /// `fallback`, so an abandoned commit or rollback never leaves the
    /// session stuck in `Resolving`.
    pub(crate) fn begin_resolve(
        &self,
        fallback: SessionState,
    ) -> Result<Resolution<'_>, SessionState> {
        self.try_begin_resolve()?;
        Ok(Resolution {
            lifecycle: self,
            fallback,
            finished: false,
        })
    }

    pub(crate) fn finish(&self, outcome: SessionState) {
        debug_assert!(outcome.is_resolved());
        *self.state.lock() = outcome;
    }
}

/// A claimed terminal action in progress.
pub(crate) struct Resolution<'a> {
    lifecycle: &'a Lifecycle,
    fallback: SessionState,
    finished: bool,
}

impl Resolution<'_> {
    pub(crate) fn finish(mut self, outcome: SessionState) {
        self.lifecycle.finish(outcome);
        self.finished = true;
    }
}

impl Drop for Resolution<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.lifecycle.finish(self.fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_first_resolve_wins() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.try_begin_resolve().is_ok());
        assert_eq!(lifecycle.try_begin_resolve(), Err(SessionState::Resolving));

        lifecycle.finish(SessionState::Committed);
        assert_eq!(lifecycle.try_begin_resolve(), Err(SessionState::Committed));
    }

    #[test]
    fn test_ensure_open_rejects_after_resolution() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_open().is_ok());

        lifecycle.try_begin_resolve().unwrap();
        assert!(matches!(
            lifecycle.ensure_open(),
            Err(TransactionError::Closed(SessionState::Resolving))
        ));

        lifecycle.finish(SessionState::RolledBack);
        assert!(matches!(
            lifecycle.ensure_open(),
            Err(TransactionError::Closed(SessionState::RolledBack))
        ));
    }

    #[test]
    fn test_abandoned_resolution_falls_back() {
        let lifecycle = Lifecycle::new();
        let resolution = lifecycle
            .begin_resolve(SessionState::FailedToResolve)
            .unwrap();
        assert_eq!(lifecycle.state(), SessionState::Resolving);
        assert!(lifecycle.begin_resolve(SessionState::RolledBack).is_err());

        drop(resolution);
        assert_eq!(lifecycle.state(), SessionState::FailedToResolve);
    }

    #[test]
    fn test_finished_resolution_keeps_outcome() {
        let lifecycle = Lifecycle::new();
        lifecycle
            .begin_resolve(SessionState::RolledBack)
            .unwrap()
            .finish(SessionState::Committed);
        assert_eq!(lifecycle.state(), SessionState::Committed);
    }

    #[test]
    fn test_resolved_states() {
        assert!(!SessionState::Open.is_resolved());
        assert!(!SessionState::Resolving.is_resolved());
        assert!(SessionState::Committed.is_resolved());
        assert!(SessionState::FailedToResolve.is_resolved());
        assert_eq!(SessionState::FailedToResolve.to_string(), "failed to resolve");
    }
}
