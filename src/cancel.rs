use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a [`CancelSignal`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `cancel()` was called on the signal or one of its ancestors.
    Cancelled,
    /// The signal's deadline (or an ancestor's) has passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => f.write_str("cancelled"),
            CancelCause::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Cancellation and deadline signal threaded from the caller down to every
/// store call.
///
/// Clones share state: cancelling any clone cancels all of them. Child
/// signals fire when their parent fires but can be cancelled on their own
/// without affecting the parent.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    /// Effective deadline, already folded with every ancestor's deadline.
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            deadline,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl CancelSignal {
    /// A signal that only fires when `cancel()` is called.
    pub fn new() -> Self {
        Self {
            inner: Inner::new(None),
        }
    }

    /// A signal that fires once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Inner::new(Some(deadline)),
        }
    }

    /// A signal that fires after `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Derive a signal that fires when this one fires.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derive a signal that fires when this one fires or after `timeout`,
    /// whichever comes first.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let child = Inner::new(deadline);
        self.inner.children.lock().push(Arc::downgrade(&child));
        // The parent may have fired before the registration above.
        if self.inner.cancelled.load(Ordering::SeqCst) {
            child.cancel();
        }
        Self { inner: child }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// The deadline this signal honours, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the cause if the signal has fired.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Some(CancelCause::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Completes once the signal fires.
    pub async fn cancelled(&self) -> CancelCause {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(cause) = self.cause() {
                return cause;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Race `future` against the signal.
    ///
    /// If the signal fires first the future is dropped. That only abandons
    /// the client side of a store call; work already sent to the server is
    /// stopped by the caller (see [`crate::TransactionContext`]). A signal
    /// that has already fired wins without polling the future at all.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, CancelCause>
    where
        F: Future,
    {
        if let Some(cause) = self.cause() {
            return Err(cause);
        }
        tokio::select! {
            biased;
            cause = self.cancelled() => Err(cause),
            output = future => Ok(output),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cause", &self.cause())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_signal_is_not_cancelled() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert_eq!(signal.cause(), None);
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();

        clone.cancel();
        clone.cancel();

        assert_eq!(signal.cause(), Some(CancelCause::Cancelled));
    }

    #[test]
    fn test_child_follows_parent_but_not_the_reverse() {
        let parent = CancelSignal::new();
        let child = parent.child();
        let grandchild = child.child();

        let sibling = parent.child();
        sibling.cancel();
        assert!(!parent.is_cancelled());
        assert!(!child.is_cancelled());

        parent.cancel();
        assert_eq!(child.cause(), Some(CancelCause::Cancelled));
        assert_eq!(grandchild.cause(), Some(CancelCause::Cancelled));
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancelSignal::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[tokio::test]
    async fn test_expired_deadline_reports_deadline_exceeded() {
        let signal = CancelSignal::with_timeout(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(signal.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_inherits_earlier_parent_deadline() {
        let parent = CancelSignal::with_timeout(Duration::from_millis(20));
        let child = parent.child_with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
        let cause = tokio::time::timeout(Duration::from_secs(2), child.cancelled())
            .await
            .expect("child should fire with the parent deadline");
        assert_eq!(cause, CancelCause::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        let cause = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should complete")
            .expect("waiter task panicked");
        assert_eq!(cause, CancelCause::Cancelled);
    }

    #[tokio::test]
    async fn test_run_returns_output_when_not_cancelled() {
        let signal = CancelSignal::new();
        let result = signal.run(async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_run_does_not_poll_when_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();

        let polled = AtomicBool::new(false);
        let result = signal
            .run(async {
                polled.store(true, Ordering::SeqCst);
            })
            .await;

        assert_eq!(result, Err(CancelCause::Cancelled));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_aborts_pending_future_on_deadline() {
        let signal = CancelSignal::with_timeout(Duration::from_millis(20));
        let result = signal
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(result, Err(CancelCause::DeadlineExceeded));
    }
}
