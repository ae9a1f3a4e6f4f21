//! Tree-structured cooperative cancellation.
//!
//! A [`CancelScope`] is one node in a cancellation tree. Firing a node
//! cancels it and every descendant; every suspension point in the runtime
//! races against its scope via [`CancelScope::cancelled`]. Cancellation is
//! always total: there is no partial-cancel mode.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

/// A cooperative cancellation signal. Cheap to clone; clones observe the
/// same node.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<Inner>,
}

struct Inner {
    fired: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl CancelScope {
    /// Create a root scope.
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fired,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a child scope. Cancelling `self` cancels the child; the child
    /// can be cancelled on its own without affecting the parent.
    pub fn child(&self) -> CancelScope {
        let child = CancelScope::new();
        self.inner
            .children
            .lock()
            .expect("cancel scope poisoned")
            .push(Arc::downgrade(&child.inner));
        // A cancel racing with the push either drained the child from the
        // list or fired before this check; both leave the child cancelled.
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Fire this node and all descendants. Idempotent.
    pub fn cancel(&self) {
        Inner::cancel(&self.inner);
    }

    /// Synchronous probe.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Completes once this scope (or an ancestor) has fired. Completes
    /// immediately when already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.fired.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Inner {
    fn cancel(this: &Arc<Inner>) {
        this.fired.send_replace(true);
        let children = {
            let mut guard = this.children.lock().expect("cancel scope poisoned");
            std::mem::take(&mut *guard)
        };
        for weak in children {
            if let Some(child) = weak.upgrade() {
                Inner::cancel(&child);
            }
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn firing_a_parent_cancels_all_descendants() {
        let root = CancelScope::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel();

        assert!(root.is_cancelled());
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancel_does_not_reach_the_parent() {
        let root = CancelScope::new();
        let child = root.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn child_of_a_fired_scope_is_born_cancelled() {
        let root = CancelScope::new();
        root.cancel();
        assert!(root.child().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_a_pending_waiter() {
        let root = CancelScope::new();
        let child = root.child();

        let waiter = tokio::spawn(async move { child.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        root.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_completes_immediately_when_already_fired() {
        let scope = CancelScope::new();
        scope.cancel();
        tokio::time::timeout(Duration::from_millis(50), scope.cancelled())
            .await
            .expect("already-fired scope must not block");
    }
}
