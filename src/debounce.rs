//! Single-slot debounce timer.
//!
//! Each [`Debouncer::schedule`] replaces the pending action, so only the last
//! one scheduled within the quiet period runs. Dropping the debouncer cancels
//! whatever is pending.
//!
//! Aborting cannot stop an action that has already started running, so the
//! action itself must check that it is still current (see
//! [`QueryComposer`](crate::query::QueryComposer), which compares a text
//! generation before committing).

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Run `action` after `delay` unless another call replaces it first.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn only_last_action_runs() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut debouncer = Debouncer::new();

        for (i, gap) in [(1, 100), (2, 100), (3, 0)] {
            let fired = fired.clone();
            debouncer.schedule(Duration::from_millis(400), async move {
                fired.lock().unwrap().push(i);
            });
            tokio::time::sleep(Duration::from_millis(gap)).await;
        }
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*fired.lock().unwrap(), vec![3]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_pending_action() {
        let count = Arc::new(AtomicUsize::new(0));

        let mut debouncer = Debouncer::new();
        let c = count.clone();
        debouncer.schedule(Duration::from_millis(50), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        let mut dropped = Debouncer::new();
        let c = count.clone();
        dropped.schedule(Duration::from_millis(50), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
