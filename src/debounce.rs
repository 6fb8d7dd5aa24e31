use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Which end of a burst of calls reaches the wrapped callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Fire on the first call of a burst, swallow the rest until things go quiet.
    Leading,
    /// Fire once, with the last arguments, after the quiet period.
    Trailing,
}

/// Collapses rapid repeated calls into a single callback invocation.
///
/// Every wrapper owns its own timer, so any number of them can coexist.
/// Trailing mode spawns onto the current tokio runtime.
pub struct Debounced<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    callback: Box<dyn Fn(T) + Send + Sync>,
    quiet: Duration,
    edge: Edge,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    pending: Option<JoinHandle<()>>,
    quiet_until: Option<Instant>,
}

impl<T: Send + 'static> Debounced<T> {
    pub fn new<F>(quiet: Duration, edge: Edge, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                callback: Box::new(callback),
                quiet,
                edge,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn trailing<F>(quiet: Duration, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new(quiet, Edge::Trailing, callback)
    }

    /// Register a call. Never blocks and never reports the callback's outcome.
    pub fn call(&self, args: T) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        match self.inner.edge {
            Edge::Trailing => {
                if let Some(pending) = state.pending.take() {
                    pending.abort();
                }
                // Deadline is fixed here, not when the task first gets polled.
                let deadline = now + self.inner.quiet;
                let inner = Arc::clone(&self.inner);
                state.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    (inner.callback)(args);
                }));
            }
            Edge::Leading => {
                let fire = state.quiet_until.map_or(true, |until| now >= until);
                state.quiet_until = Some(now + self.inner.quiet);
                drop(state);
                if fire {
                    (self.inner.callback)(args);
                }
            }
        }
    }

    /// Drop a pending trailing call, if any.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.quiet_until = None;
    }

    pub fn is_pending(&self) -> bool {
        self.inner
            .lock()
            .pending
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Drop for Debounced<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.inner.lock().pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |v| sink.lock().unwrap().push(v))
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    const QUIET: Duration = Duration::from_millis(500);
    const STEP: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn trailing_burst_fires_once_with_last_args() {
        let (calls, cb) = recorder();
        let debounced = Debounced::trailing(QUIET, cb);

        for i in 0..5 {
            debounced.call(i);
            tokio::time::advance(STEP).await;
        }
        settle().await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(debounced.is_pending());

        tokio::time::advance(QUIET).await;
        settle().await;
        assert_eq!(*calls.lock().unwrap(), vec![4]);
        assert!(!debounced.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_separate_bursts_fire_separately() {
        let (calls, cb) = recorder();
        let debounced = Debounced::trailing(QUIET, cb);

        debounced.call(1);
        tokio::time::advance(QUIET + STEP).await;
        settle().await;
        debounced.call(2);
        debounced.call(3);
        tokio::time::advance(QUIET + STEP).await;
        settle().await;

        assert_eq!(*calls.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn leading_fires_first_call_and_suppresses_until_quiet() {
        let (calls, cb) = recorder();
        let debounced = Debounced::new(QUIET, Edge::Leading, cb);

        debounced.call(1);
        tokio::time::advance(STEP).await;
        debounced.call(2);
        tokio::time::advance(STEP).await;
        debounced.call(3);
        assert_eq!(*calls.lock().unwrap(), vec![1]);

        tokio::time::advance(QUIET).await;
        debounced.call(4);
        assert_eq!(*calls.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn wrappers_keep_independent_timers() {
        let (a_calls, a_cb) = recorder();
        let (b_calls, b_cb) = recorder();
        let a = Debounced::trailing(QUIET, a_cb);
        let b = Debounced::trailing(QUIET * 2, b_cb);

        a.call(1);
        b.call(2);
        tokio::time::advance(QUIET + STEP).await;
        settle().await;
        assert_eq!(*a_calls.lock().unwrap(), vec![1]);
        assert!(b_calls.lock().unwrap().is_empty());

        tokio::time::advance(QUIET).await;
        settle().await;
        assert_eq!(*b_calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_call() {
        let (calls, cb) = recorder();
        let debounced = Debounced::trailing(QUIET, cb);
        debounced.call(7);
        debounced.cancel();
        tokio::time::advance(QUIET * 2).await;
        settle().await;
        assert!(calls.lock().unwrap().is_empty());
    }
}
