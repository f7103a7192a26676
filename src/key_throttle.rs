//! Throttle state for a single key.
//!
//! A key is either idle (nothing pending) or accumulating (items pending and a
//! deadline armed). A submission on a key that has been quiet for longer than
//! the release interval is delivered at once. Anything else is queued, and
//! each queued item pushes the deadline out by a full interval, so a burst is
//! released as one batch once it has gone quiet.

use crate::delivery::Dispatcher;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

pub(crate) struct KeyThrottle<T> {
    key: String,
    release_interval: Duration,
    dispatcher: Arc<Dispatcher<T>>,
    state: Mutex<KeyState<T>>,
}

struct KeyState<T> {
    pending: Vec<T>,
    last_release: Option<Instant>,
    deadline: Deadline,
    generation: u64,
}

/// Armed exactly while `pending` is non-empty.
enum Deadline {
    Unarmed,
    Armed {
        generation: u64,
        at: Instant,
        cancel: CancellationToken,
    },
}

impl<T: Send + 'static> KeyThrottle<T> {
    pub(crate) fn new(key: String, release_interval: Duration, dispatcher: Arc<Dispatcher<T>>) -> Self {
        Self {
            key,
            release_interval,
            dispatcher,
            state: Mutex::new(KeyState {
                pending: Vec::new(),
                last_release: None,
                deadline: Deadline::Unarmed,
                generation: 0,
            }),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn submit(self: &Arc<Self>, cancel: &CancellationToken, item: T) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();

        let quiet = state
            .last_release
            .map_or(true, |last| now.duration_since(last) > self.release_interval);

        if quiet && state.pending.is_empty() {
            state.last_release = Some(now);
            self.dispatcher.dispatch(cancel.clone(), &self.key, vec![item], true);
            return;
        }

        state.pending.push(item);
        let extended = now + self.release_interval;

        if let Deadline::Armed { at, .. } = &mut state.deadline {
            *at = extended;
            tracing::trace!(key = %self.key, pending = state.pending.len(), "Deadline extended");
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        state.deadline = Deadline::Armed {
            generation,
            at: extended,
            cancel: cancel.clone(),
        };
        tracing::trace!(key = %self.key, generation, "Deadline armed");

        let this = Arc::clone(self);
        self.dispatcher
            .runtime()
            .spawn(async move { this.expire(generation, extended).await });
    }

    /// Release the pending batch now, ahead of its deadline. Returns whether
    /// anything was pending.
    pub(crate) fn flush(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return false;
        }
        self.release(&mut state);
        true
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Waits out the deadline of one armed period and releases its batch.
    ///
    /// The decision to fire is taken under the key lock, the same lock that
    /// extends the deadline, so an extension either lands before the check
    /// (and the waiter sleeps again) or after the release (and arms a new
    /// period with its own waiter).
    async fn expire(self: Arc<Self>, generation: u64, mut at: Instant) {
        loop {
            time::sleep_until(at).await;

            let mut state = self.state.lock();
            match state.deadline {
                Deadline::Armed {
                    generation: armed,
                    at: current,
                    ..
                } if armed == generation => {
                    if Instant::now() < current {
                        at = current;
                        continue;
                    }
                }
                // Released early by a flush.
                _ => return,
            }

            self.release(&mut state);
            return;
        }
    }

    fn release(&self, state: &mut KeyState<T>) {
        let cancel = match std::mem::replace(&mut state.deadline, Deadline::Unarmed) {
            Deadline::Armed { cancel, .. } => cancel,
            Deadline::Unarmed => CancellationToken::new(),
        };
        let items = std::mem::take(&mut state.pending);
        state.last_release = Some(Instant::now());

        self.dispatcher.dispatch(cancel, &self.key, items, false);
    }
}
