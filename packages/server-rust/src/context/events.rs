//! Close and finish signals of a request context.
//!
//! The two signals are independent: `close` reports that the transport went
//! away and never tears anything down, `finish` marks the end of the
//! context. Each fires at most once. Finishing also detaches every callback
//! still waiting for `close`.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Listeners {
    detached: bool,
    close: Vec<Callback>,
    finish: Vec<Callback>,
}

/// Event channel of one request context.
#[derive(Default)]
pub struct RequestEvents {
    close: CancellationToken,
    finish: CancellationToken,
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for RequestEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEvents")
            .field("closed", &self.is_closed())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl RequestEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the transport closes.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Token cancelled when the context finishes.
    #[must_use]
    pub fn finished(&self) -> CancellationToken {
        self.finish.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finish.is_cancelled()
    }

    /// Runs `f` when the transport closes. Runs it immediately if it
    /// already has; returns `false` and drops `f` once listeners are detached.
    pub fn on_close(&self, f: impl FnOnce() + Send + 'static) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.detached {
            return false;
        }
        if self.is_closed() {
            drop(listeners);
            f();
            return true;
        }
        listeners.close.push(Box::new(f));
        true
    }

    /// Runs `f` when the context finishes. Returns `false` and drops `f`
    /// if it already has.
    pub fn on_finish(&self, f: impl FnOnce() + Send + 'static) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.detached {
            return false;
        }
        listeners.finish.push(Box::new(f));
        true
    }

    /// Fires `close`. Returns `true` on the first call only.
    pub fn emit_close(&self) -> bool {
        let callbacks = {
            let mut listeners = self.listeners.lock();
            if self.close.is_cancelled() {
                return false;
            }
            self.close.cancel();
            std::mem::take(&mut listeners.close)
        };
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Fires `finish` and detaches all listeners. Returns `true` on the
    /// first call only.
    pub fn emit_finish(&self) -> bool {
        let callbacks = {
            let mut listeners = self.listeners.lock();
            if listeners.detached {
                return false;
            }
            listeners.detached = true;
            listeners.close.clear();
            self.finish.cancel();
            std::mem::take(&mut listeners.finish)
        };
        for callback in callbacks {
            callback();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || -> Box<dyn FnOnce() + Send> {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn close_does_not_finish() {
        let events = RequestEvents::new();
        let (closes, make) = counter();
        assert!(events.on_close(make()));

        assert!(events.emit_close());
        assert!(!events.emit_close());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(events.is_closed());
        assert!(!events.is_finished());
    }

    #[test]
    fn late_close_listener_runs_immediately() {
        let events = RequestEvents::new();
        events.emit_close();
        let (closes, make) = counter();
        assert!(events.on_close(make()));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_fires_once_and_detaches() {
        let events = RequestEvents::new();
        let (finishes, make_finish) = counter();
        let (closes, make_close) = counter();
        events.on_finish(make_finish());
        events.on_close(make_close());

        assert!(events.emit_finish());
        assert!(!events.emit_finish());
        assert_eq!(finishes.load(Ordering::SeqCst), 1);

        // Close after finish still flips the token but nobody is listening.
        assert!(events.emit_close());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(!events.on_close(make_close()));
        assert!(!events.on_finish(make_finish()));
    }

    #[tokio::test]
    async fn tokens_observe_signals() {
        let events = RequestEvents::new();
        let finished = events.finished();
        let waiter = tokio::spawn(async move { finished.cancelled().await });
        events.emit_finish();
        waiter.await.unwrap();
        assert!(events.finished().is_cancelled());
    }
}
