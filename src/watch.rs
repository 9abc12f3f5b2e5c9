//! Close-once watch channels.
//!
//! Every node in the tree owns a [`WatchCell`]: a lazily created, one-shot
//! signal that fires exactly once, when the position the node occupies is
//! mutated by a committed transaction. Readers obtain a [`Watch`] from the
//! cell; the transaction engine closes the cell at notify time.
//!
//! The signal carries no payload. Closing is implemented by dropping the
//! channel's only `Sender`, which every cloned `Receiver` observes as a
//! disconnect, so any number of subscribers can wait on the same cell and
//! all of them wake.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

/// A one-shot signal that a tree position has been mutated.
///
/// The watch fires by becoming disconnected; it never carries a message.
/// Clones observe the same underlying signal. Callers that need to combine
/// a watch with timers or other channels can `select!` on
/// [`Watch::receiver`].
#[derive(Clone, Debug)]
pub struct Watch {
    rx: Receiver<()>,
}

impl Watch {
    /// Returns true once the watched position has been mutated.
    ///
    /// Non-blocking; a watch that has fired stays fired.
    pub fn has_fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the watch fires.
    pub fn wait(&self) {
        // The sender never sends; the only way out is the disconnect.
        let _ = self.rx.recv();
    }

    /// Blocks until the watch fires or `timeout` elapses. Returns true if
    /// the watch fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// The underlying receiver, for use in `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// A watch that never fires.
    ///
    /// Returned when a query traverses no node at all, so there is no tree
    /// position whose mutation could be attributed to it.
    pub(crate) fn never() -> Watch {
        // Keep one sender alive for the life of the process so the shared
        // receiver never disconnects.
        static NEVER: Lazy<(Sender<()>, Receiver<()>)> = Lazy::new(|| bounded(1));
        Watch {
            rx: NEVER.1.clone(),
        }
    }
}

/// The per-node holder of a watch channel.
///
/// The channel is created on first demand. Many readers may race to create
/// it; `OnceCell` guarantees exactly one survives, which is the install-once
/// contract the notify protocol depends on. Closing takes the sender out of
/// its slot, so it happens at most once no matter how often the cell is
/// asked to close.
#[derive(Debug, Default)]
pub(crate) struct WatchCell {
    chan: OnceCell<WatchChan>,
}

#[derive(Debug)]
struct WatchChan {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl WatchCell {
    pub(crate) fn new() -> Arc<WatchCell> {
        Arc::new(WatchCell::default())
    }

    /// Subscribe, installing the channel if this is the first demand.
    pub(crate) fn watch(&self) -> Watch {
        let chan = self.chan.get_or_init(|| {
            let (tx, rx) = bounded(1);
            WatchChan {
                tx: Mutex::new(Some(tx)),
                rx,
            }
        });
        Watch {
            rx: chan.rx.clone(),
        }
    }

    /// True if any reader has subscribed to this cell.
    pub(crate) fn is_subscribed(&self) -> bool {
        self.chan.get().is_some()
    }

    /// Fire the signal. A cell with no subscribers stays silent; firing
    /// twice is a no-op.
    pub(crate) fn close(&self) {
        if let Some(chan) = self.chan.get() {
            chan.tx.lock().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_close() {
        let cell = WatchCell::new();
        let w = cell.watch();
        assert!(!w.has_fired());
        cell.close();
        assert!(w.has_fired());
        // Idempotent.
        cell.close();
        assert!(w.has_fired());
    }

    #[test]
    fn all_subscribers_observe_the_close() {
        let cell = WatchCell::new();
        let a = cell.watch();
        let b = a.clone();
        let c = cell.watch();
        cell.close();
        assert!(a.has_fired() && b.has_fired() && c.has_fired());
    }

    #[test]
    fn unsubscribed_cell_closes_silently() {
        let cell = WatchCell::new();
        assert!(!cell.is_subscribed());
        cell.close();
        // A subscription arriving after the close gets a live channel; the
        // position it describes is gone, so nothing will ever fire it. The
        // notify protocol only closes cells of pre-commit nodes, so this
        // cannot be observed through the public API.
        assert!(!cell.watch().has_fired());
    }

    #[test]
    fn never_watch_does_not_fire() {
        let w = Watch::never();
        assert!(!w.has_fired());
        assert!(!w.wait_timeout(Duration::from_millis(10)));
    }
}
