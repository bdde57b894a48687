//! Single-slot "latest value wins" mailbox

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender};

/// Holds at most one value. Posting overwrites whatever the reader has not
/// taken yet, so memory stays bounded and the reader always sees the newest
/// value.
///
/// The slot is an atomic swap; a capacity-1 channel is only used as a doorbell
/// to wake a blocked reader.
pub struct Mailbox<T> {
    slot: ArcSwapOption<T>,
    bell_tx: Sender<()>,
    bell_rx: Receiver<()>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    posted: AtomicUsize,
    taken: AtomicUsize,
    superseded: AtomicUsize,
}

/// Snapshot of a mailbox's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub posted: usize,
    pub taken: usize,
    pub superseded: usize,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (bell_tx, bell_rx) = flume::bounded(1);
        Self {
            slot: ArcSwapOption::empty(),
            bell_tx,
            bell_rx,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the slot's content. Never blocks.
    ///
    /// Returns `true` if an untaken value was overwritten.
    pub fn post(&self, value: T) -> bool {
        self.post_arc(Arc::new(value))
    }

    pub fn post_arc(&self, value: Arc<T>) -> bool {
        let superseded = self.slot.swap(Some(value)).is_some();
        self.stats.posted.fetch_add(1, Ordering::Relaxed);
        if superseded {
            self.stats.superseded.fetch_add(1, Ordering::Relaxed);
        }

        // Full means a pending ring already covers this value.
        let _ = self.bell_tx.try_send(());
        superseded
    }

    /// Consumer: take the current value, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<T>> {
        let value = self.slot.swap(None);
        if value.is_some() {
            self.stats.taken.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Consumer: wait up to `timeout` for a value and take it.
    pub fn wait_take(&self, timeout: Duration) -> Option<Arc<T>> {
        if let Some(value) = self.take() {
            return Some(value);
        }
        // A ring may belong to a value we already took; spurious wakes return None.
        match self.bell_rx.recv_timeout(timeout) {
            Ok(()) => self.take(),
            Err(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            posted: self.stats.posted.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn keeps_only_latest() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.post(1));
        assert!(mailbox.post(2));
        assert!(mailbox.post(3));

        assert_eq!(mailbox.take().as_deref(), Some(&3));
        assert_eq!(mailbox.take(), None);
        assert_eq!(
            mailbox.stats(),
            MailboxStats {
                posted: 3,
                taken: 1,
                superseded: 2
            }
        );
    }

    #[test]
    fn wait_take_times_out_when_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        let start = Instant::now();
        assert_eq!(mailbox.wait_take(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_take_wakes_on_post() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.post(42u32);
        });

        let got = mailbox.wait_take(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(got.as_deref(), Some(&42));
    }

    #[test]
    fn post_never_blocks_without_reader() {
        let mailbox = Mailbox::new();
        for i in 0..10_000 {
            mailbox.post(i);
        }
        assert_eq!(mailbox.take().as_deref(), Some(&9_999));
        assert!(mailbox.is_empty());
    }
}
