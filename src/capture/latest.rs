//! Single-slot frame mailbox with keep-only-latest backpressure

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::capture::RawFrame;

#[derive(Debug, Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Counters for a [`LatestFrameSlot`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
}

/// Holds at most one pending frame. Offering a frame while one is pending
/// replaces it, so the consumer always sees the newest frame and never more
/// than one frame of work is queued.
#[derive(Debug, Clone)]
pub struct LatestFrameSlot {
    tx: Sender<RawFrame>,
    rx: Receiver<RawFrame>,
    stats: Arc<CachePadded<Stats>>,
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            tx,
            rx,
            stats: Arc::new(CachePadded::new(Stats::default())),
        }
    }

    /// Producer: store `frame`, evicting the pending one if the consumer has
    /// not picked it up yet.
    pub fn offer(&self, frame: RawFrame) {
        let mut pending = frame;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(frame)) => {
                    if self.rx.try_recv().is_ok() {
                        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = frame;
                }
                // Both ends live in `self`, so the channel cannot close.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Consumer: wait up to `timeout` for the next frame.
    pub fn take_timeout(&self, timeout: Duration) -> Option<RawFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => {
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard any pending frame, e.g. one left over from a closed session.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
