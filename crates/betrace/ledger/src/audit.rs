//! Degrade-and-buffer audit recorder.
//!
//! Audit-trail writes must never block the caller's primary workflow: an
//! auth decision goes out whether or not the ledger is up. On ledger
//! unavailability the event lands in a bounded in-memory buffer and a
//! critical alert is logged; overflow drops oldest-first and counts the
//! drops for observability. This is the one documented place where a hard
//! failure is converted into a logged, non-propagated event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::LedgerError;
use crate::record::Transfer;
use crate::traits::LedgerWriter;

pub const DEFAULT_AUDIT_BUFFER_CAPACITY: usize = 1000;

pub struct AuditRecorder {
    ledger: Arc<dyn LedgerWriter>,
    buffer: Mutex<VecDeque<Transfer>>,
    capacity: usize,
    buffered_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl AuditRecorder {
    pub fn new(ledger: Arc<dyn LedgerWriter>, capacity: usize) -> Self {
        Self {
            ledger,
            buffer: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            buffered_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Record one audit event. Never returns an error to the caller:
    /// availability failures buffer, validation failures are logged and
    /// discarded (a malformed audit event cannot be fixed by retrying).
    pub fn record(&self, transfer: Transfer) {
        match self.ledger.create_transfer(transfer.clone()) {
            Ok(()) => {}
            Err(err) if err.is_retryable() => {
                error!(
                    transfer_id = %transfer.id,
                    partition = %transfer.partition,
                    "ledger unavailable, buffering audit event: {err}"
                );
                self.push_buffered(transfer);
            }
            Err(err) => {
                debug!(transfer_id = %transfer.id, "audit event rejected: {err}");
            }
        }
    }

    /// Retry buffered events in arrival order. Stops at the first
    /// availability failure; returns how many events were flushed.
    pub fn flush(&self) -> usize {
        let mut flushed = 0;
        loop {
            let next = {
                let mut buffer = self.buffer.lock();
                buffer.pop_front()
            };
            let Some(transfer) = next else {
                break;
            };
            match self.ledger.create_transfer(transfer.clone()) {
                Ok(()) => flushed += 1,
                Err(err) if err.is_retryable() => {
                    let mut buffer = self.buffer.lock();
                    buffer.push_front(transfer);
                    warn!("ledger still unavailable, {} audit events pending", buffer.len());
                    break;
                }
                Err(err) => {
                    // Stale event no longer valid (e.g. duplicate after a
                    // racing retry); drop it rather than wedging the queue.
                    debug!(transfer_id = %transfer.id, "buffered audit event rejected: {err}");
                    flushed += 1;
                }
            }
        }
        flushed
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Total events that entered the buffer instead of the ledger.
    pub fn buffered_events(&self) -> u64 {
        self.buffered_total.load(Ordering::SeqCst)
    }

    /// Total events dropped due to buffer overflow.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_total.load(Ordering::SeqCst)
    }

    fn push_buffered(&self, transfer: Transfer) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped_total.fetch_add(1, Ordering::SeqCst);
        }
        buffer.push_back(transfer);
        self.buffered_total.fetch_add(1, Ordering::SeqCst);
    }
}
