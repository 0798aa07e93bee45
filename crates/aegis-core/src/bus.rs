//! Bounded signal buffer.
//!
//! Producers (SLO engines, cost guard, cascade detector) publish without
//! blocking; a consumer (usually the incident detector) drains in arrival
//! order. On overflow the oldest signal is dropped and a counter is
//! incremented, so drops are never silent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::warn;

use crate::signal::Signal;

/// Default buffer capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Bounded multi-producer signal buffer.
#[derive(Debug)]
pub struct SignalBus {
    capacity: usize,
    buffer: Mutex<VecDeque<Signal>>,
    dropped: AtomicU64,
    published: AtomicU64,
}

impl SignalBus {
    /// Create a bus with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    /// Publish a signal. Overflow drops the oldest buffered signal.
    pub fn publish(&self, signal: Signal) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, capacity = self.capacity, "signal bus overflow");
            metrics::counter!("aegis_signals_dropped_total").increment(1);
        }
        metrics::counter!("aegis_signals_published_total").increment(1);
        self.published.fetch_add(1, Ordering::Relaxed);
        buffer.push_back(signal);
    }

    /// Remove and return all buffered signals in arrival order.
    pub fn drain(&self) -> Vec<Signal> {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.drain(..).collect()
    }

    /// Signals currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signals dropped due to overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signals published since construction (including later-dropped ones).
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
