use log::{trace, warn};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::point::MetricPoint;

/// Bounded FIFO buffer between the scheduler and the writer.
///
/// `push` and `drain` are each atomic with respect to the other and neither
/// blocks waiting for the other side: a full buffer evicts its oldest points
/// rather than stalling collection, and an empty drain returns an empty batch.
pub struct PointBuffer {
    queue: Mutex<VecDeque<MetricPoint>>,

    /// Maximum points held; beyond this the oldest are dropped
    capacity: usize,

    /// Points evicted since the last report
    dropped: AtomicU64,
}

impl PointBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append points, evicting the oldest entries on overflow.
    ///
    /// Stale metrics are less useful than fresh ones for a live dashboard,
    /// so recency wins over completeness.
    pub fn push(&self, points: Vec<MetricPoint>) {
        if points.is_empty() {
            return;
        }

        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };

        for point in points {
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(point);
        }
        trace!("Buffer holds {} points", queue.len());
    }

    /// Remove and return up to `max` points in insertion order
    pub fn drain(&self, max: usize) -> Vec<MetricPoint> {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };

        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Number of buffered points
    pub fn len(&self) -> usize {
        match self.queue.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points evicted since the last call; logs when non-zero
    pub fn dropped_since_last_report(&self) -> u64 {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!("Dropped {} points due to a full buffer", dropped);
        }
        dropped
    }
}
