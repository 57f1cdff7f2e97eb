//! Record router. Decouples tail workers from the sink.
//!
//! Workers push into a bounded in-memory queue through a cloneable
//! [`RouterHandle`]; a single [`Router`] task pops in arrival order and
//! calls the [`Sink`]. When the queue is full the oldest entry is evicted,
//! so a slow sink costs completeness but never stalls tailing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, warn};

use loggy_core::config::RouterConfig;
use loggy_core::LogRecord;

use crate::sink::Sink;

/// Overflow warnings are emitted for the first drop and then once per this
/// many drops.
const OVERFLOW_WARN_EVERY: u64 = 1000;

/// A line that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub source_name: String,
    pub path: PathBuf,
    pub line: String,
    pub error: String,
}

/// Queue entry.
#[derive(Debug, Clone)]
pub enum Delivery {
    Record(LogRecord),
    DecodeFailure(DecodeFailure),
}

/// Running counters, shared by the router, its handles and observers.
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    delivered: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_sink: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records accepted into the queue.
    pub routed: u64,
    /// Records the sink acknowledged.
    pub delivered: u64,
    /// Records evicted because the queue was full.
    pub dropped_overflow: u64,
    /// Records dropped after the sink kept failing.
    pub dropped_sink: u64,
    pub decode_failures: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_overflow + self.dropped_sink
    }
}

impl RouterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_sink: self.dropped_sink.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

struct Queue {
    items: Mutex<VecDeque<Delivery>>,
    capacity: usize,
    closed: AtomicBool,
    ready: Notify,
    stats: Arc<RouterStats>,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Delivery>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, delivery: Delivery) {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(delivery);
            evicted
        };

        if let Some(Delivery::Record(record)) = evicted {
            let dropped = self.stats.dropped_overflow.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % OVERFLOW_WARN_EVERY == 0 {
                warn!(
                    dropped,
                    source = %record.source_name,
                    capacity = self.capacity,
                    "delivery queue full, dropping oldest records"
                );
            }
        }
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Delivery> {
        self.lock().pop_front()
    }
}

/// Producer side of the router. Cheap to clone; shared by every worker.
#[derive(Clone)]
pub struct RouterHandle {
    queue: Arc<Queue>,
}

impl RouterHandle {
    /// Queue a decoded record for the sink. Never blocks.
    pub fn route(&self, record: LogRecord) {
        self.queue.stats.routed.fetch_add(1, Ordering::Relaxed);
        self.queue.push(Delivery::Record(record));
    }

    /// Count a decode failure and queue it for reporting.
    pub fn report_decode_failure(&self, failure: DecodeFailure) {
        self.queue.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
        self.queue.push(Delivery::DecodeFailure(failure));
    }

    /// Stop accepting work; the router exits once the queue is drained.
    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.ready.notify_one();
    }

    /// Entries waiting for the router.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        self.queue.stats.clone()
    }
}

/// Consumer side: owns the sink and forwards queued records to it.
pub struct Router<S> {
    queue: Arc<Queue>,
    sink: S,
    retries: u32,
}

impl<S: Sink> Router<S> {
    pub fn new(config: &RouterConfig, sink: S) -> (Self, RouterHandle) {
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::with_capacity(config.queue_capacity.min(4096))),
            capacity: config.queue_capacity.max(1),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
            stats: Arc::new(RouterStats::default()),
        });
        let router = Self {
            queue: queue.clone(),
            sink,
            retries: config.sink_retries,
        };
        (router, RouterHandle { queue })
    }

    /// Deliver until the handle is closed and the queue is empty.
    pub async fn run(mut self) -> StatsSnapshot {
        loop {
            match self.queue.pop() {
                Some(Delivery::Record(record)) => self.deliver(record).await,
                Some(Delivery::DecodeFailure(failure)) => {
                    warn!(
                        source = %failure.source_name,
                        path = %failure.path.display(),
                        error = %failure.error,
                        line = %failure.line,
                        "skipping undecodable log line"
                    );
                }
                None if self.queue.closed.load(Ordering::Acquire) => break,
                None => self.queue.ready.notified().await,
            }
        }
        debug!("record router drained");
        self.queue.stats.snapshot()
    }

    async fn deliver(&mut self, record: LogRecord) {
        let mut attempt = 0;
        loop {
            match self.sink.deliver(&record).await {
                Ok(()) => {
                    self.queue.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    debug!(error = %e, attempt, "sink delivery failed, retrying");
                }
                Err(e) => {
                    self.queue.stats.dropped_sink.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %e,
                        source = %record.source_name,
                        attempts = attempt + 1,
                        "sink delivery failed, dropping record"
                    );
                    return;
                }
            }
        }
    }
}
