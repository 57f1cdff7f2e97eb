//! In-memory sinks for harnesses.

use std::future::Future;
use std::sync::{Arc, Mutex};

use loggy::{LogRecord, Sink, SinkError};

/// Records every delivered record. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Payloads of records from one source, in delivery order.
    pub fn payloads_from(&self, source_name: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.source_name == source_name)
            .map(|r| r.payload.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for CollectingSink {
    fn deliver(&mut self, record: &LogRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        self.records.lock().unwrap().push(record.clone());
        std::future::ready(Ok(()))
    }
}

/// Fails every `nth` delivery attempt (1-based) and collects the rest.
#[derive(Clone)]
pub struct FlakySink {
    pub inner: CollectingSink,
    every: usize,
    attempts: Arc<Mutex<usize>>,
}

impl FlakySink {
    pub fn failing_every(every: usize) -> Self {
        Self {
            inner: CollectingSink::new(),
            every,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl Sink for FlakySink {
    fn deliver(&mut self, record: &LogRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        let result = if attempt % self.every == 0 {
            Err(SinkError::Unavailable(format!("attempt {attempt} rejected")))
        } else {
            self.inner.records.lock().unwrap().push(record.clone());
            Ok(())
        };
        std::future::ready(result)
    }
}
