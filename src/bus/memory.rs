//! In-process bus for tests and dry runs.
//!
//! Behaves like the JetStream binding where it matters: sends are
//! deduplicated by message id, failures can be injected, and deliveries
//! record whether they were acked or nak'ed.

use super::{Delivery, Envelope, Transport, TransportError};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type LiveSender = mpsc::UnboundedSender<Result<MemoryDelivery, TransportError>>;

#[derive(Default)]
struct Inner {
    attempts: Vec<Envelope>,
    published: Vec<Envelope>,
    seen_ids: HashSet<String>,
    failures: VecDeque<TransportError>,
    flushes: usize,
    live: Vec<(String, LiveSender)>,
}

/// Shared in-memory topic log implementing `Transport`.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    acks: AckLog,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `count` sends fail with `error`.
    pub fn fail_next_sends(&self, count: usize, error: TransportError) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.failures.push_back(error.clone());
        }
    }

    /// Every send attempt, including failed and deduplicated ones.
    pub fn attempts(&self) -> Vec<Envelope> {
        self.lock().attempts.clone()
    }

    /// Messages accepted on `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.lock()
            .published
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    /// Ack/nak log shared by deliveries handed out by this bus.
    pub fn acks(&self) -> AckLog {
        self.acks.clone()
    }

    /// Deliveries for everything currently published on `topic`.
    pub fn deliveries(&self, topic: &str) -> Vec<MemoryDelivery> {
        self.published(topic)
            .into_iter()
            .enumerate()
            .map(|(seq, envelope)| {
                MemoryDelivery::new(seq as u64, envelope.payload, Some(envelope.key), &self.acks)
            })
            .collect()
    }

    /// Finite message stream over what is currently published on `topic`.
    pub fn stream(&self, topic: &str) -> BoxStream<'static, Result<MemoryDelivery, TransportError>> {
        stream::iter(self.deliveries(topic).into_iter().map(Ok)).boxed()
    }

    /// Open-ended stream of messages published on `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> UnboundedReceiverStream<Result<MemoryDelivery, TransportError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().live.push((topic.to_string(), tx));
        UnboundedReceiverStream::new(rx)
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.attempts.push(envelope.clone());

        if let Some(error) = inner.failures.pop_front() {
            return Err(error);
        }

        if !inner.seen_ids.insert(envelope.message_id.clone()) {
            return Ok(());
        }

        let seq = inner.published.iter().filter(|e| e.topic == envelope.topic).count() as u64;
        inner.published.push(envelope.clone());

        let acks = &self.acks;
        inner.live.retain(|(topic, tx)| {
            if *topic != envelope.topic {
                return !tx.is_closed();
            }
            let delivery = MemoryDelivery::new(seq, envelope.payload.clone(), Some(envelope.key.clone()), acks);
            tx.send(Ok(delivery)).is_ok()
        });
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.lock().flushes += 1;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nak,
}

/// Record of acknowledgements, keyed by delivery sequence.
#[derive(Clone, Default)]
pub struct AckLog(Arc<Mutex<Vec<(u64, AckKind)>>>);

impl AckLog {
    fn record(&self, seq: u64, kind: AckKind) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push((seq, kind));
    }

    pub fn entries(&self) -> Vec<(u64, AckKind)> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.filter(AckKind::Ack)
    }

    pub fn naked(&self) -> Vec<u64> {
        self.filter(AckKind::Nak)
    }

    fn filter(&self, kind: AckKind) -> Vec<u64> {
        self.entries()
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(seq, _)| seq)
            .collect()
    }
}

/// A delivery from the in-memory bus.
pub struct MemoryDelivery {
    seq: u64,
    payload: Vec<u8>,
    key: Option<String>,
    end_of_stream: bool,
    acks: AckLog,
}

impl MemoryDelivery {
    pub fn new(seq: u64, payload: impl Into<Vec<u8>>, key: Option<String>, acks: &AckLog) -> Self {
        Self {
            seq,
            payload: payload.into(),
            key,
            end_of_stream: false,
            acks: acks.clone(),
        }
    }

    /// Partition-EOF style marker with no payload.
    pub fn end_of_stream(seq: u64, acks: &AckLog) -> Self {
        Self {
            end_of_stream: true,
            ..Self::new(seq, Vec::new(), None, acks)
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    async fn ack(&self) -> Result<(), TransportError> {
        self.acks.record(self.seq, AckKind::Ack);
        Ok(())
    }

    async fn nak(&self) -> Result<(), TransportError> {
        self.acks.record(self.seq, AckKind::Nak);
        Ok(())
    }
}
