//! Runtime context: injectable time and id generation plus the optional
//! engine event channel. Fakes make schedule catch-up and duration logic
//! deterministic under test.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::event_bus::{EventSender, FlowEvent};

#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub event_tx: Option<EventSender>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
            event_tx: None,
        }
    }
}

impl RuntimeContext {
    pub fn with_event_tx(mut self, event_tx: EventSender) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time_provider.now()
    }

    pub fn next_id(&self) -> uuid::Uuid {
        self.id_generator.next_id()
    }

    /// Emit an engine event if a listener is attached.
    pub fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> uuid::Uuid;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> uuid::Uuid {
        uuid::Uuid::new_v4()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    now: Mutex<DateTime<Utc>>,
}

impl FakeTimeProvider {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn at_timestamp(secs: i64) -> Self {
        Self::new(Utc.timestamp_opt(secs, 0).unwrap())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock();
        *now += duration;
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct FakeIdGenerator {
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for FakeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> uuid::Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        uuid::Uuid::from_u128(n as u128)
    }
}
