//! Event sinks.
//!
//! Events are buffered while a call runs and handed to the sink only after
//! the store commits, so a sink never observes a mutation that was rolled
//! back.

use sharepool_types::events::{EventType, LedgerEvent};
use sharepool_types::PoolKey;

/// Receiver of committed ledger events.
pub trait EventSink {
    fn emit(&mut self, event: LedgerEvent);
}

/// Discards every event.
impl EventSink for () {
    fn emit(&mut self, _event: LedgerEvent) {}
}

/// Records events in memory, in commit order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events of one type, in order.
    pub fn of_type(&self, event_type: EventType) -> impl Iterator<Item = &LedgerEvent> {
        self.events
            .iter()
            .filter(move |e| e.event_type() == event_type)
    }

    /// Events belonging to `pool`, in order.
    pub fn for_pool<'a>(&'a self, pool: &'a PoolKey) -> impl Iterator<Item = &'a LedgerEvent> {
        self.events.iter().filter(move |e| e.pool() == pool)
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: LedgerEvent) {
        (**self).emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharepool_types::Address;

    #[test]
    fn test_event_log_filters() {
        let a = PoolKey::new(Address::from_bytes([1; 32]), 1);
        let b = PoolKey::new(Address::from_bytes([1; 32]), 2);
        let mut log = EventLog::new();
        log.emit(LedgerEvent::PoolCreated { pool: a, at: 1 });
        log.emit(LedgerEvent::PoolCreated { pool: b, at: 2 });
        log.emit(LedgerEvent::WithdrawalDelegateUpdated {
            pool: a,
            account: Address::from_bytes([2; 32]),
            delegate: Address::ANY,
            approved: true,
        });

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_pool(&a).count(), 2);
        assert_eq!(log.of_type(EventType::PoolCreated).count(), 2);

        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert!(log.is_empty());
    }
}
