use std::sync::Mutex;

/// A simple event emitter sending a single event to multiple MPSC channels.
#[derive(Debug)]
pub struct EventEmitter<T: Clone> {
    senders: Mutex<Vec<flume::Sender<T>>>,
}

impl<T: Clone> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Creates a new receiver and adds the corresponding sender to the
    /// sender list.
    pub fn create_receiver(&self) -> flume::Receiver<T> {
        let mut senders = self.senders.lock().unwrap();
        let (tx, rx) = flume::unbounded();
        senders.push(tx);
        rx
    }

    /// Emits an event to all senders. Senders whose receivers were dropped
    /// are removed from the list.
    pub fn emit(&self, event: T) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_receiver_observes_every_event() {
        let emitter = EventEmitter::<u8>::new();
        let first = emitter.create_receiver();
        let second = emitter.create_receiver();

        emitter.emit(0x01);
        emitter.emit(0x02);

        assert_eq!(first.try_recv(), Ok(0x01));
        assert_eq!(first.try_recv(), Ok(0x02));
        assert_eq!(second.try_recv(), Ok(0x01));
        assert_eq!(second.try_recv(), Ok(0x02));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let emitter = EventEmitter::<u8>::new();
        drop(emitter.create_receiver());
        let alive = emitter.create_receiver();

        emitter.emit(0x05);
        assert_eq!(alive.try_recv(), Ok(0x05));
    }
}
