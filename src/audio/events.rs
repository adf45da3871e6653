//! Events raised inside audio callbacks
//!
//! Callbacks can't log (logging locks and allocates), so they push small
//! plain-data events into a lock-free SPSC queue that a normal thread
//! drains and logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Default queue depth; a few seconds of one event per callback
pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioEvent {
    /// The output ran out of samples and padded with silence
    Underrun { missing: usize },
    /// The output fell behind the retained window and jumped forward
    FellBehind { skipped: u64 },
}

/// Callback side of the event queue
pub struct EventSender {
    producer: HeapProd<AudioEvent>,
    dropped: Arc<AtomicU64>,
}

/// Draining side of the event queue
pub struct EventReceiver {
    consumer: HeapCons<AudioEvent>,
    dropped: Arc<AtomicU64>,
}

/// Create a matched sender/receiver pair
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (producer, consumer) = HeapRb::<AudioEvent>::new(capacity.max(1)).split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            producer,
            dropped: Arc::clone(&dropped),
        },
        EventReceiver { consumer, dropped },
    )
}

impl EventSender {
    /// Queue an event without blocking. Counts it as dropped when full.
    pub fn send(&mut self, event: AudioEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

impl EventReceiver {
    /// Hand every queued event to `f`, oldest first
    pub fn drain(&mut self, mut f: impl FnMut(AudioEvent)) -> usize {
        let mut count = 0;
        while let Some(event) = self.consumer.try_pop() {
            f(event);
            count += 1;
        }
        count
    }

    /// Events lost because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (mut tx, mut rx) = event_queue(4);
        tx.send(AudioEvent::Underrun { missing: 10 });
        tx.send(AudioEvent::FellBehind { skipped: 2 });

        let mut seen = Vec::new();
        assert_eq!(rx.drain(|e| seen.push(e)), 2);
        assert_eq!(
            seen,
            vec![
                AudioEvent::Underrun { missing: 10 },
                AudioEvent::FellBehind { skipped: 2 },
            ]
        );
        assert_eq!(rx.drain(|_| {}), 0);
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let (mut tx, rx) = event_queue(2);
        assert!(tx.send(AudioEvent::Underrun { missing: 1 }));
        assert!(tx.send(AudioEvent::Underrun { missing: 2 }));
        assert!(!tx.send(AudioEvent::Underrun { missing: 3 }));
        assert_eq!(rx.dropped(), 1);
    }
}
