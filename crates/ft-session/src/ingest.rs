//! Producer side of the session's inbound queue.

use ft_core::{InboundMessage, Sample};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SessionError;

/// Cloneable handle for enqueueing messages into a session.
///
/// Enqueueing never blocks and never touches session state; messages are
/// applied at the start of the next tick.
#[derive(Debug, Clone)]
pub struct Ingestor {
    tx: mpsc::Sender<InboundMessage>,
    capacity: usize,
}

impl Ingestor {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    /// Enqueues a message for the next tick.
    pub fn send(&self, message: InboundMessage) -> Result<(), SessionError> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SessionError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SessionError::QueueClosed,
        })
    }

    /// Enqueues a sensor reading.
    pub fn ingest(&self, sample: Sample) -> Result<(), SessionError> {
        self.send(InboundMessage::Sample(sample))
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ft_core::MetricKind;

    fn sample(device: &str) -> Sample {
        Sample {
            device_id: device.to_string(),
            metric: MetricKind::HeartRate,
            value: 120.0,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn full_queue_applies_backpressure() {
        let (ingestor, _rx) = Ingestor::channel(2);
        ingestor.ingest(sample("d1")).unwrap();
        ingestor.ingest(sample("d1")).unwrap();
        let err = ingestor.ingest(sample("d1")).unwrap_err();
        assert!(matches!(err, SessionError::QueueFull { capacity: 2 }));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (ingestor, mut rx) = Ingestor::channel(4);
        rx.close();
        assert!(ingestor.is_closed());
        assert!(matches!(
            ingestor.ingest(sample("d1")),
            Err(SessionError::QueueClosed)
        ));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (ingestor, _rx) = Ingestor::channel(0);
        assert_eq!(ingestor.capacity(), 1);
    }
}
