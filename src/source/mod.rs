use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;

use crate::event::EntityEvent;

/// A lazy, finite, non-restartable sequence of entity events.
pub trait EventSource: Send {
    /// Wait for the next event. `None` means the source is exhausted.
    fn next_event(&mut self) -> impl std::future::Future<Output = Option<EntityEvent>> + Send;
}

/// Inter-arrival delay applied before each replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Immediate,
    Fixed(Duration),
    /// Uniformly random in `[0, max)`.
    Uniform { max: Duration },
}

impl Arrival {
    /// Uniform jitter up to `max`, or no delay when `max` is zero.
    pub fn from_max_jitter(max: Duration) -> Self {
        if max.is_zero() {
            Self::Immediate
        } else {
            Self::Uniform { max }
        }
    }

    fn next_delay(&self) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(d) => d,
            Self::Uniform { max } if max.is_zero() => Duration::ZERO,
            Self::Uniform { max } => rand::thread_rng().gen_range(Duration::ZERO..max),
        }
    }
}

/// Replays a loaded batch of events with simulated arrival delays.
pub struct ReplaySource {
    events: std::vec::IntoIter<EntityEvent>,
    arrival: Arrival,
}

impl ReplaySource {
    pub fn new(events: Vec<EntityEvent>, arrival: Arrival) -> Self {
        Self {
            events: events.into_iter(),
            arrival,
        }
    }

    /// Events not yet yielded.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Option<EntityEvent> {
        if self.events.as_slice().is_empty() {
            return None;
        }

        let delay = self.arrival.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.events.next()
    }
}

/// Events pushed by an external producer; closing every sender exhausts it.
pub struct ChannelSource {
    rx: mpsc::Receiver<EntityEvent>,
}

impl ChannelSource {
    /// Create a bounded channel and the source draining it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<EntityEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<EntityEvent> {
        self.rx.recv().await
    }
}

/// Load a JSON array of entity events from disk.
pub fn load_events(path: &Path) -> Result<Vec<EntityEvent>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading events file {}", path.display()))?;

    let events: Vec<EntityEvent> = serde_json::from_str(&data)
        .with_context(|| format!("parsing events file {}", path.display()))?;

    info!(count = events.len(), path = %path.display(), "loaded entity events");

    Ok(events)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::time::Instant;

    use super::*;
    use crate::event::EntityType;

    fn events(n: i64) -> Vec<EntityEvent> {
        (1..=n)
            .map(|v| EntityEvent::new("e1", EntityType::Account, v * 10, 0, v))
            .collect()
    }

    #[tokio::test]
    async fn test_replay_immediate_yields_in_order_then_exhausts() {
        let mut src = ReplaySource::new(events(3), Arrival::Immediate);
        assert_eq!(src.remaining(), 3);

        let mut versions = Vec::new();
        while let Some(ev) = src.next_event().await {
            versions.push(ev.version);
        }
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(src.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_fixed_arrival_delays_each_event() {
        let mut src = ReplaySource::new(events(2), Arrival::Fixed(Duration::from_millis(50)));
        let start = Instant::now();

        src.next_event().await.expect("first");
        assert!(start.elapsed() >= Duration::from_millis(50));

        src.next_event().await.expect("second");
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_replay_does_not_sleep() {
        let mut src = ReplaySource::new(Vec::new(), Arrival::Fixed(Duration::from_secs(5)));
        let start = Instant::now();
        assert!(src.next_event().await.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_uniform_delay_within_bounds() {
        let arrival = Arrival::Uniform {
            max: Duration::from_millis(1000),
        };
        for _ in 0..200 {
            assert!(arrival.next_delay() < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_from_max_jitter() {
        assert_eq!(Arrival::from_max_jitter(Duration::ZERO), Arrival::Immediate);
        assert_eq!(
            Arrival::from_max_jitter(Duration::from_secs(1)),
            Arrival::Uniform {
                max: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn test_channel_source_exhausts_when_senders_drop() {
        let (tx, mut src) = ChannelSource::channel(4);
        tx.send(EntityEvent::new("a", EntityType::Mint, 1, 0, 1))
            .await
            .expect("send");
        drop(tx);

        assert_eq!(src.next_event().await.map(|e| e.entity_id), Some("a".to_string()));
        assert!(src.next_event().await.is_none());
    }

    #[test]
    fn test_load_events_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"[
                {{"id": "a", "accountType": "mint", "tokens": 10, "callbackTimeMS": 100, "version": 1, "data": {{"mintId": "m"}}}},
                {{"id": "b", "accountType": "escrow", "tokens": 20, "callbackTimeMS": 200, "version": 1}}
            ]"#
        )
        .expect("write");

        let loaded = load_events(file.path()).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].entity_id, "a");
        assert_eq!(loaded[1].entity_type, EntityType::Escrow);
    }

    #[test]
    fn test_load_events_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "[{{\"id\": \"a\"}}]").expect("write");

        let err = load_events(file.path()).unwrap_err();
        assert!(err.to_string().contains("parsing events file"));
    }
}
