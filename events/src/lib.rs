//! Gantry Events: the emission pipeline that carries `mining.notify`-adjacent
//! telemetry (connects, shares, blocks found, difficulty changes) out of the
//! hot path and into whatever is watching (spec.md §4.5).
//!
//! The hot path only ever touches an `mpsc::UnboundedSender<Event>`. This
//! crate owns everything downstream of that: a ring buffer that absorbs
//! bursts without blocking the producer, and a drain loop that fans each
//! event out to every configured sink as a single-line JSON record.

use std::sync::Arc;

use gantry_core::{Event, EventPayload};
use gantry_util::time::unix_nanos;
use log::warn;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod ring;
pub mod sinks;

pub use ring::EventRing;
pub use sinks::{EventSink, NatsSink, RedisStreamSink, UnixSocketSink};

/// Owns the ring buffer and the background tasks that feed and drain it.
pub struct EventPipeline {
    ring: Arc<EventRing>,
}

async fn fanout(event: &Event, sinks: &[Arc<dyn EventSink>]) {
    let line = match event.to_json_line() {
        Ok(l) => l,
        Err(e) => {
            warn!("failed to encode event as JSON: {e}");
            return;
        }
    };
    for sink in sinks {
        sink.publish(event, &line).await;
    }
}

impl EventPipeline {
    /// Spawns the ingest task (channel -> ring) and the drain task
    /// (ring -> sinks), returning a handle that keeps both alive for as
    /// long as it's held.
    pub fn spawn(
        capacity: usize,
        region: String,
        mut inbound: mpsc::UnboundedReceiver<Event>,
        sinks: Vec<Arc<dyn EventSink>>,
        shutdown: CancellationToken,
    ) -> Self {
        let ring = Arc::new(EventRing::new(capacity));

        let ingest_ring = ring.clone();
        let ingest_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = inbound.recv() => {
                        match event {
                            Some(event) => ingest_ring.push(event),
                            None => break,
                        }
                    }
                    _ = ingest_shutdown.cancelled() => break,
                }
            }
        });

        let drain_ring = ring.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = drain_ring.drain() => {
                        for event in &batch {
                            fanout(event, &sinks).await;
                        }

                        let dropped = drain_ring.take_dropped();
                        if dropped > 0 {
                            let synthetic = Event::new(
                                unix_nanos(),
                                region.clone(),
                                EventPayload::EventsDropped { count: dropped },
                            );
                            fanout(&synthetic, &sinks).await;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        // Flush whatever is still buffered before exiting.
                        let batch = drain_ring.try_drain();
                        for event in &batch {
                            fanout(event, &sinks).await;
                        }
                        break;
                    }
                }
            }
        });

        EventPipeline { ring }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipeline_drains_events_through_to_a_sink() {
        struct CollectingSink(tokio::sync::mpsc::UnboundedSender<String>);

        #[async_trait::async_trait]
        impl EventSink for CollectingSink {
            async fn publish(&self, _event: &Event, line: &str) {
                let _ = self.0.send(line.to_string());
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (collected_tx, mut collected_rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(CollectingSink(collected_tx));
        let _pipeline = EventPipeline::spawn(16, "us-east".into(), rx, vec![sink], CancellationToken::new());

        tx.send(Event::new(
            1,
            "us-east".to_string(),
            EventPayload::Connect {
                session_id: 1,
                remote_addr: "127.0.0.1:1".into(),
            },
        ))
        .unwrap();

        let line = tokio::time::timeout(std::time::Duration::from_secs(1), collected_rx.recv())
            .await
            .expect("pipeline should drain within timeout")
            .expect("channel should not close");
        assert!(line.contains("connect"));
    }
}
