//! Event fanout targets (spec.md §4.5): a local Unix-domain socket plus
//! optional Redis stream and NATS JetStream subjects.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gantry_core::Event;
use log::{info, warn};
use tokio::net::UnixListener;
use tokio::sync::broadcast;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// `line` is `event`'s pre-encoded JSON; sinks that need to route by
    /// region or kind (Redis, NATS) read `event` directly rather than
    /// re-parsing it.
    async fn publish(&self, event: &Event, line: &str);
}

/// Accepts any number of reader connections and broadcasts every drained
/// line to all of them; readers that fall behind simply miss lines (this
/// is a monitoring tap, not a durable log).
pub struct UnixSocketSink {
    tx: broadcast::Sender<String>,
}

impl UnixSocketSink {
    /// Binds `path`, removing a stale socket file left by a prior run.
    pub fn bind(path: impl AsRef<Path>) -> std::io::Result<Arc<Self>> {
        let path = path.as_ref();
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        let (tx, _) = broadcast::channel(4096);
        let sink = Arc::new(UnixSocketSink { tx: tx.clone() });

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let mut rx = tx.subscribe();
                        tokio::spawn(async move {
                            use tokio::io::AsyncWriteExt;
                            let (_, mut writer) = stream.into_split();
                            while let Ok(line) = rx.recv().await {
                                if writer.write_all(line.as_bytes()).await.is_err() {
                                    break;
                                }
                                if writer.write_all(b"\n").await.is_err() {
                                    break;
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!("event socket accept error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(sink)
    }
}

#[async_trait]
impl EventSink for UnixSocketSink {
    async fn publish(&self, _event: &Event, line: &str) {
        // No receivers is the common case (nobody tailing the socket); not
        // an error.
        let _ = self.tx.send(line.to_string());
    }
}

/// Fans events out to a Redis stream `mining:events:<region>` via `XADD`
/// (spec.md §4.6 sink fanout table).
pub struct RedisStreamSink {
    client: redis::Client,
}

impl RedisStreamSink {
    pub fn new(url: &str) -> redis::RedisResult<Self> {
        Ok(RedisStreamSink {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl EventSink for RedisStreamSink {
    async fn publish(&self, event: &Event, line: &str) {
        use redis::AsyncCommands;
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                warn!("redis event sink connection error: {e}");
                return;
            }
        };
        let stream_key = format!("mining:events:{}", event.region);
        let result: redis::RedisResult<String> = conn
            .xadd(&stream_key, "*", &[("data", line)])
            .await;
        if let Err(e) = result {
            warn!("redis XADD failed: {e}");
        }
    }
}

/// Fans events out to a NATS JetStream subject `tbg.mining.<region>.<kind>`
/// (spec.md §4.6 sink fanout table).
pub struct NatsSink {
    context: async_nats::jetstream::Context,
}

impl NatsSink {
    pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::connect(url).await?;
        let context = async_nats::jetstream::new(client);
        info!("connected to NATS JetStream at {url}");
        Ok(NatsSink { context })
    }
}

#[async_trait]
impl EventSink for NatsSink {
    async fn publish(&self, event: &Event, line: &str) {
        let subject = format!("tbg.mining.{}.{}", event.region, event.payload.kind());
        let payload = line.to_string().into_bytes();
        match self.context.publish(subject, payload.into()).await {
            Ok(ack) => {
                tokio::spawn(async move {
                    let _ = ack.await;
                });
            }
            Err(e) => warn!("nats publish failed: {e}"),
        }
    }
}
