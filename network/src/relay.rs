//! Primary/relay roles on the bus (spec.md §4.6).
//!
//! The primary accepts relay connections, pushes `TEMPLATE` frames as fresh
//! workbases are published, pings every 5s, and drops a relay after 3
//! missed pongs. A relay connects outbound, applies templates it receives,
//! and self-promotes to independent mode (falling back to its own GBT
//! polling) if `failover_timeout_s` passes with neither a template nor a
//! ping from the primary; it demotes back on the next successful `HELLO`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use gantry_core::{Event, Workbase};
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::frame::{self, Bus};
use crate::message::RelayMessage;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const MAX_MISSED_PINGS: u32 = 3;

struct RelayHandle {
    region: String,
    outbound: mpsc::UnboundedSender<RelayMessage>,
    missed_pings: AtomicU32,
}

/// Runs on the primary. Holds one outbound queue per connected relay.
pub struct PrimaryHub {
    relays: Mutex<HashMap<SocketAddr, RelayHandle>>,
    events: mpsc::UnboundedSender<Event>,
}

impl PrimaryHub {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Arc<Self> {
        Arc::new(PrimaryHub {
            relays: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub async fn run(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("relay hub listening on {addr}");

        let sweep_hub = self.clone();
        let sweep_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(PING_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => sweep_hub.ping_sweep().await,
                    _ = sweep_shutdown.cancelled() => break,
                }
            }
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let hub = self.clone();
                    tokio::spawn(async move {
                        hub.handle_relay(stream, peer_addr).await;
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("relay hub shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Pushes a fresh workbase to every connected relay.
    pub async fn broadcast_template(&self, workbase: &Workbase) {
        let relays = self.relays.lock().await;
        for handle in relays.values() {
            let _ = handle.outbound.send(RelayMessage::Template {
                workbase: Box::new(workbase.clone()),
            });
        }
    }

    async fn ping_sweep(&self) {
        let mut relays = self.relays.lock().await;
        let mut evict = Vec::new();
        for (addr, handle) in relays.iter() {
            let missed = handle.missed_pings.fetch_add(1, Ordering::Relaxed) + 1;
            if missed > MAX_MISSED_PINGS {
                warn!(
                    "relay {} ({}) missed {} pings, evicting",
                    handle.region, addr, missed
                );
                evict.push(*addr);
                continue;
            }
            let _ = handle.outbound.send(RelayMessage::Ping);
        }
        for addr in evict {
            relays.remove(&addr);
        }
    }

    async fn handle_relay(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let mut bus = frame::wrap(stream);

        let region = match frame::recv(&mut bus).await {
            Ok(Some(RelayMessage::Hello { region })) => region,
            other => {
                warn!("relay {addr} did not send HELLO first: {other:?}");
                return;
            }
        };
        info!("relay {region} ({addr}) connected");

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut relays = self.relays.lock().await;
            relays.insert(
                addr,
                RelayHandle {
                    region: region.clone(),
                    outbound: tx,
                    missed_pings: AtomicU32::new(0),
                },
            );
        }

        let (mut sink, mut stream) = bus.split();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Ok(bytes) = msg.encode() {
                    if sink.send(bytes.into()).await.is_err() {
                        break;
                    }
                }
            }
        });

        while let Some(Ok(bytes)) = stream.next().await {
            match RelayMessage::decode(&bytes) {
                Ok(RelayMessage::Pong) => {
                    if let Some(handle) = self.relays.lock().await.get(&addr) {
                        handle.missed_pings.store(0, Ordering::Relaxed);
                    }
                }
                Ok(RelayMessage::Event { event }) => {
                    let _ = self.events.send(*event);
                }
                Ok(RelayMessage::Hello { .. }) => {}
                Ok(RelayMessage::Template { .. }) => {
                    warn!("relay {region} sent a TEMPLATE frame, ignoring");
                }
                Ok(RelayMessage::Ping) => {}
                Err(e) => warn!("malformed frame from relay {region}: {e}"),
            }
        }

        info!("relay {region} ({addr}) disconnected");
        self.relays.lock().await.remove(&addr);
        writer.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Receiving templates from the primary.
    Following,
    /// Primary unreachable past `failover_timeout_s`; polling Bitcoin Core
    /// directly like a standalone pool until the primary comes back.
    Independent,
}

/// Runs on a relay. Maintains a connection to the primary, forwards
/// received templates to `on_template`, and tracks failover state.
pub struct RelayClient {
    primary_url: String,
    region: String,
    failover_timeout_s: u64,
    mode: Arc<RwLock<RelayMode>>,
}

impl RelayClient {
    pub fn new(primary_url: impl Into<String>, region: impl Into<String>, failover_timeout_s: u64) -> Self {
        RelayClient {
            primary_url: primary_url.into(),
            region: region.into(),
            failover_timeout_s,
            mode: Arc::new(RwLock::new(RelayMode::Following)),
        }
    }

    pub fn mode_handle(&self) -> Arc<RwLock<RelayMode>> {
        self.mode.clone()
    }

    /// Reconnects with a fixed backoff whenever the connection to the
    /// primary drops; never returns.
    pub async fn run(
        self,
        on_template: mpsc::UnboundedSender<Workbase>,
        mut outbound_events: mpsc::UnboundedReceiver<Event>,
        shutdown: CancellationToken,
    ) {
        loop {
            match TcpStream::connect(&self.primary_url).await {
                Ok(stream) => {
                    info!("connected to primary at {}", self.primary_url);
                    self.run_session(stream, &on_template, &mut outbound_events, &shutdown)
                        .await;
                }
                Err(e) => {
                    warn!("failed to connect to primary {}: {e}", self.primary_url);
                    self.promote_if_timed_out(Instant::now() - Duration::from_secs(self.failover_timeout_s + 1))
                        .await;
                }
            }
            if shutdown.is_cancelled() {
                info!("relay client shutting down");
                return;
            }
            tokio::select! {
                _ = time::sleep(Duration::from_secs(5)) => {}
                _ = shutdown.cancelled() => {
                    info!("relay client shutting down");
                    return;
                }
            }
        }
    }

    async fn promote_if_timed_out(&self, last_contact: Instant) {
        if last_contact.elapsed().as_secs() >= self.failover_timeout_s {
            let mut mode = self.mode.write().await;
            if *mode == RelayMode::Following {
                warn!(
                    "no contact with primary for {}s, promoting to independent mode",
                    self.failover_timeout_s
                );
                *mode = RelayMode::Independent;
            }
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        on_template: &mpsc::UnboundedSender<Workbase>,
        outbound_events: &mut mpsc::UnboundedReceiver<Event>,
        shutdown: &CancellationToken,
    ) {
        let bus: Bus = frame::wrap(stream);
        let (mut sink, mut stream) = bus.split();

        if let Err(e) = send_one(
            &mut sink,
            RelayMessage::Hello {
                region: self.region.clone(),
            },
        )
        .await
        {
            warn!("failed to send HELLO: {e}");
            return;
        }
        // A successful HELLO means the primary is back; demote immediately
        // rather than waiting for the next template or ping.
        self.demote().await;

        let mut last_contact = Instant::now();
        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(bytes)) => {
                            last_contact = Instant::now();
                            match RelayMessage::decode(&bytes) {
                                Ok(RelayMessage::Template { workbase }) => {
                                    self.demote().await;
                                    let _ = on_template.send(*workbase);
                                }
                                Ok(RelayMessage::Ping) => {
                                    self.demote().await;
                                    let _ = send_one(&mut sink, RelayMessage::Pong).await;
                                }
                                Ok(_) => {}
                                Err(e) => warn!("malformed frame from primary: {e}"),
                            }
                        }
                        Some(Err(e)) => {
                            warn!("relay bus read error: {e}");
                            return;
                        }
                        None => {
                            info!("primary closed the connection");
                            return;
                        }
                    }
                }
                event = outbound_events.recv() => {
                    match event {
                        Some(event) => {
                            let _ = send_one(&mut sink, RelayMessage::Event { event: Box::new(event) }).await;
                        }
                        None => {}
                    }
                }
                _ = time::sleep(Duration::from_secs(1)) => {
                    self.promote_if_timed_out(last_contact).await;
                }
                _ = shutdown.cancelled() => {
                    info!("closing primary connection for shutdown");
                    return;
                }
            }
        }
    }

    async fn demote(&self) {
        let mut mode = self.mode.write().await;
        if *mode == RelayMode::Independent {
            info!("contact with primary restored, demoting back to following mode");
            *mode = RelayMode::Following;
        }
    }
}

async fn send_one(
    sink: &mut futures::stream::SplitSink<Bus, bytes::Bytes>,
    msg: RelayMessage,
) -> Result<(), crate::frame::BusError> {
    let bytes = msg.encode()?;
    sink.send(bytes.into()).await?;
    Ok(())
}
