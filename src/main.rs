//! Gantry Pool daemon entry point: loads configuration, wires the Work
//! Generator, Stratum server, event pipeline, metrics, and (in multi-region
//! deployments) the relay bus, then runs until signalled to stop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gantry_core::Workbase;
use gantry_crypto::validate_address;
use gantry_events::{EventPipeline, EventSink, NatsSink, RedisStreamSink, UnixSocketSink};
use gantry_metrics::{HealthMonitor, MetricsRegistry};
use gantry_mining::server::BlockSubmitter;
use gantry_mining::workgen::{BlockTemplateSource, WorkbaseRegistry};
use gantry_mining::StratumServer;
use gantry_network::{PrimaryHub, RelayClient, RelayMode};
use gantry_rpc::{BitcoinRpcClient, HashblockSubscriber};
use gantry_storage::{CachedReconnectStore, MemoryReconnectStore, ReconnectStore, RedisReconnectStore};
use gantry_util::logging::init_logging;
use gantry_util::{GantryConfig, Mode};

#[derive(Parser)]
#[clap(name = "gantryd")]
#[clap(about = "Gantry Pool - a Stratum V1 SHA-256 mining pool engine")]
struct Cli {
    /// Path to the pool's JSON configuration file
    #[clap(short, long, value_name = "FILE", default_value = "gantry.json")]
    config: PathBuf,

    /// Verbosity level (0=error .. 4=trace)
    #[clap(short, long, default_value = "2")]
    verbosity: u8,
}

async fn build_reconnect_store(config: &GantryConfig) -> Arc<dyn ReconnectStore> {
    match &config.redis_url {
        Some(url) => match RedisReconnectStore::new(url) {
            Ok(backend) => Arc::new(CachedReconnectStore::new(backend)),
            Err(e) => {
                warn!("failed to connect reconnect memory to redis ({e}), falling back to in-process only");
                Arc::new(MemoryReconnectStore::new())
            }
        },
        None => Arc::new(MemoryReconnectStore::new()),
    }
}

/// Updates the Prometheus counters from the same event stream the sinks
/// consume, then forwards every event on unchanged (spec.md §4.8 names the
/// counters; nothing else in the daemon sees every share/connect/block
/// event pass by, so the metrics registry taps the stream rather than
/// duplicating bookkeeping inside the Stratum server).
fn spawn_metrics_tap(
    metrics: Arc<MetricsRegistry>,
    mut from_server: mpsc::UnboundedReceiver<gantry_core::Event>,
    to_pipeline: mpsc::UnboundedSender<gantry_core::Event>,
    to_primary: Option<mpsc::UnboundedSender<gantry_core::Event>>,
) {
    tokio::spawn(async move {
        while let Some(event) = from_server.recv().await {
            match &event.payload {
                gantry_core::EventPayload::Connect { .. } => metrics.miner_connected(),
                gantry_core::EventPayload::Disconnect { .. } => metrics.miner_disconnected(),
                gantry_core::EventPayload::ShareAccepted { share_diff, .. } => {
                    metrics.record_accepted_share(*share_diff);
                }
                gantry_core::EventPayload::ShareRejected { reason, .. } => {
                    metrics.record_rejected_share(reason == "stale share");
                }
                gantry_core::EventPayload::BlockFound { height, .. } => {
                    metrics.record_block_found();
                    metrics.set_block_height(*height);
                }
                _ => {}
            }
            if let Some(tx) = &to_primary {
                let _ = tx.send(event.clone());
            }
            if to_pipeline.send(event).is_err() {
                break;
            }
        }
    });
}

async fn build_event_sinks(config: &GantryConfig) -> Vec<Arc<dyn EventSink>> {
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();

    match UnixSocketSink::bind(&config.event_socket_path) {
        Ok(sink) => sinks.push(sink),
        Err(e) => warn!("failed to bind event socket {}: {e}", config.event_socket_path),
    }

    if let Some(url) = &config.redis_url {
        match RedisStreamSink::new(url) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => warn!("failed to create redis event sink: {e}"),
        }
    }

    if let Some(url) = &config.nats_url {
        match NatsSink::connect(url).await {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => warn!("failed to connect nats event sink: {e}"),
        }
    }

    sinks
}

/// `getblocktemplate` retry delay: starts at 250ms and doubles up to a 10s
/// cap on each consecutive failure, resetting on the first success
/// (spec.md §4.1).
struct Backoff {
    current_ms: u64,
}

impl Backoff {
    const START_MS: u64 = 250;
    const CAP_MS: u64 = 10_000;

    fn new() -> Self {
        Backoff { current_ms: 0 }
    }

    fn next_delay(&mut self) -> std::time::Duration {
        self.current_ms = if self.current_ms == 0 {
            Self::START_MS
        } else {
            (self.current_ms * 2).min(Self::CAP_MS)
        };
        std::time::Duration::from_millis(self.current_ms)
    }

    fn reset(&mut self) {
        self.current_ms = 0;
    }
}

/// Drives the Work Generator loop: polls `getblocktemplate` on a fixed
/// interval and whenever the ZMQ hashblock subscriber fires, publishes the
/// result, and fans it out to the Stratum server and (if primary) the relay
/// hub (spec.md §4.1).
async fn run_work_generator(
    config: Arc<GantryConfig>,
    source: Arc<BitcoinRpcClient>,
    registry: Arc<WorkbaseRegistry>,
    server: Arc<StratumServer>,
    hub: Option<Arc<PrimaryHub>>,
    mut hashblock_trigger: mpsc::Receiver<()>,
    payout_script: Vec<u8>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
) {
    let rules = config.btc_network.gbt_rules();
    let mut poll_interval = tokio::time::interval(std::time::Duration::from_secs(5));
    let mut backoff = Backoff::new();

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {}
            _ = hashblock_trigger.recv() => {
                info!("zmq hashblock notification received, refreshing template early");
            }
            _ = shutdown.cancelled() => {
                info!("work generator shutting down");
                return;
            }
        }

        match source.get_template(&rules).await {
            Ok(tpl) => {
                backoff.reset();
                metrics.set_bitcoin_connected(true);
                metrics.set_block_height(tpl.height);
                let now = Workbase::now_created();
                let workbase = registry.publish(&tpl, &config.pool_signature, &payout_script, now);
                server.broadcast_workbase().await;
                if let Some(hub) = &hub {
                    hub.broadcast_template(&workbase).await;
                }
            }
            Err(e) => {
                metrics.set_bitcoin_connected(false);
                let delay = backoff.next_delay();
                warn!("getblocktemplate failed: {e}, retrying in {delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = hashblock_trigger.recv() => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

/// A relay applies templates it receives from the primary directly; while
/// in independent mode (primary unreachable) it falls back to its own GBT
/// polling like a standalone pool (spec.md §4.6).
async fn run_relay_follower(
    config: Arc<GantryConfig>,
    source: Arc<BitcoinRpcClient>,
    registry: Arc<WorkbaseRegistry>,
    server: Arc<StratumServer>,
    mut from_primary: mpsc::UnboundedReceiver<Workbase>,
    mode: Arc<tokio::sync::RwLock<RelayMode>>,
    payout_script: Vec<u8>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
) {
    let rules = config.btc_network.gbt_rules();
    let mut poll_interval = tokio::time::interval(std::time::Duration::from_secs(5));
    let mut backoff = Backoff::new();

    loop {
        tokio::select! {
            Some(workbase) = from_primary.recv() => {
                backoff.reset();
                registry.adopt(workbase);
                server.broadcast_workbase().await;
            }
            _ = shutdown.cancelled() => {
                info!("relay follower shutting down");
                return;
            }
            _ = poll_interval.tick() => {
                if *mode.read().await != RelayMode::Independent {
                    continue;
                }
                match source.get_template(&rules).await {
                    Ok(tpl) => {
                        backoff.reset();
                        metrics.set_bitcoin_connected(true);
                        metrics.set_block_height(tpl.height);
                        let now = Workbase::now_created();
                        registry.publish(&tpl, &config.pool_signature, &payout_script, now);
                        server.broadcast_workbase().await;
                    }
                    Err(e) => {
                        metrics.set_bitcoin_connected(false);
                        let delay = backoff.next_delay();
                        warn!("independent-mode getblocktemplate failed: {e}, retrying in {delay:?}");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            Some(workbase) = from_primary.recv() => {
                                backoff.reset();
                                registry.adopt(workbase);
                                server.broadcast_workbase().await;
                            }
                            _ = shutdown.cancelled() => return,
                        }
                    }
                }
            }
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let config = Arc::new(GantryConfig::load(&cli.config).map_err(|e| {
        error!("failed to load config {}: {e}", cli.config.display());
        e
    })?);
    info!("gantry pool starting in region {} (mode={:?})", config.region, config.mode);

    let address_kind = validate_address(config.btc_network, &config.payout_address)
        .map_err(|e| format!("invalid payout_address: {e}"))?;
    let payout_script = address_kind.script_pubkey();

    let rpc_client = Arc::new(BitcoinRpcClient::new(
        &config.bitcoin_rpc_url,
        &config.bitcoin_rpc_user,
        &config.bitcoin_rpc_pass,
    )?);

    let registry = Arc::new(WorkbaseRegistry::new(config.max_workbases));
    let reconnect = build_reconnect_store(&config).await;

    // Propagated to every spawned task so shutdown flushes pending state
    // before the process exits (spec.md §5).
    let shutdown = CancellationToken::new();

    let (event_tx, server_event_rx) = mpsc::unbounded_channel();
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
    let sinks = build_event_sinks(&config).await;
    let _event_pipeline = EventPipeline::spawn(
        config.event_ring_capacity,
        config.region.clone(),
        pipeline_rx,
        sinks,
        shutdown.clone(),
    );

    // In relay mode, every local event is also forwarded upstream to the
    // primary over the relay bus (spec.md §4.6 "carries mining events back
    // upstream").
    let (relay_events_tx, relay_events_rx) = if config.mode == Mode::Relay {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let metrics = Arc::new(MetricsRegistry::new());
    spawn_metrics_tap(metrics.clone(), server_event_rx, pipeline_tx, relay_events_tx);
    let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.metrics_port).parse()?;
    tokio::spawn(gantry_metrics::http::serve_metrics(
        metrics.clone(),
        metrics_addr,
        shutdown.clone(),
    ));

    if !config.peers.is_empty() || config.mode == Mode::Primary {
        let peers: HashMap<String, String> = config.peers.clone();
        let health_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.health_port).parse()?;
        tokio::spawn(HealthMonitor::new(peers).spawn(health_addr, shutdown.clone()));
    }

    let submitter: Option<Arc<dyn BlockSubmitter>> = Some(rpc_client.clone());
    let server = StratumServer::new(
        config.clone(),
        registry.clone(),
        reconnect,
        submitter,
        Some(event_tx.clone()),
    );

    let (hashblock_tx, hashblock_rx) = mpsc::channel(1);
    HashblockSubscriber::new(config.zmq_url.clone()).spawn(hashblock_tx);

    let primary_hub = if config.mode == Mode::Primary {
        let hub = PrimaryHub::new(event_tx.clone());
        let relay_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.relay_port).parse()?;
        let hub_clone = hub.clone();
        let hub_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = hub_clone.run(relay_addr, hub_shutdown).await {
                error!("relay hub stopped: {e}");
            }
        });
        Some(hub)
    } else {
        None
    };

    let stratum_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.stratum_port).parse()?;
    let stratum_server = server.clone();
    tokio::spawn(async move {
        if let Err(e) = stratum_server.run(stratum_addr).await {
            error!("stratum server stopped: {e}");
        }
    });

    if config.mode == Mode::Relay {
        let primary_url = config
            .primary_url
            .clone()
            .ok_or("mode=relay requires primary_url")?;
        let relay_client = RelayClient::new(primary_url, config.region.clone(), config.failover_timeout_s);
        let mode_handle = relay_client.mode_handle();
        let (template_tx, template_rx) = mpsc::unbounded_channel();
        let relay_events_rx = relay_events_rx.expect("relay_events_rx set when mode=relay");

        tokio::spawn(relay_client.run(template_tx, relay_events_rx, shutdown.clone()));
        tokio::spawn(run_relay_follower(
            config.clone(),
            rpc_client.clone(),
            registry.clone(),
            server.clone(),
            template_rx,
            mode_handle,
            payout_script.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));
    } else {
        tokio::spawn(run_work_generator(
            config.clone(),
            rpc_client.clone(),
            registry.clone(),
            server.clone(),
            primary_hub,
            hashblock_rx,
            payout_script.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));
    }

    info!("gantry pool ready: stratum on {stratum_addr}");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, grace period {}s", config.shutdown_grace_s);
    shutdown.cancel();
    tokio::time::timeout(
        std::time::Duration::from_secs(config.shutdown_grace_s),
        server.shutdown(),
    )
    .await
    .ok();

    Ok(())
}

fn main() {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    if let Err(e) = runtime.block_on(run()) {
        eprintln!("fatal error: {e}");
        process::exit(1);
    }
}
