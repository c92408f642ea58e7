//! HTTP endpoints: `/metrics` (Prometheus text) and `/health` (aggregated
//! peer-region status), spec.md §4.8.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::registry::MetricsRegistry;

/// Serves `GET /metrics` in Prometheus text exposition format.
pub async fn serve_metrics(
    registry: Arc<MetricsRegistry>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(handle_metrics))
        .layer(Extension(registry));

    info!("metrics endpoint listening on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

async fn handle_metrics(Extension(registry): Extension<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (StatusCode::OK, registry.render())
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub status: &'static str,
    pub last_seen: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: u64,
    pub regions: HashMap<String, PeerStatus>,
}

/// Polls every peer's `/metrics` endpoint on an interval and aggregates the
/// results into a `HealthReport` served on `/health` (spec.md §4.8).
pub struct HealthMonitor {
    peers: HashMap<String, String>,
    report: Arc<RwLock<HealthReport>>,
    client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(peers: HashMap<String, String>) -> Self {
        HealthMonitor {
            peers,
            report: Arc::new(RwLock::new(HealthReport {
                status: "healthy",
                timestamp: 0,
                regions: HashMap::new(),
            })),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with static config"),
        }
    }

    /// Spawns the polling loop (every 15s per spec.md §4.8) and the HTTP
    /// server for `/health`.
    pub async fn spawn(self, addr: SocketAddr, shutdown: CancellationToken) -> std::io::Result<()> {
        let report = self.report.clone();
        let peers = self.peers.clone();
        let client = self.client.clone();
        let poll_shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                Self::poll_once(&client, &peers, &report).await;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(15)) => {}
                    _ = poll_shutdown.cancelled() => break,
                }
            }
        });

        let app = Router::new()
            .route("/health", get(handle_health))
            .layer(Extension(self.report.clone()));

        info!("health endpoint listening on {addr}");
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    async fn poll_once(
        client: &reqwest::Client,
        peers: &HashMap<String, String>,
        report: &Arc<RwLock<HealthReport>>,
    ) {
        let now = gantry_util::time::unix_secs();
        let mut regions = HashMap::new();
        let mut reachable = 0usize;

        for (region, url) in peers {
            let metrics_url = format!("{url}/metrics");
            match client.get(&metrics_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    reachable += 1;
                    regions.insert(
                        region.clone(),
                        PeerStatus {
                            status: "healthy",
                            last_seen: Some(now),
                        },
                    );
                }
                Ok(resp) => {
                    warn!("peer {region} returned {}", resp.status());
                    regions.insert(
                        region.clone(),
                        PeerStatus {
                            status: "unreachable",
                            last_seen: None,
                        },
                    );
                }
                Err(e) => {
                    warn!("peer {region} unreachable: {e}");
                    regions.insert(
                        region.clone(),
                        PeerStatus {
                            status: "unreachable",
                            last_seen: None,
                        },
                    );
                }
            }
        }

        let status = if peers.is_empty() || reachable == peers.len() {
            "healthy"
        } else if reachable == 0 {
            "unhealthy"
        } else {
            "degraded"
        };

        let mut guard = report.write().await;
        *guard = HealthReport {
            status,
            timestamp: now,
            regions,
        };
    }
}

async fn handle_health(
    Extension(report): Extension<Arc<RwLock<HealthReport>>>,
) -> impl IntoResponse {
    let guard = report.read().await;
    (StatusCode::OK, Json(guard.clone()))
}
