//! Stratum V1 server (spec.md §4.2): TCP accept loop, session registry,
//! JSON-RPC dispatch, and the bridge between a session and the variance
//! difficulty engine.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gantry_consensus::{on_share_accepted, Adjustment, VardiffState};
use gantry_core::session::SessionState;
use gantry_core::{Event, EventPayload, Session, User};
use gantry_crypto::{validate_address, validate_signature};
use gantry_storage::ReconnectStore;
use gantry_util::time::{unix_nanos, unix_secs};
use gantry_util::GantryConfig;
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::protocol::{
    Notification, Request, Response, RpcError, ERR_INVALID_PARAMS, ERR_MALFORMED, ERR_UNAUTHORIZED,
};
use crate::session::{StratumSession, TokenBucket};
use crate::validator::{validate_share, RejectReason, ShareOutcome, ShareSubmission};
use crate::workgen::{assemble_block, WorkbaseRegistry, EXTRANONCE2_SIZE};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Implemented by `gantry-rpc` against the live Bitcoin node. Kept as a
/// trait here, matching `workgen::BlockTemplateSource`, so the server is
/// testable without a node.
#[async_trait::async_trait]
pub trait BlockSubmitter: Send + Sync {
    async fn submit_block(&self, block: Vec<u8>);
}

pub type EventSender = mpsc::UnboundedSender<Event>;

/// Shared state behind the Stratum server (spec.md §5): the session
/// registry, the current workbase, reconnect memory, and the event sink
/// every component feeds.
pub struct StratumServer {
    config: Arc<GantryConfig>,
    registry: Arc<WorkbaseRegistry>,
    reconnect: Arc<dyn ReconnectStore>,
    submitter: Option<Arc<dyn BlockSubmitter>>,
    events: Option<EventSender>,
    sessions: Mutex<HashMap<u64, Arc<Mutex<StratumSession>>>>,
    vardiff: Mutex<HashMap<u64, VardiffState>>,
    /// Cross-session accumulator keyed by payout address (spec.md §3, §8:
    /// `all_time_best` must never decrease across sessions sharing an
    /// address).
    users: Mutex<HashMap<String, User>>,
    /// Per-source-IP connection rate limiter (spec.md §4.2).
    ip_rate: Mutex<HashMap<IpAddr, TokenBucket>>,
    next_session_id: AtomicU64,
}

impl StratumServer {
    pub fn new(
        config: Arc<GantryConfig>,
        registry: Arc<WorkbaseRegistry>,
        reconnect: Arc<dyn ReconnectStore>,
        submitter: Option<Arc<dyn BlockSubmitter>>,
        events: Option<EventSender>,
    ) -> Arc<Self> {
        Arc::new(StratumServer {
            config,
            registry,
            reconnect,
            submitter,
            events,
            sessions: Mutex::new(HashMap::new()),
            vardiff: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            ip_rate: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Maximum per-session rate-limit violations tolerated before the
    /// connection is closed (spec.md §4.2: "repeated violations close the
    /// session").
    const MAX_RATE_VIOLATIONS: u32 = 10;

    fn emit(&self, payload: EventPayload) {
        if let Some(tx) = &self.events {
            let ev = Event::new(unix_nanos(), self.config.region.clone(), payload);
            let _ = tx.send(ev);
        }
    }

    /// Broadcasts a freshly-published workbase to every authorized session
    /// (spec.md §4.1 "clean_jobs", §4.2 "a broadcast primitive distributes
    /// new jobs to all authorized sessions").
    pub async fn broadcast_workbase(&self) {
        let workbase = self.registry.current();
        let live_ids = self.registry.live_ids();
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let mut session = session.lock().await;
            session.core.prune_shares(&live_ids);
            if !session.core.is_authorized() {
                continue;
            }
            let notification = Notification::notify(
                workbase.id,
                &workbase.prev_hash,
                &workbase.coinb1,
                &workbase.coinb2,
                &workbase.merkle_branch,
                workbase.version,
                workbase.bits,
                workbase.curtime,
                workbase.clean_jobs,
            );
            session.send_notification(&notification).await;
        }
    }

    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("stratum server listening on {addr}");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("session {peer} ended: {e}");
                }
            });
        }
    }

    fn generate_extranonce1() -> Vec<u8> {
        let n: u32 = rand::random();
        n.to_be_bytes().to_vec()
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ServerError> {
        {
            let mut ip_rate = self.ip_rate.lock().await;
            let bucket = ip_rate
                .entry(peer.ip())
                .or_insert_with(|| TokenBucket::new(self.config.rate_limits.connections_per_ip_per_s));
            if !bucket.try_take() {
                warn!("rejecting connection from {peer}: per-IP connection rate exceeded");
                return Ok(());
            }
        }
        if self.sessions.lock().await.len() >= self.config.max_sessions {
            warn!(
                "rejecting connection from {peer}: max_sessions ({}) reached",
                self.config.max_sessions
            );
            return Ok(());
        }

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let (tx, mut rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let now = unix_secs();
        let mut core = Session::new(id, peer, now);
        core.extranonce1 = Self::generate_extranonce1();
        core.extranonce2_size = EXTRANONCE2_SIZE;
        core.difficulty = self.config.min_diff;

        let session = Arc::new(Mutex::new(StratumSession::new(
            core,
            tx,
            self.config.rate_limits.session_messages_per_s,
        )));
        self.sessions.lock().await.insert(id, session.clone());
        self.vardiff
            .lock()
            .await
            .insert(id, VardiffState::new(self.config.min_diff, now as f64));
        self.emit(EventPayload::Connect {
            session_id: id,
            remote_addr: peer.to_string(),
        });

        loop {
            let line = match lines.next_line().await {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(e) => {
                    warn!("session {id} read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if !self.handle_line(&session, &line).await {
                break;
            }
        }

        self.close_session(id, &session).await;
        Ok(())
    }

    /// Dispatches one inbound line. Returns `false` when the connection
    /// should be closed (spec.md §4.2: "repeated violations close the
    /// session").
    async fn handle_line(&self, session: &Arc<Mutex<StratumSession>>, line: &str) -> bool {
        let allowed = {
            let mut s = session.lock().await;
            s.rate.try_take()
        };
        if !allowed {
            let violations = {
                let mut s = session.lock().await;
                s.rate_violations += 1;
                s.rate_violations
            };
            let resp = Response::err(
                Value::Null,
                RpcError::new(ERR_INVALID_PARAMS, "rate limit exceeded"),
            );
            {
                let s = session.lock().await;
                s.send_response(&resp).await;
            }
            if violations >= Self::MAX_RATE_VIOLATIONS {
                warn!("closing session after {violations} rate limit violations");
                return false;
            }
            return true;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                let s = session.lock().await;
                let resp = Response::err(Value::Null, RpcError::new(ERR_MALFORMED, "malformed request"));
                s.send_response(&resp).await;
                return true;
            }
        };

        let id = request.id.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            "mining.subscribe" => self.handle_subscribe(session, id).await,
            "mining.authorize" => self.handle_authorize(session, id, &request.params).await,
            "mining.submit" => self.handle_submit(session, id, &request.params).await,
            "mining.suggest_difficulty" => {
                self.handle_suggest_difficulty(session, id, &request.params).await
            }
            "mining.suggest_signature" => {
                self.handle_suggest_signature(session, id, &request.params).await
            }
            other => {
                let s = session.lock().await;
                let resp = Response::err(
                    id,
                    RpcError::new(ERR_INVALID_PARAMS, format!("unsupported method {other}")),
                );
                s.send_response(&resp).await;
            }
        }
        true
    }

    async fn handle_subscribe(&self, session: &Arc<Mutex<StratumSession>>, id: Value) {
        let mut s = session.lock().await;
        s.core.state = SessionState::Subscribed;
        let subscription_id = format!("{:016x}", s.core.id);
        let result = serde_json::json!([
            [["mining.set_difficulty", subscription_id], ["mining.notify", subscription_id]],
            hex::encode(&s.core.extranonce1),
            s.core.extranonce2_size,
        ]);
        s.send_response(&Response::ok(id, result)).await;
    }

    async fn handle_authorize(&self, session: &Arc<Mutex<StratumSession>>, id: Value, params: &[Value]) {
        let username = match params.first().and_then(Value::as_str) {
            Some(u) => u.to_string(),
            None => {
                let s = session.lock().await;
                s.send_response(&Response::err(id, RpcError::new(ERR_INVALID_PARAMS, "missing username")))
                    .await;
                return;
            }
        };
        let (address, worker_name) = match username.split_once('.') {
            Some((a, w)) => (a.to_string(), w.to_string()),
            // No `.workername` suffix: the full username is itself the
            // reconnect-memory key, so two bare-address logins never share
            // a sentinel.
            None => (username.clone(), username.clone()),
        };
        let accepted = validate_address(self.config.btc_network, &address).is_ok();

        let initial_difficulty = if accepted {
            match self.reconnect.get(&worker_name).await {
                Ok(Some(entry)) => entry.difficulty,
                _ => self.config.min_diff,
            }
        } else {
            self.config.min_diff
        };

        if accepted {
            let mut users = self.users.lock().await;
            let user = users
                .entry(address.clone())
                .or_insert_with(|| User::new(address.clone(), true));
            user.session_best = 0.0;
        }

        let workbase = self.registry.current();
        {
            let mut s = session.lock().await;
            if accepted {
                s.core.state = SessionState::Authorized;
                s.core.worker_name = Some(worker_name.clone());
                s.core.address = Some(address.clone());
                s.core.difficulty = initial_difficulty;
            }
            s.send_response(&Response::ok(id, Value::Bool(accepted))).await;
            if accepted {
                s.send_notification(&Notification::set_difficulty(initial_difficulty))
                    .await;
                s.send_notification(&Notification::notify(
                    workbase.id,
                    &workbase.prev_hash,
                    &workbase.coinb1,
                    &workbase.coinb2,
                    &workbase.merkle_branch,
                    workbase.version,
                    workbase.bits,
                    workbase.curtime,
                    true,
                ))
                .await;
            }
        }

        self.emit(EventPayload::Authorize {
            session_id: {
                let s = session.lock().await;
                s.core.id
            },
            username,
            worker_name,
            accepted,
        });
    }

    async fn handle_suggest_difficulty(
        &self,
        session: &Arc<Mutex<StratumSession>>,
        id: Value,
        params: &[Value],
    ) {
        let requested = params.first().and_then(Value::as_f64);
        let mut s = session.lock().await;
        match requested {
            Some(d) if d > 0.0 => {
                let clamped = d.clamp(self.config.min_diff, self.config.max_diff);
                s.core.difficulty = clamped;
                s.send_response(&Response::ok(id, Value::Bool(true))).await;
                s.send_notification(&Notification::set_difficulty(clamped)).await;
            }
            _ => {
                s.send_response(&Response::err(
                    id,
                    RpcError::new(ERR_INVALID_PARAMS, "invalid suggested difficulty"),
                ))
                .await;
            }
        }
    }

    async fn handle_suggest_signature(
        &self,
        session: &Arc<Mutex<StratumSession>>,
        id: Value,
        params: &[Value],
    ) {
        let tag = params.first().and_then(Value::as_str).unwrap_or_default();
        let s = session.lock().await;
        let ok = validate_signature(tag).is_ok();
        s.send_response(&Response::ok(id, Value::Bool(ok))).await;
    }

    async fn handle_submit(&self, session: &Arc<Mutex<StratumSession>>, id: Value, params: &[Value]) {
        let parsed = Self::parse_submit_params(params);
        let submission = match parsed {
            Some(s) => s,
            None => {
                let s = session.lock().await;
                s.send_response(&Response::err(id, RpcError::new(ERR_INVALID_PARAMS, "malformed submit")))
                    .await;
                return;
            }
        };

        let now = unix_secs();
        let (outcome, session_id, worker_name, address) = {
            let mut s = session.lock().await;
            if !s.core.is_authorized() {
                s.send_response(&Response::err(id, RpcError::new(ERR_UNAUTHORIZED, "not authorized")))
                    .await;
                return;
            }
            let outcome = validate_share(&*self.registry, &mut s.core, &submission, now);
            (outcome, s.core.id, s.core.worker_name.clone(), s.core.address.clone())
        };

        match outcome {
            ShareOutcome::Accepted(accepted) => {
                {
                    let s = session.lock().await;
                    s.send_response(&Response::ok(id, Value::Bool(true))).await;
                }
                let username = address.clone().unwrap_or_else(|| "unknown".to_string());
                let worker = worker_name.clone().unwrap_or_default();
                if let Some(addr) = &address {
                    let mut users = self.users.lock().await;
                    let user = users
                        .entry(addr.clone())
                        .or_insert_with(|| User::new(addr.clone(), true));
                    user.record_accept(accepted.share_diff);
                }
                self.emit(EventPayload::ShareAccepted {
                    username: username.clone(),
                    worker_name: worker.clone(),
                    workbase_id: submission.workbase_id,
                    share_diff: accepted.share_diff,
                });
                if accepted.is_new_best {
                    self.emit(EventPayload::ShareBest {
                        username: username.clone(),
                        worker_name: worker.clone(),
                        share_diff: accepted.share_diff,
                    });
                }
                if accepted.is_block {
                    if let Some(workbase) = self.registry.get(submission.workbase_id) {
                        let block = assemble_block(&workbase, &accepted.coinbase_tx, &accepted.header);
                        if let Some(submitter) = &self.submitter {
                            submitter.submit_block(block).await;
                        }
                        self.emit(EventPayload::BlockFound {
                            username,
                            worker_name: worker,
                            height: workbase.height,
                            workbase_id: workbase.id,
                        });
                    }
                }
                self.apply_vardiff(session, session_id, now as f64).await;
            }
            ShareOutcome::Rejected(reason) => {
                {
                    let mut s = session.lock().await;
                    s.core.record_reject();
                    s.send_response(&Response::err(id, reason.to_rpc_error())).await;
                }
                if let Some(addr) = &address {
                    let mut users = self.users.lock().await;
                    let user = users
                        .entry(addr.clone())
                        .or_insert_with(|| User::new(addr.clone(), true));
                    user.record_reject();
                }
                self.emit(EventPayload::ShareRejected {
                    username: address,
                    worker_name,
                    workbase_id: Some(submission.workbase_id),
                    reason: reason.message().to_string(),
                    code: reason.code(),
                });
            }
        }
    }

    async fn apply_vardiff(&self, session: &Arc<Mutex<StratumSession>>, session_id: u64, now: f64) {
        let mut vardiff = self.vardiff.lock().await;
        let state = match vardiff.get_mut(&session_id) {
            Some(s) => s,
            None => return,
        };
        let adjustment = on_share_accepted(
            state,
            &self.config.vardiff,
            self.config.min_diff,
            self.config.max_diff,
            now,
        );
        if let Adjustment::Changed { old, new } = adjustment {
            let mut s = session.lock().await;
            s.core.difficulty = new;
            s.send_notification(&Notification::set_difficulty(new)).await;
            drop(s);
            let worker_name = session.lock().await.core.worker_name.clone();
            self.emit(EventPayload::DifficultyChanged {
                session_id,
                worker_name,
                old_difficulty: old,
                new_difficulty: new,
            });
        }
    }

    fn parse_submit_params(params: &[Value]) -> Option<ShareSubmission> {
        let job_id_hex = params.get(1)?.as_str()?;
        let extranonce2_hex = params.get(2)?.as_str()?;
        let ntime_hex = params.get(3)?.as_str()?;
        let nonce_hex = params.get(4)?.as_str()?;

        Some(ShareSubmission {
            workbase_id: u64::from_str_radix(job_id_hex, 16).ok()?,
            extranonce2: hex::decode(extranonce2_hex).ok()?,
            ntime: u32::from_str_radix(ntime_hex, 16).ok()?,
            nonce: u32::from_str_radix(nonce_hex, 16).ok()?,
        })
    }

    async fn close_session(&self, id: u64, session: &Arc<Mutex<StratumSession>>) {
        let (worker_name, difficulty) = {
            let s = session.lock().await;
            (s.core.worker_name.clone(), s.core.difficulty)
        };
        if let Some(name) = &worker_name {
            let _ = self
                .reconnect
                .set(name, difficulty, self.config.vardiff.reconnect_ttl_s)
                .await;
        }
        self.sessions.lock().await.remove(&id);
        self.vardiff.lock().await.remove(&id);
        self.emit(EventPayload::Disconnect {
            session_id: id,
            worker_name,
        });
    }

    /// Persists every live session's current difficulty to reconnect memory
    /// (spec.md §5 "on shutdown, flush pending session writes, persist
    /// reconnect memory for every live session"). Does not close sockets;
    /// the caller is expected to stop accepting new connections and drop
    /// the server shortly after this returns.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let s = session.lock().await;
            if let Some(name) = &s.core.worker_name {
                let _ = self
                    .reconnect
                    .set(name, s.core.difficulty, self.config.vardiff.reconnect_ttl_s)
                    .await;
            }
        }
        info!("persisted reconnect memory for {} live sessions", sessions.len());
    }
}
