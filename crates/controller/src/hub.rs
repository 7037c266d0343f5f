// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-channel hub: one live WebSocket session per agent.
//!
//! Admission happens on the first frame: a valid unused token plus a
//! fresh public key (`registration`), or an existing id proven by a key
//! signature (`reconnection`). A newly accepted session preempts any
//! prior session for the same id. Commands flow outward in send order
//! and are never buffered for offline agents: send fails synchronously
//! and the caller decides. Silence beyond twice the heartbeat interval
//! tears the session down and marks the agent offline.

use crate::alerts::AlertSink;
use crate::auth::{self, AuthError};
use crate::gitstore::ConfigStore;
use crate::registry::{AgentRecord, AgentStatus, Registry};
use crate::tokens::{TokenError, TokenService};
use convoy_core::{AgentId, Clock, SystemClock};
use convoy_wire::{
    auth as wire_auth, decode_agent, encode, AgentMessage, Command, ControllerMessage,
    CLOSE_AUTH_FAILURE, CLOSE_LIVENESS_TIMEOUT, CLOSE_MALFORMED, CLOSE_PREEMPTED,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// Default heartbeat interval T_h.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// How long a fresh connection may take to present its first frame.
const ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth per session.
const OUTBOUND_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("agent {0} is not connected")]
    NotConnected(AgentId),
    #[error("send to agent {0} failed")]
    SendFailed(AgentId),
}

struct SessionHandle {
    session_id: u64,
    tx: mpsc::Sender<ControllerMessage>,
    cancel: CancellationToken,
}

pub struct HubShared {
    pub registry: Arc<Registry>,
    pub tokens: Arc<TokenService>,
    pub alerts: Arc<AlertSink>,
    pub store: Arc<ConfigStore>,
    pub heartbeat_interval: Duration,
    clock: SystemClock,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    session_counter: AtomicU64,
}

#[derive(Clone)]
pub struct Hub {
    shared: Arc<HubShared>,
}

impl Hub {
    pub fn new(
        registry: Arc<Registry>,
        tokens: Arc<TokenService>,
        alerts: Arc<AlertSink>,
        store: Arc<ConfigStore>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(HubShared {
                registry,
                tokens,
                alerts,
                store,
                heartbeat_interval,
                clock: SystemClock,
                sessions: Mutex::new(HashMap::new()),
                session_counter: AtomicU64::new(1),
            }),
        }
    }

    /// Route a command to a connected agent, in send order.
    ///
    /// At-most-once: if the agent is not connected the call fails
    /// synchronously and nothing is buffered.
    pub fn send_command(&self, id: &AgentId, command: Command) -> Result<(), HubError> {
        let sessions = self.shared.sessions.lock();
        let handle = sessions
            .get(id.as_str())
            .ok_or_else(|| HubError::NotConnected(id.clone()))?;
        handle
            .tx
            .try_send(ControllerMessage::Command { command })
            .map_err(|_| HubError::SendFailed(id.clone()))
    }

    pub fn is_connected(&self, id: &AgentId) -> bool {
        self.shared.sessions.lock().contains_key(id.as_str())
    }

    pub fn connected_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Accept loop; runs until cancelled.
    pub async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        tracing::info!("control-channel hub listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&self.shared);
                        let session_cancel = cancel.clone();
                        tokio::spawn(async move {
                            run_session(shared, stream, peer, session_cancel).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "control-channel accept failed");
                    }
                },
            }
        }
        tracing::info!("control-channel hub stopped");
    }
}

/// Why an admission attempt was rejected.
#[derive(Debug, Error)]
enum AdmissionReject {
    #[error("token rejected: {0}")]
    Token(#[from] TokenError),
    #[error("unknown agent id")]
    UnknownAgent,
    #[error("credential rejected: {0}")]
    Credential(#[from] AuthError),
    #[error("first frame must be registration or reconnection")]
    Protocol,
    #[error("registry write failed: {0}")]
    Registry(String),
}

struct Admission {
    agent_id: AgentId,
    reply: Option<ControllerMessage>,
    newly_registered: bool,
}

/// Decide whether the first frame admits this session.
///
/// Registration consumes the token and creates the record; reconnection
/// verifies the signature against the stored key. Failures mutate
/// nothing (token consumption is atomic with agent creation).
fn admit(
    registry: &Registry,
    tokens: &TokenService,
    message: AgentMessage,
    observed_ip: Option<String>,
    now_ms: u64,
) -> Result<Admission, AdmissionReject> {
    match message {
        AgentMessage::Registration { token, public_key, hostname, platform, api_port } => {
            let agent_id = AgentId::generate();
            let token_record = tokens.consume(&token, &agent_id, now_ms)?;
            let record = AgentRecord {
                id: agent_id.clone(),
                public_key,
                hostname,
                platform,
                status: AgentStatus::Online,
                last_heartbeat_ms: Some(now_ms),
                observed_ip,
                api_port,
                pinned_api_address: token_record.pinned_api_address,
                metadata: serde_json::Map::new(),
                config_mirror: None,
                registered_at_ms: now_ms,
            };
            registry
                .register(record)
                .map_err(|e| AdmissionReject::Registry(e.to_string()))?;
            Ok(Admission {
                agent_id: agent_id.clone(),
                reply: Some(ControllerMessage::Registered { agent_id }),
                newly_registered: true,
            })
        }
        AgentMessage::Reconnection { agent_id, timestamp_ms, signature, api_port } => {
            let public_key =
                registry.public_key(&agent_id).ok_or(AdmissionReject::UnknownAgent)?;
            let payload = wire_auth::reconnect_payload(&agent_id, timestamp_ms);
            auth::verify_fresh_signature(&public_key, &payload, &signature, timestamp_ms, now_ms)?;
            registry
                .mark_online(&agent_id, now_ms, observed_ip, api_port)
                .map_err(|e| AdmissionReject::Registry(e.to_string()))?;
            Ok(Admission { agent_id, reply: None, newly_registered: false })
        }
        _ => Err(AdmissionReject::Protocol),
    }
}

async fn run_session(
    shared: Arc<HubShared>,
    stream: TcpStream,
    peer: SocketAddr,
    parent_cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    // Admission: first frame, bounded.
    let first = tokio::time::timeout(ADMISSION_TIMEOUT, read.next()).await;
    let text = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            close(&mut write, CLOSE_MALFORMED, "expected handshake frame").await;
            return;
        }
    };
    let message = match decode_agent(text.as_str()) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "malformed handshake");
            close(&mut write, CLOSE_MALFORMED, "malformed message").await;
            return;
        }
    };

    let now_ms = shared.clock.epoch_ms();
    let admission = match admit(
        &shared.registry,
        &shared.tokens,
        message,
        Some(peer.ip().to_string()),
        now_ms,
    ) {
        Ok(admission) => admission,
        Err(reject) => {
            tracing::warn!(%peer, reason = %reject, "session admission rejected");
            close(&mut write, CLOSE_AUTH_FAILURE, "admission rejected").await;
            return;
        }
    };
    let agent_id = admission.agent_id.clone();

    if let Some(reply) = &admission.reply {
        if send_frame(&mut write, reply).await.is_err() {
            let _ = shared.registry.mark_offline(&agent_id);
            return;
        }
    }
    if admission.newly_registered {
        // Seed the agent's config document so its first clone has content.
        if let Err(e) = shared.store.init_agent_config(&agent_id).await {
            tracing::error!(%agent_id, error = %e, "seeding agent config failed");
        }
    }

    // Register the session, preempting any prior one for this id.
    let session_id = shared.session_counter.fetch_add(1, Ordering::Relaxed);
    let (tx, mut outbound) = mpsc::channel::<ControllerMessage>(OUTBOUND_BUFFER);
    let my_cancel = parent_cancel.child_token();
    let preempted = {
        let mut sessions = shared.sessions.lock();
        sessions.insert(
            agent_id.as_str().to_string(),
            SessionHandle { session_id, tx, cancel: my_cancel.clone() },
        )
    };
    if let Some(old) = preempted {
        tracing::info!(%agent_id, "preempting prior session");
        old.cancel.cancel();
    }
    tracing::info!(%agent_id, %peer, session_id, "control-channel session established");

    let liveness = shared.heartbeat_interval * 2;
    let mut deadline = tokio::time::Instant::now() + liveness;
    let close_info: (u16, &str);

    loop {
        tokio::select! {
            _ = my_cancel.cancelled() => {
                if parent_cancel.is_cancelled() {
                    close_info = (CloseCode::Away.into(), "controller shutting down");
                } else {
                    close_info = (CLOSE_PREEMPTED, "preempted by newer session");
                }
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(%agent_id, "liveness timeout, marking offline");
                close_info = (CLOSE_LIVENESS_TIMEOUT, "liveness timeout");
                break;
            }
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    close_info = (CloseCode::Away.into(), "session closed");
                    break;
                };
                if let Err(e) = send_frame(&mut write, &message).await {
                    tracing::warn!(%agent_id, error = %e, "command delivery failed");
                    close_info = (CloseCode::Abnormal.into(), "write failed");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        deadline = tokio::time::Instant::now() + liveness;
                        match decode_agent(text.as_str()) {
                            Ok(message) => {
                                if !handle_inbound(&shared, &agent_id, message) {
                                    close_info = (CLOSE_MALFORMED, "unexpected handshake");
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(%agent_id, error = %e, "malformed frame");
                                close_info = (CLOSE_MALFORMED, "malformed message");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        deadline = tokio::time::Instant::now() + liveness;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(%agent_id, "agent closed session");
                        close_info = (CloseCode::Normal.into(), "peer closed");
                        break;
                    }
                    Some(Ok(_)) => {} // Binary frames are ignored
                    Some(Err(e)) => {
                        tracing::debug!(%agent_id, error = %e, "session read error");
                        close_info = (CloseCode::Abnormal.into(), "read error");
                        break;
                    }
                }
            }
        }
    }

    close(&mut write, close_info.0, close_info.1).await;

    // Only the live session owner tears down registry state; a preempted
    // session must not mark the (re-admitted) agent offline.
    let owned = {
        let mut sessions = shared.sessions.lock();
        match sessions.get(agent_id.as_str()) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(agent_id.as_str());
                true
            }
            _ => false,
        }
    };
    if owned {
        if let Err(e) = shared.registry.mark_offline(&agent_id) {
            tracing::error!(%agent_id, error = %e, "offline transition failed");
        }
    }
    tracing::info!(%agent_id, session_id, reason = close_info.1, "session ended");
}

/// Dispatch a post-admission inbound message; false means protocol
/// violation.
fn handle_inbound(shared: &HubShared, agent_id: &AgentId, message: AgentMessage) -> bool {
    let now_ms = shared.clock.epoch_ms();
    match message {
        AgentMessage::Heartbeat { seq } => {
            tracing::trace!(%agent_id, ?seq, "heartbeat");
            if let Err(e) = shared.registry.touch(agent_id, now_ms) {
                tracing::error!(%agent_id, error = %e, "heartbeat record failed");
            }
            true
        }
        AgentMessage::Status { fields } => {
            tracing::info!(%agent_id, status = %serde_json::Value::Object(fields.clone()), "status report");
            if let Err(e) = shared.registry.record_status(agent_id, fields) {
                tracing::error!(%agent_id, error = %e, "status record failed");
            }
            true
        }
        AgentMessage::Alert { level, message, details } => {
            tracing::info!(%agent_id, %level, message, "alert received");
            if let Err(e) =
                shared.alerts.record(agent_id.clone(), level, message, details, now_ms)
            {
                tracing::error!(%agent_id, error = %e, "alert record failed");
            }
            true
        }
        AgentMessage::Registration { .. } | AgentMessage::Reconnection { .. } => false,
    }
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

async fn send_frame(
    write: &mut WsSink,
    message: &ControllerMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let text = encode(message)?;
    write.send(Message::text(text)).await?;
    Ok(())
}

async fn close(write: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
    let _ = write.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
