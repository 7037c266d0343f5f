// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-channel client: bootstrap, heartbeats, reconnection.
//!
//! First run trades a registration token for an identity; later runs
//! present the stored id proven by a key signature. Session loss feeds
//! an exponential backoff (bounded, jittered) and every successful
//! connect is reported so the runtime can re-sync config, since the hub never
//! buffers commands for offline agents. Auth rejections are terminal:
//! they are surfaced once, not retried.

use crate::identity::Identity;
use convoy_core::{AgentId, Clock, SystemClock};
use convoy_wire::{
    auth as wire_auth, decode_controller, encode, AgentMessage, Command, ControllerMessage,
    CLOSE_AUTH_FAILURE,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Default heartbeat interval T_h.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
/// Reconnect backoff bound B_max.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);
/// How long to wait for the registration reply.
const REGISTRATION_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws://controller:7770`
    pub ws_url: String,
    /// Registration token; required only when no id is stored yet.
    pub token: Option<String>,
    pub hostname: String,
    pub platform: String,
    pub api_port: u16,
    pub heartbeat: Duration,
    pub backoff_max: Duration,
}

/// What the channel reports to the runtime.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Registration succeeded; the id must be persisted locally.
    Registered(AgentId),
    /// A session is up; re-sync config regardless of missed commands.
    Connected,
    /// The controller issued a command.
    Command(Command),
    /// Session lost; the client is backing off.
    Disconnected,
    /// Credentials were rejected; the client stopped retrying.
    AuthFailed,
}

#[derive(Debug, Error)]
enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("no stored identity and no registration token")]
    NoCredentials,

    #[error("authentication rejected by controller")]
    AuthRejected,

    #[error("session I/O failed: {0}")]
    Io(String),
}

/// Exponential reconnect backoff with jitter.
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial, initial, max }
    }

    /// Next delay: jittered between 50% and 150% of the current step,
    /// then the step doubles toward the bound.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let millis = base.as_millis() as u64;
        let jittered = millis / 2 + rand::thread_rng().gen_range(0..=millis);
        Duration::from_millis(jittered.max(100))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Run the reconnect loop until cancelled or auth-rejected.
pub async fn run(
    config: ChannelConfig,
    identity: Arc<Identity>,
    agent_id: Arc<Mutex<Option<AgentId>>>,
    mut outbound_rx: mpsc::Receiver<AgentMessage>,
    events_tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(Duration::from_secs(1), config.backoff_max);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        match session(
            &config,
            &identity,
            &agent_id,
            &mut outbound_rx,
            &events_tx,
            &cancel,
            &mut backoff,
        )
        .await
        {
            Ok(()) => break, // cancelled
            Err(SessionError::AuthRejected) | Err(SessionError::NoCredentials) => {
                tracing::error!("control-channel credentials rejected; not retrying");
                let _ = events_tx.send(ChannelEvent::AuthFailed).await;
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "control-channel session ended");
                let _ = events_tx.send(ChannelEvent::Disconnected).await;
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::info!("control-channel client stopped");
}

async fn session(
    config: &ChannelConfig,
    identity: &Identity,
    agent_id: &Mutex<Option<AgentId>>,
    outbound_rx: &mut mpsc::Receiver<AgentMessage>,
    events_tx: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<(), SessionError> {
    let (ws, _) = tokio_tungstenite::connect_async(config.ws_url.as_str())
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?;
    let (mut write, mut read) = ws.split();
    let clock = SystemClock;

    // Handshake: reconnection with the stored id, else registration.
    let stored = agent_id.lock().clone();
    match stored {
        Some(id) => {
            let timestamp_ms = clock.epoch_ms();
            let payload = wire_auth::reconnect_payload(&id, timestamp_ms);
            let message = AgentMessage::Reconnection {
                agent_id: id,
                timestamp_ms,
                signature: identity.sign_base64(&payload),
                api_port: Some(config.api_port),
            };
            send(&mut write, &message).await?;
        }
        None => {
            let token = config.token.clone().ok_or(SessionError::NoCredentials)?;
            let message = AgentMessage::Registration {
                token,
                public_key: identity.public_key_pem().to_string(),
                hostname: config.hostname.clone(),
                platform: config.platform.clone(),
                api_port: Some(config.api_port),
            };
            send(&mut write, &message).await?;

            // The controller replies with the assigned id.
            let reply = tokio::time::timeout(REGISTRATION_REPLY_TIMEOUT, read.next())
                .await
                .map_err(|_| SessionError::Io("registration reply timed out".to_string()))?;
            match reply {
                Some(Ok(Message::Text(text))) => match decode_controller(text.as_str()) {
                    Ok(ControllerMessage::Registered { agent_id: issued }) => {
                        tracing::info!(%issued, "registered with controller");
                        *agent_id.lock() = Some(issued.clone());
                        let _ = events_tx.send(ChannelEvent::Registered(issued)).await;
                    }
                    _ => return Err(SessionError::Io("unexpected registration reply".to_string())),
                },
                Some(Ok(Message::Close(frame))) => {
                    if frame.is_some_and(|f| u16::from(f.code) == CLOSE_AUTH_FAILURE) {
                        return Err(SessionError::AuthRejected);
                    }
                    return Err(SessionError::Io("closed during registration".to_string()));
                }
                _ => return Err(SessionError::Io("registration reply missing".to_string())),
            }
        }
    }

    backoff.reset();
    tracing::info!("control channel established");
    let _ = events_tx.send(ChannelEvent::Connected).await;

    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                seq += 1;
                send(&mut write, &AgentMessage::Heartbeat { seq: Some(seq) }).await?;
            }
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else {
                    return Err(SessionError::Io("outbound channel closed".to_string()));
                };
                send(&mut write, &message).await?;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_controller(text.as_str()) {
                    Ok(ControllerMessage::Command { command }) => {
                        tracing::info!(command = command.name(), "command received");
                        let _ = events_tx.send(ChannelEvent::Command(command)).await;
                    }
                    Ok(other) => {
                        tracing::debug!(?other, "unexpected frame ignored");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed controller frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    if frame.as_ref().is_some_and(|f| u16::from(f.code) == CLOSE_AUTH_FAILURE) {
                        return Err(SessionError::AuthRejected);
                    }
                    return Err(SessionError::Io("closed by controller".to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SessionError::Io(e.to_string())),
                None => return Err(SessionError::Io("stream ended".to_string())),
            },
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn send(write: &mut WsSink, message: &AgentMessage) -> Result<(), SessionError> {
    let text = encode(message).map_err(|e| SessionError::Io(e.to_string()))?;
    write.send(Message::text(text)).await.map_err(|e| SessionError::Io(e.to_string()))
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
