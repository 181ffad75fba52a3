// src/hub/mod.rs
// The per-user coordinator (§4.7): single plugin socket, N client sockets,
// one executor task serializing every mutation onto itself (§5 scheduling
// model). Grounded on the teacher's single actor-per-connection style
// (`api/ws/chat/mod.rs`'s receive loop) generalized from one socket to the
// fan-in-many-sockets shape this spec needs.

mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::auth::AuthConfig;
use crate::config::socket::{HubConfig, SocketConfig};
use crate::error::HubError;
use crate::protocol::{HubFrame, OutboundFrame};
use crate::router::ConnState;
use crate::socket::{self, SocketExit, WriterHandle};
use crate::store::models::Message;
use crate::store::Store;

pub use executor::run_executor;

/// A live plugin connection. At most one per user (§3 Connection / PluginConn).
pub struct PluginConn {
    pub conn_id: String,
    pub ip: String,
    pub connected_at_ms: i64,
    pub writer: WriterHandle,
}

/// A live client connection. Authenticates via its first WS frame (§4.7
/// Client attach protocol) before it starts receiving fan-out.
pub struct ClientConn {
    pub client_session_id: String,
    pub user_id: Option<String>,
    pub writer: WriterHandle,
    pub authenticated: bool,
    pub joined_at_ms: i64,
}

/// Events posted onto the hub's single mailbox. Every variant here is
/// processed by exactly one executor, in receipt order across all sockets
/// (§4.7 single-writer invariants; §5 scheduling model).
pub enum HubEvent {
    NewPlugin {
        conn: PluginConn,
    },
    NewClient {
        conn: ClientConn,
    },
    PluginFrame(serde_json::Value),
    PluginClosed(SocketExit),
    ClientFrame {
        client_session_id: String,
        value: serde_json::Value,
    },
    ClientClosed {
        client_session_id: String,
        exit: SocketExit,
    },
    /// Periodic tick driving auth-timeout sweeps, stream timeouts, and
    /// quiescence checks. Carries the firing time in epoch milliseconds.
    Tick(i64),
    Rpc(RpcRequest),
}

/// Internal-interface RPCs the Gateway issues against a Hub (§4.8).
pub enum RpcRequest {
    Status(oneshot::Sender<HubStatus>),
    Send {
        frame: OutboundFrame,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    History {
        session_key: String,
        thread_id: Option<String>,
        limit: i64,
        reply: oneshot::Sender<Result<HistoryPage, HubError>>,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStatus {
    pub user_id: String,
    pub openclaw_connected: bool,
    pub default_model: Option<String>,
    pub client_count: usize,
}

pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub reply_counts: HashMap<String, i64>,
}

/// A cheaply cloneable reference to a running hub's mailbox. This is the
/// only way anything outside the hub's own executor task touches its state.
#[derive(Clone)]
pub struct HubHandle {
    user_id: String,
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Accepts an already-upgraded plugin WebSocket. Replaces any existing
    /// plugin connection (§4.7: only one plugin is ever live).
    pub fn attach_plugin(&self, socket: WebSocket, ip: String, socket_config: &SocketConfig) {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let mailbox = self.tx.clone();
        let (raw_tx, mut raw_rx) = mpsc::channel(socket_config.mailbox_depth);
        let (writer, exit_rx) = socket::spawn(socket, socket_config, raw_tx);

        let forward_mailbox = mailbox.clone();
        let forward_writer = writer.clone();
        tokio::spawn(async move {
            while let Some(value) = raw_rx.recv().await {
                match forward_mailbox.try_send(HubEvent::PluginFrame(value)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // §5: mailbox overflow closes the offending socket rather than
                        // silently dropping a state-changing message.
                        forward_writer.close_with(crate::error::CLOSE_OVERLOADED, "hub mailbox overloaded");
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        tokio::spawn(async move {
            if let Ok(exit) = exit_rx.await {
                let _ = mailbox.send(HubEvent::PluginClosed(exit)).await;
            }
        });

        let conn = PluginConn {
            conn_id,
            ip,
            connected_at_ms: now_ms(),
            writer,
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(HubEvent::NewPlugin { conn }).await;
        });
    }

    /// Accepts an already-upgraded client WebSocket. The connection starts
    /// unauthenticated; its first frame must be `{type:"auth"}` within
    /// `client_auth_timeout_secs` (§4.7 Client attach protocol).
    pub fn attach_client(&self, socket: WebSocket, socket_config: &SocketConfig) {
        let client_session_id = uuid::Uuid::new_v4().to_string();
        let mailbox = self.tx.clone();
        let (raw_tx, mut raw_rx) = mpsc::channel(socket_config.mailbox_depth);
        let (writer, exit_rx) = socket::spawn(socket, socket_config, raw_tx);

        let forward_id = client_session_id.clone();
        let forward_mailbox = mailbox.clone();
        let forward_writer = writer.clone();
        tokio::spawn(async move {
            while let Some(value) = raw_rx.recv().await {
                let event = HubEvent::ClientFrame {
                    client_session_id: forward_id.clone(),
                    value,
                };
                match forward_mailbox.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        forward_writer.close_with(crate::error::CLOSE_OVERLOADED, "hub mailbox overloaded");
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        let close_id = client_session_id.clone();
        tokio::spawn(async move {
            if let Ok(exit) = exit_rx.await {
                let _ = mailbox
                    .send(HubEvent::ClientClosed {
                        client_session_id: close_id,
                        exit,
                    })
                    .await;
            }
        });

        let conn = ClientConn {
            client_session_id,
            user_id: None,
            writer,
            authenticated: false,
            joined_at_ms: now_ms(),
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(HubEvent::NewClient { conn }).await;
        });
    }

    pub async fn status(&self) -> Result<HubStatus, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::Rpc(RpcRequest::Status(reply)))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn send(&self, frame: OutboundFrame) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::Rpc(RpcRequest::Send { frame, reply }))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    pub async fn history(
        &self,
        session_key: String,
        thread_id: Option<String>,
        limit: i64,
    ) -> Result<HistoryPage, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::Rpc(RpcRequest::History {
                session_key,
                thread_id,
                limit,
                reply,
            }))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }
}

/// Registry of live hubs, one per user, keyed by `userId`. Owned by the
/// Gateway; creates hubs on demand (§4.7 lifecycle: "created on demand when
/// the first connection for a user arrives").
pub struct HubRegistry {
    store: Store,
    socket_config: SocketConfig,
    hub_config: HubConfig,
    auth_config: AuthConfig,
    hubs: tokio::sync::Mutex<HashMap<String, HubHandle>>,
}

impl HubRegistry {
    pub fn new(
        store: Store,
        socket_config: SocketConfig,
        hub_config: HubConfig,
        auth_config: AuthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            socket_config,
            hub_config,
            auth_config,
            hubs: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Returns the hub for `user_id`, spawning its executor if this is the
    /// first connection for that user.
    pub async fn get_or_create(self: &Arc<Self>, user_id: &str) -> HubHandle {
        let mut hubs = self.hubs.lock().await;
        if let Some(existing) = hubs.get(user_id) {
            return existing.clone();
        }

        let (tx, rx) = mpsc::channel(self.socket_config.mailbox_depth);
        let handle = HubHandle {
            user_id: user_id.to_string(),
            tx,
        };

        let registry = self.clone();
        let spawned_user_id = user_id.to_string();
        let store = self.store.clone();
        let hub_config = self.hub_config.clone();
        let socket_config = self.socket_config.clone();
        let auth_config = self.auth_config.clone();
        let ticker_tx = handle.tx.clone();
        spawn_ticker(ticker_tx);
        tokio::spawn(async move {
            executor::run_executor(spawned_user_id.clone(), store, hub_config, socket_config, auth_config, rx)
                .await;
            registry.hubs.lock().await.remove(&spawned_user_id);
            info!(user_id = %spawned_user_id, "hub executor exited, removed from registry");
        });

        hubs.insert(user_id.to_string(), handle.clone());
        handle
    }

    pub async fn get(&self, user_id: &str) -> Option<HubHandle> {
        self.hubs.lock().await.get(user_id).cloned()
    }

    pub fn socket_config(&self) -> &SocketConfig {
        &self.socket_config
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Starts the periodic tick driving this hub's timeouts (§5 Timeouts).
/// Spawned once per hub alongside its executor.
pub(crate) fn spawn_ticker(tx: mpsc::Sender<HubEvent>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tx.send(HubEvent::Tick(now_ms())).await.is_err() {
                break;
            }
        }
    });
}

/// Broadcasts `frame` to every client socket, logging but not failing on
/// individual backpressure/closed writers (§4.7 fan-out).
pub(crate) fn broadcast(clients: &HashMap<String, ClientConn>, frame: &OutboundFrame) {
    for client in clients.values() {
        if !client.authenticated {
            continue;
        }
        if let Err(e) = client.writer.send(frame) {
            warn!(client = %client.client_session_id, error = %e, "fan-out send failed");
        }
    }
}

/// Sends an error frame to a single client, best-effort.
pub(crate) fn send_to_client(client: &ClientConn, frame: HubFrame) {
    if let Err(e) = client.writer.send(&frame) {
        warn!(client = %client.client_session_id, error = %e, "direct send failed");
    }
}
