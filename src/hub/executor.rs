// src/hub/executor.rs
// The single-writer loop. Everything that mutates hub state runs here,
// sequentially, regardless of which socket produced the triggering event
// (§4.7 single-writer invariants).

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::auth::AuthConfig;
use crate::config::socket::{HubConfig, SocketConfig};
use crate::error::{HubError, CLOSE_AUTH_FAILURE, CLOSE_PLUGIN_REPLACED};
use crate::job_registry::JobRegistry;
use crate::metrics;
use crate::protocol::{ClientFrame, HubFrame, OutboundFrame, PluginFrame};
use crate::router::{self, ConnState};
use crate::session_registry::SessionRegistry;
use crate::socket::SocketExit;
use crate::store::Store;
use crate::stream_stager::StreamStager;

use super::{
    broadcast, now_ms, send_to_client, ClientConn, HistoryPage, HubEvent, HubStatus, PluginConn, RpcRequest,
};

struct HubState {
    user_id: String,
    store: Store,
    hub_config: HubConfig,
    auth_config: AuthConfig,
    plugin: Option<PluginConn>,
    clients: HashMap<String, ClientConn>,
    sessions: SessionRegistry,
    streams: StreamStager,
    jobs: JobRegistry,
    conn_state: ConnState,
    empty_since_ms: Option<i64>,
}

/// Runs until the hub is destroyed (quiescence timeout) or its mailbox is
/// dropped. Consumes `rx`; the caller's `HubHandle` keeps the matching `tx`
/// alive for as long as the hub should exist.
pub async fn run_executor(
    user_id: String,
    store: Store,
    hub_config: HubConfig,
    _socket_config: SocketConfig,
    auth_config: AuthConfig,
    mut rx: mpsc::Receiver<HubEvent>,
) {
    let mut state = HubState {
        sessions: SessionRegistry::new(user_id.clone(), hub_config.session_cache_window),
        user_id,
        store,
        hub_config,
        auth_config,
        plugin: None,
        clients: HashMap::new(),
        streams: StreamStager::new(),
        jobs: JobRegistry::new(),
        conn_state: ConnState::default(),
        empty_since_ms: None,
    };

    info!(user_id = %state.user_id, "hub executor started");

    while let Some(event) = rx.recv().await {
        match event {
            HubEvent::NewPlugin { conn } => on_new_plugin(&mut state, conn),
            HubEvent::NewClient { conn } => on_new_client(&mut state, conn),
            HubEvent::PluginFrame(value) => on_plugin_frame(&mut state, value).await,
            HubEvent::PluginClosed(exit) => on_plugin_closed(&mut state, exit),
            HubEvent::ClientFrame { client_session_id, value } => {
                on_client_frame(&mut state, &client_session_id, value).await
            }
            HubEvent::ClientClosed { client_session_id, exit } => on_client_closed(&mut state, &client_session_id, exit),
            HubEvent::Tick(now) => {
                if on_tick(&mut state, now).await {
                    break;
                }
            }
            HubEvent::Rpc(req) => on_rpc(&mut state, req).await,
        }
    }

    info!(user_id = %state.user_id, "hub executor stopped");
}

fn on_new_plugin(state: &mut HubState, conn: PluginConn) {
    if let Some(old) = state.plugin.take() {
        warn!(user_id = %state.user_id, "replacing existing plugin connection");
        old.writer.close_with(CLOSE_PLUGIN_REPLACED, "plugin replaced");
        metrics::plugin_disconnected();
    }
    state.plugin = Some(conn);
    state.conn_state.openclaw_connected = true;
    state.empty_since_ms = None;
    metrics::plugin_connected();

    let frame = OutboundFrame::Plugin(state.conn_state.connection_status_frame());
    broadcast(&state.clients, &frame);
}

fn on_new_client(state: &mut HubState, conn: ClientConn) {
    state.empty_since_ms = None;
    state.clients.insert(conn.client_session_id.clone(), conn);
    metrics::client_connected();
}

fn on_plugin_closed(state: &mut HubState, exit: SocketExit) {
    match &exit {
        SocketExit::Protocol(reason) => warn!(user_id = %state.user_id, reason, "plugin socket protocol error"),
        SocketExit::Timeout => warn!(user_id = %state.user_id, "plugin socket keepalive timeout"),
        SocketExit::Closed => info!(user_id = %state.user_id, "plugin socket closed"),
    }

    if state.plugin.take().is_some() {
        state.conn_state.openclaw_connected = false;
        metrics::plugin_disconnected();
        broadcast(&state.clients, &OutboundFrame::Hub(HubFrame::OpenclawDisconnected));

        // Synthetic stream-ends: clients shouldn't hang in pseudo-streaming
        // state once the plugin that was feeding them vanishes.
        let run_ids: Vec<String> = state.streams.active_states().map(|s| s.run_id.clone()).collect();
        for run_id in run_ids {
            state.streams.on_stream_end(&run_id);
            broadcast(
                &state.clients,
                &OutboundFrame::Plugin(PluginFrame::AgentStreamEnd { run_id }),
            );
        }
    }
}

fn on_client_closed(state: &mut HubState, client_session_id: &str, exit: SocketExit) {
    if let Some(conn) = state.clients.remove(client_session_id) {
        match exit {
            SocketExit::Protocol(reason) => {
                warn!(client = %conn.client_session_id, reason, "client socket protocol error")
            }
            SocketExit::Timeout => info!(client = %conn.client_session_id, "client socket keepalive timeout"),
            SocketExit::Closed => info!(client = %conn.client_session_id, "client socket closed"),
        }
        metrics::client_disconnected();
    }
}

async fn on_plugin_frame(state: &mut HubState, value: serde_json::Value) {
    let frame: PluginFrame = match serde_json::from_value(value) {
        Ok(f) => f,
        Err(e) => {
            warn!(user_id = %state.user_id, error = %e, "malformed plugin frame, dropping");
            return;
        }
    };

    let now = now_ms();
    let user_id = state.user_id.clone();
    let result = router::dispatch_plugin_frame(
        frame,
        &mut state.sessions,
        &mut state.streams,
        &mut state.jobs,
        &user_id,
        &mut state.conn_state,
        &state.store,
        now,
    )
    .await;

    match result {
        Ok(Some(frame)) => broadcast(&state.clients, &frame),
        Ok(None) => {}
        Err(e) => warn!(user_id = %state.user_id, error = %e, "plugin frame dispatch failed"),
    }
}

async fn on_client_frame(state: &mut HubState, client_session_id: &str, value: serde_json::Value) {
    let Some(authenticated) = state.clients.get(client_session_id).map(|c| c.authenticated) else {
        return;
    };

    if !authenticated {
        handle_auth_attempt(state, client_session_id, value);
        return;
    }

    let frame: ClientFrame = match serde_json::from_value(value) {
        Ok(f) => f,
        Err(e) => {
            if let Some(conn) = state.clients.get(client_session_id) {
                warn!(client = %conn.client_session_id, error = %e, "malformed client frame");
                send_to_client(conn, HubFrame::error("malformed frame", Some("protocol_error")));
            }
            return;
        }
    };

    let user_id = state.user_id.clone();
    let now = now_ms();
    match router::dispatch_client_frame(frame, &user_id, &mut state.sessions, &state.store, now).await {
        Ok(outcome) => {
            if let Some(frame) = outcome.broadcast {
                broadcast(&state.clients, &frame);
            }
            if let Some(frame) = outcome.to_plugin {
                if let Some(plugin) = &state.plugin {
                    if let Err(e) = plugin.writer.send(&frame) {
                        warn!(user_id = %state.user_id, error = %e, "forward to plugin failed");
                    }
                }
            }
            if let Some(frame) = outcome.reply_to_sender {
                if let Some(conn) = state.clients.get(client_session_id) {
                    send_to_client(conn, frame);
                }
            }
        }
        Err(e) => warn!(user_id = %state.user_id, error = %e, "client frame dispatch failed"),
    }
}

fn handle_auth_attempt(state: &mut HubState, client_session_id: &str, value: serde_json::Value) {
    let frame: Result<ClientFrame, _> = serde_json::from_value(value);
    let token = match frame {
        Ok(ClientFrame::Auth { token }) => token,
        _ => {
            if let Some(conn) = state.clients.remove(client_session_id) {
                conn.writer.close_with(CLOSE_AUTH_FAILURE, "first frame must be auth");
            }
            metrics::auth_rejected("not_auth_frame");
            return;
        }
    };

    let claims = crate::auth::jwt::verify_token(&state.auth_config, &token);
    let authed_user_id = match claims {
        Ok(c) if c.sub == state.user_id => c.sub,
        _ => {
            if let Some(conn) = state.clients.remove(client_session_id) {
                conn.writer.close_with(CLOSE_AUTH_FAILURE, "invalid or mismatched token");
            }
            metrics::auth_rejected("invalid_token");
            return;
        }
    };

    let Some(conn) = state.clients.get_mut(client_session_id) else {
        return;
    };
    conn.authenticated = true;
    conn.user_id = Some(authed_user_id.clone());

    let connected_at = now_ms();
    let conn = state.clients.get(client_session_id).unwrap();
    send_to_client(
        conn,
        HubFrame::AuthOk {
            user_id: authed_user_id,
            connected_at,
        },
    );
    if let Err(e) = conn.writer.send(&OutboundFrame::Plugin(state.conn_state.connection_status_frame())) {
        warn!(client = %conn.client_session_id, error = %e, "failed to replay connection.status");
    }
    if let Err(e) = conn.writer.send(&OutboundFrame::Plugin(PluginFrame::ModelsList {
        models: state.conn_state.models.clone(),
    })) {
        warn!(client = %conn.client_session_id, error = %e, "failed to replay models.list");
    }
    for active in state.streams.active_states() {
        let chunk = PluginFrame::AgentStreamChunk {
            run_id: active.run_id.clone(),
            session_key: active.session_key.clone(),
            text: active.buffer.clone(),
        };
        if let Err(e) = conn.writer.send(&OutboundFrame::Plugin(chunk)) {
            warn!(client = %conn.client_session_id, error = %e, "failed to replay in-flight stream");
        }
    }
}

/// Returns `true` if the hub should shut down.
async fn on_tick(state: &mut HubState, now: i64) -> bool {
    sweep_auth_timeouts(state, now);
    sweep_stream_timeouts(state, now).await;
    check_quiescence(state, now)
}

fn sweep_auth_timeouts(state: &mut HubState, now: i64) {
    let deadline_ms = (state.hub_config.client_auth_timeout_secs * 1000) as i64;
    let expired: Vec<String> = state
        .clients
        .values()
        .filter(|c| !c.authenticated && now - c.joined_at_ms > deadline_ms)
        .map(|c| c.client_session_id.clone())
        .collect();

    for id in expired {
        if let Some(conn) = state.clients.remove(&id) {
            conn.writer.close_with(CLOSE_AUTH_FAILURE, "auth timeout");
        }
        metrics::auth_rejected("timeout");
    }
}

async fn sweep_stream_timeouts(state: &mut HubState, now: i64) {
    let finalized = state.streams.sweep_timeouts(now, state.hub_config.stream_timeout_secs);
    for f in finalized {
        let message_id = uuid::Uuid::new_v4().to_string();
        let msg = crate::store::models::Message {
            id: message_id.clone(),
            session_key: f.session_key.clone(),
            sender: crate::store::models::Sender::Agent,
            text: f.text.clone(),
            media_url: None,
            a2ui: None,
            thread_id: f.thread_id.clone(),
            encrypted: false,
            timestamp: now,
        };
        if let Err(e) = state.sessions.append(&state.store, msg).await {
            warn!(user_id = %state.user_id, error = %e, "failed to persist synthetic stream terminal");
            continue;
        }
        let frame = OutboundFrame::Plugin(PluginFrame::AgentText {
            session_key: f.session_key,
            text: f.text,
            message_id,
            thread_id: f.thread_id,
            encrypted: false,
            run_id: Some(f.run_id),
        });
        broadcast(&state.clients, &frame);
    }
}

fn check_quiescence(state: &mut HubState, now: i64) -> bool {
    if state.plugin.is_none() && state.clients.is_empty() {
        match state.empty_since_ms {
            None => {
                state.empty_since_ms = Some(now);
                false
            }
            Some(since) => now - since >= (state.hub_config.quiescence_secs * 1000) as i64,
        }
    } else {
        state.empty_since_ms = None;
        false
    }
}

async fn on_rpc(state: &mut HubState, req: RpcRequest) {
    match req {
        RpcRequest::Status(reply) => {
            let _ = reply.send(HubStatus {
                user_id: state.user_id.clone(),
                openclaw_connected: state.conn_state.openclaw_connected,
                default_model: state.conn_state.default_model.clone(),
                client_count: state.clients.len(),
            });
        }
        RpcRequest::Send { frame, reply } => {
            let result = match &state.plugin {
                Some(plugin) => plugin.writer.send(&frame),
                None => Err(HubError::Closed),
            };
            let _ = reply.send(result);
        }
        RpcRequest::History {
            session_key,
            thread_id,
            limit,
            reply,
        } => {
            let result = state
                .sessions
                .list(&state.store, &session_key, thread_id.as_deref(), limit)
                .await
                .map(|(messages, reply_counts)| HistoryPage { messages, reply_counts })
                .map_err(|e| HubError::StoreUnavailable(e.into()));
            let _ = reply.send(result);
        }
    }
}
