// src/router/mod.rs
// Classifies and dispatches frames from the plugin and from clients (§4.6).
//
// Kept pure: every function borrows the pieces of Hub state it needs and
// returns what should happen next (broadcast / forward / reply) rather than
// touching sockets itself. The Hub executor is the only thing that actually
// writes to a `WriterHandle`, preserving the single-writer invariant (§4.7)
// while keeping this dispatch table unit-testable without a real socket.

use tracing::{info, warn};

use crate::error::HubError;
use crate::job_registry::{JobRegistry, UpdateOutcome};
use crate::metrics;
use crate::protocol::{ClientFrame, HubFrame, ModelInfo, OutboundFrame, PluginFrame};
use crate::session_registry::SessionRegistry;
use crate::store::models::{Job, JobStatus, Message, Sender};
use crate::store::Store;
use crate::stream_stager::StreamStager;

/// Hub-wide state the plugin keeps pushing updates into (§4.7 `connState`).
#[derive(Debug, Default, Clone)]
pub struct ConnState {
    pub openclaw_connected: bool,
    pub default_model: Option<String>,
    pub models: Vec<ModelInfo>,
}

impl ConnState {
    pub fn connection_status_frame(&self) -> PluginFrame {
        PluginFrame::ConnectionStatus {
            openclaw_connected: self.openclaw_connected,
            default_model: self.default_model.clone(),
            models: Some(self.models.clone()),
        }
    }
}

/// What a client frame implies should happen, for the Hub to execute.
#[derive(Default)]
pub struct ClientDispatchOutcome {
    /// Fan this frame to every client socket for the user.
    pub broadcast: Option<OutboundFrame>,
    /// Forward this frame to the plugin socket, if attached.
    pub to_plugin: Option<ClientFrame>,
    /// Send this frame back only to the client that sent the inbound one.
    pub reply_to_sender: Option<HubFrame>,
}

/// Dispatches one frame received from the plugin. Returns the frame to fan
/// to all client sockets, if any (§4.6's plugin routing table).
pub async fn dispatch_plugin_frame(
    frame: PluginFrame,
    sessions: &mut SessionRegistry,
    streams: &mut StreamStager,
    jobs: &mut JobRegistry,
    jobs_user_id: &str,
    conn_state: &mut ConnState,
    store: &Store,
    now_ms: i64,
) -> Result<Option<OutboundFrame>, HubError> {
    match frame {
        PluginFrame::ConnectionStatus {
            openclaw_connected,
            default_model,
            models,
        } => {
            conn_state.openclaw_connected = openclaw_connected;
            conn_state.default_model = default_model;
            if let Some(models) = models {
                conn_state.models = models;
            }
            Ok(Some(OutboundFrame::Plugin(conn_state.connection_status_frame())))
        }

        PluginFrame::AgentStreamStart {
            run_id,
            session_key,
            thread_id,
        } => {
            streams.on_stream_start(&run_id, &session_key, thread_id.clone(), now_ms);
            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentStreamStart {
                run_id,
                session_key,
                thread_id,
            })))
        }

        PluginFrame::AgentStreamChunk {
            run_id,
            session_key,
            text,
        } => {
            streams.on_stream_chunk(&run_id, text.clone(), now_ms);
            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentStreamChunk {
                run_id,
                session_key,
                text,
            })))
        }

        PluginFrame::AgentStreamEnd { run_id } => {
            streams.on_stream_end(&run_id);
            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentStreamEnd { run_id })))
        }

        PluginFrame::AgentText {
            session_key,
            text,
            message_id,
            thread_id,
            encrypted,
            run_id,
        } => {
            // Clears the placeholder even if stream.end hasn't arrived yet —
            // the plugin is observed to send terminal text first (§4.4).
            streams.on_agent_text(run_id.as_deref(), &session_key, thread_id.as_deref());

            let msg = Message {
                id: message_id.clone(),
                session_key: session_key.clone(),
                sender: Sender::Agent,
                text: text.clone(),
                media_url: None,
                a2ui: None,
                thread_id: thread_id.clone(),
                encrypted,
                timestamp: now_ms,
            };
            sessions
                .append(store, msg)
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;
            metrics::message_persisted("agent");

            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentText {
                session_key,
                text,
                message_id,
                thread_id,
                encrypted,
                run_id,
            })))
        }

        PluginFrame::AgentMedia {
            session_key,
            media_url,
            caption,
            message_id,
            encrypted,
        } => {
            let msg = Message {
                id: message_id.clone(),
                session_key: session_key.clone(),
                sender: Sender::Agent,
                text: caption.clone().unwrap_or_default(),
                media_url: Some(media_url.clone()),
                a2ui: None,
                thread_id: None,
                encrypted,
                timestamp: now_ms,
            };
            sessions
                .append(store, msg)
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;
            metrics::message_persisted("agent");

            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentMedia {
                session_key,
                media_url,
                caption,
                message_id,
                encrypted,
            })))
        }

        PluginFrame::AgentA2ui {
            session_key,
            jsonl,
            message_id,
        } => {
            let msg = Message {
                id: message_id.clone(),
                session_key: session_key.clone(),
                sender: Sender::Agent,
                text: String::new(),
                media_url: None,
                a2ui: Some(jsonl.clone()),
                thread_id: None,
                encrypted: false,
                timestamp: now_ms,
            };
            sessions
                .append(store, msg)
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;
            metrics::message_persisted("agent");

            Ok(Some(OutboundFrame::Plugin(PluginFrame::AgentA2ui {
                session_key,
                jsonl,
                message_id,
            })))
        }

        PluginFrame::JobUpdate {
            job_id,
            task_id,
            session_key,
            status,
            started_at,
            finished_at,
            duration_ms,
            summary,
        } => {
            let Some(parsed_status) = JobStatus::from_str(&status) else {
                warn!(job_id, status, "job.update with unknown status, dropping");
                return Ok(None);
            };
            let job = Job {
                id: job_id.clone(),
                task_id: task_id.clone(),
                user_id: jobs_user_id.to_string(),
                session_key: session_key.clone(),
                status: parsed_status,
                started_at,
                finished_at,
                duration_ms,
                summary: summary.clone().unwrap_or_default(),
            };

            let outcome = jobs
                .on_job_update(store, job)
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;

            match outcome {
                UpdateOutcome::Applied => {
                    if parsed_status.is_terminal() {
                        metrics::job_terminal(parsed_status.as_str());
                    }
                    Ok(Some(OutboundFrame::Plugin(PluginFrame::JobUpdate {
                        job_id,
                        task_id,
                        session_key,
                        status,
                        started_at,
                        finished_at,
                        duration_ms,
                        summary,
                    })))
                }
                UpdateOutcome::DroppedTerminal => Ok(None),
            }
        }

        PluginFrame::JobOutput { job_id, text } => {
            let outcome = jobs
                .on_job_output(store, &job_id, text.clone())
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;

            match outcome {
                UpdateOutcome::Applied => {
                    Ok(Some(OutboundFrame::Plugin(PluginFrame::JobOutput { job_id, text })))
                }
                UpdateOutcome::DroppedTerminal => Ok(None),
            }
        }

        PluginFrame::TaskScanResult { tasks } => {
            Ok(Some(OutboundFrame::Plugin(PluginFrame::TaskScanResult { tasks })))
        }

        PluginFrame::ModelChanged { session_key, model } => {
            Ok(Some(OutboundFrame::Plugin(PluginFrame::ModelChanged { session_key, model })))
        }

        PluginFrame::SettingsDefaultModel { default_model } => {
            conn_state.default_model = Some(default_model.clone());
            Ok(Some(OutboundFrame::Plugin(PluginFrame::SettingsDefaultModel {
                default_model,
            })))
        }

        PluginFrame::TaskScheduleAck { body } => {
            Ok(Some(OutboundFrame::Plugin(PluginFrame::TaskScheduleAck { body })))
        }

        PluginFrame::ModelsList { models } => {
            conn_state.models = models.clone();
            Ok(Some(OutboundFrame::Plugin(PluginFrame::ModelsList { models })))
        }

        PluginFrame::Status { body } => Ok(Some(OutboundFrame::Plugin(PluginFrame::Status { body }))),

        PluginFrame::Error { message, code } => {
            warn!(message, ?code, "plugin reported error");
            Ok(Some(OutboundFrame::Plugin(PluginFrame::Error { message, code })))
        }

        PluginFrame::Unknown => {
            warn!("plugin sent an unrecognized frame type, fanning opaquely");
            Ok(Some(OutboundFrame::Plugin(PluginFrame::Unknown)))
        }
    }
}

/// Dispatches one frame received from an authenticated client (§4.6's
/// client routing table). `auth` is handled by the Hub's attach protocol
/// before frames reach here.
pub async fn dispatch_client_frame(
    frame: ClientFrame,
    user_id: &str,
    sessions: &mut SessionRegistry,
    store: &Store,
    now_ms: i64,
) -> Result<ClientDispatchOutcome, HubError> {
    match frame {
        ClientFrame::Auth { .. } => {
            info!("auth frame received outside handshake window, ignoring");
            Ok(ClientDispatchOutcome::default())
        }

        ClientFrame::UserMessage {
            session_key,
            text,
            user_id: sender_id,
            message_id,
            model,
            media_url,
            encrypted,
            thread_id,
        } => {
            if let Some(thread_root) = &thread_id {
                let root_exists = store
                    .messages
                    .exists(&session_key, thread_root)
                    .await
                    .map_err(|e| HubError::StoreUnavailable(e.into()))?;
                if !root_exists {
                    return Ok(ClientDispatchOutcome {
                        broadcast: None,
                        to_plugin: None,
                        reply_to_sender: Some(HubFrame::error("unknown thread root", Some("protocol_error"))),
                    });
                }
            }

            let msg = Message {
                id: message_id.clone(),
                session_key: session_key.clone(),
                sender: Sender::User,
                text: text.clone(),
                media_url: media_url.clone(),
                a2ui: None,
                thread_id: thread_id.clone(),
                encrypted,
                timestamp: now_ms,
            };
            sessions
                .append(store, msg)
                .await
                .map_err(|e| HubError::StoreUnavailable(e.into()))?;
            metrics::message_persisted("user");

            Ok(ClientDispatchOutcome {
                broadcast: None,
                to_plugin: Some(ClientFrame::UserMessage {
                    session_key,
                    text,
                    user_id: sender_id,
                    message_id,
                    model,
                    media_url,
                    encrypted,
                    thread_id,
                }),
                reply_to_sender: None,
            })
        }

        ClientFrame::Stop { session_key, run_id } => Ok(ClientDispatchOutcome {
            broadcast: None,
            to_plugin: Some(ClientFrame::Stop { session_key, run_id }),
            reply_to_sender: None,
        }),

        ClientFrame::SettingsDefaultModel { default_model } => Ok(ClientDispatchOutcome {
            broadcast: None,
            to_plugin: Some(ClientFrame::SettingsDefaultModel { default_model }),
            reply_to_sender: None,
        }),

        ClientFrame::Unknown => {
            warn!(user_id, "client sent unrecognized frame type");
            Ok(ClientDispatchOutcome {
                broadcast: None,
                to_plugin: None,
                reply_to_sender: Some(HubFrame::error("unknown type", None)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::auth::MediaConfig;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> Store {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        sqlx::query("INSERT INTO users (id, password_hash, created_at) VALUES ('u1', 'x', 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO channels (id, user_id, name) VALUES ('c1', 'u1', 'General')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO sessions (id, channel_id, name, session_key) VALUES ('s1', 'c1', 'General', 'c1:General')")
            .execute(&pool)
            .await
            .unwrap();

        Store::from_pool(
            pool,
            std::path::PathBuf::from("/tmp"),
            MediaConfig {
                signing_secret: "test-secret-test-secret".to_string(),
                default_expiry_secs: 3600,
                bucket_prefix: "media".to_string(),
            },
        )
    }

    fn user_message(session_key: &str, message_id: &str, thread_id: Option<&str>) -> ClientFrame {
        ClientFrame::UserMessage {
            session_key: session_key.to_string(),
            text: "hi".to_string(),
            user_id: "u1".to_string(),
            message_id: message_id.to_string(),
            model: None,
            media_url: None,
            encrypted: false,
            thread_id: thread_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn user_message_with_missing_thread_root_is_rejected() {
        let store = test_store().await;
        let mut sessions = SessionRegistry::new("u1", 500);

        let outcome = dispatch_client_frame(
            user_message("c1:General", "m1", Some("ghost-root")),
            "u1",
            &mut sessions,
            &store,
            1,
        )
        .await
        .unwrap();

        assert!(outcome.to_plugin.is_none());
        assert!(matches!(outcome.reply_to_sender, Some(HubFrame::Error { .. })));
    }

    #[tokio::test]
    async fn user_message_with_existing_thread_root_is_forwarded() {
        let store = test_store().await;
        let mut sessions = SessionRegistry::new("u1", 500);

        sessions
            .append(
                &store,
                Message {
                    id: "root".to_string(),
                    session_key: "c1:General".to_string(),
                    sender: Sender::User,
                    text: "root message".to_string(),
                    media_url: None,
                    a2ui: None,
                    thread_id: None,
                    encrypted: false,
                    timestamp: 0,
                },
            )
            .await
            .unwrap();

        let outcome = dispatch_client_frame(
            user_message("c1:General", "m2", Some("root")),
            "u1",
            &mut sessions,
            &store,
            1,
        )
        .await
        .unwrap();

        assert!(outcome.to_plugin.is_some());
        assert!(outcome.reply_to_sender.is_none());
    }
}
