// src/protocol/mod.rs
// Wire frames exchanged over the plugin and client WebSockets (§6).
//
// Grounded on the teacher's tagged-enum wire format
// (`api/ws/message.rs`'s `WsClientMessage`/`WsServerMessage`), generalized to
// three directions instead of two and to carry the frames this system
// actually needs. Unknown `type` values deserialize to an explicit `Unknown`
// arm rather than failing parse, per REDESIGN FLAGS (no dynamic dispatch on
// frame type; unrecognized frames are a typed case, not a parse error).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A model entry inside `connection.status.models` or `models.list`. Treated
/// opaquely beyond `id`/`name` — the plugin owns the rest of the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A task entry inside `task.scan.result`. Opaque beyond the fields the Hub
/// never inspects (schedule/instructions/model are plugin-owned per §3 Task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedTask {
    pub cron_job_id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Frames the plugin sends to the Hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PluginFrame {
    #[serde(rename = "connection.status")]
    ConnectionStatus {
        #[serde(rename = "openclawConnected")]
        openclaw_connected: bool,
        #[serde(rename = "defaultModel")]
        default_model: Option<String>,
        #[serde(default)]
        models: Option<Vec<ModelInfo>>,
    },

    #[serde(rename = "agent.stream.start")]
    AgentStreamStart {
        run_id: String,
        session_key: String,
        thread_id: Option<String>,
    },

    #[serde(rename = "agent.stream.chunk")]
    AgentStreamChunk {
        run_id: String,
        session_key: String,
        /// Cumulative text-to-date, not an incremental delta (§4.4).
        text: String,
    },

    #[serde(rename = "agent.stream.end")]
    AgentStreamEnd { run_id: String },

    #[serde(rename = "agent.text")]
    AgentText {
        session_key: String,
        text: String,
        message_id: String,
        thread_id: Option<String>,
        #[serde(default)]
        encrypted: bool,
        #[serde(default)]
        run_id: Option<String>,
    },

    #[serde(rename = "agent.media")]
    AgentMedia {
        session_key: String,
        media_url: String,
        caption: Option<String>,
        message_id: String,
        #[serde(default)]
        encrypted: bool,
    },

    #[serde(rename = "agent.a2ui")]
    AgentA2ui {
        session_key: String,
        jsonl: String,
        message_id: String,
    },

    #[serde(rename = "job.update")]
    JobUpdate {
        job_id: String,
        task_id: String,
        session_key: String,
        status: String,
        started_at: i64,
        finished_at: Option<i64>,
        duration_ms: Option<i64>,
        #[serde(default)]
        summary: Option<String>,
    },

    #[serde(rename = "job.output")]
    JobOutput {
        job_id: String,
        /// Cumulative text-to-date, not an incremental delta (§4.5).
        text: String,
    },

    #[serde(rename = "task.scan.result")]
    TaskScanResult { tasks: Vec<ScannedTask> },

    #[serde(rename = "model.changed")]
    ModelChanged { session_key: String, model: String },

    #[serde(rename = "settings.defaultModel")]
    SettingsDefaultModel { default_model: String },

    #[serde(rename = "task.schedule.ack")]
    TaskScheduleAck {
        #[serde(flatten)]
        body: serde_json::Map<String, Value>,
    },

    #[serde(rename = "models.list")]
    ModelsList { models: Vec<ModelInfo> },

    #[serde(rename = "status")]
    Status {
        #[serde(flatten)]
        body: serde_json::Map<String, Value>,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },

    /// Any `type` not recognized above. Fanned/logged opaquely rather than
    /// rejected, per the Router's `task.scan.result`/`status` handling (§4.6).
    #[serde(other)]
    Unknown,
}

/// Frames a client sends to the Hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "user.message")]
    UserMessage {
        session_key: String,
        text: String,
        user_id: String,
        message_id: String,
        model: Option<String>,
        media_url: Option<String>,
        #[serde(default)]
        encrypted: bool,
        #[serde(default)]
        thread_id: Option<String>,
    },

    #[serde(rename = "/stop")]
    Stop {
        session_key: String,
        #[serde(default)]
        run_id: Option<String>,
    },

    #[serde(rename = "settings.defaultModel")]
    SettingsDefaultModel { default_model: String },

    #[serde(other)]
    Unknown,
}

/// Client-only additions the Hub sends that are never produced by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubFrame {
    #[serde(rename = "auth.ok")]
    AuthOk { user_id: String, connected_at: i64 },

    #[serde(rename = "openclaw.disconnected")]
    OpenclawDisconnected,

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl HubFrame {
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        HubFrame::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }
}

/// Anything the Hub writes to a client socket: its own frames, or a plugin
/// frame fanned through unmodified. `untagged` picks whichever variant's own
/// `type` tag matches on deserialize; on serialize it simply writes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Hub(HubFrame),
    Plugin(PluginFrame),
}

impl From<HubFrame> for OutboundFrame {
    fn from(f: HubFrame) -> Self {
        OutboundFrame::Hub(f)
    }
}

impl From<PluginFrame> for OutboundFrame {
    fn from(f: PluginFrame) -> Self {
        OutboundFrame::Plugin(f)
    }
}
