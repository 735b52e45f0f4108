//! JSON messages exchanged over the detection socket.
//!
//! Every message is an object tagged by `type`. Clients send `command` and
//! `frame`; the server pushes `connection`, `status` and `detection`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CONNECTION_MESSAGE: &str = "Connected to sign detection server";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Command {
        #[serde(default)]
        action: Action,
    },
    Frame(FramePayload),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, IngestError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[serde(alias = "start_detection")]
    Start,
    #[serde(alias = "stop_detection")]
    Stop,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FramePayload {
    /// Base64 image, optionally prefixed `<mime-info>,`.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, rename = "frameId")]
    pub frame_id: Value,
}

impl FramePayload {
    /// The image data without any data-URI prefix, or `None` when empty.
    pub fn image_data(&self) -> Option<&str> {
        let data = self.data.as_deref()?;
        if data.is_empty() {
            return None;
        }
        Some(strip_encoding_prefix(data))
    }
}

/// Drops everything up to and including the first comma, if any.
pub fn strip_encoding_prefix(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, encoded)) => encoded,
        None => data,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    DetectionStarted,
    DetectionStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connection {
        message: String,
    },
    Status {
        status: DetectionStatus,
    },
    Detection {
        #[serde(rename = "frameId")]
        frame_id: Value,
        text: String,
    },
}

impl ServerEvent {
    pub fn connected() -> Self {
        ServerEvent::Connection {
            message: CONNECTION_MESSAGE.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
