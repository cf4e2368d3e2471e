//! Line protocol between the supervisor and child-process workers.
//!
//! Frames are JSON objects tagged by `"type"`, one per line. The parent writes
//! to the child's stdin, the child answers on its stdout. EOF on the child's
//! stdout means its end of the channel is gone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClusterError;

/// Frame from the supervisor to a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ParentFrame {
    /// Application message.
    #[serde(rename = "message")]
    Message { seq: u64, payload: Value },

    /// Graceful disconnect request.
    #[serde(rename = "disconnect")]
    Disconnect,
}

/// Frame from a child to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ChildFrame {
    /// Child is running.
    #[serde(rename = "online")]
    Online,

    /// Child accepts connections on `address`.
    #[serde(rename = "listening")]
    Listening { address: String },

    /// Application message.
    #[serde(rename = "message")]
    Message { payload: Value },

    /// Child closes its side of the channel on purpose.
    #[serde(rename = "disconnect")]
    Disconnect,
}

fn to_line<T: Serialize>(frame: &T) -> Result<String, ClusterError> {
    let mut line = serde_json::to_string(frame).map_err(|e| ClusterError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn from_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, ClusterError> {
    serde_json::from_str(line.trim_end()).map_err(|e| ClusterError::Protocol(e.to_string()))
}

impl ParentFrame {
    pub(crate) fn to_line(&self) -> Result<String, ClusterError> {
        to_line(self)
    }

    pub(crate) fn from_line(line: &str) -> Result<Self, ClusterError> {
        from_line(line)
    }
}

impl ChildFrame {
    pub(crate) fn to_line(&self) -> Result<String, ClusterError> {
        to_line(self)
    }

    pub(crate) fn from_line(line: &str) -> Result<Self, ClusterError> {
        from_line(line)
    }
}
