//! # Application payloads.
//!
//! [`Message`] is an opaque JSON record: the core stores and forwards it, the
//! application defines its schema. [`SendHandle`] is an opaque shared resource
//! that may travel with a message between the supervisor and in-process workers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ClusterError;

/// Opaque application message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message(Arc<Value>);

impl Message {
    /// Wraps a JSON value.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Serializes any record into a message.
    pub fn encode<T: Serialize>(record: &T) -> Result<Self, ClusterError> {
        serde_json::to_value(record)
            .map(Self::new)
            .map_err(|e| ClusterError::Protocol(e.to_string()))
    }

    /// Deserializes the payload into a record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ClusterError> {
        T::deserialize(self.0.as_ref()).map_err(|e| ClusterError::Protocol(e.to_string()))
    }

    /// The raw payload.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The payload, if it is a plain string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::new(Value::String(s.to_string()))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::new(Value::String(s))
    }
}

/// Opaque resource passed alongside a message (a socket, a shared buffer, ...).
#[derive(Clone)]
pub struct SendHandle(Arc<dyn Any + Send + Sync>);

impl SendHandle {
    pub fn new<T: Any + Send + Sync>(resource: T) -> Self {
        Self(Arc::new(resource))
    }

    /// Returns the resource if it has type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendHandle(..)")
    }
}

/// A message delivered to a worker, stamped with its channel sequence number.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Per-channel sequence number (starting at 1).
    pub seq: u64,
    pub message: Message,
    pub handle: Option<SendHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Reload {
        generation: u32,
    }

    #[test]
    fn records_encode_and_decode() {
        let msg = Message::encode(&Reload { generation: 4 }).unwrap();
        assert_eq!(msg.decode::<Reload>().unwrap(), Reload { generation: 4 });
        assert!(msg.decode::<String>().is_err());
        assert_eq!(Message::from("a").as_str(), Some("a"));
    }

    #[test]
    fn handle_downcasts_to_original_type() {
        let h = SendHandle::new(42u32);
        assert_eq!(h.downcast::<u32>().as_deref(), Some(&42));
        assert!(h.downcast::<String>().is_none());
    }
}
