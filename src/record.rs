use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
    Snapshot,
}

/// Opaque position of a record in its source, used for acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position(pub Bytes);

impl Position {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Position {
    fn from(bytes: Vec<u8>) -> Self {
        Position(Bytes::from(bytes))
    }
}

/// State of the changed entity before and after the change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Change {
    pub before: Option<Bytes>,
    pub after: Option<Bytes>,
}

/// A unit of change data exchanged with the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Used by the broker for partitioning.
    #[serde(default)]
    pub key: Bytes,
    #[serde(default)]
    pub payload: Change,
}

impl Record {
    /// Builds a create record the way a source would emit it.
    pub fn create(position: Position, key: impl Into<Bytes>, after: impl Into<Bytes>) -> Self {
        Self {
            position,
            operation: Operation::Create,
            metadata: BTreeMap::new(),
            key: key.into(),
            payload: Change {
                before: None,
                after: Some(after.into()),
            },
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The bytes published for this record: the state after the change.
    ///
    /// Deletes carry no after state and publish an empty payload.
    pub fn value(&self) -> Bytes {
        self.payload.after.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_record() {
        let record = Record::create(Position::default(), "user-1", "{\"id\":1}")
            .with_metadata("kafka.topic", "users");

        assert_eq!(record.operation, Operation::Create);
        assert_eq!(record.key, Bytes::from("user-1"));
        assert_eq!(record.value(), Bytes::from("{\"id\":1}"));
        assert_eq!(record.metadata["kafka.topic"], "users");
    }

    #[test]
    fn test_delete_publishes_empty_value() {
        let record = Record {
            operation: Operation::Delete,
            key: Bytes::from("user-1"),
            payload: Change {
                before: Some(Bytes::from("old")),
                after: None,
            },
            ..Default::default()
        };

        assert!(record.value().is_empty());
    }

    #[test]
    fn test_operation_serializes_lowercase() {
        let json = serde_json::to_string(&Operation::Snapshot).unwrap();
        assert_eq!(json, "\"snapshot\"");
    }
}
