//! Serialization protocol for checkpoint payloads

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for serializing and deserializing checkpoint data
///
/// Implementations can provide custom strategies (JSON, bincode, etc.). The
/// file backend uses [`BincodeSerializer`] for its on-disk records.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// JSON-based serializer
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary serializer using bincode
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        value: i32,
    }

    #[test]
    fn test_json_round_trip() {
        let serializer = JsonSerializer;
        let record = Record {
            name: "cp".to_string(),
            value: 7,
        };

        let bytes = serializer.dumps(&record).unwrap();
        let restored: Record = serializer.loads(&bytes).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn test_bincode_round_trip() {
        let serializer = BincodeSerializer;
        let record = Record {
            name: "cp".to_string(),
            value: 7,
        };

        let bytes = serializer.dumps(&record).unwrap();
        let restored: Record = serializer.loads(&bytes).unwrap();
        assert_eq!(record, restored);
    }
}
