//! Message records kept in the consumer history

use std::fmt;

/// Where a message came from on the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Origin {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One entry of the ordered message history
///
/// Payload bytes are decoded as UTF-8; invalid sequences are replaced
/// rather than rejected so a malformed message never stalls the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub origin: Origin,
    pub payload: String,
}

impl MessageRecord {
    pub fn new(origin: Origin, payload: impl Into<String>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }

    /// Build a record from raw payload bytes
    pub fn from_bytes(origin: Origin, bytes: &[u8]) -> Self {
        Self {
            origin,
            payload: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_keeps_text() {
        let record = MessageRecord::from_bytes(Origin::new("flows", 0, 7), b"hello");
        assert_eq!(record.payload(), "hello");
        assert_eq!(record.origin.offset, 7);
    }

    #[test]
    fn test_from_bytes_replaces_invalid_utf8() {
        let record = MessageRecord::from_bytes(Origin::new("flows", 0, 0), &[b'a', 0xFF, b'b']);
        assert_eq!(record.payload(), "a\u{FFFD}b");
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::new("flows", 3, 42).to_string(), "flows[3]@42");
    }
}
