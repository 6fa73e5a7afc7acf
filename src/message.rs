use serde::{Deserialize, Serialize};

pub const BROADCAST: &str = "broadcast";
pub const SYSTEM_SENDER: &str = "system";
pub const CHANNEL_PREFIX: char = '#';

/// A frame on the wire: one JSON object per WebSocket text message.
///
/// `to` is either a peer `user_id`, the literal `"broadcast"`, or a
/// channel tag prefixed with `#`. `timestamp_ns` is set by the sender at
/// enqueue time and never rewritten by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    pub timestamp_ns: u64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub is_forward_message: bool,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    pub fn is_channel(&self) -> bool {
        self.to.starts_with(CHANNEL_PREFIX)
    }

    pub fn is_system(&self) -> bool {
        self.from == SYSTEM_SENDER
    }

    /// Canonical byte string covered by the signature: `from|to|timestamp_ns|content`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(&self.from, &self.to, self.timestamp_ns, &self.content)
    }

    pub fn mark_status(&mut self, status: MessageStatus) {
        self.status = Some(status.as_str().to_string());
    }
}

pub fn canonical_bytes(from: &str, to: &str, timestamp_ns: u64, content: &str) -> Vec<u8> {
    format!("{from}|{to}|{timestamp_ns}|{content}").into_bytes()
}

/// Delivery-time annotations applied by the receiving client after
/// signature verification and decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Verified,
    Unsigned,
    Unverified,
    InvalidSignature,
    DecryptionFailed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Verified => "verified",
            MessageStatus::Unsigned => "unsigned",
            MessageStatus::Unverified => "unverified",
            MessageStatus::InvalidSignature => "invalid_signature",
            MessageStatus::DecryptionFailed => "decryption_failed",
        }
    }
}

/// The JSON value carried in `content` for a direct message: hybrid
/// encryption material, all fields base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ephemeral_public_key: String,
    pub key_nonce: String,
    pub encrypted_key: String,
    pub data_nonce: String,
    pub encrypted_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_match_pipe_format() {
        let m = Message {
            id: None,
            from: "alice".into(),
            to: "bob".into(),
            timestamp_ns: 42,
            content: "hi".into(),
            status: None,
            signature: None,
            is_forward_message: false,
        };
        assert_eq!(m.canonical_bytes(), b"alice|bob|42|hi".to_vec());
    }

    #[test]
    fn routing_classification() {
        let mut m = Message {
            id: None,
            from: "a".into(),
            to: BROADCAST.into(),
            timestamp_ns: 0,
            content: String::new(),
            status: None,
            signature: None,
            is_forward_message: false,
        };
        assert!(m.is_broadcast());
        m.to = "#general".into();
        assert!(m.is_channel());
    }
}
