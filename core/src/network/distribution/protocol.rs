//! Distribution protocol wire format
//!
//! Every message is an [`Envelope`] framed with the shared `[type][len]`
//! header. The type byte must agree with the body variant.
//!
//! | type | body |
//! |------|------|
//! | 0x01 | Deployment: signed manifest announcement |
//! | 0x02 | ManifestRequest |
//! | 0x03 | ManifestResponse |
//! | 0x04 | ChunkRequest |
//! | 0x05 | ChunkResponse |
//! | 0x06 | StateUpdate |

use serde::{Deserialize, Serialize};

use crate::bundle::{ContentHash, Manifest};
use crate::network::wire::{self, WireError};

/// Message type byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Deployment = 0x01,
    ManifestRequest = 0x02,
    ManifestResponse = 0x03,
    ChunkRequest = 0x04,
    ChunkResponse = 0x05,
    StateUpdate = 0x06,
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::Deployment),
            0x02 => Ok(MessageKind::ManifestRequest),
            0x03 => Ok(MessageKind::ManifestResponse),
            0x04 => Ok(MessageKind::ChunkRequest),
            0x05 => Ok(MessageKind::ChunkResponse),
            0x06 => Ok(MessageKind::StateUpdate),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Announcement of a new deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentBody {
    pub manifest: Manifest,
    /// Must equal `manifest.signature`
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRequestBody {
    pub app_id: String,
    pub requester_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestResponseBody {
    pub app_id: String,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequestBody {
    pub app_id: String,
    pub chunk_hash: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponseBody {
    pub chunk_hash: ContentHash,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdateBody {
    pub app_id: String,
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Deployment(DeploymentBody),
    ManifestRequest(ManifestRequestBody),
    ManifestResponse(ManifestResponseBody),
    ChunkRequest(ChunkRequestBody),
    ChunkResponse(ChunkResponseBody),
    StateUpdate(StateUpdateBody),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Deployment(_) => MessageKind::Deployment,
            MessageBody::ManifestRequest(_) => MessageKind::ManifestRequest,
            MessageBody::ManifestResponse(_) => MessageKind::ManifestResponse,
            MessageBody::ChunkRequest(_) => MessageKind::ChunkRequest,
            MessageBody::ChunkResponse(_) => MessageKind::ChunkResponse,
            MessageBody::StateUpdate(_) => MessageKind::StateUpdate,
        }
    }
}

/// Common header carried by every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub app_id: String,
    /// Sender's clock, Unix milliseconds
    pub timestamp: i64,
    /// Sender's hex address
    pub sender_address: String,
    pub body: MessageBody,
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Encode as a framed message
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        wire::encode_message(self.kind() as u8, self)
    }

    /// Decode a framed message, checking the type byte against the body
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let frame = wire::decode_frame_exact(bytes)?;
        let declared = MessageKind::try_from(frame.msg_type)?;
        let envelope: Envelope = wire::decode_payload(frame.payload)?;
        if envelope.kind() != declared {
            return Err(WireError::TypeMismatch {
                declared: declared as u8,
                actual: envelope.kind() as u8,
            });
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{build, BuildOptions, SourceFile};
    use crate::data::clock::ManualClock;
    use crate::security::create_key_pair::generate_key_pair;

    fn envelope(body: MessageBody) -> Envelope {
        Envelope {
            app_id: "0XAAAAAAAAAB".to_string(),
            timestamp: 42,
            sender_address: "ab".repeat(32),
            body,
        }
    }

    #[test]
    fn test_type_byte_leads_frame() {
        let env = envelope(MessageBody::ChunkRequest(ChunkRequestBody {
            app_id: "x".to_string(),
            chunk_hash: ContentHash([1; 32]),
        }));
        let bytes = env.encode().unwrap();
        assert_eq!(bytes[0], 0x04);
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_deployment_carries_manifest() {
        let kp = generate_key_pair();
        let out = build(
            vec![SourceFile::new("index.html", b"<p>hi</p>".to_vec())],
            &BuildOptions::new("chat"),
            &kp,
            &ManualClock::new(3),
        )
        .unwrap();

        let env = envelope(MessageBody::Deployment(DeploymentBody {
            signature: out.manifest.signature.to_vec(),
            manifest: out.manifest.clone(),
        }));
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        let MessageBody::Deployment(body) = decoded.body else {
            panic!("expected deployment");
        };
        assert_eq!(body.manifest, out.manifest);
        assert!(crate::bundle::manifest::is_valid(&body.manifest));
    }

    #[test]
    fn test_mismatched_type_byte_rejected() {
        let env = envelope(MessageBody::StateUpdate(StateUpdateBody {
            app_id: "x".to_string(),
            key: "k".to_string(),
            data: vec![1],
        }));
        let mut bytes = env.encode().unwrap();
        bytes[0] = MessageKind::ChunkResponse as u8;
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(WireError::TypeMismatch { declared: 0x05, actual: 0x06 })
        ));

        bytes[0] = 0x7f;
        assert!(matches!(Envelope::decode(&bytes), Err(WireError::UnknownType(0x7f))));
    }
}
