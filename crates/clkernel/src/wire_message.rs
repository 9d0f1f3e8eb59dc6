//
// wire_message.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use clshared::jupyter_message::{JupyterMessageHeader, PROTOCOL_VERSION};
use serde_json::{Map, Value};
use zeromq::ZmqMessage;

use crate::digester::Digester;
use crate::error::KernelError;

/// The frame separating routing identities from the signed message parts.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// One Jupyter protocol message, as exchanged over a channel.
#[derive(Debug, Clone)]
pub struct WireMessage {
    /// Routing frames preceding the delimiter; echoed back unchanged on
    /// replies. On iopub this holds the topic.
    pub identities: Vec<Bytes>,

    pub header: JupyterMessageHeader,

    /// The header of the request that caused this message; `None` for
    /// unsolicited messages
    pub parent_header: Option<JupyterMessageHeader>,

    pub metadata: Map<String, Value>,

    pub content: Value,

    /// Binary blobs following the JSON parts; not covered by the signature
    pub buffers: Vec<Bytes>,

    /// The JSON parts as they arrived, if this message was decoded
    received: Option<Box<ReceivedParts>>,
}

/// The four JSON parts of a decoded message, byte for byte, alongside the
/// values they decoded to. A part whose value is unchanged is re-sent with
/// its original bytes, so key order and spacing survive forwarding.
#[derive(Debug, Clone)]
struct ReceivedParts {
    frames: [Bytes; 4],
    header: JupyterMessageHeader,
    parent_header: Option<JupyterMessageHeader>,
    metadata: Map<String, Value>,
    content: Value,
}

impl PartialEq for WireMessage {
    fn eq(&self, other: &Self) -> bool {
        self.identities == other.identities
            && self.header == other.header
            && self.parent_header == other.parent_header
            && self.metadata == other.metadata
            && self.content == other.content
            && self.buffers == other.buffers
    }
}

/// Create a header for a new message originating in this kernel.
pub fn make_header(msg_type: &str, session: &str, username: &str) -> JupyterMessageHeader {
    JupyterMessageHeader {
        msg_id: uuid::Uuid::new_v4().to_string(),
        msg_type: msg_type.to_string(),
        session: session.to_string(),
        username: username.to_string(),
        date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        version: PROTOCOL_VERSION.to_string(),
        extra: Map::new(),
    }
}

impl WireMessage {
    /// Create a new, unsolicited message.
    pub fn new(msg_type: &str, session: &str, username: &str, content: Value) -> Self {
        Self {
            identities: vec![],
            header: make_header(msg_type, session, username),
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: vec![],
            received: None,
        }
    }

    /// Create a reply to this message. The reply is addressed to the same
    /// peer (same routing identities) and carries this message's header as
    /// its parent.
    pub fn reply(&self, msg_type: &str, session: &str, username: &str, content: Value) -> Self {
        Self {
            identities: self.identities.clone(),
            header: make_header(msg_type, session, username),
            parent_header: Some(self.header.clone()),
            metadata: Map::new(),
            content,
            buffers: vec![],
            received: None,
        }
    }

    /// Create an iopub broadcast. The topic becomes the single routing frame.
    pub fn broadcast(
        topic: &str,
        parent: Option<&JupyterMessageHeader>,
        msg_type: &str,
        session: &str,
        username: &str,
        content: Value,
    ) -> Self {
        Self {
            identities: vec![Bytes::from(topic.to_string())],
            header: make_header(msg_type, session, username),
            parent_header: parent.cloned(),
            metadata: Map::new(),
            content,
            buffers: vec![],
            received: None,
        }
    }

    /// Decode the frames of a multipart message, checking its signature.
    pub fn decode(frames: Vec<Bytes>, digester: &Digester) -> Result<Self, KernelError> {
        let delimiter = match frames.iter().position(|frame| frame.as_ref() == DELIMITER) {
            Some(index) => index,
            None => {
                return Err(KernelError::Protocol(String::from(
                    "no <IDS|MSG> delimiter in message",
                )))
            }
        };

        let signed = frames.len() - delimiter - 1;
        if signed < 5 {
            return Err(KernelError::Protocol(format!(
                "expected at least 5 frames after the delimiter, got {}",
                signed
            )));
        }

        let mut frames = frames;
        let buffers = frames.split_off(delimiter + 6);
        let parts = frames.split_off(delimiter + 1);
        frames.truncate(delimiter);
        let identities = frames;

        let signature = &parts[0];
        let json_parts: Vec<&[u8]> = parts[1..5].iter().map(|part| part.as_ref()).collect();
        if !digester.verify(signature, &json_parts) {
            return Err(KernelError::Protocol(String::from("invalid signature")));
        }

        let header: JupyterMessageHeader = parse_part("header", &parts[1])?;
        let parent_header: Value = parse_part("parent_header", &parts[2])?;
        let parent_header = match parent_header {
            Value::Object(ref fields) if fields.is_empty() => None,
            Value::Null => None,
            other => Some(
                serde_json::from_value::<JupyterMessageHeader>(other)
                    .map_err(|e| KernelError::Protocol(format!("invalid parent_header: {}", e)))?,
            ),
        };
        let metadata: Map<String, Value> = parse_part("metadata", &parts[3])?;
        let content: Value = parse_part("content", &parts[4])?;

        let received = ReceivedParts {
            frames: [
                parts[1].clone(),
                parts[2].clone(),
                parts[3].clone(),
                parts[4].clone(),
            ],
            header: header.clone(),
            parent_header: parent_header.clone(),
            metadata: metadata.clone(),
            content: content.clone(),
        };

        Ok(Self {
            identities,
            header,
            parent_header,
            metadata,
            content,
            buffers,
            received: Some(Box::new(received)),
        })
    }

    /// Encode the message as multipart frames, signing the four JSON parts.
    /// Parts left as they were decoded keep their original bytes.
    pub fn encode(&self, digester: &Digester) -> Result<Vec<Bytes>, KernelError> {
        let received = self.received.as_deref();

        let header = match received {
            Some(r) if r.header == self.header => r.frames[0].clone(),
            _ => to_part("header", &self.header)?,
        };
        let parent_header = match received {
            Some(r) if r.parent_header == self.parent_header => r.frames[1].clone(),
            _ => match &self.parent_header {
                Some(parent) => to_part("parent_header", parent)?,
                None => to_part("parent_header", &Map::new())?,
            },
        };
        let metadata = match received {
            Some(r) if r.metadata == self.metadata => r.frames[2].clone(),
            _ => to_part("metadata", &self.metadata)?,
        };
        let content = match received {
            Some(r) if r.content == self.content => r.frames[3].clone(),
            _ => to_part("content", &self.content)?,
        };

        let signature = digester.sign(&[
            &header[..],
            &parent_header[..],
            &metadata[..],
            &content[..],
        ]);

        let mut frames = Vec::with_capacity(self.identities.len() + 6 + self.buffers.len());
        frames.extend(self.identities.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(header);
        frames.push(parent_header);
        frames.push(metadata);
        frames.push(content);
        frames.extend(self.buffers.iter().cloned());
        Ok(frames)
    }

    /// Encode the message into a ZeroMQ multipart message.
    pub fn to_zmq(&self, digester: &Digester) -> Result<ZmqMessage, KernelError> {
        frames_to_zmq(self.encode(digester)?)
    }

    /// The ID of the message this one replies to, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }
}

/// Wrap a list of frames in a ZeroMQ message.
pub fn frames_to_zmq(frames: Vec<Bytes>) -> Result<ZmqMessage, KernelError> {
    ZmqMessage::try_from(frames)
        .map_err(|e| KernelError::Protocol(format!("cannot send message: {}", e)))
}

fn parse_part<T: serde::de::DeserializeOwned>(name: &str, part: &[u8]) -> Result<T, KernelError> {
    serde_json::from_slice(part).map_err(|e| KernelError::Protocol(format!("invalid {}: {}", name, e)))
}

fn to_part<T: serde::Serialize>(name: &str, value: &T) -> Result<Bytes, KernelError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| KernelError::Protocol(format!("cannot serialize {}: {}", name, e)))
}
