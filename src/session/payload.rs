//! Application messages carried inside a signed, encrypted envelope.

use crate::transport::frame::{
    expect_end, read_opt_str16, read_vec32, utf8, write_opt_str16, write_vec32,
};
use crate::transport::{TransportError, TransportResult};

const TAG_CHAT: u8 = 0x01;
const TAG_ROSTER: u8 = 0x02;
const TAG_DISCONNECT: u8 = 0xFF;

/// A line of chat
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Username of the author; `None` for system messages
    pub sender: Option<String>,
    /// Message text
    pub text: String,
}

impl ChatMessage {
    /// Message written by a user
    pub fn from_user(sender: impl Into<String>, text: impl Into<String>) -> Self {
        ChatMessage {
            sender: Some(sender.into()),
            text: text.into(),
        }
    }

    /// Message originated by the server itself
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage {
            sender: None,
            text: text.into(),
        }
    }
}

/// Pre-formatted roster, one username per line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RosterUpdate {
    /// Roster text as it should be displayed
    pub text: String,
}

/// Everything that can travel inside a secure envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Chat line
    Chat(ChatMessage),
    /// Current list of connected users (server to client only)
    Roster(RosterUpdate),
    /// Authenticated request to end the session
    Disconnect,
}

impl Payload {
    /// Short name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Chat(_) => "ChatMessage",
            Payload::Roster(_) => "RosterUpdate",
            Payload::Disconnect => "Disconnect",
        }
    }

    /// Serialize payload to bytes
    ///
    /// A sender name longer than 65,535 bytes cannot be encoded.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        let mut bytes = Vec::new();

        match self {
            Payload::Chat(msg) => {
                bytes.push(TAG_CHAT);
                write_opt_str16(&mut bytes, msg.sender.as_deref())?;
                write_vec32(&mut bytes, msg.text.as_bytes())?;
            }
            Payload::Roster(roster) => {
                bytes.push(TAG_ROSTER);
                write_vec32(&mut bytes, roster.text.as_bytes())?;
            }
            Payload::Disconnect => bytes.push(TAG_DISCONNECT),
        }

        Ok(bytes)
    }

    /// Deserialize payload from bytes
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        let (tag, rest) = match bytes.split_first() {
            Some((tag, rest)) => (*tag, rest),
            None => return Err(TransportError::InvalidData("Empty payload".to_string())),
        };

        match tag {
            TAG_CHAT => {
                let (sender, rest) = read_opt_str16(rest)?;
                let (text, rest) = read_vec32(rest)?;
                expect_end(rest)?;
                Ok(Payload::Chat(ChatMessage {
                    sender,
                    text: utf8(text)?,
                }))
            }
            TAG_ROSTER => {
                let (text, rest) = read_vec32(rest)?;
                expect_end(rest)?;
                Ok(Payload::Roster(RosterUpdate { text: utf8(text)? }))
            }
            TAG_DISCONNECT => {
                expect_end(rest)?;
                Ok(Payload::Disconnect)
            }
            _ => Err(TransportError::InvalidData(format!(
                "Unknown payload type: {:#x}",
                tag
            ))),
        }
    }
}
