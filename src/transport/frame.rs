//! Versioned tagged frames exchanged on the wire
//!
//! Every frame body starts with the wire version and a type tag, followed by
//! length-prefixed fields. The receive loop decodes a frame once here and
//! then matches on [`Frame`] exhaustively.

use super::{TransportError, TransportResult};

/// Current wire version
pub const WIRE_VERSION: u8 = 1;

const TAG_KEY_ADVERTISEMENT: u8 = 0x01;
const TAG_SECURE_ENVELOPE: u8 = 0x10;
const TAG_DISCONNECT: u8 = 0xFF;

/// What a key advertisement carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// The sender's encoded public key
    PublicKey,
    /// The shared symmetric key, encrypted under the recipient's public key
    SecretKey,
}

impl KeyKind {
    fn to_byte(self) -> u8 {
        match self {
            KeyKind::PublicKey => 1,
            KeyKind::SecretKey => 2,
        }
    }

    fn from_byte(b: u8) -> TransportResult<Self> {
        match b {
            1 => Ok(KeyKind::PublicKey),
            2 => Ok(KeyKind::SecretKey),
            other => Err(TransportError::InvalidData(format!(
                "Unknown key kind: {}",
                other
            ))),
        }
    }
}

/// Handshake frame carrying base64 key material
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAdvertisement {
    /// Username of the sender (clients) or a label (server); may be absent
    pub owner: Option<String>,
    /// Base64 key material
    pub key: String,
    /// Which key this is
    pub kind: KeyKind,
}

/// Opaque ciphertext of a signed wrapper
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecureEnvelope {
    /// Symmetric ciphertext (nonce || ciphertext || tag)
    pub ciphertext: Vec<u8>,
}

/// A transport-level message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Key material during the handshake
    KeyAdvertisement(KeyAdvertisement),
    /// Signed-then-encrypted application message
    SecureEnvelope(SecureEnvelope),
    /// Unauthenticated disconnect, used when no keys are established
    Disconnect,
}

impl Frame {
    /// Short name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::KeyAdvertisement(_) => "KeyAdvertisement",
            Frame::SecureEnvelope(_) => "SecureEnvelope",
            Frame::Disconnect => "Disconnect",
        }
    }

    /// Serialize frame to bytes
    ///
    /// Fails with `InvalidData` when a field does not fit its length prefix.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        let mut bytes = vec![WIRE_VERSION];

        match self {
            Frame::KeyAdvertisement(adv) => {
                bytes.push(TAG_KEY_ADVERTISEMENT);
                write_opt_str16(&mut bytes, adv.owner.as_deref())?;
                write_vec16(&mut bytes, adv.key.as_bytes())?;
                bytes.push(adv.kind.to_byte());
            }
            Frame::SecureEnvelope(envelope) => {
                bytes.push(TAG_SECURE_ENVELOPE);
                write_vec32(&mut bytes, &envelope.ciphertext)?;
            }
            Frame::Disconnect => {
                bytes.push(TAG_DISCONNECT);
            }
        }

        Ok(bytes)
    }

    /// Deserialize frame from bytes
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        if bytes.len() < 2 {
            return Err(TransportError::InvalidData("Frame too short".to_string()));
        }
        if bytes[0] != WIRE_VERSION {
            return Err(TransportError::InvalidData(format!(
                "Unsupported wire version: {}",
                bytes[0]
            )));
        }

        let tag = bytes[1];
        let rest = &bytes[2..];

        match tag {
            TAG_KEY_ADVERTISEMENT => {
                let (owner, rest) = read_opt_str16(rest)?;
                let (key, rest) = read_vec16(rest)?;
                let key = utf8(key)?;
                let (kind, rest) = match rest.split_first() {
                    Some((b, rest)) => (KeyKind::from_byte(*b)?, rest),
                    None => return Err(TransportError::InvalidData("Not enough data".to_string())),
                };
                expect_end(rest)?;
                Ok(Frame::KeyAdvertisement(KeyAdvertisement { owner, key, kind }))
            }
            TAG_SECURE_ENVELOPE => {
                let (ciphertext, rest) = read_vec32(rest)?;
                expect_end(rest)?;
                Ok(Frame::SecureEnvelope(SecureEnvelope { ciphertext }))
            }
            TAG_DISCONNECT => {
                expect_end(rest)?;
                Ok(Frame::Disconnect)
            }
            _ => Err(TransportError::InvalidData(format!(
                "Unknown frame type: {:#x}",
                tag
            ))),
        }
    }
}

fn too_long(len: usize, prefix: &str) -> TransportError {
    TransportError::InvalidData(format!(
        "Field of {} bytes does not fit a {} length prefix",
        len, prefix
    ))
}

/// Helper: append a length-prefixed vector (16-bit length)
pub(crate) fn write_vec16(bytes: &mut Vec<u8>, data: &[u8]) -> TransportResult<()> {
    let len = u16::try_from(data.len()).map_err(|_| too_long(data.len(), "16-bit"))?;
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(data);
    Ok(())
}

/// Helper: append a length-prefixed vector (32-bit length)
pub(crate) fn write_vec32(bytes: &mut Vec<u8>, data: &[u8]) -> TransportResult<()> {
    let len = u32::try_from(data.len()).map_err(|_| too_long(data.len(), "32-bit"))?;
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(data);
    Ok(())
}

/// Helper: append an optional string (presence byte + 16-bit length)
pub(crate) fn write_opt_str16(bytes: &mut Vec<u8>, value: Option<&str>) -> TransportResult<()> {
    match value {
        Some(s) => {
            bytes.push(1);
            write_vec16(bytes, s.as_bytes())
        }
        None => {
            bytes.push(0);
            Ok(())
        }
    }
}

/// Helper: read a length-prefixed vector (16-bit length)
pub(crate) fn read_vec16(bytes: &[u8]) -> TransportResult<(Vec<u8>, &[u8])> {
    if bytes.len() < 2 {
        return Err(TransportError::InvalidData("Not enough data".to_string()));
    }

    let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];

    if rest.len() < len {
        return Err(TransportError::InvalidData("Not enough data".to_string()));
    }

    Ok((rest[..len].to_vec(), &rest[len..]))
}

/// Helper: read a length-prefixed vector (32-bit length)
pub(crate) fn read_vec32(bytes: &[u8]) -> TransportResult<(Vec<u8>, &[u8])> {
    if bytes.len() < 4 {
        return Err(TransportError::InvalidData("Not enough data".to_string()));
    }

    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];

    if rest.len() < len {
        return Err(TransportError::InvalidData("Not enough data".to_string()));
    }

    Ok((rest[..len].to_vec(), &rest[len..]))
}

/// Helper: read an optional string (presence byte + 16-bit length)
pub(crate) fn read_opt_str16(bytes: &[u8]) -> TransportResult<(Option<String>, &[u8])> {
    match bytes.first() {
        Some(0) => Ok((None, &bytes[1..])),
        Some(1) => {
            let (raw, rest) = read_vec16(&bytes[1..])?;
            Ok((Some(utf8(raw)?), rest))
        }
        Some(other) => Err(TransportError::InvalidData(format!(
            "Invalid presence byte: {}",
            other
        ))),
        None => Err(TransportError::InvalidData("Not enough data".to_string())),
    }
}

/// Helper: fail unless every byte has been consumed
pub(crate) fn expect_end(rest: &[u8]) -> TransportResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(TransportError::InvalidData(format!(
            "{} trailing bytes after last field",
            rest.len()
        )))
    }
}

pub(crate) fn utf8(raw: Vec<u8>) -> TransportResult<String> {
    String::from_utf8(raw).map_err(|e| TransportError::InvalidData(e.to_string()))
}
