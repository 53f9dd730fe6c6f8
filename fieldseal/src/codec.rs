//! Storage format for encrypted messages.
//!
//! A message is stored as compact JSON with base64 (standard alphabet, padded) fields:
//!
//! ```text
//! {"p":"<ciphertext>","h":{"iv":"<iv>","at":"<auth tag>"[,"z":true][,"kt":"<key tag>"][,"k":{..}]}}
//! ```
//!
//! - `p`, `h.iv` and `h.at` are always present
//! - `h.z` is written only for compressed payloads
//! - `h.kt` is written only when key references are stored
//! - `h.k` holds the wrapped data key of envelope encryption, itself a message

use crate::cipher::{AUTH_TAG_SIZE, IV_SIZE};
use crate::error::Error;
use crate::key::KeyTag;
use crate::message::EncryptedMessage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMessage {
    p: String,
    h: WireHeaders,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireHeaders {
    iv: String,
    at: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    z: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    k: Option<Box<WireMessage>>,
}

/// Encodes and decodes [`EncryptedMessage`]s to and from their stored string form.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Serializes a message for storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if JSON serialization fails.
    pub fn encode(&self, message: &EncryptedMessage) -> Result<String, Error> {
        serde_json::to_string(&to_wire(message))
            .map_err(|e| Error::Encryption(format!("message serialization failed: {e}")))
    }

    /// Parses a stored value back into a message.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMessage` for anything that is not a well-formed
    /// message: other JSON, plain text, bad base64 or wrong IV/tag lengths.
    pub fn decode(&self, stored: &str) -> Result<EncryptedMessage, Error> {
        let wire: WireMessage = serde_json::from_str(stored)
            .map_err(|e| Error::InvalidMessage(format!("not an encrypted message: {e}")))?;
        from_wire(wire)
    }

    /// Returns `true` if `stored` parses as an encrypted message.
    #[must_use]
    pub fn looks_encrypted(&self, stored: &str) -> bool {
        self.decode(stored).is_ok()
    }
}

fn to_wire(message: &EncryptedMessage) -> WireMessage {
    WireMessage {
        p: STANDARD.encode(message.ciphertext()),
        h: WireHeaders {
            iv: STANDARD.encode(message.iv()),
            at: STANDARD.encode(message.auth_tag()),
            z: message.is_compressed(),
            kt: message.key_tag().map(|tag| tag.as_str().to_string()),
            k: message.wrapped_data_key().map(|wrapped| Box::new(to_wire(wrapped))),
        },
    }
}

fn from_wire(wire: WireMessage) -> Result<EncryptedMessage, Error> {
    let ciphertext = decode_field("p", &wire.p)?;
    let iv: [u8; IV_SIZE] = decode_field("iv", &wire.h.iv)?.try_into().map_err(|v: Vec<u8>| {
        Error::InvalidMessage(format!("IV must be {IV_SIZE} bytes, got {}", v.len()))
    })?;
    let auth_tag: [u8; AUTH_TAG_SIZE] =
        decode_field("at", &wire.h.at)?.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidMessage(format!("auth tag must be {AUTH_TAG_SIZE} bytes, got {}", v.len()))
        })?;

    let mut message = EncryptedMessage::new(ciphertext, iv, auth_tag).with_compressed(wire.h.z);

    if let Some(kt) = wire.h.kt {
        if kt.is_empty() {
            return Err(Error::InvalidMessage("empty key tag".to_string()));
        }
        message = message.with_key_tag(KeyTag::new(kt));
    }

    if let Some(wrapped) = wire.h.k {
        message = message.with_wrapped_data_key(from_wire(*wrapped)?);
    }

    Ok(message)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::InvalidMessage(format!("field {name} is not valid base64: {e}")))
}
