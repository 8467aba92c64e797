/*-
 * #%L
 * libvau
 * %%
 * (C) akquinet tech@Spree GmbH, 2025, licensed for gematik GmbH
 * %%
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 * *******
 *
 * For additional notes and disclaimer from gematik and in case of changes by gematik find details in the "Readme" file.
 * #L%
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KYBER_PK_SIZE: usize = 1184;
pub const KYBER_SK_SIZE: usize = 2400;
pub const KYBER_CT_SIZE: usize = 1088;
pub const ECDH_COORDINATE_SIZE: usize = 32;
pub const SHARED_SECRET_SIZE: usize = 32;
pub const KEY_SIZE: usize = 32;

pub const VAU_VERSION: u8 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub const fn as_byte(&self) -> u8 {
        match self {
            Direction::Request => 1,
            Direction::Response => 2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Environment {
    Production,
    Testing,
}

impl Environment {
    pub const fn as_byte(&self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Testing => 0,
        }
    }
}

/// Which end of the channel a session belongs to. Supplies the direction bytes and the counter
/// policy used by the framing code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub const fn outgoing(&self) -> Direction {
        match self {
            Role::Initiator => Direction::Request,
            Role::Responder => Direction::Response,
        }
    }

    pub const fn incoming(&self) -> Direction {
        match self {
            Role::Initiator => Direction::Response,
            Role::Responder => Direction::Request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhKey {
    pub crv: String,
    #[serde(with = "serde_bytes")]
    pub x: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub y: Vec<u8>,
}

impl From<Vec<u8>> for EcdhKey {
    fn from(bytes: Vec<u8>) -> EcdhKey {
        let mut x = bytes;
        let y = x.split_off(ECDH_COORDINATE_SIZE.min(x.len()));
        EcdhKey {
            crv: String::from("P-256"),
            x,
            y,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VauPublicKeys {
    pub iat: u64,
    pub exp: u64,
    pub comment: String,
    #[serde(rename = "ECDH_PK")]
    pub ecdh_pk: EcdhKey,
    #[serde(rename = "Kyber768_PK", with = "serde_bytes")]
    pub kyber_pk: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPublicKeys {
    #[serde(with = "serde_bytes")]
    pub signed_pub_keys: Vec<u8>,
    #[serde(rename = "signature-ES256", with = "serde_bytes")]
    pub signature_es256: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub cert_hash: Vec<u8>,
    pub cdv: u64,
    #[serde(default, with = "serde_bytes")]
    pub ocsp_response: Vec<u8>,
}

impl SignedPublicKeys {
    /// Decodes the embedded key payload. Only call this once the payload has been validated.
    pub fn decode_public_keys(&self) -> Result<VauPublicKeys, VauError> {
        serde_cbor::from_slice(&self.signed_pub_keys)
            .map_err(|e| VauError::malformed(2, format!("signed_pub_keys: {e}")))
    }
}

pub const MESSAGE_TYPE_1: &str = "M1";

#[derive(Debug, Serialize, Deserialize)]
pub struct Message1 {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "ECDH_PK")]
    pub ecdh_pk: EcdhKey,
    #[serde(rename = "Kyber768_PK", with = "serde_bytes")]
    pub kyber_pk: Vec<u8>,
}

pub const MESSAGE_TYPE_2: &str = "M2";

#[derive(Debug, Serialize, Deserialize)]
pub struct Message2 {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "ECDH_ct")]
    pub ecdh_ct: EcdhKey, // ephemeral public key of the encapsulating side
    #[serde(rename = "Kyber768_ct", with = "serde_bytes")]
    pub kyber_ct: Vec<u8>,
    #[serde(rename = "AEAD_ct", with = "serde_bytes")]
    pub aead_ct: Vec<u8>,
}

pub const MESSAGE_TYPE_3: &str = "M3";

#[derive(Debug, Serialize, Deserialize)]
pub struct Message3 {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "AEAD_ct", with = "serde_bytes")]
    pub aead_ct: Vec<u8>,
    #[serde(rename = "AEAD_ct_key_confirmation", with = "serde_bytes")]
    pub aead_ct_key_confirmation: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Message3InnerLayer {
    #[serde(rename = "ECDH_ct")]
    pub ecdh_ct: EcdhKey,
    #[serde(rename = "Kyber768_ct", with = "serde_bytes")]
    pub kyber_ct: Vec<u8>,
    #[serde(rename = "ERP")]
    pub erp: bool,
    #[serde(rename = "ESO")]
    pub eso: bool,
}

pub const MESSAGE_TYPE_4: &str = "M4";

#[derive(Debug, Serialize, Deserialize)]
pub struct Message4 {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "AEAD_ct_key_confirmation", with = "serde_bytes")]
    pub aead_ct_key_confirmation: Vec<u8>,
}

pub const MESSAGE_TYPE_ERROR: &str = "Error";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "ErrorCode")]
    pub error_code: u32,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VauError {
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("missing shared secret: {0}")]
    MissingSecret(&'static str),
    #[error("invalid shared secret length: {what} has {len} bytes, expected 32")]
    InvalidSecretLength { what: &'static str, len: usize },
    #[error("untrusted certificate chain: {0}")]
    UntrustedChain(String),
    #[error("revocation check failed: {0}")]
    RevocationCheckFailed(String),
    #[error("role mismatch: {0}")]
    RoleMismatch(String),
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("certificate data unavailable: {0}")]
    CertificateUnavailable(String),
    #[error("server keys expired at {exp}, now is {now}")]
    ExpiredKeys { exp: u64, now: u64 },
    #[error("transcript hash mismatch in message {0}")]
    TranscriptMismatch(u8),
    #[error("malformed message {message}: {reason}")]
    MalformedMessage { message: u8, reason: String },
    #[error("AEAD authentication failed: {0}")]
    Authentication(&'static str),
    #[error("counter mismatch: expected {expected}, got {actual}")]
    CounterMismatch { expected: u64, actual: u64 },
    #[error("key id mismatch")]
    KeyIdMismatch,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unknown channel id")]
    UnknownCid,
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl VauError {
    pub fn malformed(message: u8, reason: impl Into<String>) -> Self {
        VauError::MalformedMessage {
            message,
            reason: reason.into(),
        }
    }

    /// True for failures caused by the network rather than by the peer's protocol behaviour.
    pub const fn is_transport(&self) -> bool {
        matches!(self, VauError::CertificateUnavailable(_))
    }

    pub const fn status(&self) -> u16 {
        match self {
            VauError::MalformedKey(_)
            | VauError::MalformedMessage { .. }
            | VauError::MalformedFrame(_)
            | VauError::MissingSecret(_)
            | VauError::InvalidSecretLength { .. } => 400,
            VauError::CertificateUnavailable(_) => 502,
            VauError::Internal(_) => 500,
            _ => 403,
        }
    }

    pub const fn code(&self) -> u32 {
        match self {
            VauError::MalformedMessage { .. } => 1,
            VauError::MalformedKey(_) => 2,
            VauError::Authentication(_) => 3,
            VauError::TranscriptMismatch(_) => 5,
            VauError::MalformedFrame(_) => 6,
            VauError::CounterMismatch { .. } => 7,
            VauError::KeyIdMismatch => 8,
            VauError::UnknownCid => 9,
            VauError::MissingSecret(_) | VauError::InvalidSecretLength { .. } => 10,
            VauError::UntrustedChain(_)
            | VauError::RevocationCheckFailed(_)
            | VauError::RoleMismatch(_)
            | VauError::SignatureInvalid(_)
            | VauError::CertificateUnavailable(_)
            | VauError::ExpiredKeys { .. } => 11,
            VauError::Internal(_) => 13,
        }
    }

    pub fn to_message(&self) -> Result<Vec<u8>, VauError> {
        serde_cbor::to_vec(&ErrorMessage {
            message_type: String::from(MESSAGE_TYPE_ERROR),
            error_code: self.code(),
            error_message: self.to_string(),
        })
        .map_err(|_| VauError::Internal("encode error message"))
    }
}
