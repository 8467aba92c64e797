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

use std::time::{SystemTime, UNIX_EPOCH};

use libcrux::{aead, digest};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::model::*;
use super::provider::CryptoProvider;

pub(crate) const IV_SIZE: usize = 12;
pub(crate) const TAG_SIZE: usize = 16;

pub fn utc_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    digest::hash(digest::Algorithm::Sha256, &parts.concat())
}

pub(crate) fn aead_key(key: &[u8]) -> Result<aead::Key, VauError> {
    aead::Key::from_slice(aead::Algorithm::Aes256Gcm, key).map_err(|_| VauError::Internal("aead key"))
}

/// AES-256-GCM with a random IV, laid out as `IV ‖ ciphertext ‖ tag`.
pub(crate) fn encrypt_handshake(
    provider: &CryptoProvider,
    key: &[u8],
    plain: &[u8],
) -> Result<Vec<u8>, VauError> {
    let key_obj = aead_key(key)?;
    let iv_bytes: [u8; IV_SIZE] = provider.random_array()?;
    let aad: [u8; 0] = [];

    let mut res: Vec<u8> = Vec::with_capacity(IV_SIZE + plain.len() + TAG_SIZE);
    res.extend(iv_bytes);

    let (tag, ct) = aead::encrypt_detached(&key_obj, plain, aead::Iv(iv_bytes), aad)
        .map_err(|_| VauError::Internal("aead encrypt"))?;
    res.extend(&ct);
    res.extend(tag.as_ref());

    Ok(res)
}

pub(crate) fn decrypt_handshake(
    key: &[u8],
    crypt: &[u8],
    step: &'static str,
) -> Result<Vec<u8>, VauError> {
    let key_obj = aead_key(key)?;
    if crypt.len() < IV_SIZE + TAG_SIZE {
        return Err(VauError::Authentication(step));
    }
    let iv_bytes: [u8; IV_SIZE] = crypt[..IV_SIZE]
        .try_into()
        .map_err(|_| VauError::Internal("iv"))?;
    let tag = aead::Tag::from_slice(&crypt[crypt.len() - TAG_SIZE..])
        .map_err(|_| VauError::Internal("tag"))?;
    let msg = &crypt[IV_SIZE..crypt.len() - TAG_SIZE];
    let aad: [u8; 0] = [];

    aead::decrypt_detached(&key_obj, msg, aead::Iv(iv_bytes), aad, &tag)
        .map_err(|_| VauError::Authentication(step))
}

#[derive(Deserialize)]
struct MessageTag {
    #[serde(rename = "MessageType")]
    message_type: Option<String>,
}

/// Decodes handshake message `number`, insisting on the expected `MessageType` tag.
pub(crate) fn decode_message<T: DeserializeOwned>(
    bytes: &[u8],
    expected: &str,
    number: u8,
) -> Result<T, VauError> {
    let tag: MessageTag = serde_cbor::from_slice(bytes)
        .map_err(|e| VauError::malformed(number, format!("invalid CBOR: {e}")))?;
    match tag.message_type.as_deref() {
        Some(t) if t == expected => {}
        Some(MESSAGE_TYPE_ERROR) => {
            let err: ErrorMessage = serde_cbor::from_slice(bytes)
                .map_err(|e| VauError::malformed(number, format!("invalid error message: {e}")))?;
            return Err(VauError::malformed(
                number,
                format!(
                    "peer reported error {}: {}",
                    err.error_code, err.error_message
                ),
            ));
        }
        Some(other) => {
            return Err(VauError::malformed(
                number,
                format!("unexpected MessageType '{other}', expected '{expected}'"),
            ));
        }
        None => return Err(VauError::malformed(number, "missing MessageType")),
    }
    serde_cbor::from_slice(bytes).map_err(|e| VauError::malformed(number, e.to_string()))
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, VauError> {
    serde_cbor::to_vec(value).map_err(|_| VauError::Internal("cbor encode"))
}
