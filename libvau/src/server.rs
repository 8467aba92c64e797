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

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::frame::Session;
use super::kdf::{derive_handshake_keys, derive_session_keys};
use super::kem::{EncapsulationResult, decapsulate, encapsulate};
use super::keys::HybridKeyPair;
use super::model::*;
use super::provider::CryptoProvider;
use super::util::*;

const EXPIRES_AFTER_SECONDS: u64 = 24 * 60 * 60;

/// Long-lived responder identity: the signed key blob it hands out and the matching private keys.
pub struct Config {
    pub env: Environment,
    pub signed_keys: SignedPublicKeys,
    pub keys: HybridKeyPair,
    pub provider: Arc<CryptoProvider>,
}

impl Config {
    pub fn new(
        env: Environment,
        signed_keys: SignedPublicKeys,
        keys: HybridKeyPair,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Config {
            env,
            signed_keys,
            keys,
            provider,
        }
    }
}

#[derive(Debug)]
pub struct HandshakeState {
    pub first: EncapsulationResult,
    pub transcript: Vec<u8>, // M1 || M2
}

#[derive(Debug)]
pub struct SessionState {
    pub session: Session,
    pub expires: u64,
}

// Lets a fresh OCSP response be stapled without cloning the key blob
#[derive(Serialize)]
struct SignedPublicKeysRef<'a> {
    #[serde(with = "serde_bytes")]
    signed_pub_keys: &'a [u8],
    #[serde(rename = "signature-ES256", with = "serde_bytes")]
    signature_es256: &'a [u8],
    #[serde(with = "serde_bytes")]
    cert_hash: &'a [u8],
    cdv: u64,
    #[serde(with = "serde_bytes")]
    ocsp_response: &'a [u8],
}

pub fn initiate_handshake(
    conf: &Config,
    msg1: &[u8],
    ocsp_response: &[u8],
) -> Result<(HandshakeState, Vec<u8>), VauError> {
    let m1: Message1 = decode_message(msg1, MESSAGE_TYPE_1, 1)?;
    let first = encapsulate(&conf.provider, &m1.ecdh_pk, &m1.kyber_pk)?;
    let keys = derive_handshake_keys(&first)?;

    let server_keys = SignedPublicKeysRef {
        signed_pub_keys: &conf.signed_keys.signed_pub_keys,
        signature_es256: &conf.signed_keys.signature_es256,
        cert_hash: &conf.signed_keys.cert_hash,
        cdv: conf.signed_keys.cdv,
        ocsp_response,
    };
    let aead_ct = encrypt_handshake(&conf.provider, &keys.k1_s2c, &encode(&server_keys)?)?;

    let m2 = Message2 {
        message_type: String::from(MESSAGE_TYPE_2),
        ecdh_ct: first.ecdh_ct.clone(),
        kyber_ct: first.kyber_ct.clone(),
        aead_ct,
    };
    let msg2 = encode(&m2)?;

    let mut transcript = Vec::with_capacity(msg1.len() + msg2.len());
    transcript.extend(msg1);
    transcript.extend(msg2.iter());
    debug!(len = msg2.len(), "built message 2");

    Ok((HandshakeState { first, transcript }, msg2))
}

/// Verifies the client's key confirmation in Message 3 and answers with Message 4.
///
/// A key confirmation that fails to decrypt is reported as a transcript mismatch, the same as
/// one that decrypts to the wrong hash.
pub fn finish_handshake(
    conf: &Config,
    state: HandshakeState,
    msg3: &[u8],
) -> Result<(SessionState, Vec<u8>), VauError> {
    let hk = derive_handshake_keys(&state.first)?;
    let m3: Message3 = decode_message(msg3, MESSAGE_TYPE_3, 3)?;

    let inner_cbor = decrypt_handshake(&hk.k1_c2s, &m3.aead_ct, "message 3")?;
    let inner: Message3InnerLayer = serde_cbor::from_slice(&inner_cbor)
        .map_err(|e| VauError::malformed(3, format!("inner layer: {e}")))?;
    if inner.erp || inner.eso {
        return Err(VauError::malformed(3, "ERP and ESO are not supported"));
    }

    let second = decapsulate(&conf.keys, &inner.ecdh_ct, &inner.kyber_ct)?;
    let keys = derive_session_keys(&state.first, &second)?;

    let client_hash = sha256(&[&state.transcript, &m3.aead_ct]);
    let confirmed = decrypt_handshake(
        &keys.c2s_key_confirmation,
        &m3.aead_ct_key_confirmation,
        "message 3 key confirmation",
    )
    .map_err(|_| VauError::TranscriptMismatch(3))?;
    if confirmed != client_hash {
        return Err(VauError::TranscriptMismatch(3));
    }

    let server_hash = sha256(&[&state.transcript, msg3]);
    let m4 = Message4 {
        message_type: String::from(MESSAGE_TYPE_4),
        aead_ct_key_confirmation: encrypt_handshake(
            &conf.provider,
            &keys.s2c_key_confirmation,
            &server_hash,
        )?,
    };
    let msg4 = encode(&m4)?;
    debug!("responder handshake established");

    let session = SessionState {
        session: Session::new(Role::Responder, conf.env, &keys, conf.provider.clone()),
        expires: utc_now() + EXPIRES_AFTER_SECONDS,
    };
    Ok((session, msg4))
}
