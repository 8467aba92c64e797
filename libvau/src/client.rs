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

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::frame::Session;
use super::kdf::{SessionKeySet, derive_handshake_keys, derive_session_keys};
use super::kem::{decapsulate, encapsulate};
use super::keys::{HybridKeyPair, generate_keypair};
use super::model::*;
use super::provider::CryptoProvider;
use super::util::*;

/// Decides whether the responder's signed key material can be trusted.
///
/// Implementations run the certificate, revocation, role and signature checks and only then hand
/// back the decoded [`VauPublicKeys`].
pub trait TrustValidator: Send + Sync {
    fn validate(
        &self,
        keys: &SignedPublicKeys,
    ) -> impl Future<Output = Result<VauPublicKeys, VauError>> + Send;
}

/// Client handshake before Message 1 was produced.
pub struct Idle {
    provider: Arc<CryptoProvider>,
    env: Environment,
    keys: HybridKeyPair,
}

pub struct AwaitingResponderKeys {
    provider: Arc<CryptoProvider>,
    env: Environment,
    keys: HybridKeyPair,
    msg1: Vec<u8>,
}

pub struct AwaitingConfirmation {
    provider: Arc<CryptoProvider>,
    env: Environment,
    keys: SessionKeySet,
    expected_hash: Vec<u8>,
}

impl Idle {
    pub fn new(provider: Arc<CryptoProvider>, env: Environment) -> Result<Self, VauError> {
        let keys = generate_keypair(&provider)?;
        Ok(Self::with_keys(provider, env, keys))
    }

    pub fn with_keys(provider: Arc<CryptoProvider>, env: Environment, keys: HybridKeyPair) -> Self {
        Self {
            provider,
            env,
            keys,
        }
    }

    pub fn start(self) -> Result<(AwaitingResponderKeys, Vec<u8>), VauError> {
        let m1 = Message1 {
            message_type: String::from(MESSAGE_TYPE_1),
            ecdh_pk: self.keys.pk.ecdh_key(),
            kyber_pk: self.keys.pk.kyber_pk.as_slice().to_vec(),
        };
        let msg1 = encode(&m1)?;
        debug!(len = msg1.len(), "built message 1");

        let state = AwaitingResponderKeys {
            provider: self.provider,
            env: self.env,
            keys: self.keys,
            msg1: msg1.clone(),
        };
        Ok((state, msg1))
    }
}

impl AwaitingResponderKeys {
    pub fn message1(&self) -> &[u8] {
        &self.msg1
    }

    /// Processes Message 2 and returns Message 3. The responder's keys are used only after
    /// `validator` accepted them.
    pub async fn receive_message2<V: TrustValidator>(
        self,
        msg2: &[u8],
        validator: &V,
    ) -> Result<(AwaitingConfirmation, Vec<u8>), VauError> {
        let m2: Message2 = decode_message(msg2, MESSAGE_TYPE_2, 2)?;
        let first = decapsulate(&self.keys, &m2.ecdh_ct, &m2.kyber_ct)?;
        let hk = derive_handshake_keys(&first)?;

        let signed_bytes = decrypt_handshake(&hk.k1_s2c, &m2.aead_ct, "message 2")?;
        let signed: SignedPublicKeys = serde_cbor::from_slice(&signed_bytes)
            .map_err(|e| VauError::malformed(2, format!("signed public keys: {e}")))?;

        let server_keys = validator.validate(&signed).await?;
        let now = utc_now();
        if server_keys.exp < now {
            return Err(VauError::ExpiredKeys {
                exp: server_keys.exp,
                now,
            });
        }
        debug!(cdv = signed.cdv, exp = server_keys.exp, "responder keys trusted");

        let second = encapsulate(&self.provider, &server_keys.ecdh_pk, &server_keys.kyber_pk)?;
        let keys = derive_session_keys(&first, &second)?;

        let inner = Message3InnerLayer {
            ecdh_ct: second.ecdh_ct.clone(),
            kyber_ct: second.kyber_ct.clone(),
            erp: false,
            eso: false,
        };
        let ct_msg_3 = encrypt_handshake(&self.provider, &hk.k1_c2s, &encode(&inner)?)?;

        let client_hash = sha256(&[&self.msg1, msg2, &ct_msg_3]);
        let ct_key_confirmation =
            encrypt_handshake(&self.provider, &keys.c2s_key_confirmation, &client_hash)?;

        let m3 = Message3 {
            message_type: String::from(MESSAGE_TYPE_3),
            aead_ct: ct_msg_3,
            aead_ct_key_confirmation: ct_key_confirmation,
        };
        let msg3 = encode(&m3)?;
        let expected_hash = sha256(&[&self.msg1, msg2, &msg3]);
        debug!(len = msg3.len(), "built message 3");

        let state = AwaitingConfirmation {
            provider: self.provider,
            env: self.env,
            keys,
            expected_hash,
        };
        Ok((state, msg3))
    }
}

impl AwaitingConfirmation {
    pub fn key_id(&self) -> &[u8] {
        &self.keys.key_id
    }

    /// Checks the responder's key confirmation and opens the channel.
    pub fn receive_message4(self, msg4: &[u8]) -> Result<Session, VauError> {
        let m4: Message4 = decode_message(msg4, MESSAGE_TYPE_4, 4)?;
        let server_hash = decrypt_handshake(
            &self.keys.s2c_key_confirmation,
            &m4.aead_ct_key_confirmation,
            "message 4",
        )
        .map_err(|_| VauError::TranscriptMismatch(4))?;
        if server_hash != self.expected_hash {
            return Err(VauError::TranscriptMismatch(4));
        }
        debug!("handshake established");
        Ok(Session::new(
            Role::Initiator,
            self.env,
            &self.keys,
            self.provider,
        ))
    }
}
