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

use libcrux::aead;
use tracing::trace;

use super::kdf::{Key, SessionKeySet};
use super::model::*;
use super::provider::CryptoProvider;
use super::util::{IV_SIZE, TAG_SIZE, aead_key};
use zeroize::Zeroizing;

pub const KEY_ID_SIZE: usize = 32;
pub const HEADER_SIZE: usize = 3 + 8 + KEY_ID_SIZE;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + IV_SIZE + TAG_SIZE + 1;

/// One post-handshake frame: `version ‖ pu ‖ direction ‖ counter ‖ key_id ‖ IV ‖ ct ‖ tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelMessage {
    pub version: u8,
    pub env: u8,
    pub direction: u8,
    pub counter: u64,
    pub key_id: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

impl TunnelMessage {
    pub fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.push(self.version);
        header.push(self.env);
        header.push(self.direction);
        header.extend(self.counter.to_be_bytes());
        header.extend(&self.key_id);
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = self.header();
        res.extend(self.iv);
        res.extend(&self.ciphertext);
        res
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, VauError> {
        if bytes.len() < MIN_FRAME_SIZE {
            return Err(VauError::MalformedFrame(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        let counter: [u8; 8] = bytes[3..11]
            .try_into()
            .map_err(|_| VauError::Internal("counter"))?;
        let iv: [u8; IV_SIZE] = bytes[HEADER_SIZE..HEADER_SIZE + IV_SIZE]
            .try_into()
            .map_err(|_| VauError::Internal("iv"))?;
        Ok(Self {
            version: bytes[0],
            env: bytes[1],
            direction: bytes[2],
            counter: u64::from_be_bytes(counter),
            key_id: bytes[11..HEADER_SIZE].to_vec(),
            iv,
            ciphertext: bytes[HEADER_SIZE + IV_SIZE..].to_vec(),
        })
    }
}

pub(crate) fn seal(
    key: &aead::Key,
    key_id: &[u8],
    env: Environment,
    direction: Direction,
    counter: u64,
    salt: [u8; 4],
    plain: &[u8],
) -> Result<TunnelMessage, VauError> {
    let mut iv = [0u8; IV_SIZE];
    iv[..4].copy_from_slice(&salt);
    iv[4..].copy_from_slice(&counter.to_be_bytes());

    let mut msg = TunnelMessage {
        version: VAU_VERSION,
        env: env.as_byte(),
        direction: direction.as_byte(),
        counter,
        key_id: key_id.to_vec(),
        iv,
        ciphertext: Vec::new(),
    };
    let header = msg.header();
    let (tag, ct) = aead::encrypt_detached(key, plain, aead::Iv(iv), &header)
        .map_err(|_| VauError::Internal("aead encrypt"))?;
    msg.ciphertext = ct;
    msg.ciphertext.extend(tag.as_ref());
    Ok(msg)
}

/// Checks the header against expectations (except the counter) and decrypts.
pub(crate) fn open(
    key: &aead::Key,
    key_id: &[u8],
    env: Environment,
    direction: Direction,
    msg: &TunnelMessage,
) -> Result<Vec<u8>, VauError> {
    if msg.version != VAU_VERSION {
        return Err(VauError::MalformedFrame(format!(
            "unsupported version {}",
            msg.version
        )));
    }
    if msg.env != env.as_byte() {
        return Err(VauError::MalformedFrame(format!(
            "PU flag mismatch: expected {}, got {}",
            env.as_byte(),
            msg.env
        )));
    }
    if msg.direction != direction.as_byte() {
        return Err(VauError::MalformedFrame(format!(
            "direction mismatch: expected {}, got {}",
            direction.as_byte(),
            msg.direction
        )));
    }
    if msg.key_id != key_id {
        return Err(VauError::KeyIdMismatch);
    }
    if msg.ciphertext.len() < TAG_SIZE {
        return Err(VauError::MalformedFrame(String::from("ciphertext too short")));
    }

    let split = msg.ciphertext.len() - TAG_SIZE;
    let tag = aead::Tag::from_slice(&msg.ciphertext[split..])
        .map_err(|_| VauError::Internal("tag"))?;
    aead::decrypt_detached(
        key,
        &msg.ciphertext[..split],
        aead::Iv(msg.iv),
        msg.header(),
        &tag,
    )
    .map_err(|_| VauError::Authentication("application data"))
}

/// An established channel. Encryption and decryption take `&mut self`; share it behind a
/// mutex so that no two frames are ever sealed with the same counter.
pub struct Session {
    role: Role,
    env: Environment,
    key_id: Vec<u8>,
    seal_key: Key,
    open_key: Key,
    sent: u64,
    received: u64,
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("env", &self.env)
            .field("sent", &self.sent)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        role: Role,
        env: Environment,
        keys: &SessionKeySet,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        let (seal_key, open_key) = match role {
            Role::Initiator => (&keys.c2s_app_data, &keys.s2c_app_data),
            Role::Responder => (&keys.s2c_app_data, &keys.c2s_app_data),
        };
        Self {
            role,
            env,
            key_id: keys.key_id.clone(),
            seal_key: Zeroizing::new(seal_key.to_vec()),
            open_key: Zeroizing::new(open_key.to_vec()),
            sent: 0,
            received: 0,
            provider,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn key_id(&self) -> &[u8] {
        &self.key_id
    }

    /// Counter of the last frame sent.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Counter of the last frame accepted.
    pub fn received(&self) -> u64 {
        self.received
    }

    fn next_outgoing(&self) -> Result<u64, VauError> {
        match self.role {
            Role::Initiator => self
                .sent
                .checked_add(1)
                .ok_or(VauError::Internal("request counter exhausted")),
            // a response carries the counter of the request it answers
            Role::Responder if self.received > self.sent => Ok(self.received),
            Role::Responder => Err(VauError::CounterMismatch {
                expected: self.sent + 1,
                actual: self.received,
            }),
        }
    }

    pub fn encrypt(&mut self, plain: &[u8]) -> Result<TunnelMessage, VauError> {
        let counter = self.next_outgoing()?;
        let salt: [u8; 4] = self.provider.random_array()?;
        let key = aead_key(&self.seal_key)?;
        let msg = seal(
            &key,
            &self.key_id,
            self.env,
            self.role.outgoing(),
            counter,
            salt,
            plain,
        )?;
        self.sent = counter;
        trace!(role = ?self.role, counter, len = plain.len(), "sealed frame");
        Ok(msg)
    }

    pub fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, VauError> {
        let msg = TunnelMessage::parse(wire)?;
        let expected = self
            .received
            .checked_add(1)
            .ok_or(VauError::Internal("response counter exhausted"))?;
        if msg.counter != expected
            || (self.role == Role::Initiator && msg.counter > self.sent)
        {
            return Err(VauError::CounterMismatch {
                expected,
                actual: msg.counter,
            });
        }
        let key = aead_key(&self.open_key)?;
        let plain = open(&key, &self.key_id, self.env, self.role.incoming(), &msg)?;
        self.received = msg.counter;
        trace!(role = ?self.role, counter = msg.counter, len = plain.len(), "opened frame");
        Ok(plain)
    }
}
