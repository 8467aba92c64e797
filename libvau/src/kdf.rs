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

use libcrux::hkdf;
use zeroize::Zeroizing;

use super::kem::EncapsulationResult;
use super::model::*;

pub type Key = Zeroizing<Vec<u8>>;

/// Handshake keys derived from the first encapsulation round only.
pub struct HandshakeKeys {
    pub k1_c2s: Key,
    pub k1_s2c: Key,
}

/// Symmetric material of one established channel.
pub struct SessionKeySet {
    pub c2s_key_confirmation: Key,
    pub c2s_app_data: Key,
    pub s2c_key_confirmation: Key,
    pub s2c_app_data: Key,
    pub key_id: Vec<u8>,
}

impl std::fmt::Debug for SessionKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeySet")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

pub(crate) fn hkdf_expand(secret: &[u8], out_len: usize) -> Result<Key, VauError> {
    // zero salt block and empty info
    let salt = [0u8; 32];
    let info = [0u8; 0];
    let res = hkdf::hkdf(hkdf::Algorithm::Sha256, &salt, secret, &info, out_len)
        .map_err(|_| VauError::Internal("hkdf"))?;
    if res.len() != out_len {
        return Err(VauError::Internal("hkdf output length"));
    }
    Ok(Zeroizing::new(res))
}

fn checked_secret<'a>(secret: &'a [u8], what: &'static str) -> Result<&'a [u8], VauError> {
    if secret.is_empty() {
        return Err(VauError::MissingSecret(what));
    }
    if secret.len() != SHARED_SECRET_SIZE {
        return Err(VauError::InvalidSecretLength {
            what,
            len: secret.len(),
        });
    }
    Ok(secret)
}

/// `ecdh_ss ‖ kyber_ss` after checking both secrets.
fn combined_secret(
    result: &EncapsulationResult,
    ecdh: &'static str,
    kyber: &'static str,
) -> Result<Key, VauError> {
    let mut ss = Zeroizing::new(Vec::with_capacity(2 * SHARED_SECRET_SIZE));
    ss.extend(checked_secret(&result.ecdh_shared_secret, ecdh)?);
    ss.extend(checked_secret(&result.kyber_shared_secret, kyber)?);
    Ok(ss)
}

pub fn derive_handshake_keys(first: &EncapsulationResult) -> Result<HandshakeKeys, VauError> {
    let ss_e = combined_secret(first, "first ECDH secret", "first Kyber secret")?;
    let mat = hkdf_expand(&ss_e, 2 * KEY_SIZE)?;
    Ok(HandshakeKeys {
        k1_c2s: Zeroizing::new(mat[..KEY_SIZE].to_vec()),
        k1_s2c: Zeroizing::new(mat[KEY_SIZE..].to_vec()),
    })
}

/// Derives the channel keys from both encapsulation rounds. Deterministic in its inputs.
pub fn derive_session_keys(
    first: &EncapsulationResult,
    second: &EncapsulationResult,
) -> Result<SessionKeySet, VauError> {
    let ss_e = combined_secret(first, "first ECDH secret", "first Kyber secret")?;
    let ss_s = combined_secret(second, "second ECDH secret", "second Kyber secret")?;

    let mut ss = Zeroizing::new(Vec::with_capacity(ss_e.len() + ss_s.len()));
    ss.extend(ss_e.iter());
    ss.extend(ss_s.iter());

    let mat = hkdf_expand(&ss, 5 * KEY_SIZE)?;
    let mut chunks = mat.chunks_exact(KEY_SIZE).map(|c| Zeroizing::new(c.to_vec()));
    let mut next = || chunks.next().ok_or(VauError::Internal("hkdf output length"));

    Ok(SessionKeySet {
        c2s_key_confirmation: next()?,
        c2s_app_data: next()?,
        s2c_key_confirmation: next()?,
        s2c_app_data: next()?,
        key_id: next()?.to_vec(),
    })
}
