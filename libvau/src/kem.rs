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

use libcrux::kem;
use libcrux_ml_kem::kyber768;
use libcrux_ml_kem::mlkem768::MlKem768Ciphertext;
use rand::RngCore;
use zeroize::Zeroizing;

use super::keys::{HybridKeyPair, decode_kyber_pk, validate_ecdh_key};
use super::model::*;
use super::provider::CryptoProvider;

/// Output of one hybrid encapsulation or decapsulation.
pub struct EncapsulationResult {
    pub ecdh_shared_secret: Zeroizing<Vec<u8>>,
    pub kyber_shared_secret: Zeroizing<Vec<u8>>,
    pub ecdh_ct: EcdhKey,
    pub kyber_ct: Vec<u8>,
}

impl std::fmt::Debug for EncapsulationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncapsulationResult")
            .field("ecdh_ct", &self.ecdh_ct)
            .field("kyber_ct_len", &self.kyber_ct.len())
            .finish_non_exhaustive()
    }
}

/// Encapsulates against the peer's ECDH and Kyber768 public keys.
pub fn encapsulate(
    provider: &CryptoProvider,
    peer_ecdh_pk: &EcdhKey,
    peer_kyber_pk: &[u8],
) -> Result<EncapsulationResult, VauError> {
    let ecdh_bytes = validate_ecdh_key(peer_ecdh_pk)?;
    let ecdh_pk = kem::PublicKey::decode(kem::Algorithm::Secp256r1, &ecdh_bytes)
        .map_err(|_| VauError::MalformedKey(String::from("ECDH point is not on P-256")))?;
    let kyber_pk = decode_kyber_pk(peer_kyber_pk)?;

    provider.with_rng(|rng| {
        let (ss, ct) = kem::encapsulate(&ecdh_pk, rng)
            .map_err(|_| VauError::MalformedKey(String::from("ECDH encapsulation failed")))?;
        let mut ecdh_ss = ss.encode();
        ecdh_ss.truncate(SHARED_SECRET_SIZE); // X coordinate only, as in TLS 1.3 (RFC 8446 7.4.2)

        let mut randomness = [0u8; 32];
        rng.fill_bytes(&mut randomness);
        let (kyber_ct, kyber_ss) = kyber768::encapsulate(&kyber_pk, randomness);

        Ok(EncapsulationResult {
            ecdh_shared_secret: Zeroizing::new(ecdh_ss),
            kyber_shared_secret: Zeroizing::new(kyber_ss.to_vec()),
            ecdh_ct: EcdhKey::from(ct.encode()),
            kyber_ct: kyber_ct.as_slice().to_vec(),
        })
    })
}

/// Recovers the shared secrets the peer encapsulated against `own`.
pub fn decapsulate(
    own: &HybridKeyPair,
    ecdh_ct: &EcdhKey,
    kyber_ct: &[u8],
) -> Result<EncapsulationResult, VauError> {
    let ecdh_bytes = validate_ecdh_key(ecdh_ct)?;
    let ct = kem::Ct::decode(kem::Algorithm::Secp256r1, &ecdh_bytes)
        .map_err(|_| VauError::MalformedKey(String::from("ECDH point is not on P-256")))?;
    let ss = kem::decapsulate(&ct, &own.sk.ecdh_sk)
        .map_err(|_| VauError::MalformedKey(String::from("ECDH decapsulation failed")))?;
    let mut ecdh_ss = ss.encode();
    ecdh_ss.truncate(SHARED_SECRET_SIZE);

    let kyber_ct_bytes: [u8; KYBER_CT_SIZE] = kyber_ct.try_into().map_err(|_| {
        VauError::MalformedKey(format!(
            "Kyber768 ciphertext must be {KYBER_CT_SIZE} bytes, got {}",
            kyber_ct.len()
        ))
    })?;
    let kyber_ss =
        kyber768::decapsulate(&own.sk.kyber_sk, &MlKem768Ciphertext::from(kyber_ct_bytes));

    Ok(EncapsulationResult {
        ecdh_shared_secret: Zeroizing::new(ecdh_ss),
        kyber_shared_secret: Zeroizing::new(kyber_ss.to_vec()),
        ecdh_ct: ecdh_ct.clone(),
        kyber_ct: kyber_ct.to_vec(),
    })
}
