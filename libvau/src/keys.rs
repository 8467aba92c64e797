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

use libcrux::{digest, kem};
use libcrux_ml_kem::kyber768;
use libcrux_ml_kem::mlkem768::{MlKem768PrivateKey, MlKem768PublicKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private};
use openssl::sign::Signer;
use rand::RngCore;

use super::model::*;
use super::provider::CryptoProvider;

pub type KyberPublicKey = MlKem768PublicKey;
pub type KyberPrivateKey = MlKem768PrivateKey;

// SubjectPublicKeyInfo prefix for a Kyber768 key (OID 1.3.6.1.4.1.22554.5.6.2)
const KYBER_SPKI_HEADER: [u8; 24] = [
    0x30, 0x82, 0x04, 0xb4, 0x30, 0x0d, 0x06, 0x0b, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x81, 0xb0, 0x1a,
    0x05, 0x06, 0x02, 0x03, 0x82, 0x04, 0xa1, 0x00,
];

pub struct PublicKeys {
    pub ecdh_pk: kem::PublicKey,
    pub kyber_pk: KyberPublicKey,
}

impl std::fmt::Debug for PublicKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PublicKeys (opaque)")
    }
}

impl PublicKeys {
    pub fn ecdh_key(&self) -> EcdhKey {
        EcdhKey::from(self.ecdh_pk.encode())
    }
}

pub struct PrivateKeys {
    pub ecdh_sk: kem::PrivateKey,
    pub kyber_sk: KyberPrivateKey,
}

/// Ephemeral key material of one party for a single handshake attempt.
pub struct HybridKeyPair {
    pub pk: PublicKeys,
    pub sk: PrivateKeys,
}

pub fn generate_keypair(provider: &CryptoProvider) -> Result<HybridKeyPair, VauError> {
    provider.with_rng(|rng| {
        let (ecdh_sk, ecdh_pk) = kem::key_gen(kem::Algorithm::Secp256r1, rng)
            .map_err(|_| VauError::Internal("ecdh key generation"))?;

        let mut randomness = [0u8; 64];
        rng.fill_bytes(&mut randomness);
        let kyber = kyber768::generate_key_pair(randomness);

        Ok(HybridKeyPair {
            pk: PublicKeys {
                ecdh_pk,
                kyber_pk: KyberPublicKey::from(kyber.pk()),
            },
            sk: PrivateKeys {
                ecdh_sk,
                kyber_sk: KyberPrivateKey::from(kyber.sk()),
            },
        })
    })
}

/// Checks curve and coordinate lengths and returns the uncompressed `x ‖ y` encoding.
pub(crate) fn validate_ecdh_key(key: &EcdhKey) -> Result<Vec<u8>, VauError> {
    if key.crv != "P-256" {
        return Err(VauError::MalformedKey(format!(
            "ECDH curve must be P-256, got '{}'",
            key.crv
        )));
    }
    if key.x.len() != ECDH_COORDINATE_SIZE {
        return Err(VauError::MalformedKey(format!(
            "ECDH x coordinate must be 32 bytes, got {}",
            key.x.len()
        )));
    }
    if key.y.len() != ECDH_COORDINATE_SIZE {
        return Err(VauError::MalformedKey(format!(
            "ECDH y coordinate must be 32 bytes, got {}",
            key.y.len()
        )));
    }
    let mut encoded = key.x.clone();
    encoded.extend(&key.y);
    Ok(encoded)
}

pub(crate) fn decode_kyber_pk(bytes: &[u8]) -> Result<KyberPublicKey, VauError> {
    let arr: [u8; KYBER_PK_SIZE] = bytes.try_into().map_err(|_| {
        VauError::MalformedKey(format!(
            "Kyber768 public key must be {KYBER_PK_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(KyberPublicKey::from(arr))
}

/// Wraps a compact Kyber768 public key into its SubjectPublicKeyInfo encoding.
pub fn kyber_pk_to_spki(compact: &[u8]) -> Result<Vec<u8>, VauError> {
    decode_kyber_pk(compact)?;
    Ok([KYBER_SPKI_HEADER.as_slice(), compact].concat())
}

/// Extracts the compact Kyber768 public key from its SubjectPublicKeyInfo encoding.
pub fn kyber_pk_from_spki(spki: &[u8]) -> Result<Vec<u8>, VauError> {
    let compact = spki
        .strip_prefix(KYBER_SPKI_HEADER.as_slice())
        .ok_or_else(|| VauError::MalformedKey(String::from("unexpected Kyber768 SPKI header")))?;
    decode_kyber_pk(compact)?;
    Ok(compact.to_vec())
}

impl VauPublicKeys {
    pub fn new(pk: &PublicKeys, issued_utc: u64, valid_for_secs: u64, comment: &str) -> Self {
        Self {
            iat: issued_utc,
            exp: issued_utc + valid_for_secs,
            comment: String::from(comment),
            ecdh_pk: pk.ecdh_key(),
            kyber_pk: pk.kyber_pk.as_slice().to_vec(),
        }
    }

    /// Signs the CBOR encoding of these keys with the VAU certificate's key (ES256, raw r‖s).
    pub fn sign(
        &self,
        signer_der: &[u8],
        signer_key: &PKeyRef<Private>,
        cdv: u64,
    ) -> Result<SignedPublicKeys, VauError> {
        let signed_pub_keys =
            serde_cbor::to_vec(self).map_err(|_| VauError::Internal("encode public keys"))?;

        let der_sig = {
            let mut signer = Signer::new(MessageDigest::sha256(), signer_key)
                .map_err(|_| VauError::Internal("signer"))?;
            signer
                .update(&signed_pub_keys)
                .map_err(|_| VauError::Internal("signer"))?;
            signer
                .sign_to_vec()
                .map_err(|_| VauError::Internal("sign"))?
        };
        let sig = EcdsaSig::from_der(&der_sig).map_err(|_| VauError::Internal("ecdsa sig"))?;
        let mut signature_es256 = sig
            .r()
            .to_vec_padded(32)
            .map_err(|_| VauError::Internal("ecdsa sig"))?;
        signature_es256.extend(
            sig.s()
                .to_vec_padded(32)
                .map_err(|_| VauError::Internal("ecdsa sig"))?,
        );

        Ok(SignedPublicKeys {
            signed_pub_keys,
            signature_es256,
            cert_hash: digest::hash(digest::Algorithm::Sha256, signer_der),
            cdv,
            ocsp_response: Vec::new(),
        })
    }
}
