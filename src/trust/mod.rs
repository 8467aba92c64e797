/*-
 * #%L
 * vau_httpclient
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

//! Decides whether the responder's signed key material can be trusted.
//!
//! [`TrustStore::verify`] runs the certificate checks in a fixed order and stops at the first
//! failure: certificate hash binding, PKIX path to a configured root, OCSP, admission role and the
//! ECDSA signature over the key payload. Only then are the public keys decoded.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use asn1_rs::{Oid, oid};
use http::Uri;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Public};
use openssl::sign::Verifier;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509, X509Ref, X509StoreContext};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use vau::{SignedPublicKeys, TrustValidator, VauError, VauPublicKeys};

use crate::conf::Config;
use crate::transport::OuterTransport;

pub mod asn1;
pub mod certdata;
pub mod ocsp;

pub use certdata::CertData;

/// Profession OID a VAU certificate has to carry (oid_epa_vau).
pub const OID_EPA_VAU: Oid<'static> = oid!(1.2.276.0.76.4.209);

const SIGNATURE_COMPONENT_SIZE: usize = 32;

/// Root certificates plus the OCSP freshness policy.
pub struct TrustStore {
    store: X509Store,
    ocsp_max_age: Duration,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("ocsp_max_age", &self.ocsp_max_age)
            .finish_non_exhaustive()
    }
}

impl TrustStore {
    pub fn from_certs(roots: Vec<X509>, ocsp_max_age: Duration) -> anyhow::Result<Self> {
        if roots.is_empty() {
            bail!("no trust anchors given");
        }
        let mut builder = X509StoreBuilder::new()?;
        for root in roots {
            builder.add_cert(root)?;
        }
        Ok(Self {
            store: builder.build(),
            ocsp_max_age,
        })
    }

    pub fn from_pem(pem: &[u8], ocsp_max_age: Duration) -> anyhow::Result<Self> {
        let roots = X509::stack_from_pem(pem).context("parse trust anchors")?;
        Self::from_certs(roots, ocsp_max_age)
    }

    pub fn from_file(path: &Path, ocsp_max_age: Duration) -> anyhow::Result<Self> {
        let pem = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_pem(&pem, ocsp_max_age)
    }

    /// Validates `keys` against the fetched certificate data. `now` is in seconds since the epoch.
    pub fn verify(
        &self,
        keys: &SignedPublicKeys,
        data: &CertData,
        now: i64,
    ) -> Result<VauPublicKeys, VauError> {
        if Sha256::digest(&data.cert).as_slice() != keys.cert_hash.as_slice() {
            return Err(VauError::UntrustedChain(String::from(
                "certificate hash does not match CertData",
            )));
        }
        let untrusted = |what: &str| {
            let what = what.to_string();
            move |e: openssl::error::ErrorStack| VauError::UntrustedChain(format!("{what}: {e}"))
        };
        let leaf = X509::from_der(&data.cert).map_err(untrusted("parse certificate"))?;
        let ca = X509::from_der(&data.ca).map_err(untrusted("parse issuing CA"))?;
        let rca_chain = data
            .rca_chain
            .iter()
            .map(|der| X509::from_der(der))
            .collect::<Result<Vec<_>, _>>()
            .map_err(untrusted("parse root chain"))?;

        let mut intermediates = rca_chain.clone();
        intermediates.insert(0, ca.clone());
        self.verify_path(&leaf, intermediates, "certificate")?;
        self.verify_path(&ca, rca_chain, "issuing CA")?;
        debug!(cdv = keys.cdv, "certificate path verified");

        ocsp::verify_ocsp(
            &keys.ocsp_response,
            &data.cert,
            &ca,
            now,
            self.ocsp_max_age,
        )?;

        asn1::check_admission(&data.cert, &OID_EPA_VAU)
            .map_err(|e| VauError::RoleMismatch(format!("{e:#}")))?;

        let key = leaf
            .public_key()
            .map_err(|e| VauError::SignatureInvalid(format!("certificate key: {e}")))?;
        verify_signature(&key, &keys.signed_pub_keys, &keys.signature_es256)?;
        debug!(cdv = keys.cdv, "responder keys verified");

        keys.decode_public_keys()
    }

    fn verify_path(&self, cert: &X509Ref, chain: Vec<X509>, what: &str) -> Result<(), VauError> {
        let untrusted = |e: openssl::error::ErrorStack| VauError::UntrustedChain(format!("{what}: {e}"));
        let mut stack = Stack::new().map_err(untrusted)?;
        for cert in chain {
            stack.push(cert).map_err(untrusted)?;
        }
        let mut context = X509StoreContext::new().map_err(untrusted)?;
        let (valid, reason) = context
            .init(&self.store, cert, &stack, |c| {
                let valid = c.verify_cert()?;
                Ok((valid, c.error().error_string()))
            })
            .map_err(untrusted)?;
        if !valid {
            return Err(VauError::UntrustedChain(format!("{what}: {reason}")));
        }
        Ok(())
    }
}

/// Checks a JWS-style ES256 signature (`r‖s`, 32 bytes each) over `payload`.
pub fn verify_signature(
    key: &PKeyRef<Public>,
    payload: &[u8],
    raw: &[u8],
) -> Result<(), VauError> {
    let invalid = |e: openssl::error::ErrorStack| VauError::SignatureInvalid(format!("{e}"));
    if raw.len() != 2 * SIGNATURE_COMPONENT_SIZE {
        return Err(VauError::SignatureInvalid(format!(
            "expected {} signature bytes, found {}",
            2 * SIGNATURE_COMPONENT_SIZE,
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(SIGNATURE_COMPONENT_SIZE);
    let signature = EcdsaSig::from_private_components(
        BigNum::from_slice(r).map_err(invalid)?,
        BigNum::from_slice(s).map_err(invalid)?,
    )
    .and_then(|sig| sig.to_der())
    .map_err(invalid)?;

    let mut verifier = Verifier::new(MessageDigest::sha256(), key).map_err(invalid)?;
    verifier.update(payload).map_err(invalid)?;
    if !verifier.verify(&signature).unwrap_or(false) {
        return Err(VauError::SignatureInvalid(String::from(
            "signature over signed_pub_keys does not verify",
        )));
    }
    Ok(())
}

/// How responder certificates are judged.
#[derive(Debug)]
pub enum TrustPolicy {
    Verify(TrustStore),
    /// Accepts any key material. Development only.
    Insecure,
}

impl TrustPolicy {
    pub fn from_config(conf: &Config) -> anyhow::Result<Self> {
        match (&conf.trust_anchors, conf.insecure_trust) {
            (_, true) => {
                warn!("insecure trust = on, responder certificates are NOT checked!");
                Ok(TrustPolicy::Insecure)
            }
            (Some(path), false) => Ok(TrustPolicy::Verify(TrustStore::from_file(
                path,
                conf.ocsp_max_age,
            )?)),
            (None, false) => Err(anyhow!("no trust anchors configured")),
        }
    }
}

/// Validator for one handshake: fetches the CertData from `endpoint` and applies `policy`.
pub struct EndpointValidator<'a, T> {
    pub policy: &'a TrustPolicy,
    pub transport: &'a T,
    pub endpoint: &'a Uri,
}

impl<T: OuterTransport> TrustValidator for EndpointValidator<'_, T> {
    async fn validate(&self, keys: &SignedPublicKeys) -> Result<VauPublicKeys, VauError> {
        let store = match self.policy {
            TrustPolicy::Verify(store) => store,
            TrustPolicy::Insecure => {
                warn!(endpoint = %self.endpoint, "skipping trust validation");
                return keys.decode_public_keys();
            }
        };
        let data = certdata::fetch(self.transport, self.endpoint, &keys.cert_hash, keys.cdv)
            .await
            .inspect_err(|e| warn!(endpoint = %self.endpoint, "{e}"))?;
        let now = i64::try_from(vau::utc_now()).unwrap_or(i64::MAX);
        store
            .verify(keys, &data, now)
            .inspect_err(|e| warn!(endpoint = %self.endpoint, "trust check failed: {e}"))
    }
}
