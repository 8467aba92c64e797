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

use std::sync::Arc;

use anyhow::Result;
use openssl::nid::Nid;
use rstest::rstest;
use sha2::{Digest, Sha256};
use vau::{CryptoProvider, VauError};
use vau_httpclient::TrustStore;

use crate::common::pki_support::{CertStatus, OID_EPA_VAU, OID_OTHER_ROLE, Pki};
use crate::common::{OCSP_MAX_AGE, cert_data, now, pki, signed_keys};

mod common;

fn store(pki: &Pki) -> Result<TrustStore> {
    TrustStore::from_pem(&pki.root_pem()?, OCSP_MAX_AGE)
}

fn verify(pki: &Pki, anchor: &Pki, ocsp: Vec<u8>) -> Result<Result<vau::VauPublicKeys, VauError>> {
    let provider = Arc::new(CryptoProvider::with_seed(7));
    let (keys, signed) = signed_keys(pki, &provider, 3600, ocsp)?;
    let result = store(anchor)?.verify(&signed, &cert_data(pki)?, now());
    if let Ok(decoded) = &result {
        assert_eq!(decoded.ecdh_pk, keys.pk.ecdh_key());
    }
    Ok(result)
}

#[rstest]
#[case::p256(Nid::X9_62_PRIME256V1)]
#[case::brainpool(Nid::BRAINPOOL_P256R1)]
fn it_trusts_a_complete_chain(#[case] curve: Nid) -> Result<()> {
    let pki = Pki::with_leaf(OID_EPA_VAU, curve)?;
    let ocsp = pki.ocsp(CertStatus::Good, now())?;
    verify(&pki, &pki, ocsp)??;
    Ok(())
}

#[rstest]
fn it_rejects_a_foreign_root(pki: Pki) -> Result<()> {
    let other = Pki::new()?;
    let ocsp = pki.ocsp(CertStatus::Good, now())?;
    let err = verify(&pki, &other, ocsp)?.unwrap_err();
    assert!(matches!(err, VauError::UntrustedChain(_)), "{err}");
    Ok(())
}

#[rstest]
#[case::too_old(CertStatus::Good, -25 * 60 * 60, "OCSP response too old")]
#[case::future(CertStatus::Good, 60 * 60, "OCSP response produced in the future")]
#[case::revoked(CertStatus::Revoked, 0, "certificate revoked")]
#[case::unknown(CertStatus::Unknown, 0, "certificate status unknown")]
fn it_checks_ocsp(
    pki: Pki,
    #[case] status: CertStatus,
    #[case] age: i64,
    #[case] reason: &str,
) -> Result<()> {
    let ocsp = pki.ocsp(status, now() + age)?;
    let err = verify(&pki, &pki, ocsp)?.unwrap_err();
    assert_eq!(err, VauError::RevocationCheckFailed(reason.to_string()));
    Ok(())
}

#[rstest]
fn it_binds_ocsp_to_the_certificate(pki: Pki) -> Result<()> {
    let ocsp = pki.ocsp_for_hash(CertStatus::Good, now(), &[0u8; 32])?;
    let err = verify(&pki, &pki, ocsp)?.unwrap_err();
    assert_eq!(
        err,
        VauError::RevocationCheckFailed(String::from("OCSP certHash does not match certificate"))
    );

    let err = verify(&pki, &pki, Vec::new())?.unwrap_err();
    assert_eq!(
        err,
        VauError::RevocationCheckFailed(String::from("missing OCSP response"))
    );
    Ok(())
}

#[rstest]
fn it_rejects_ocsp_from_another_issuer(pki: Pki) -> Result<()> {
    let other = Pki::new()?;
    let ocsp = other.ocsp_for_hash(
        CertStatus::Good,
        now(),
        &Sha256::digest(pki.leaf_der()?),
    )?;
    let err = verify(&pki, &pki, ocsp)?.unwrap_err();
    assert_eq!(
        err,
        VauError::RevocationCheckFailed(String::from("OCSP signature invalid"))
    );
    Ok(())
}

#[test]
fn it_requires_the_vau_role() -> Result<()> {
    let pki = Pki::with_leaf(OID_OTHER_ROLE, Nid::X9_62_PRIME256V1)?;
    let ocsp = pki.ocsp(CertStatus::Good, now())?;
    let err = verify(&pki, &pki, ocsp)?.unwrap_err();
    assert!(matches!(err, VauError::RoleMismatch(_)), "{err}");
    assert!(err.to_string().contains("1.2.276.0.76.4.50"));
    Ok(())
}

#[rstest]
fn it_checks_the_key_signature(pki: Pki) -> Result<()> {
    let provider = Arc::new(CryptoProvider::with_seed(8));
    let (_, mut signed) = signed_keys(&pki, &provider, 3600, pki.ocsp(CertStatus::Good, now())?)?;
    let last = signed.signed_pub_keys.len() - 1;
    signed.signed_pub_keys[last] ^= 1;
    let err = store(&pki)?
        .verify(&signed, &cert_data(&pki)?, now())
        .unwrap_err();
    assert!(matches!(err, VauError::SignatureInvalid(_)), "{err}");
    Ok(())
}

#[rstest]
fn it_binds_keys_to_the_certificate(pki: Pki) -> Result<()> {
    let provider = Arc::new(CryptoProvider::with_seed(9));
    let (_, mut signed) = signed_keys(&pki, &provider, 3600, pki.ocsp(CertStatus::Good, now())?)?;
    signed.cert_hash = vec![0u8; 32];
    let err = store(&pki)?
        .verify(&signed, &cert_data(&pki)?, now())
        .unwrap_err();
    assert!(matches!(err, VauError::UntrustedChain(_)), "{err}");
    Ok(())
}
