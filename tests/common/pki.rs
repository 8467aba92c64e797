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

//! Throw-away PKI for the trust tests: root CA, issuing CA, VAU leaf and OCSP responses.

use anyhow::Result;
use asn1_rs::Oid;
use openssl::asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509, X509Builder, X509Extension, X509NameBuilder};
use sha2::{Digest, Sha256};

pub const OID_EPA_VAU: &[u64] = &[1, 2, 276, 0, 76, 4, 209];
pub const OID_OTHER_ROLE: &[u64] = &[1, 2, 276, 0, 76, 4, 50];

pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub struct Pki {
    pub root: Issued,
    pub ca: Issued,
    pub leaf: Issued,
}

fn ec_key(nid: Nid) -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(nid)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

fn issue(
    cn: &str,
    serial: u32,
    key: &PKey<Private>,
    issuer: Option<&Issued>,
    ca: bool,
    extra: Vec<X509Extension>,
) -> Result<X509> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", cn)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*Asn1Integer::from_bn(&*BigNum::from_u32(serial)?)?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(issuer.map_or(&*name, |i| i.cert.subject_name()))?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(30)?)?;
    if ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
    } else {
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
    }
    for ext in extra {
        builder.append_extension(ext)?;
    }
    let signing_key = issuer.map_or(key, |i| &i.key);
    builder.sign(signing_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Minimal DER TLV encoder.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend(content);
    out
}

fn seq(parts: &[&[u8]]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

fn oid(arcs: &[u64]) -> Vec<u8> {
    let oid = Oid::from(arcs).expect("valid oid");
    tlv(0x06, oid.as_bytes())
}

/// DER of an AdmissionSyntax naming exactly one profession OID.
pub fn admission(profession: &[u64]) -> Vec<u8> {
    let items = seq(&[&tlv(0x0c, b"VAU")]);
    let oids = seq(&[&oid(profession)]);
    let profession_info = seq(&[&items, &oids]);
    let admissions = seq(&[&seq(&[&profession_info])]);
    seq(&[&seq(&[&admissions])])
}

fn admission_extension(profession: &[u64]) -> Result<X509Extension> {
    let object = Asn1Object::from_str("1.3.36.8.3.3")?;
    let value = Asn1OctetString::new_from_bytes(&admission(profession))?;
    Ok(X509Extension::new_from_der(&object, false, &value)?)
}

impl Pki {
    /// Root and issuing CA on P-256, leaf with the given profession OID on `leaf_curve`.
    pub fn with_leaf(profession: &[u64], leaf_curve: Nid) -> Result<Self> {
        let root_key = ec_key(Nid::X9_62_PRIME256V1)?;
        let root = Issued {
            cert: issue("VAU Test Root", 1, &root_key, None, true, vec![])?,
            key: root_key,
        };
        let ca_key = ec_key(Nid::X9_62_PRIME256V1)?;
        let ca = Issued {
            cert: issue("VAU Test Issuing CA", 2, &ca_key, Some(&root), true, vec![])?,
            key: ca_key,
        };
        let leaf_key = ec_key(leaf_curve)?;
        let leaf = Issued {
            cert: issue(
                "VAU Test Server",
                3,
                &leaf_key,
                Some(&ca),
                false,
                vec![admission_extension(profession)?],
            )?,
            key: leaf_key,
        };
        Ok(Self { root, ca, leaf })
    }

    pub fn new() -> Result<Self> {
        Self::with_leaf(OID_EPA_VAU, Nid::X9_62_PRIME256V1)
    }

    pub fn root_pem(&self) -> Result<Vec<u8>> {
        Ok(self.root.cert.to_pem()?)
    }

    pub fn leaf_der(&self) -> Result<Vec<u8>> {
        Ok(self.leaf.cert.to_der()?)
    }

    pub fn ocsp(&self, status: CertStatus, produced_at: i64) -> Result<Vec<u8>> {
        let hash = Sha256::digest(self.leaf_der()?);
        self.ocsp_for_hash(status, produced_at, &hash)
    }

    /// A basic OCSP response signed by the issuing CA carrying `cert_hash` in its CertHash
    /// extension.
    pub fn ocsp_for_hash(
        &self,
        status: CertStatus,
        produced_at: i64,
        cert_hash: &[u8],
    ) -> Result<Vec<u8>> {
        let time = tlv(0x18, generalized_time(produced_at).as_bytes());
        let sha1 = seq(&[&oid(&[1, 3, 14, 3, 2, 26]), &[0x05, 0x00]]);
        let cert_id = seq(&[
            &sha1,
            &tlv(0x04, &[0x11; 20]),
            &tlv(0x04, &[0x22; 20]),
            &[0x02, 0x01, 0x03],
        ]);
        let cert_status = match status {
            CertStatus::Good => vec![0x80, 0x00],
            CertStatus::Revoked => tlv(0xa1, &time),
            CertStatus::Unknown => vec![0x82, 0x00],
        };
        let cert_hash = seq(&[
            &seq(&[&oid(&[2, 16, 840, 1, 101, 3, 4, 2, 1])]),
            &tlv(0x04, cert_hash),
        ]);
        let extension = seq(&[&oid(&[1, 3, 36, 8, 3, 13]), &tlv(0x04, &cert_hash)]);
        let single_extensions = tlv(0xa1, &seq(&[&extension]));
        let single = seq(&[&cert_id, &cert_status, &time, &single_extensions]);

        let responder_id = tlv(0xa2, &tlv(0x04, &[0x33; 20]));
        let tbs = seq(&[&responder_id, &time, &seq(&[&single])]);

        let mut signer = Signer::new(MessageDigest::sha256(), &self.ca.key)?;
        signer.update(&tbs)?;
        let signature = [&[0u8][..], signer.sign_to_vec()?.as_slice()].concat();

        let algorithm = seq(&[&oid(&[1, 2, 840, 10045, 4, 3, 2])]);
        let basic = seq(&[&tbs, &algorithm, &tlv(0x03, &signature)]);
        let response_bytes = seq(&[&oid(&[1, 3, 6, 1, 5, 5, 7, 48, 1, 1]), &tlv(0x04, &basic)]);
        Ok(seq(&[&[0x0a, 0x01, 0x00], &tlv(0xa0, &response_bytes)]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

/// `YYYYMMDDHHMMSSZ` for a unix timestamp.
pub fn generalized_time(unix: i64) -> String {
    let days = unix.div_euclid(86_400);
    let secs = unix.rem_euclid(86_400);
    // days since 1970-01-01 to civil date
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!(
        "{year:04}{month:02}{day:02}{:02}{:02}{:02}Z",
        secs / 3600,
        secs % 3600 / 60,
        secs % 60
    )
}

#[test]
fn it_formats_generalized_time() {
    assert_eq!(generalized_time(0), "19700101000000Z");
    assert_eq!(generalized_time(951_782_400), "20000229000000Z");
    assert_eq!(generalized_time(1_735_689_599), "20241231235959Z");
}
