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

//! Verification of a stapled OCSP response (RFC 6960) for the VAU certificate.
//!
//! The response is walked by hand with `asn1-rs` so that the exact DER of `tbsResponseData` is
//! available for the signature check.

use std::time::Duration;

use asn1_rs::{Any, Class, FromDer, Oid, Tag, oid};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509Ref;
use sha2::{Digest, Sha256};
use tracing::debug;
use vau::VauError;
use x509_parser::time::ASN1Time;

const OID_OCSP_BASIC: Oid<'static> = oid!(1.3.6.1.5.5.7.48.1.1);
/// CertHash single extension (Common PKI)
const OID_CERT_HASH: Oid<'static> = oid!(1.3.36.8.3.13);
const OID_ECDSA_SHA256: Oid<'static> = oid!(1.2.840.10045.4.3.2);
const OID_ECDSA_SHA384: Oid<'static> = oid!(1.2.840.10045.4.3.3);
const OID_RSA_SHA256: Oid<'static> = oid!(1.2.840.113549.1.1.11);

const MAX_CLOCK_SKEW: i64 = 5 * 60;

type Result<T> = std::result::Result<T, VauError>;

fn fail(msg: impl Into<String>) -> VauError {
    VauError::RevocationCheckFailed(msg.into())
}

/// One parsed element plus its complete DER encoding.
struct Element<'a> {
    raw: &'a [u8],
    any: Any<'a>,
}

impl<'a> Element<'a> {
    fn parse(input: &'a [u8], what: &str) -> Result<(&'a [u8], Self)> {
        let (rest, any) =
            Any::from_der(input).map_err(|e| fail(format!("malformed OCSP {what}: {e}")))?;
        let raw = &input[..input.len() - rest.len()];
        Ok((rest, Element { raw, any }))
    }

    fn is_context(&self, tag: u32) -> bool {
        self.any.header.class() == Class::ContextSpecific && self.any.header.tag() == Tag(tag)
    }

    fn expect(self, tag: Tag, what: &str) -> Result<Self> {
        if self.any.header.class() != Class::Universal || self.any.header.tag() != tag {
            return Err(fail(format!("malformed OCSP {what}: unexpected tag")));
        }
        Ok(self)
    }

    fn data(&self) -> &'a [u8] {
        self.any.data
    }

    fn oid(&self, what: &str) -> Result<Oid<'a>> {
        Oid::try_from(self.any.clone()).map_err(|e| fail(format!("malformed OCSP {what}: {e}")))
    }
}

/// Splits the content of a constructed element into its children.
fn children<'a>(data: &'a [u8], what: &str) -> Result<Vec<Element<'a>>> {
    let mut rest = data;
    let mut items = Vec::new();
    while !rest.is_empty() {
        let (next, item) = Element::parse(rest, what)?;
        items.push(item);
        rest = next;
    }
    Ok(items)
}

fn single<'a>(data: &'a [u8], what: &str) -> Result<Element<'a>> {
    let (rest, item) = Element::parse(data, what)?;
    if !rest.is_empty() {
        return Err(fail(format!("malformed OCSP {what}: trailing data")));
    }
    Ok(item)
}

fn digest_for(alg: &Oid<'_>) -> Result<MessageDigest> {
    if *alg == OID_ECDSA_SHA256 || *alg == OID_RSA_SHA256 {
        Ok(MessageDigest::sha256())
    } else if *alg == OID_ECDSA_SHA384 {
        Ok(MessageDigest::sha384())
    } else {
        Err(fail(format!("unsupported OCSP signature algorithm {alg}")))
    }
}

/// Checks that `response` is a fresh, correctly signed "good" answer for `leaf_der`.
pub fn verify_ocsp(
    response: &[u8],
    leaf_der: &[u8],
    issuer: &X509Ref,
    now: i64,
    max_age: Duration,
) -> Result<()> {
    if response.is_empty() {
        return Err(fail("missing OCSP response"));
    }

    // OCSPResponse ::= SEQUENCE { responseStatus, responseBytes [0] EXPLICIT OPTIONAL }
    let outer = single(response, "response")?.expect(Tag::Sequence, "response")?;
    let outer = children(outer.data(), "response")?;
    let status = outer
        .first()
        .ok_or_else(|| fail("malformed OCSP response: empty"))?;
    if status.any.header.tag() != Tag::Enumerated {
        return Err(fail("malformed OCSP response: status"));
    }
    if !matches!(status.data(), [0]) {
        return Err(fail(format!(
            "OCSP response status {:?} is not successful",
            status.data()
        )));
    }
    let bytes = outer
        .get(1)
        .filter(|e| e.is_context(0))
        .ok_or_else(|| fail("OCSP response without responseBytes"))?;

    // ResponseBytes ::= SEQUENCE { responseType, response OCTET STRING }
    let bytes = single(bytes.data(), "responseBytes")?.expect(Tag::Sequence, "responseBytes")?;
    let bytes = children(bytes.data(), "responseBytes")?;
    let [response_type, basic] = bytes.as_slice() else {
        return Err(fail("malformed OCSP responseBytes"));
    };
    if response_type.oid("responseType")? != OID_OCSP_BASIC {
        return Err(fail("OCSP response is not id-pkix-ocsp-basic"));
    }
    if basic.any.header.tag() != Tag::OctetString {
        return Err(fail("malformed OCSP responseBytes: response"));
    }

    // BasicOCSPResponse ::= SEQUENCE { tbsResponseData, signatureAlgorithm, signature, certs }
    let basic = single(basic.data(), "BasicOCSPResponse")?.expect(Tag::Sequence, "BasicOCSPResponse")?;
    let basic = children(basic.data(), "BasicOCSPResponse")?;
    if basic.len() < 3 {
        return Err(fail("malformed OCSP BasicOCSPResponse"));
    }
    let (tbs, algorithm, signature) = (&basic[0], &basic[1], &basic[2]);
    let algorithm = children(algorithm.data(), "signatureAlgorithm")?;
    let algorithm = algorithm
        .first()
        .ok_or_else(|| fail("malformed OCSP signatureAlgorithm"))?
        .oid("signatureAlgorithm")?;
    if signature.any.header.tag() != Tag::BitString {
        return Err(fail("malformed OCSP signature"));
    }
    let signature = match signature.data() {
        [0, sig @ ..] => sig,
        _ => return Err(fail("malformed OCSP signature: unused bits")),
    };

    verify_signature(tbs.raw, signature, &digest_for(&algorithm)?, issuer)?;

    // ResponseData ::= SEQUENCE { version [0] OPTIONAL, responderID, producedAt, responses, .. }
    let tbs = children(tbs.data(), "tbsResponseData")?;
    let mut fields = tbs.iter().skip_while(|e| e.is_context(0));
    let _responder_id = fields
        .next()
        .filter(|e| e.is_context(1) || e.is_context(2))
        .ok_or_else(|| fail("malformed OCSP tbsResponseData: responderID"))?;
    let produced_at = fields
        .next()
        .ok_or_else(|| fail("malformed OCSP tbsResponseData: producedAt"))?;
    check_freshness(produced_at, now, max_age)?;

    let responses = fields
        .next()
        .ok_or_else(|| fail("malformed OCSP tbsResponseData: responses"))?;
    let responses = children(responses.data(), "responses")?;
    let [single_response] = responses.as_slice() else {
        return Err(fail(format!(
            "expected exactly one OCSP SingleResponse, found {}",
            responses.len()
        )));
    };
    check_single_response(single_response, leaf_der)?;

    debug!("OCSP response verified");
    Ok(())
}

fn verify_signature(
    tbs: &[u8],
    signature: &[u8],
    digest: &MessageDigest,
    issuer: &X509Ref,
) -> Result<()> {
    let invalid = |e: openssl::error::ErrorStack| fail(format!("OCSP signature check: {e}"));
    let key = issuer.public_key().map_err(invalid)?;
    let mut verifier = Verifier::new(*digest, &key).map_err(invalid)?;
    verifier.update(tbs).map_err(invalid)?;
    // malformed signatures surface as errors, treat them like mismatches
    if !verifier.verify(signature).unwrap_or(false) {
        return Err(fail("OCSP signature invalid"));
    }
    Ok(())
}

fn check_freshness(produced_at: &Element<'_>, now: i64, max_age: Duration) -> Result<()> {
    let (_, produced_at) = ASN1Time::from_der(produced_at.raw)
        .map_err(|e| fail(format!("malformed OCSP producedAt: {e}")))?;
    let produced_at = produced_at.timestamp();
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(produced_at) > max_age {
        return Err(fail("OCSP response too old"));
    }
    if produced_at.saturating_sub(now) > MAX_CLOCK_SKEW {
        return Err(fail("OCSP response produced in the future"));
    }
    Ok(())
}

// SingleResponse ::= SEQUENCE { certID, certStatus, thisUpdate, nextUpdate [0], singleExtensions [1] }
fn check_single_response(single_response: &Element<'_>, leaf_der: &[u8]) -> Result<()> {
    let fields = children(single_response.data(), "SingleResponse")?;
    let status = fields
        .get(1)
        .ok_or_else(|| fail("malformed OCSP SingleResponse"))?;
    if status.is_context(1) {
        return Err(fail("certificate revoked"));
    }
    if status.is_context(2) {
        return Err(fail("certificate status unknown"));
    }
    if !status.is_context(0) {
        return Err(fail("malformed OCSP certStatus"));
    }

    let extensions = fields
        .iter()
        .skip(3)
        .find(|e| e.is_context(1))
        .ok_or_else(|| fail("OCSP response lacks certHash extension"))?;
    let extensions = single(extensions.data(), "singleExtensions")?;
    let cert_hash = children(extensions.data(), "singleExtensions")?
        .into_iter()
        .map(|ext| children(ext.data(), "extension"))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .find_map(|ext| match ext.as_slice() {
            [id, .., value] if id.oid("extnID").ok()? == OID_CERT_HASH => Some(value.data()),
            _ => None,
        })
        .ok_or_else(|| fail("OCSP response lacks certHash extension"))?;

    // CertHash ::= SEQUENCE { hashAlgorithm AlgorithmIdentifier, certificateHash OCTET STRING }
    let cert_hash = single(cert_hash, "certHash")?;
    let cert_hash = children(cert_hash.data(), "certHash")?;
    let hash = cert_hash
        .get(1)
        .filter(|e| e.any.header.tag() == Tag::OctetString)
        .ok_or_else(|| fail("malformed OCSP certHash"))?;
    if hash.data() != Sha256::digest(leaf_der).as_slice() {
        return Err(fail("OCSP certHash does not match certificate"));
    }
    Ok(())
}
