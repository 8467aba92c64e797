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

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rstest::fixture;
use serde_bytes::ByteBuf;
use tracing_subscriber::EnvFilter;
use vau::keys::generate_keypair;
use vau::server::Config;
use vau::{CryptoProvider, Environment, SignedPublicKeys, VauPublicKeys, utc_now};
use vau_httpclient::trust::CertData;
use vau_httpclient::{ConnectionManager, HttpTransport, TrustPolicy, TrustStore};

use crate::common::pki_support::{CertStatus, Pki};
use crate::common::server::{CertDataWire, RunningServer, VauServer};

#[path = "pki.rs"]
pub mod pki_support;
pub mod server;

pub const OCSP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const USER_AGENT: &str = "vau-it/1.0";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn now() -> i64 {
    i64::try_from(utc_now()).expect("time")
}

#[fixture]
pub fn pki() -> Pki {
    init_tracing();
    Pki::new().expect("pki")
}

/// Responder keys signed with the leaf key, with `ocsp` stapled.
pub fn signed_keys(
    pki: &Pki,
    provider: &Arc<CryptoProvider>,
    valid_for: u64,
    ocsp: Vec<u8>,
) -> Result<(vau::keys::HybridKeyPair, SignedPublicKeys)> {
    let keys = generate_keypair(provider)?;
    let mut signed = VauPublicKeys::new(&keys.pk, utc_now() - 10, valid_for, "it")
        .sign(&pki.leaf_der()?, &pki.leaf.key, 1)?;
    signed.ocsp_response = ocsp;
    Ok((keys, signed))
}

pub fn cert_data(pki: &Pki) -> Result<CertData> {
    Ok(CertData {
        cert: ByteBuf::from(pki.leaf_der()?),
        ca: ByteBuf::from(pki.ca.cert.to_der()?),
        rca_chain: vec![],
    })
}

pub async fn start_server(pki: &Pki, status: CertStatus, valid_for: u64) -> Result<RunningServer> {
    let provider = Arc::new(CryptoProvider::new());
    let ocsp = pki.ocsp(status, now())?;
    let (keys, signed) = signed_keys(pki, &provider, valid_for, Vec::new())?;
    let conf = Config::new(Environment::Testing, signed, keys, provider);
    let cert_data = CertDataWire {
        cert: ByteBuf::from(pki.leaf_der()?),
        ca: ByteBuf::from(pki.ca.cert.to_der()?),
        rca_chain: vec![],
    };
    VauServer::new(conf, ocsp, &cert_data)?.start().await
}

pub fn transport() -> Result<HttpTransport> {
    Ok(HttpTransport::with_client(
        reqwest::Client::new(),
        USER_AGENT,
        false,
    )?)
}

pub fn manager(policy: TrustPolicy) -> Result<ConnectionManager<HttpTransport>> {
    Ok(ConnectionManager::builder()
        .transport(transport()?)
        .user_agent(USER_AGENT)
        .trust_policy(policy)
        .provider(Arc::new(CryptoProvider::new()))
        .environment(Environment::Testing)
        .build()?)
}

pub fn verifying(pki: &Pki) -> Result<TrustPolicy> {
    Ok(TrustPolicy::Verify(TrustStore::from_pem(
        &pki.root_pem()?,
        OCSP_MAX_AGE,
    )?))
}
