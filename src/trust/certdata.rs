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

use http::uri::PathAndQuery;
use http::{Method, Request, Uri};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use vau::VauError;

use crate::transport::{OuterTransport, expect_ok};

/// Certificate material published by a VAU endpoint for one signed key set.
#[derive(Debug, Clone, Deserialize)]
pub struct CertData {
    pub cert: ByteBuf,
    pub ca: ByteBuf,
    #[serde(default)]
    pub rca_chain: Vec<ByteBuf>,
}

pub fn cert_data_path(cert_hash: &[u8], cdv: u64) -> String {
    format!("/CertData.{}-{cdv}", hex::encode(cert_hash))
}

/// The CertData location for `endpoint`, always resolved from the host root.
pub fn cert_data_uri(endpoint: &Uri, cert_hash: &[u8], cdv: u64) -> Result<Uri, VauError> {
    let path: PathAndQuery = cert_data_path(cert_hash, cdv)
        .parse()
        .map_err(|e| VauError::CertificateUnavailable(format!("{e}")))?;
    let mut parts = endpoint.clone().into_parts();
    parts.path_and_query = Some(path);
    Uri::from_parts(parts).map_err(|e| VauError::CertificateUnavailable(format!("{e}")))
}

pub async fn fetch<T: OuterTransport>(
    transport: &T,
    endpoint: &Uri,
    cert_hash: &[u8],
    cdv: u64,
) -> Result<CertData, VauError> {
    let uri = cert_data_uri(endpoint, cert_hash, cdv)?;
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri.clone())
        .header(http::header::ACCEPT, "application/cbor")
        .body(Vec::new())
        .map_err(|e| VauError::CertificateUnavailable(format!("{e}")))?;
    let response = transport
        .send(request)
        .await
        .and_then(|response| expect_ok("GET", &uri, response))
        .map_err(|e| VauError::CertificateUnavailable(e.to_string()))?;
    serde_cbor::from_slice(response.body())
        .map_err(|e| VauError::CertificateUnavailable(format!("decode {uri}: {e}")))
}
