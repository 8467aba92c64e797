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

use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName};
use http::uri::PathAndQuery;
use http::{Method, Request, Response, Uri};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use vau::{CryptoProvider, Environment, Idle, Session, VauError};

use crate::codec::{self, TunnelRequest, TunnelResponse};
use crate::error::Error;
use crate::transport::{OuterTransport, expect_ok};
use crate::trust::{EndpointValidator, TrustPolicy};

pub const VAU_CID: HeaderName = HeaderName::from_static("vau-cid");
pub const HANDSHAKE_PATH: &str = "/VAU";
pub const CONTENT_TYPE_CBOR: &str = "application/cbor";
pub const CONTENT_TYPE_FRAME: &str = "application/octet-stream";
const MAX_CID_LEN: usize = 200;

/// An established VAU channel to one endpoint.
///
/// Frames are exchanged strictly one at a time: the session lock is held from encryption of the
/// request until the response has been decrypted.
#[derive(Debug)]
pub struct Connection {
    endpoint: Uri,
    cid: String,
    uri: Uri,
    user_agent: String,
    session: Mutex<Session>,
}

/// `path` on the host of `endpoint`. Protocol paths never nest under the endpoint's own path.
pub fn resolve(endpoint: &Uri, path: &str) -> Result<Uri, Error> {
    let path: PathAndQuery = path
        .parse()
        .map_err(|e| Error::Transport(format!("invalid path {path}: {e}")))?;
    let mut parts = endpoint.clone().into_parts();
    parts.path_and_query = Some(path);
    Uri::from_parts(parts).map_err(|e| Error::Transport(format!("invalid uri for {endpoint}: {e}")))
}

/// The host root of `endpoint`, the identity a channel is bound to.
pub fn destination(endpoint: &str) -> Result<Uri, Error> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| Error::Transport(format!("invalid endpoint {endpoint}: {e}")))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(Error::Transport(format!(
            "invalid endpoint {endpoint}: scheme and host required"
        )));
    }
    resolve(&uri, "/")
}

/// Reads and checks the channel identifier assigned with Message 2.
pub fn channel_id(headers: &HeaderMap) -> Result<String, VauError> {
    let cid = headers
        .get(VAU_CID)
        .ok_or_else(|| VauError::malformed(2, "missing VAU-CID in handshake"))?;
    let cid = cid
        .to_str()
        .map_err(|_| VauError::malformed(2, "invalid VAU-CID in handshake"))?;
    let valid = cid.len() <= MAX_CID_LEN
        && cid.len() > 1
        && cid.starts_with('/')
        && cid
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'/');
    if !valid {
        return Err(VauError::malformed(2, "invalid VAU-CID in handshake"));
    }
    Ok(cid.to_string())
}

async fn post<T: OuterTransport>(
    transport: &T,
    uri: &Uri,
    content_type: &str,
    accept: &str,
    body: Vec<u8>,
) -> Result<Response<Vec<u8>>, Error> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri.clone())
        .header(CONTENT_TYPE, content_type)
        .header(ACCEPT, accept)
        .body(body)
        .map_err(|e| Error::Transport(format!("{e}")))?;
    let response = transport.send(request).await?;
    expect_ok("POST", uri, response)
}

impl Connection {
    /// Runs the four-message handshake against the host of `endpoint` and returns the open
    /// channel. Tunnelled requests are sent with `user_agent`.
    pub async fn establish<T: OuterTransport>(
        transport: &T,
        policy: &TrustPolicy,
        provider: Arc<CryptoProvider>,
        env: Environment,
        endpoint: &str,
        user_agent: &str,
    ) -> Result<Self, Error> {
        let endpoint = destination(endpoint)?;

        let (state, msg1) = Idle::new(provider, env)?.start()?;
        let uri = resolve(&endpoint, HANDSHAKE_PATH)?;
        let response = post(transport, &uri, CONTENT_TYPE_CBOR, CONTENT_TYPE_CBOR, msg1).await?;
        let cid = channel_id(response.headers())?;
        debug!(%endpoint, %cid, "received message 2");

        let validator = EndpointValidator {
            policy,
            transport,
            endpoint: &endpoint,
        };
        let (state, msg3) = state.receive_message2(response.body(), &validator).await?;

        let uri = resolve(&endpoint, &cid)?;
        let response = post(transport, &uri, CONTENT_TYPE_CBOR, CONTENT_TYPE_CBOR, msg3).await?;
        let session = state.receive_message4(response.body())?;
        debug!(%endpoint, %cid, "VAU channel established");

        Ok(Self {
            endpoint,
            cid,
            uri,
            user_agent: user_agent.to_string(),
            session: Mutex::new(session),
        })
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Where frames for this channel are posted.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// Sends one request through the channel.
    pub async fn call<T: OuterTransport>(
        &self,
        transport: &T,
        request: &TunnelRequest,
    ) -> Result<TunnelResponse, Error> {
        let plain = codec::encode_request(&request.with_user_agent(&self.user_agent))?;

        let mut session = self.session.lock().await;
        let frame = session.encrypt(&plain)?;
        let counter = frame.counter;
        let response = post(
            transport,
            &self.uri,
            CONTENT_TYPE_FRAME,
            "*/*",
            frame.to_bytes(),
        )
        .await?;
        let plain = session.decrypt(response.body())?;
        drop(session);

        trace!(cid = %self.cid, counter, len = plain.len(), "tunnel exchange");
        codec::decode_response(&plain)
    }
}
