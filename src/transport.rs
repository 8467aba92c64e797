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

use std::future::Future;

use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::uri::{Authority, Scheme};
use http::{Request, Response, Uri};
use reqwest::ClientBuilder;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::conf::Config;
use crate::error::Error;

pub const X_USERAGENT: HeaderName = HeaderName::from_static("x-useragent");

/// The untrusted channel that carries handshake messages and ciphertext frames.
pub trait OuterTransport: Send + Sync {
    fn send(
        &self,
        request: Request<Vec<u8>>,
    ) -> impl Future<Output = Result<Response<Vec<u8>>, Error>> + Send;
}

/// Fails with [`Error::Status`] unless the response is a 200.
pub fn expect_ok(
    method: &str,
    uri: &Uri,
    response: Response<Vec<u8>>,
) -> Result<Response<Vec<u8>>, Error> {
    if response.status() != http::StatusCode::OK {
        return Err(Error::Status {
            method: method.to_string(),
            uri: uri.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

/// Outer transport on top of a pooled `reqwest` client. Decorates every request with the
/// configured user agent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: HeaderValue,
    downgrade_https: bool,
}

impl HttpTransport {
    pub fn new(conf: &Config) -> Result<Self, Error> {
        let user_agent = conf
            .user_agent
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no user agent configured"))?;
        if conf.http_client_accept_invalid_certs {
            warn!("http_client_accept_invalid_certs = on, will accept *any* cert!");
        }
        let client = ClientBuilder::new()
            .redirect(Policy::none())
            .pool_idle_timeout(conf.http_client_idle_timeout)
            .pool_max_idle_per_host(conf.http_client_max_idle_per_host)
            .tcp_keepalive(conf.http_client_tcp_keepalive)
            .connect_timeout(conf.http_client_connect_timeout)
            .timeout(conf.http_client_timeout)
            .use_rustls_tls()
            .danger_accept_invalid_certs(conf.http_client_accept_invalid_certs)
            .build()?;
        Self::with_client(client, user_agent, conf.downgrade_https)
    }

    pub fn with_client(
        client: reqwest::Client,
        user_agent: &str,
        downgrade_https: bool,
    ) -> Result<Self, Error> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| anyhow::anyhow!("invalid user agent: {e}"))?;
        Ok(Self {
            client,
            user_agent,
            downgrade_https,
        })
    }

    fn decorate(&self, request: &mut Request<Vec<u8>>) -> Result<(), Error> {
        // HeaderMap::insert replaces every value under the (case-insensitive) name
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(X_USERAGENT, self.user_agent.clone());
        if self.downgrade_https {
            *request.uri_mut() = downgrade(request.uri())?;
        }
        Ok(())
    }
}

/// Rewrites `https://host[:443]/…` to `http://host/…` for egress proxies that terminate TLS.
pub fn downgrade(uri: &Uri) -> Result<Uri, Error> {
    if uri.scheme() != Some(&Scheme::HTTPS) {
        return Ok(uri.clone());
    }
    let authority = uri
        .authority()
        .ok_or_else(|| Error::Transport(format!("no authority in {uri}")))?;
    if authority.port_u16().is_some_and(|port| port != 443) {
        return Err(Error::Transport(format!(
            "cannot downgrade {uri}: only port 443 is supported"
        )));
    }
    let authority: Authority = authority
        .host()
        .parse()
        .map_err(|e| Error::Transport(format!("{e}")))?;
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(authority);
    Uri::from_parts(parts).map_err(|e| Error::Transport(format!("{e}")))
}

impl OuterTransport for HttpTransport {
    async fn send(&self, mut request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, Error> {
        self.decorate(&mut request)?;
        let method = request.method().clone();
        let uri = request.uri().clone();

        let request = reqwest::Request::try_from(request)?;
        let response = self.client.execute(request).await?;
        debug!(%method, %uri, status = response.status().as_u16(), "outer request");

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(response.headers().clone());
        }
        let body = response.bytes().await?.to_vec();
        builder
            .body(body)
            .map_err(|e| Error::Transport(format!("{e}")))
    }
}
