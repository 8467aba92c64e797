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

//! In-process VAU endpoint: the libvau responder behind a hyper http1 server.
//!
//! Decrypted requests are answered by an echo handler that reflects method, path and body.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::header::CONTENT_TYPE;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_bytes::ByteBuf;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vau::VauError;
use vau::cache::{CID_PREFIX, MemorySessionCache, SessionCache};
use vau::server::{Config, finish_handshake, initiate_handshake};
use vau_httpclient::codec::{self, TunnelResponse};
use vau_httpclient::trust::certdata::cert_data_path;

#[derive(Serialize)]
pub struct CertDataWire {
    pub cert: ByteBuf,
    pub ca: ByteBuf,
    pub rca_chain: Vec<ByteBuf>,
}

/// Observed traffic, for assertions on what the client actually sent.
#[derive(Debug, Default)]
pub struct Counters {
    pub m1: AtomicUsize,
    pub m3: AtomicUsize,
    pub frames: AtomicUsize,
    pub cert_data: AtomicUsize,
}

impl Counters {
    pub fn m1(&self) -> usize {
        self.m1.load(Ordering::SeqCst)
    }

    pub fn m3(&self) -> usize {
        self.m3.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

pub struct VauServer {
    pub conf: Config,
    pub ocsp_response: Vec<u8>,
    pub cert_data: Vec<u8>,
    pub cache: MemorySessionCache,
    pub counters: Counters,
    /// Answers every frame as if the channel id were unknown, like a restarted responder.
    pub forget_sessions: AtomicBool,
    /// Number of upcoming handshakes answered with a delayed 500.
    pub fail_handshakes: AtomicUsize,
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub state: Arc<VauServer>,
    task: JoinHandle<()>,
}

impl RunningServer {
    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl VauServer {
    pub fn new(conf: Config, ocsp_response: Vec<u8>, cert_data: &CertDataWire) -> Result<Self> {
        Ok(Self {
            conf,
            ocsp_response,
            cert_data: serde_cbor::to_vec(cert_data)?,
            cache: MemorySessionCache::new(),
            counters: Counters::default(),
            forget_sessions: AtomicBool::new(false),
            fail_handshakes: AtomicUsize::new(0),
        })
    }

    pub async fn start(self) -> Result<RunningServer> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(self);
        let server = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                let server = server.clone();
                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let server = server.clone();
                        async move { server.handle(req).await }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        eprintln!("vau test server: {err:?}");
                    }
                });
            }
        });
        Ok(RunningServer { addr, state, task })
    }

    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = req.into_body().collect().await?.to_bytes();

        if method == Method::POST && path == "/VAU" && self.take_failure() {
            self.counters.m1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let result = match (&method, path.as_str()) {
            (&Method::POST, "/VAU") => self.handle_m1(&body),
            (&Method::GET, p) if p.starts_with("/CertData.") => Ok(self.handle_cert_data(p)),
            (&Method::POST, p) if p.starts_with(CID_PREFIX) => match content_type.as_str() {
                "application/cbor" => self.handle_m3(p, &body),
                "application/octet-stream" => self.handle_frame(p, &body),
                _ => Ok(status(StatusCode::UNSUPPORTED_MEDIA_TYPE)),
            },
            _ => Ok(status(StatusCode::NOT_FOUND)),
        };
        Ok(result.unwrap_or_else(error_response))
    }

    fn take_failure(&self) -> bool {
        self.fail_handshakes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn handle_m1(&self, body: &[u8]) -> Result<Response<BoxBody<Bytes, hyper::Error>>, VauError> {
        self.counters.m1.fetch_add(1, Ordering::SeqCst);
        let (state, msg2) = initiate_handshake(&self.conf, body, &self.ocsp_response)?;
        let cid = self.cache.init_handshake(state)?;
        Response::builder()
            .header("VAU-CID", cid)
            .header(CONTENT_TYPE, "application/cbor")
            .body(full(msg2))
            .map_err(|_| VauError::Internal("build response"))
    }

    fn handle_cert_data(&self, path: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
        self.counters.cert_data.fetch_add(1, Ordering::SeqCst);
        let signed = &self.conf.signed_keys;
        if path != cert_data_path(&signed.cert_hash, signed.cdv) {
            return status(StatusCode::NOT_FOUND);
        }
        Response::new(full(self.cert_data.clone()))
    }

    fn handle_m3(
        &self,
        cid: &str,
        body: &[u8],
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, VauError> {
        self.counters.m3.fetch_add(1, Ordering::SeqCst);
        let state = self.cache.finish_handshake(cid)?;
        let (session, msg4) = finish_handshake(&self.conf, state, body)?;
        self.cache.start_session(cid, session)?;
        Ok(Response::new(full(msg4)))
    }

    fn handle_frame(
        &self,
        cid: &str,
        body: &[u8],
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, VauError> {
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        if self.forget_sessions.load(Ordering::SeqCst) {
            return Err(VauError::UnknownCid);
        }
        let plain = self.cache.with_session(cid, |session| session.decrypt(body))?;
        let inner = echo(&plain).map_err(|e| VauError::MalformedFrame(e.to_string()))?;
        let frame = self
            .cache
            .with_session(cid, |session| session.encrypt(&inner))?;
        Ok(Response::new(full(frame.to_bytes())))
    }
}

/// Reflects the tunnelled request: `x-*` headers come back as `x-echo-*`, `user-agent` as
/// `x-echo-user-agent`. `/no-length` answers without a content-length header.
fn echo(plain: &[u8]) -> Result<Vec<u8>> {
    let request = codec::decode_request(plain).map_err(|e| anyhow!("{e}"))?;
    if request.path == "/no-length" {
        return Ok(b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\nbody without length".to_vec());
    }
    let mut headers = vec![
        (String::from("x-method"), request.method.to_string()),
        (String::from("x-path"), request.path.clone()),
    ];
    headers.extend(
        request
            .headers
            .iter()
            .filter(|(name, _)| name.starts_with("x-") || name == "user-agent")
            .map(|(name, value)| {
                let name = name.strip_prefix("x-").unwrap_or(name);
                (format!("x-echo-{name}"), value.clone())
            }),
    );
    let response = TunnelResponse {
        status: 200,
        reason: String::from("OK"),
        headers,
        body: request.body.unwrap_or_default(),
    };
    codec::encode_response(&response).map_err(|e| anyhow!("{e}"))
}

fn error_response(err: VauError) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full(err.to_message().unwrap_or_default()));
    *response.status_mut() =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
}

fn status(code: StatusCode) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(empty());
    *response.status_mut() = code;
    response
}

fn empty() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
