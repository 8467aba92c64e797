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

//! Plain HTTP/1.1 messages as carried inside the tunnel.

use http::Method;

use crate::error::Error;

/// see also: https://github.com/http-rs/async-h1/blob/main/src/lib.rs#L100
const MAX_HEADERS: usize = 128;

const DENYLIST: [&str; 2] = ["te", "transfer-coding"];

const USER_AGENT_HEADERS: [&str; 2] = ["user-agent", "x-useragent"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub method: Method,
    /// Path and query only; the tunnel endpoint decides the host.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TunnelRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// A copy carrying `user_agent` as its only `User-Agent` and `X-Useragent` values.
    pub fn with_user_agent(&self, user_agent: &str) -> Self {
        let mut request = self.clone();
        request.headers.retain(|(name, _)| {
            !USER_AGENT_HEADERS
                .iter()
                .any(|ua| name.eq_ignore_ascii_case(ua))
        });
        for name in USER_AGENT_HEADERS {
            request.headers.push((name.to_string(), user_agent.to_string()));
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TunnelResponse {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn push_headers(
    out: &mut Vec<u8>,
    headers: &[(String, String)],
    body_len: usize,
) -> Result<(), Error> {
    for (name, value) in headers {
        if !valid_header_name(name) {
            return Err(Error::codec(format!("invalid header name '{name}'")));
        }
        let name = name.to_ascii_lowercase();
        if DENYLIST.contains(&name.as_str()) {
            return Err(Error::codec(format!("unsupported header '{name}'")));
        }
        if value.contains(['\r', '\n']) {
            return Err(Error::codec(format!("line break in value of '{name}'")));
        }
        if name == "content-length" {
            continue;
        }
        if name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
            continue;
        }
        out.extend(format!("{name}: {}\r\n", value.trim()).as_bytes());
    }
    out.extend(format!("content-length: {body_len}\r\n\r\n").as_bytes());
    Ok(())
}

/// Serializes a request. `content-length` is always computed from the body, and
/// chunked `transfer-encoding` is dropped.
pub fn encode_request(request: &TunnelRequest) -> Result<Vec<u8>, Error> {
    if ![Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(&request.method) {
        return Err(Error::codec(format!(
            "unsupported method {}",
            request.method
        )));
    }
    if !request.path.starts_with('/') || request.path.contains([' ', '\r', '\n']) {
        return Err(Error::codec(format!(
            "invalid request target '{}'",
            request.path
        )));
    }
    let body = request.body.as_deref().unwrap_or_default();

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend(format!("{} {} HTTP/1.1\r\n", request.method, request.path).as_bytes());
    push_headers(&mut out, &request.headers, body.len())?;
    out.extend(body);
    Ok(out)
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Result<Vec<(String, String)>, Error> {
    headers
        .iter()
        .map(|h| {
            let value = std::str::from_utf8(h.value)
                .map_err(|_| Error::codec(format!("non-utf-8 value of '{}'", h.name)))?;
            Ok((h.name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// `Some(n)` for a single numeric `content-length`, `None` if absent.
fn content_length(headers: &[(String, String)]) -> Result<Option<usize>, Error> {
    let mut values = headers.iter().filter(|(n, _)| n == "content-length");
    let Some((_, value)) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(Error::codec("duplicate content-length"));
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| Error::codec(format!("invalid content-length '{value}'")))
}

fn take_body(rest: &[u8], headers: &[(String, String)]) -> Result<Vec<u8>, Error> {
    match content_length(headers)? {
        Some(len) if len > rest.len() => Err(Error::codec(format!(
            "body truncated: content-length {len}, {} bytes available",
            rest.len()
        ))),
        Some(len) => Ok(rest[..len].to_vec()),
        // servers may omit content-length, the body then runs to the end
        None => Ok(rest.to_vec()),
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<TunnelResponse, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let status = response
        .parse(bytes)
        .map_err(|e| Error::codec(format!("invalid response head: {e}")))?;
    let httparse::Status::Complete(header_len) = status else {
        return Err(Error::codec("partial response head"));
    };

    let code = response
        .code
        .ok_or_else(|| Error::codec("missing status code"))?;
    let reason = response.reason.unwrap_or_default().to_string();
    let headers = collect_headers(response.headers)?;
    let body = take_body(&bytes[header_len..], &headers)?;

    Ok(TunnelResponse {
        status: code,
        reason,
        headers,
        body,
    })
}

/// Server side of [`encode_request`].
pub fn decode_request(bytes: &[u8]) -> Result<TunnelRequest, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let status = request
        .parse(bytes)
        .map_err(|e| Error::codec(format!("invalid request head: {e}")))?;
    let httparse::Status::Complete(header_len) = status else {
        return Err(Error::codec("partial request head"));
    };

    let method = request.method.ok_or_else(|| Error::codec("missing method"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::codec(format!("invalid method '{method}'")))?;
    let path = request
        .path
        .ok_or_else(|| Error::codec("missing path"))?
        .to_string();
    let headers = collect_headers(request.headers)?;
    let body = take_body(&bytes[header_len..], &headers)?;

    Ok(TunnelRequest {
        method,
        path,
        headers,
        body: Some(body).filter(|b| !b.is_empty()),
    })
}

/// Server side of [`decode_response`].
pub fn encode_response(response: &TunnelResponse) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(256 + response.body.len());
    out.extend(format!("HTTP/1.1 {} {}\r\n", response.status, response.reason).as_bytes());
    push_headers(&mut out, &response.headers, response.body.len())?;
    out.extend(&response.body);
    Ok(out)
}
