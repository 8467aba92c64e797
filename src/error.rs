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

use thiserror::Error;
use vau::VauError;

/// Everything a tunnelled call can fail with.
///
/// Protocol and trust failures are final for the connection that produced them. Only
/// [`Error::is_retryable`] failures stem from the outer network and may be retried with a fresh
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("vau: {0}")]
    Protocol(#[from] VauError),
    #[error("outer transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("outer transport: {0}")]
    Transport(String),
    #[error("outer transport: {method} {uri} returned status {status}")]
    Status {
        method: String,
        uri: String,
        status: u16,
    },
    #[error("http codec: {0}")]
    Codec(String),
    #[error("configuration: {0:#}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    pub fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Transport(_) | Error::Status { .. } => true,
            Error::Protocol(e) => e.is_transport(),
            Error::Codec(_) | Error::Config(_) => false,
        }
    }
}
