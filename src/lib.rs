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

//! HTTP client that tunnels requests through a VAU channel.
//!
//! [`ConnectionManager`] keeps one channel per endpoint and subject. Requests are encoded as
//! HTTP/1.1, encrypted with the channel's session keys and posted over an [`OuterTransport`].

pub mod codec;
pub mod conf;
pub mod connection;
pub mod error;
pub mod manager;
pub mod transport;
pub mod trust;

pub use codec::{TunnelRequest, TunnelResponse};
pub use conf::Config;
pub use connection::Connection;
pub use error::Error;
pub use manager::{Builder, ConnectionManager};
pub use transport::{HttpTransport, OuterTransport};
pub use trust::{TrustPolicy, TrustStore};
