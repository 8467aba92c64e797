/*-
 * #%L
 * libvau
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

//! Sans-IO core of the VAU channel: hybrid key exchange, key derivation, the four-message
//! handshake for both ends, and the framing of application data afterwards.
//!
//! Nothing in here performs network I/O. The initiator drives [`client::Idle`] through its states
//! and moves the returned bytes over whatever transport it likes.

pub mod cache;
pub mod client;
pub mod frame;
pub mod kdf;
pub mod kem;
pub mod keys;
pub mod model;
pub mod provider;
pub mod server;
mod util;

pub use client::{AwaitingConfirmation, AwaitingResponderKeys, Idle, TrustValidator};
pub use frame::{Session, TunnelMessage};
pub use model::{
    Direction, EcdhKey, Environment, Role, SignedPublicKeys, VauError, VauPublicKeys,
};
pub use provider::CryptoProvider;
pub use util::utc_now;
