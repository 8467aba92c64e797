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

use super::frame::Session;
use super::model::VauError;
use super::server::{HandshakeState, SessionState};
use super::util::utc_now;
use std::collections::HashMap;
use std::sync::Mutex;

pub const CID_PREFIX: &str = "/VAU/";

/// Responder-side bookkeeping of handshakes and sessions, keyed by channel id.
pub trait SessionCache {
    fn init_handshake(&self, state: HandshakeState) -> Result<String, VauError>; // CID
    fn finish_handshake(&self, cid: &str) -> Result<HandshakeState, VauError>;
    fn start_session(&self, cid: &str, state: SessionState) -> Result<(), VauError>;
    /// Runs `f` on the session behind `cid`. Sessions past their expiry are dropped and reported
    /// as unknown.
    fn with_session<T>(
        &self,
        cid: &str,
        f: impl FnOnce(&mut Session) -> Result<T, VauError>,
    ) -> Result<T, VauError>;
}

#[derive(Debug)]
pub enum ConnectionState {
    Handshaking(HandshakeState),
    Established(SessionState),
}

#[derive(Debug, Default)]
pub struct MemorySessionCache {
    state: Mutex<HashMap<String, ConnectionState>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        MemorySessionCache::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ConnectionState>>, VauError> {
        self.state
            .lock()
            .map_err(|_| VauError::Internal("session cache lock poisoned"))
    }
}

pub fn new_cid() -> String {
    format!("{}{}", CID_PREFIX, uuid::Uuid::new_v4())
}

impl SessionCache for MemorySessionCache {
    fn init_handshake(&self, state: HandshakeState) -> Result<String, VauError> {
        let cid = new_cid();
        self.lock()?
            .insert(cid.clone(), ConnectionState::Handshaking(state));
        Ok(cid)
    }

    fn finish_handshake(&self, cid: &str) -> Result<HandshakeState, VauError> {
        let mut states = self.lock()?;
        match states.remove(cid) {
            Some(ConnectionState::Handshaking(state)) => Ok(state),
            Some(established) => {
                states.insert(cid.to_string(), established);
                Err(VauError::UnknownCid)
            }
            None => Err(VauError::UnknownCid),
        }
    }

    fn start_session(&self, cid: &str, state: SessionState) -> Result<(), VauError> {
        self.lock()?
            .insert(cid.to_string(), ConnectionState::Established(state));
        Ok(())
    }

    fn with_session<T>(
        &self,
        cid: &str,
        f: impl FnOnce(&mut Session) -> Result<T, VauError>,
    ) -> Result<T, VauError> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(cid) {
            Some(ConnectionState::Established(state)) if state.expires > utc_now() => {
                f(&mut state.session)
            }
            Some(ConnectionState::Established(_)) => {
                sessions.remove(cid);
                Err(VauError::UnknownCid)
            }
            _ => Err(VauError::UnknownCid),
        }
    }
}
