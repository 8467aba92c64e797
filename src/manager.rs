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

//! Per-identity cache of established channels.
//!
//! A channel is keyed by the endpoint's host root and a caller supplied subject. The first caller
//! for a key runs the handshake; concurrent callers for the same key wait on the same cell and
//! reuse its result. A channel that fails is evicted so the next call starts over with a fresh
//! handshake.

use std::sync::Arc;

use scc::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use vau::{CryptoProvider, Environment};

use crate::codec::{TunnelRequest, TunnelResponse};
use crate::conf::Config;
use crate::connection::{Connection, destination};
use crate::error::Error;
use crate::transport::{HttpTransport, OuterTransport};
use crate::trust::TrustPolicy;

type Key = (String, String);
type Slot = Arc<OnceCell<Arc<Connection>>>;

/// Outcome of a handshake attempt on a slot.
enum Attempt {
    /// The slot was dropped by an earlier failed attempt; start over with a fresh one.
    Stale,
    Failed(Error),
}

pub struct ConnectionManager<T> {
    transport: T,
    policy: TrustPolicy,
    provider: Arc<CryptoProvider>,
    env: Environment,
    user_agent: String,
    connections: HashMap<Key, Slot>,
}

/// Collects the collaborators a [`ConnectionManager`] cannot work without.
pub struct Builder<T> {
    transport: Option<T>,
    policy: Option<TrustPolicy>,
    provider: Option<Arc<CryptoProvider>>,
    env: Environment,
    user_agent: Option<String>,
}

impl<T: OuterTransport> Default for Builder<T> {
    fn default() -> Self {
        Self {
            transport: None,
            policy: None,
            provider: None,
            env: Environment::Testing,
            user_agent: None,
        }
    }
}

impl<T: OuterTransport> Builder<T> {
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sent as `User-Agent` and `X-Useragent` with every tunnelled request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn build(self) -> Result<ConnectionManager<T>, Error> {
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("no outer transport configured"))?;
        let policy = self
            .policy
            .ok_or_else(|| anyhow::anyhow!("no trust policy configured"))?;
        let user_agent = self
            .user_agent
            .filter(|ua| !ua.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no user agent configured"))?;
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(CryptoProvider::new()),
        };
        Ok(ConnectionManager {
            transport,
            policy,
            provider,
            env: self.env,
            user_agent,
            connections: HashMap::new(),
        })
    }
}

impl ConnectionManager<HttpTransport> {
    pub fn from_config(conf: &Config) -> Result<Self, Error> {
        conf.validate()?;
        let mut builder = Builder::default()
            .transport(HttpTransport::new(conf)?)
            .trust_policy(TrustPolicy::from_config(conf)?)
            .environment(conf.environment);
        if let Some(user_agent) = &conf.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        builder.build()
    }
}

impl<T: OuterTransport> ConnectionManager<T> {
    pub fn builder() -> Builder<T> {
        Builder::default()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of cached identities, including handshakes still in flight.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns the channel for `(endpoint, subject)`, running the handshake if there is none.
    pub async fn connect(&self, endpoint: &str, subject: &str) -> Result<Arc<Connection>, Error> {
        let key = (destination(endpoint)?.to_string(), subject.to_string());
        loop {
            let slot: Slot = self
                .connections
                .entry_async(key.clone())
                .await
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .get()
                .clone();

            if let Some(connection) = slot.get() {
                debug!(endpoint = %key.0, "connection cache hit");
                return Ok(connection.clone());
            }

            match slot.get_or_try_init(|| self.handshake(&key, &slot)).await {
                Ok(connection) => return Ok(connection.clone()),
                Err(Attempt::Stale) => continue,
                Err(Attempt::Failed(e)) => return Err(e),
            }
        }
    }

    /// Runs while holding the slot's init permit, so waiters only retry after a failed slot is
    /// gone from the map.
    async fn handshake(&self, key: &Key, slot: &Slot) -> Result<Arc<Connection>, Attempt> {
        let current = self
            .connections
            .read_async(key, |_, current| Arc::ptr_eq(current, slot))
            .await;
        if current != Some(true) {
            return Err(Attempt::Stale);
        }

        debug!(endpoint = %key.0, "connection cache miss, starting handshake");
        let result = Connection::establish(
            &self.transport,
            &self.policy,
            self.provider.clone(),
            self.env,
            &key.0,
            &self.user_agent,
        )
        .await;
        match result {
            Ok(connection) => Ok(Arc::new(connection)),
            Err(e) => {
                warn!(endpoint = %key.0, "handshake failed: {e}");
                self.evict_slot(key, slot).await;
                Err(Attempt::Failed(e))
            }
        }
    }

    /// Sends `request` through the channel for `(endpoint, subject)`.
    pub async fn call(
        &self,
        endpoint: &str,
        subject: &str,
        request: &TunnelRequest,
    ) -> Result<TunnelResponse, Error> {
        let connection = self.connect(endpoint, subject).await?;
        match connection.call(&self.transport, request).await {
            Ok(response) => Ok(response),
            // codec failures leave the session counters intact
            Err(e @ Error::Codec(_)) => Err(e),
            Err(e) => {
                warn!(endpoint, cid = connection.cid(), "tunnel call failed: {e}");
                self.evict(endpoint, subject, &connection).await;
                Err(e)
            }
        }
    }

    async fn evict(&self, endpoint: &str, subject: &str, connection: &Arc<Connection>) {
        let key = (connection.endpoint().to_string(), subject.to_string());
        let removed = self
            .connections
            .remove_if_async(&key, |slot| {
                slot.get().is_some_and(|c| Arc::ptr_eq(c, connection))
            })
            .await;
        if removed.is_some() {
            debug!(endpoint, cid = connection.cid(), "evicted connection");
        }
    }

    async fn evict_slot(&self, key: &Key, slot: &Slot) {
        self.connections
            .remove_if_async(key, |current| Arc::ptr_eq(current, slot))
            .await;
    }
}
