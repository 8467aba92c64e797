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

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use super::model::VauError;

/// Source of randomness for key generation, encapsulation and nonces.
///
/// Build one per process and hand it to every handshake and session. Tests use
/// [`CryptoProvider::with_seed`] for reproducible key material.
#[derive(Debug)]
pub struct CryptoProvider {
    rng: Mutex<StdRng>,
}

impl Default for CryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub(crate) fn with_rng<T>(
        &self,
        f: impl FnOnce(&mut StdRng) -> Result<T, VauError>,
    ) -> Result<T, VauError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| VauError::Internal("rng lock poisoned"))?;
        f(&mut rng)
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], VauError> {
        self.with_rng(|rng| {
            let mut out = [0u8; N];
            rng.fill_bytes(&mut out);
            Ok(out)
        })
    }
}
