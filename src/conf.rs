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

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use vau::Environment;

// simple macro to avoid boilerplate for variable handler definition
macro_rules! conf_handler {
    ( $name: ident, $handler: expr ) => {
        fn $name(conf: &mut Config, val: &str) -> anyhow::Result<()> {
            let handler: fn(&mut Config, &str) -> anyhow::Result<()> = $handler;
            handler(conf, val).with_context(|| format!("`{}`", stringify!($name)))
        }
    };
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub user_agent: Option<String>,
    pub http_client_connect_timeout: Duration,
    pub http_client_timeout: Duration,
    pub http_client_idle_timeout: Duration,
    pub http_client_max_idle_per_host: usize,
    pub http_client_tcp_keepalive: Duration,
    pub http_client_accept_invalid_certs: bool,
    pub downgrade_https: bool,
    pub trust_anchors: Option<PathBuf>,
    pub insecure_trust: bool,
    pub ocsp_max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Testing,
            user_agent: None,
            http_client_connect_timeout: Duration::from_secs(2),
            http_client_timeout: Duration::from_secs(10),
            http_client_idle_timeout: Duration::from_secs(30),
            http_client_max_idle_per_host: 64,
            http_client_tcp_keepalive: Duration::from_secs(30),
            http_client_accept_invalid_certs: false,
            downgrade_https: false,
            trust_anchors: None,
            insecure_trust: false,
            ocsp_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user_agent.as_deref().is_none_or(|ua| ua.trim().is_empty()) {
            bail!("no user agent configured");
        }
        if self.trust_anchors.is_none() && !self.insecure_trust {
            bail!("no trust anchors configured");
        }
        if self.ocsp_max_age.is_zero() {
            bail!("OCSP max age must be positive");
        }
        Ok(())
    }

    /// Reads every `VAU_*` variable from the process environment on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut conf = Config::default();
        for (name, handler) in ENV_COMMANDS {
            if let Some(val) = lookup(name) {
                handler(&mut conf, &val).with_context(|| format!("reading {name}"))?;
            }
        }
        conf.validate()?;
        Ok(conf)
    }
}

fn parse_switch(val: &str) -> anyhow::Result<bool> {
    if val.eq_ignore_ascii_case("on") {
        Ok(true)
    } else if val.eq_ignore_ascii_case("off") {
        Ok(false)
    } else {
        bail!("Unable to parse switch, want on|off: {val}")
    }
}

fn parse_seconds(val: &str) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(val.trim().parse()?))
}

conf_handler!(vau_pu, |conf, val| {
    conf.environment = if parse_switch(val)? {
        Environment::Production
    } else {
        Environment::Testing
    };
    Ok(())
});

conf_handler!(vau_x_useragent, |conf, val| {
    if val.trim().is_empty() {
        bail!("user agent empty");
    }
    conf.user_agent = Some(val.trim().to_string());
    Ok(())
});

conf_handler!(vau_connect_timeout, |conf, val| {
    conf.http_client_connect_timeout = parse_seconds(val)?;
    Ok(())
});

conf_handler!(vau_timeout, |conf, val| {
    conf.http_client_timeout = parse_seconds(val)?;
    Ok(())
});

conf_handler!(vau_pool_idle_timeout, |conf, val| {
    conf.http_client_idle_timeout = parse_seconds(val)?;
    Ok(())
});

conf_handler!(vau_pool_max_idle_per_host, |conf, val| {
    conf.http_client_max_idle_per_host = val.trim().parse()?;
    Ok(())
});

conf_handler!(vau_tcp_keepalive, |conf, val| {
    conf.http_client_tcp_keepalive = parse_seconds(val)?;
    Ok(())
});

conf_handler!(vau_accept_invalid_certs, |conf, val| {
    conf.http_client_accept_invalid_certs = parse_switch(val)?;
    Ok(())
});

conf_handler!(vau_downgrade_https, |conf, val| {
    conf.downgrade_https = parse_switch(val)?;
    Ok(())
});

conf_handler!(vau_trust_anchors, |conf, val| {
    if val.trim().is_empty() {
        bail!("trust anchor path empty");
    }
    conf.trust_anchors = Some(PathBuf::from(val.trim()));
    Ok(())
});

conf_handler!(vau_insecure_trust, |conf, val| {
    conf.insecure_trust = parse_switch(val)?;
    Ok(())
});

conf_handler!(vau_ocsp_max_age, |conf, val| {
    conf.ocsp_max_age = parse_seconds(val)?;
    Ok(())
});

type Handler = fn(&mut Config, &str) -> anyhow::Result<()>;

static ENV_COMMANDS: [(&str, Handler); 12] = [
    ("VAU_PU", vau_pu),
    ("VAU_X_USERAGENT", vau_x_useragent),
    ("VAU_CONNECT_TIMEOUT", vau_connect_timeout),
    ("VAU_TIMEOUT", vau_timeout),
    ("VAU_POOL_IDLE_TIMEOUT", vau_pool_idle_timeout),
    ("VAU_POOL_MAX_IDLE_PER_HOST", vau_pool_max_idle_per_host),
    ("VAU_TCP_KEEPALIVE", vau_tcp_keepalive),
    ("VAU_ACCEPT_INVALID_CERTS", vau_accept_invalid_certs),
    ("VAU_DOWNGRADE_HTTPS", vau_downgrade_https),
    ("VAU_TRUST_ANCHORS", vau_trust_anchors),
    ("VAU_INSECURE_TRUST", vau_insecure_trust),
    ("VAU_OCSP_MAX_AGE", vau_ocsp_max_age),
];
