use crate::error::{Error, Result};
use async_nats::ConnectOptions;
use async_nats::jetstream;
use async_nats::jetstream::Context;
use std::time::Duration;
use tracing::info;

/// Connects to NATS and returns the JetStream context the durable stores are built on.
pub async fn create_js_context(config: config::ClientConfig) -> Result<Context> {
    let mut opts = ConnectOptions::new()
        .max_reconnects(None) // unlimited reconnects
        .ping_interval(Duration::from_secs(3))
        .retry_on_initial_connect();

    if let (Some(user), Some(password)) = (config.user, config.password) {
        opts = opts.user_and_password(user, password);
    }

    if config.tls_enabled {
        opts = opts.require_tls(true);
    }

    let js_client = async_nats::connect_with_options(&config.url, opts)
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;

    info!(url = %config.url, "Connected to JetStream");
    Ok(jetstream::new(js_client))
}

/// Build Jetstream client configuration.
pub mod config {
    use crate::error::{Error, Result};
    use std::collections::HashMap;

    const DEFAULT_URL: &str = "localhost:4222";

    /// Jetstream client configuration.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ClientConfig {
        /// NATS server URL.
        pub url: String,
        /// NATS server username.
        pub user: Option<String>,
        /// NATS server password.
        pub password: Option<String>,
        /// Whether to enable TLS.
        pub tls_enabled: bool,
    }

    impl Default for ClientConfig {
        fn default() -> Self {
            ClientConfig {
                url: DEFAULT_URL.to_string(),
                user: None,
                password: None,
                tls_enabled: false,
            }
        }
    }

    const ENV_JETSTREAM_USER: &str = "EVENTHOST_JETSTREAM_USER";
    const ENV_JETSTREAM_PASSWORD: &str = "EVENTHOST_JETSTREAM_PASSWORD";
    const ENV_JETSTREAM_URL: &str = "EVENTHOST_JETSTREAM_URL";
    const ENV_JETSTREAM_TLS_ENABLED: &str = "EVENTHOST_JETSTREAM_TLS_ENABLED";

    impl ClientConfig {
        /// Loads the client configuration from the environment. The URL is mandatory, credentials
        /// are used only when both user and password are set.
        pub fn load(env_vars: HashMap<String, String>) -> Result<Self> {
            let get_var = |var: &str| -> Result<String> {
                env_vars
                    .get(var)
                    .cloned()
                    .ok_or_else(|| Error::Config(format!("Environment variable {var} is not set")))
            };

            Ok(Self {
                url: get_var(ENV_JETSTREAM_URL)?,
                user: get_var(ENV_JETSTREAM_USER).ok(),
                password: get_var(ENV_JETSTREAM_PASSWORD).ok(),
                tls_enabled: get_var(ENV_JETSTREAM_TLS_ENABLED)
                    .map(|v| v == "true")
                    .unwrap_or(false),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_load_requires_url() {
            let result = ClientConfig::load(HashMap::new());
            assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(ENV_JETSTREAM_URL)));
        }

        #[test]
        fn test_load_with_credentials() {
            let env_vars = HashMap::from([
                (ENV_JETSTREAM_URL.to_string(), "nats://nats:4222".to_string()),
                (ENV_JETSTREAM_USER.to_string(), "eph".to_string()),
                (ENV_JETSTREAM_PASSWORD.to_string(), "secret".to_string()),
                (ENV_JETSTREAM_TLS_ENABLED.to_string(), "true".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ]);

            let config = ClientConfig::load(env_vars).unwrap();
            assert_eq!(
                config,
                ClientConfig {
                    url: "nats://nats:4222".to_string(),
                    user: Some("eph".to_string()),
                    password: Some("secret".to_string()),
                    tls_enabled: true,
                }
            );
        }
    }
}
