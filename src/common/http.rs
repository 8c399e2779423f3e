use std::time::Duration;

use reqwest::{Client, Error};

use crate::configs::NetworkConfig;

const DEFAULT_USER_AGENT: &str = concat!("volustream/", env!("CARGO_PKG_VERSION"));

pub struct HttpClient;

impl HttpClient {
    pub fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    /// Build the client shared by the manifest loader and every segment fetch.
    pub fn from_config(config: &NetworkConfig) -> Result<Client, Error> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(Self::default_user_agent);

        let mut builder = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(proxy_config) = &config.proxy {
            if let Some(p_url) = &proxy_config.url {
                let mut proxy = reqwest::Proxy::all(p_url)?;
                if let (Some(u), Some(p)) = (&proxy_config.username, &proxy_config.password) {
                    proxy = proxy.basic_auth(u, p);
                }
                builder = builder.proxy(proxy);
            }
        }

        builder.build()
    }
}
