use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    pub user_agent: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub proxy: Option<HttpProxyConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: default_timeout_secs(),
            proxy: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HttpProxyConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_timeout_secs() -> u64 {
    15
}
