use std::{collections::HashMap, fs, path::Path};

use url::Url;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_path: String,
    /// Broker prefix for subscriptions, e.g. `/topic` + `/rooms/{id}`.
    pub topic_prefix: String,
    /// Broker prefix for publishes, e.g. `/app` + `/chat/{id}/sendMessage`.
    pub app_prefix: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            ws_path: "/ws/websocket".into(),
            topic_prefix: "/topic".into(),
            app_prefix: "/app".into(),
        }
    }
}

impl ClientSettings {
    /// `client.toml` in the working directory, then `APP__*` environment
    /// variables.
    pub fn load() -> Self {
        Self::load_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
    }

    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Ok(raw) = fs::read_to_string(path) {
            if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
                settings.apply(|key| file_cfg.get(key).cloned());
            }
        }

        settings.apply(|key| env(&format!("APP__{}", key.to_ascii_uppercase())));
        settings
    }

    fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("server_url") {
            self.server_url = v;
        }
        if let Some(v) = lookup("ws_path") {
            self.ws_path = v;
        }
        if let Some(v) = lookup("topic_prefix") {
            self.topic_prefix = v;
        }
        if let Some(v) = lookup("app_prefix") {
            self.app_prefix = v;
        }
    }

    pub fn ws_url(&self) -> ClientResult<Url> {
        let mut url = Url::parse(self.server_url.trim()).map_err(|err| {
            ClientError::Config(format!("invalid server url '{}': {err}", self.server_url))
        })?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ClientError::Config(format!(
                    "server url must start with http:// or https://, got {other}://"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot derive websocket url from {url}")))?;
        url.set_path(&self.ws_path);
        Ok(url)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
