use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::backoff::{BackoffConfig, BackoffError};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid url {url:?}: {source}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: &'static str },
    #[error("invalid {which} backoff: {source}")]
    InvalidBackoff {
        which: &'static str,
        #[source]
        source: BackoffError,
    },
    #[error("alert history_limit must be at least 1")]
    InvalidHistoryLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub ws_base_url: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_socket_backoff")]
    pub socket: BackoffConfig,
    #[serde(default = "default_image_backoff")]
    pub image: BackoffConfig,
}

fn default_socket_backoff() -> BackoffConfig {
    BackoffConfig::SOCKET
}

fn default_image_backoff() -> BackoffConfig {
    BackoffConfig::IMAGE
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            socket: default_socket_backoff(),
            image: default_image_backoff(),
        }
    }
}

fn default_history_limit() -> usize {
    100
}

fn default_audible() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_audible")]
    pub audible: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            audible: default_audible(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    #[serde(default)]
    pub overlay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        for (which, backoff) in [
            ("socket", &config.reconnect.socket),
            ("image", &config.reconnect.image),
        ] {
            backoff
                .validate()
                .map_err(|source| ConfigError::InvalidBackoff { which, source })?;
        }

        if config.alerts.history_limit == 0 {
            return Err(ConfigError::InvalidHistoryLimit);
        }

        // surfaces url errors at load time rather than on first connect
        config.endpoints()?;

        Ok(config)
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        Endpoints::new(&self.server.base_url, self.server.ws_base_url.as_deref())
    }
}

/// URL families of the streaming backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http_base: Url,
    ws_base: Url,
}

impl Endpoints {
    /// `ws_base` defaults to `http_base` with its scheme swapped to ws/wss.
    pub fn new(http_base: &str, ws_base: Option<&str>) -> Result<Self, ConfigError> {
        let http = parse_base(
            http_base,
            &["http", "https"],
            "base_url must use http or https",
        )?;

        let ws = match ws_base {
            Some(raw) => parse_base(raw, &["ws", "wss"], "ws_base_url must use ws or wss")?,
            None => {
                let mut ws = http.clone();
                let scheme = if http.scheme() == "https" { "wss" } else { "ws" };
                ws.set_scheme(scheme).map_err(|()| ConfigError::InvalidUrl {
                    url: http_base.to_string(),
                    reason: "cannot derive a websocket url from base_url",
                })?;
                ws
            }
        };

        Ok(Self {
            http_base: http,
            ws_base: ws,
        })
    }

    pub fn image_url(&self, camera_id: &str, overlay: bool) -> Url {
        let variant = if overlay { "mjpeg_overlay" } else { "mjpeg" };
        join(&self.http_base, &["streams", camera_id, variant])
    }

    pub fn metadata_url(&self, camera_id: &str) -> String {
        join(&self.ws_base, &["streams", camera_id, "ws"]).into()
    }

    pub fn alerts_url(&self) -> String {
        join(&self.ws_base, &["streams", "alerts"]).into()
    }
}

fn parse_base(
    raw: &str,
    schemes: &[&str],
    wrong_scheme: &'static str,
) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::MalformedUrl {
        url: raw.to_string(),
        source,
    })?;

    let reason = if !schemes.contains(&url.scheme()) {
        Some(wrong_scheme)
    } else if url.cannot_be_a_base() || url.host().is_none() {
        Some("url needs a host")
    } else if url.query().is_some() || url.fragment().is_some() {
        Some("base url must not carry a query or fragment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason,
        }),
        None => Ok(url),
    }
}

/// Appends percent-encoded path segments, so ids containing `/`, `#` or `?`
/// stay inside their own segment.
fn join(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // bases are validated as hierarchical in parse_base
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
