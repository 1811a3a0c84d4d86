//! Environment-driven configuration shared by the three services.
//!
//! Every key has a default so a bare `radio24 gateway` comes up on a laptop.
//! Values are read through a lookup function so tests can feed a map instead
//! of mutating the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::{RadioError, Result};

/// Fixed timeouts and cadences used across the services.
pub mod timeouts {
    use std::time::Duration;

    /// HTTP calls between Gateway, Director and Host.
    pub const PEER: Duration = Duration::from_secs(5);
    /// HTTP calls to external providers (completion, TTS, embeddings).
    pub const PROVIDER: Duration = Duration::from_secs(30);
    /// A single write to the media server.
    pub const MEDIA_WRITE: Duration = Duration::from_secs(10);
    /// First event from the realtime speech provider.
    pub const REALTIME_INITIAL: Duration = Duration::from_secs(10);
    /// Dialogue inactivity bound.
    pub const DIALOGUE: Duration = Duration::from_secs(180);
    /// Back-off between media-server reconnect attempts.
    pub const MEDIA_RECONNECT: Duration = Duration::from_secs(5);
}

/// Which service a port is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Gateway,
    Director,
    Host,
}

impl Service {
    pub fn default_port(self) -> u16 {
        match self {
            Service::Gateway => 8080,
            Service::Director => 8081,
            Service::Host => 8082,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub http: HttpConfig,
    pub livekit: LiveKitConfig,
    pub openai: OpenAiConfig,
    pub peers: PeerConfig,
    pub director: DirectorConfig,
    pub host: HostConfig,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpConfig {
    /// Explicit `PORT`, applied to whichever service is starting.
    pub port: Option<u16>,
    /// Explicit `HOST_PORT`, consulted before `PORT` by the host service.
    pub host_port: Option<u16>,
    pub allowed_origin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveKitConfig {
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// URL handed to listeners in the room-join response.
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub realtime_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerConfig {
    pub gateway_base: String,
    pub host_base: String,
    pub director_base: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectorConfig {
    pub segment_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// Stream frames to the PCM relay at `MEDIA_RELAY_URL`.
    Relay,
    /// Keep an in-process room that counts and discards frames.
    Silent,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostConfig {
    pub gain: f32,
    pub media: MediaMode,
    /// PCM relay endpoint. This is the relay's own protocol, not LiveKit
    /// signalling, so it never falls back to the LiveKit URLs.
    pub relay_url: String,
    pub monologue_secs: u64,
    pub poll_secs: u64,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let first_of = |keys: &[&str], default: &str| {
            keys.iter()
                .find_map(|k| get(k))
                .unwrap_or_else(|| default.to_string())
        };

        let port = parse_opt::<u16>("PORT", get("PORT"))?;
        let host_port = parse_opt::<u16>("HOST_PORT", get("HOST_PORT"))?;

        let livekit_url = first_of(&["LIVEKIT_URL", "LIVEKIT_WS_URL"], "ws://localhost:7880");

        let segment_minutes = parse_opt::<u64>("SEGMENT_MINUTES", get("SEGMENT_MINUTES"))?
            .unwrap_or(15);
        if segment_minutes == 0 {
            return Err(RadioError::Config("SEGMENT_MINUTES must be positive".into()));
        }

        let gain = parse_opt::<f32>("HOST_GAIN", get("HOST_GAIN"))?.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&gain) {
            return Err(RadioError::Config(format!("HOST_GAIN must be within [0, 1], got {gain}")));
        }

        let media = match get("MEDIA_RELAY").as_deref() {
            None | Some("relay") => MediaMode::Relay,
            Some("silent") => MediaMode::Silent,
            Some(other) => {
                return Err(RadioError::Config(format!(
                    "MEDIA_RELAY must be 'relay' or 'silent', got '{other}'"
                )));
            }
        };

        let data_dir = get("RADIO24_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(data_dir);

        Ok(Self {
            http: HttpConfig {
                port,
                host_port,
                allowed_origin: get_or("ALLOWED_ORIGIN", "http://localhost:3000"),
            },
            livekit: LiveKitConfig {
                api_key: get_or("LIVEKIT_API_KEY", "devkey"),
                api_secret: get_or("LIVEKIT_API_SECRET", "secret"),
                url: livekit_url,
            },
            openai: OpenAiConfig {
                api_key: get("OPENAI_API_KEY").filter(|k| is_real_api_key(k)),
                base_url: get_or("OPENAI_BASE_URL", "https://api.openai.com"),
                realtime_url: get_or(
                    "OPENAI_REALTIME_URL",
                    "wss://api.openai.com/v1/realtime?model=gpt-realtime",
                ),
            },
            peers: PeerConfig {
                gateway_base: trim_base(get_or("API_BASE", "http://localhost:8080")),
                host_base: trim_base(first_of(
                    &["HOST_SERVICE_URL", "HOST_BASE"],
                    "http://localhost:8082",
                )),
                director_base: trim_base(get_or("DIRECTOR_SERVICE_URL", "http://localhost:8081")),
            },
            director: DirectorConfig { segment_minutes },
            host: HostConfig {
                gain,
                media,
                relay_url: get_or("MEDIA_RELAY_URL", "ws://localhost:7890/relay"),
                monologue_secs: 30,
                poll_secs: 5,
            },
            data_dir,
        })
    }

    /// Port a given service should bind, honoring `HOST_PORT` for the host.
    pub fn port_for(&self, service: Service) -> u16 {
        let explicit = match service {
            Service::Host => self.http.host_port.or(self.http.port),
            _ => self.http.port,
        };
        explicit.unwrap_or_else(|| service.default_port())
    }

    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.director.segment_minutes * 60)
    }

    pub fn monologue_period(&self) -> Duration {
        Duration::from_secs(self.host.monologue_secs)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.host.poll_secs)
    }
}

fn parse_opt<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .map_err(|e| RadioError::Config(format!("invalid {key} '{v}': {e}")))
    })
    .transpose()
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Placeholder keys shipped in sample env files put providers in offline mode.
fn is_real_api_key(key: &str) -> bool {
    !matches!(key, "your-openai-api-key" | "test-mode")
}

/// Default data directory: `~/.radio24`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".radio24")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port_for(Service::Gateway), 8080);
        assert_eq!(config.port_for(Service::Director), 8081);
        assert_eq!(config.port_for(Service::Host), 8082);
        assert_eq!(config.livekit.api_key, "devkey");
        assert_eq!(config.livekit.url, "ws://localhost:7880");
        assert!(config.openai.api_key.is_none());
        assert_eq!(config.segment_duration(), Duration::from_secs(900));
        assert_eq!(config.host.gain, 0.5);
        assert_eq!(config.host.media, MediaMode::Relay);
    }

    #[test]
    fn test_port_resolution() {
        let config = load(&[("PORT", "9000"), ("HOST_PORT", "9100")]).unwrap();
        assert_eq!(config.port_for(Service::Gateway), 9000);
        assert_eq!(config.port_for(Service::Host), 9100);

        let config = load(&[("PORT", "9000")]).unwrap();
        assert_eq!(config.port_for(Service::Host), 9000);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_livekit_url_fallbacks() {
        let config = load(&[("LIVEKIT_WS_URL", "ws://sfu:7880")]).unwrap();
        assert_eq!(config.livekit.url, "ws://sfu:7880");

        let config = load(&[
            ("LIVEKIT_URL", "wss://public.example"),
            ("LIVEKIT_WS_URL", "ws://sfu:7880"),
        ])
        .unwrap();
        assert_eq!(config.livekit.url, "wss://public.example");
    }

    #[test]
    fn test_relay_url_is_separate_from_livekit() {
        let config = load(&[("LIVEKIT_WS_URL", "ws://sfu:7880")]).unwrap();
        assert_eq!(config.host.relay_url, "ws://localhost:7890/relay");

        let config = load(&[("MEDIA_RELAY_URL", "ws://relay:9000/ingest")]).unwrap();
        assert_eq!(config.host.relay_url, "ws://relay:9000/ingest");
    }

    #[test]
    fn test_placeholder_api_key_means_offline() {
        let config = load(&[("OPENAI_API_KEY", "test-mode")]).unwrap();
        assert!(config.openai.api_key.is_none());
        let config = load(&[("OPENAI_API_KEY", "sk-live")]).unwrap();
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn test_peer_bases_trimmed() {
        let config = load(&[
            ("API_BASE", "http://api:8080/"),
            ("HOST_BASE", "http://host:8080/"),
        ])
        .unwrap();
        assert_eq!(config.peers.gateway_base, "http://api:8080");
        assert_eq!(config.peers.host_base, "http://host:8080");
    }

    #[test]
    fn test_gain_bounds() {
        assert!(load(&[("HOST_GAIN", "1.5")]).is_err());
        assert_eq!(load(&[("HOST_GAIN", "0.25")]).unwrap().host.gain, 0.25);
    }

    #[test]
    fn test_media_mode() {
        assert_eq!(
            load(&[("MEDIA_RELAY", "silent")]).unwrap().host.media,
            MediaMode::Silent
        );
        assert!(load(&[("MEDIA_RELAY", "carrier-pigeon")]).is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = load(&[("OPENAI_API_KEY", "sk-live"), ("LIVEKIT_API_SECRET", "shh")]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-live"));
        assert!(!json.contains("shh"));
    }
}
