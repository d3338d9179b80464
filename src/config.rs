//! Client configuration from the environment

use crate::session::SessionOptions;
use crate::store::FileIdentityStore;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const STATE_DIR_NAME: &str = ".readmatrix-chat";

/// What to do with a stream event whose payload is not JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedEventPolicy {
    /// Log it and keep reading
    #[default]
    Skip,
    /// Fail the turn as if the transport broke
    Abort,
}

#[derive(Debug, Error)]
#[error("unknown malformed-event policy `{0}`, expected `skip` or `abort`")]
pub struct UnknownPolicy(String);

impl FromStr for MalformedEventPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub state_dir: PathBuf,
    pub history_limit: u32,
    pub use_context: bool,
    pub malformed_events: MalformedEventPolicy,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take
    /// their default; unparseable ones do too, with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let state_dir = var("READMATRIX_STATE_DIR").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(STATE_DIR_NAME)
            },
            PathBuf::from,
        );

        Self {
            api_url: var("READMATRIX_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            state_dir,
            history_limit: parse_or(var("READMATRIX_HISTORY_LIMIT"), "READMATRIX_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            use_context: var("READMATRIX_USE_CONTEXT").map_or(true, |raw| match parse_flag(&raw) {
                Some(flag) => flag,
                None => {
                    tracing::warn!(key = "READMATRIX_USE_CONTEXT", value = %raw, "Ignoring unparseable setting");
                    true
                }
            }),
            malformed_events: parse_or(
                var("READMATRIX_MALFORMED_EVENTS"),
                "READMATRIX_MALFORMED_EVENTS",
                MalformedEventPolicy::default(),
            ),
            connect_timeout: Duration::from_secs(parse_or(
                var("READMATRIX_CONNECT_TIMEOUT_SECS"),
                "READMATRIX_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
        }
    }

    /// The persisted conversation slot under the state directory
    pub fn identity_store(&self) -> FileIdentityStore {
        FileIdentityStore::in_dir(&self.state_dir)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            history_limit: self.history_limit,
            use_context: self.use_context,
            malformed_events: self.malformed_events,
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e: T::Err| {
        tracing::warn!(key, value = %raw, error = %e, "Ignoring unparseable setting");
        default
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
