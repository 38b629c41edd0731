use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;
use ts_core::MatchPolicy;

// Deployment platforms hand the port in via PORT.
const PORT_ENV: &str = "PORT";
const BIND_ADDR_ENV: &str = "BIND_ADDR";
const DATA_PATH_ENV: &str = "DATA_PATH";
// Fail on duplicate (ticker, field) rows instead of taking the first one.
const STRICT_MATCH_ENV: &str = "SERIES_STRICT_MATCH";
// Reject non-numeric year cells at load time.
const STRICT_CELLS_ENV: &str = "SERIES_STRICT_CELLS";

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DATA_PATH: &str = "data/data.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0:?}")]
    Port(String),
    #[error("invalid BIND_ADDR: {0:?}")]
    BindAddr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub addr: SocketAddr,
    pub data_path: PathBuf,
    pub match_policy: MatchPolicy,
    pub strict_cells: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup(PORT_ENV) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Port(raw))?,
            None => DEFAULT_PORT,
        };
        let ip = match lookup(BIND_ADDR_ENV) {
            Some(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::BindAddr(raw))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let data_path = lookup(DATA_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        let match_policy = if flag(lookup(STRICT_MATCH_ENV)) {
            MatchPolicy::RejectDuplicates
        } else {
            MatchPolicy::FirstMatch
        };

        Ok(Self {
            addr: SocketAddr::new(ip, port),
            data_path,
            match_policy,
            strict_cells: flag(lookup(STRICT_CELLS_ENV)),
        })
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
