use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Result;
use tracing::warn;

use crate::models::MissingIndexPolicy;

const ENV_PREFIX: &str = "WORKFLOW_INDEX_";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub workflows_dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub missing_policy: MissingIndexPolicy,
    pub service_map: Option<PathBuf>,
    pub default_per_page: usize,
    pub max_per_page: usize,
    pub deep_search_limit: usize,
    pub deep_search_max_limit: usize,
    pub deep_search_timeout: Duration,
    pub read_timeout: Duration,
    pub rebuild_timeout: Duration,
    pub deep_search_per_minute: u32,
    pub deep_search_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workflows_dir: PathBuf::from("workflows"),
            snapshot_path: PathBuf::from("workflow_index.json"),
            missing_policy: MissingIndexPolicy::Rebuild,
            service_map: None,
            default_per_page: 20,
            max_per_page: 100,
            deep_search_limit: 50,
            deep_search_max_limit: 200,
            deep_search_timeout: Duration::from_millis(5_000),
            read_timeout: Duration::from_millis(5_000),
            rebuild_timeout: Duration::from_millis(120_000),
            deep_search_per_minute: 30,
            deep_search_burst: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Builds the config from a key lookup (`key` without the env prefix).
    /// Unparsable values fall back to their defaults.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| normalize(&v))
                .filter(|v| !v.is_empty())
        };

        let bind_addr = parse_or(get("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr);
        let workflows_dir = get("WORKFLOWS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workflows_dir);
        let snapshot_path = get("SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.snapshot_path);
        let missing_policy = parse_or(
            get("MISSING_POLICY"),
            "MISSING_POLICY",
            defaults.missing_policy,
        );
        let service_map = get("SERVICE_MAP").map(PathBuf::from);

        let max_per_page = parse_or(get("MAX_PER_PAGE"), "MAX_PER_PAGE", defaults.max_per_page)
            .max(1);
        let default_per_page = parse_or(
            get("DEFAULT_PER_PAGE"),
            "DEFAULT_PER_PAGE",
            defaults.default_per_page,
        )
        .clamp(1, max_per_page);

        let deep_search_max_limit = parse_or(
            get("DEEP_SEARCH_MAX_LIMIT"),
            "DEEP_SEARCH_MAX_LIMIT",
            defaults.deep_search_max_limit,
        )
        .max(1);
        let deep_search_limit = parse_or(
            get("DEEP_SEARCH_LIMIT"),
            "DEEP_SEARCH_LIMIT",
            defaults.deep_search_limit,
        )
        .clamp(1, deep_search_max_limit);

        let deep_search_timeout = Duration::from_millis(parse_or(
            get("DEEP_SEARCH_TIMEOUT_MS"),
            "DEEP_SEARCH_TIMEOUT_MS",
            defaults.deep_search_timeout.as_millis() as u64,
        ));
        let read_timeout = Duration::from_millis(parse_or(
            get("READ_TIMEOUT_MS"),
            "READ_TIMEOUT_MS",
            defaults.read_timeout.as_millis() as u64,
        ));
        let rebuild_timeout = Duration::from_millis(parse_or(
            get("REBUILD_TIMEOUT_MS"),
            "REBUILD_TIMEOUT_MS",
            defaults.rebuild_timeout.as_millis() as u64,
        ));

        let deep_search_per_minute = parse_or(
            get("DEEP_SEARCH_PER_MINUTE"),
            "DEEP_SEARCH_PER_MINUTE",
            defaults.deep_search_per_minute,
        );
        let deep_search_burst = parse_or(
            get("DEEP_SEARCH_BURST"),
            "DEEP_SEARCH_BURST",
            defaults.deep_search_burst,
        );

        Ok(Self {
            bind_addr,
            workflows_dir,
            snapshot_path,
            missing_policy,
            service_map,
            default_per_page,
            max_per_page,
            deep_search_limit,
            deep_search_max_limit,
            deep_search_timeout,
            read_timeout,
            rebuild_timeout,
            deep_search_per_minute,
            deep_search_burst,
        })
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring invalid {ENV_PREFIX}{key}={raw}, using default");
            default
        }),
        None => default,
    }
}
