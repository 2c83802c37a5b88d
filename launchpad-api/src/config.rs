use launchpad_orchestrator::builder::NetworkPlacement;
use launchpad_orchestrator::{BuilderConfig, CoordinatorOptions, ResolvePolicy};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_orchestration_url")]
    pub orchestration_url: String,

    #[serde(default = "default_orchestration_token")]
    pub orchestration_token: Option<String>,

    #[serde(default = "default_network_url")]
    pub network_url: String,

    #[serde(default = "default_cluster")]
    pub cluster: String,

    #[serde(default = "default_subnets")]
    pub subnets: Vec<String>,

    #[serde(default = "default_security_groups")]
    pub security_groups: Vec<String>,

    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    #[serde(default = "default_github_token")]
    pub github_token: Option<String>,

    /// Public base URL the source-control provider calls back on push.
    /// App deployments are rejected when unset.
    #[serde(default = "default_webhook_callback_base")]
    pub webhook_callback_base: Option<String>,

    #[serde(default = "default_webhook_secret")]
    pub webhook_secret: String,

    #[serde(default = "default_resolve_delay")]
    pub resolve_delay_secs: u64,

    #[serde(default = "default_resolve_max_attempts")]
    pub resolve_max_attempts: u32,

    #[serde(default = "default_stop_unresolved")]
    pub stop_unresolved: bool,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(key: &str) -> Vec<String> {
    env_opt(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn default_bind_addr() -> String {
    env_opt("LAUNCHPAD_BIND").unwrap_or_else(|| "0.0.0.0:3130".to_string())
}

fn default_db_path() -> PathBuf {
    if let Some(path) = env_opt("LAUNCHPAD_DB_PATH") {
        return PathBuf::from(path);
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("launchpad").join("launchpad.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".launchpad").join("launchpad.db")
    }
}

fn default_orchestration_url() -> String {
    env_opt("LAUNCHPAD_ORCHESTRATION_URL").unwrap_or_else(|| "http://127.0.0.1:8600".to_string())
}

fn default_orchestration_token() -> Option<String> {
    env_opt("LAUNCHPAD_ORCHESTRATION_TOKEN")
}

fn default_network_url() -> String {
    env_opt("LAUNCHPAD_NETWORK_URL").unwrap_or_else(default_orchestration_url)
}

fn default_cluster() -> String {
    env_opt("LAUNCHPAD_CLUSTER").unwrap_or_else(|| "launchpad".to_string())
}

fn default_subnets() -> Vec<String> {
    env_list("LAUNCHPAD_SUBNETS")
}

fn default_security_groups() -> Vec<String> {
    env_list("LAUNCHPAD_SECURITY_GROUPS")
}

fn default_base_domain() -> String {
    env_opt("LAUNCHPAD_BASE_DOMAIN").unwrap_or_else(|| "launchpad.dev".to_string())
}

fn default_github_api_url() -> String {
    env_opt("LAUNCHPAD_GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".to_string())
}

fn default_github_token() -> Option<String> {
    env_opt("LAUNCHPAD_GITHUB_TOKEN")
}

fn default_webhook_callback_base() -> Option<String> {
    env_opt("LAUNCHPAD_WEBHOOK_CALLBACK_BASE")
}

fn default_webhook_secret() -> String {
    env_opt("LAUNCHPAD_WEBHOOK_SECRET").unwrap_or_default()
}

fn default_resolve_delay() -> u64 {
    env_opt("LAUNCHPAD_RESOLVE_DELAY_SECS")
        .and_then(|s| s.parse().ok())
        .unwrap_or(8)
}

fn default_resolve_max_attempts() -> u32 {
    env_opt("LAUNCHPAD_RESOLVE_MAX_ATTEMPTS")
        .and_then(|s| s.parse().ok())
        .unwrap_or(4)
}

fn default_stop_unresolved() -> bool {
    env_opt("LAUNCHPAD_STOP_UNRESOLVED")
        .map(|s| !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            orchestration_url: default_orchestration_url(),
            orchestration_token: default_orchestration_token(),
            network_url: default_network_url(),
            cluster: default_cluster(),
            subnets: default_subnets(),
            security_groups: default_security_groups(),
            base_domain: default_base_domain(),
            github_api_url: default_github_api_url(),
            github_token: default_github_token(),
            webhook_callback_base: default_webhook_callback_base(),
            webhook_secret: default_webhook_secret(),
            resolve_delay_secs: default_resolve_delay(),
            resolve_max_attempts: default_resolve_max_attempts(),
            stop_unresolved: default_stop_unresolved(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            cluster: self.cluster.clone(),
            base_domain: self.base_domain.clone(),
            network: NetworkPlacement {
                subnets: self.subnets.clone(),
                security_groups: self.security_groups.clone(),
                assign_public_ip: true,
            },
            ..BuilderConfig::default()
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            resolve_policy: ResolvePolicy {
                initial_delay: Duration::from_secs(self.resolve_delay_secs),
                max_attempts: self.resolve_max_attempts.max(1),
                ..ResolvePolicy::default()
            },
            stop_unresolved_workloads: self.stop_unresolved,
        }
    }
}
