//! Source-control webhook registration for git-deployed apps.

use crate::error::{OrchestratorError, Result};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// `owner/repo` pair parsed from a git remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Accepts `https://host/owner/repo(.git)` and `git@host:owner/repo(.git)`.
    pub fn parse(git_url: &str) -> Result<Self> {
        let invalid = || OrchestratorError::InvalidInput(format!("unsupported git URL '{git_url}'"));
        let git_url = git_url.trim();

        let path = match git_url.strip_prefix("git@") {
            Some(rest) => rest.split_once(':').map(|(_, path)| path.to_string()).ok_or_else(invalid)?,
            None => Url::parse(git_url).map_err(|_| invalid())?.path().to_string(),
        };

        let mut segments = path.trim_matches('/').split('/');
        let owner = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let repo = segments
            .next()
            .map(|s| s.trim_end_matches(".git"))
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid)?;
        if segments.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A webhook registration as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    pub url: Option<String>,
}

/// Source-control webhook API.
#[async_trait]
pub trait HookApi: Send + Sync {
    async fn list_hooks(&self, repo: &RepoRef) -> anyhow::Result<Vec<Hook>>;

    async fn create_hook(&self, repo: &RepoRef, url: &str, secret: &str) -> anyhow::Result<Hook>;

    async fn delete_hook(&self, repo: &RepoRef, hook_id: &str) -> anyhow::Result<()>;
}

/// GitHub REST implementation of [`HookApi`].
#[derive(Debug, Clone)]
pub struct GithubHookApi {
    client: Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct GithubHook {
    id: u64,
    #[serde(default)]
    config: GithubHookConfig,
}

#[derive(Default, Deserialize)]
struct GithubHookConfig {
    url: Option<String>,
}

impl From<GithubHook> for Hook {
    fn from(hook: GithubHook) -> Self {
        Self {
            id: hook.id.to_string(),
            url: hook.config.url,
        }
    }
}

impl GithubHookApi {
    pub fn new(client: Client, api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn hooks_url(&self, repo: &RepoRef) -> String {
        format!("{}/repos/{}/{}/hooks", self.api_url, repo.owner, repo.repo)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "launchpad-orchestrator");

        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }
}

async fn error_for_status(response: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(anyhow!("Failed to {what}: {status} - {error_text}"))
}

#[async_trait]
impl HookApi for GithubHookApi {
    async fn list_hooks(&self, repo: &RepoRef) -> anyhow::Result<Vec<Hook>> {
        let response = self
            .request(reqwest::Method::GET, &self.hooks_url(repo))
            .send()
            .await
            .context("Failed to send request to GitHub")?;

        let hooks: Vec<GithubHook> = error_for_status(response, "list hooks")
            .await?
            .json()
            .await
            .context("Failed to parse hook list")?;

        Ok(hooks.into_iter().map(Hook::from).collect())
    }

    async fn create_hook(&self, repo: &RepoRef, url: &str, secret: &str) -> anyhow::Result<Hook> {
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": url,
                "content_type": "json",
                "secret": secret,
                "insecure_ssl": "0",
            }
        });

        let response = self
            .request(reqwest::Method::POST, &self.hooks_url(repo))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to GitHub")?;

        let hook: GithubHook = error_for_status(response, "create hook")
            .await?
            .json()
            .await
            .context("Failed to parse created hook")?;

        Ok(hook.into())
    }

    async fn delete_hook(&self, repo: &RepoRef, hook_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/{hook_id}", self.hooks_url(repo));
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .context("Failed to send request to GitHub")?;

        error_for_status(response, "delete hook").await?;
        Ok(())
    }
}

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Keeps exactly one push webhook per callback URL.
#[derive(Clone)]
pub struct GitTriggerAdapter {
    api: Arc<dyn HookApi>,
    callback_base: String,
    secret: String,
}

impl GitTriggerAdapter {
    pub fn new(api: Arc<dyn HookApi>, callback_base: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api,
            callback_base: callback_base.into(),
            secret: secret.into(),
        }
    }

    /// URL the provider calls on push for a given project.
    pub fn callback_url(&self, project_id: &str) -> Result<String> {
        let base = format!("{}/deploy/app", self.callback_base.trim_end_matches('/'));
        let mut url = Url::parse(&base).map_err(|e| {
            OrchestratorError::WebhookRegistrationFailed(format!("invalid callback base '{base}': {e}"))
        })?;
        url.query_pairs_mut().append_pair("projectId", project_id);
        Ok(url.into())
    }

    /// Replace any registration pointing at `callback_url` with a fresh one.
    /// Returns the new hook id.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn register(&self, repo: &RepoRef, callback_url: &str) -> Result<String> {
        let failed = |e: anyhow::Error| OrchestratorError::WebhookRegistrationFailed(format!("{repo}: {e:#}"));

        let existing = self.api.list_hooks(repo).await.map_err(failed)?;
        for hook in existing
            .iter()
            .filter(|hook| hook.url.as_deref() == Some(callback_url))
        {
            debug!("Removing stale webhook {} on {}", hook.id, repo);
            self.api.delete_hook(repo, &hook.id).await.map_err(failed)?;
        }

        let hook = self
            .api
            .create_hook(repo, callback_url, &self.secret)
            .await
            .map_err(failed)?;

        info!("Registered webhook {} on {}", hook.id, repo);
        Ok(hook.id)
    }

    /// `sha256=<hex>` HMAC of a callback payload under the shared secret, as
    /// the provider sends it in `X-Hub-Signature-256`.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| OrchestratorError::InvalidInput(format!("invalid webhook secret: {e}")))?;
        mac.update(payload);
        Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
    }

    /// Check a callback payload against its signature header.
    pub fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> bool {
        let Some(digest) = signature
            .and_then(|s| s.trim().strip_prefix(SIGNATURE_PREFIX))
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
        else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };

        mac.update(payload);
        mac.verify_slice(&digest).is_ok()
    }

    pub async fn unregister(&self, repo: &RepoRef, hook_id: &str) -> Result<()> {
        self.api.delete_hook(repo, hook_id).await.map_err(|e| {
            warn!("Failed to remove webhook {} on {}: {:#}", hook_id, repo, e);
            OrchestratorError::WebhookRegistrationFailed(format!("{repo}: {e:#}"))
        })
    }
}
