use super::{AddressLookupApi, NetworkAttachment, OrchestrationApi, TaskHandle};
use crate::builder::LaunchSpec;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Shared plumbing for the JSON-over-HTTP backends.
#[derive(Debug, Clone)]
struct Endpoint {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl Endpoint {
    fn new(client: Client, base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid backend URL '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Backend URL '{base_url}' cannot be used as a base"));
        }
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Build `base/seg1/seg2...`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Backend URL cannot be used as a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn check(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(anyhow!("Failed to {what}: {status} - {error_text}"))
}

/// Orchestration backend reached over HTTP.
///
/// `POST /tasks` launches, `GET /tasks/{handle}` describes and
/// `POST /tasks/{handle}/stop` stops.
#[derive(Debug, Clone)]
pub struct HttpOrchestrationApi {
    endpoint: Endpoint,
}

impl HttpOrchestrationApi {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(client, base_url, token)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchResponse {
    task_handle: Option<String>,
    #[serde(default)]
    failures: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeResponse {
    #[serde(default)]
    attachments: Vec<AttachmentBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentBody {
    network_interface_id: Option<String>,
}

#[async_trait]
impl OrchestrationApi for HttpOrchestrationApi {
    async fn launch(&self, spec: &LaunchSpec) -> Result<TaskHandle> {
        let url = self.endpoint.url(&["tasks"])?;
        let response = self
            .endpoint
            .request(Method::POST, url)
            .json(spec)
            .send()
            .await
            .context("Failed to send launch request")?;

        let body: LaunchResponse = check(response, "launch task")
            .await?
            .json()
            .await
            .context("Failed to parse launch response")?;

        match body.task_handle.filter(|h| !h.is_empty()) {
            Some(handle) => Ok(TaskHandle::new(handle)),
            None if body.failures.is_empty() => Err(anyhow!("Backend returned no task handle")),
            None => Err(anyhow!("Backend rejected launch: {}", body.failures.join("; "))),
        }
    }

    async fn describe(&self, handle: &TaskHandle) -> Result<Option<NetworkAttachment>> {
        let url = self.endpoint.url(&["tasks", handle.as_str()])?;
        let response = self
            .endpoint
            .request(Method::GET, url)
            .send()
            .await
            .context("Failed to send describe request")?;

        let body: DescribeResponse = check(response, "describe task")
            .await?
            .json()
            .await
            .context("Failed to parse describe response")?;

        debug!("Task {} has {} attachment(s)", handle, body.attachments.len());

        Ok(body
            .attachments
            .into_iter()
            .find_map(|a| a.network_interface_id.filter(|id| !id.is_empty()))
            .map(|network_interface_id| NetworkAttachment {
                network_interface_id,
            }))
    }

    async fn stop(&self, handle: &TaskHandle) -> Result<()> {
        let url = self.endpoint.url(&["tasks", handle.as_str(), "stop"])?;
        let response = self
            .endpoint
            .request(Method::POST, url)
            .send()
            .await
            .context("Failed to send stop request")?;

        check(response, "stop task").await?;
        Ok(())
    }
}

/// Network-interface lookup reached over HTTP: `GET /network-interfaces/{id}`.
#[derive(Debug, Clone)]
pub struct HttpAddressLookup {
    endpoint: Endpoint,
}

impl HttpAddressLookup {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(client, base_url, token)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceResponse {
    public_ip: Option<String>,
}

#[async_trait]
impl AddressLookupApi for HttpAddressLookup {
    async fn lookup_public_address(&self, interface_id: &str) -> Result<Option<String>> {
        let url = self.endpoint.url(&["network-interfaces", interface_id])?;
        let response = self
            .endpoint
            .request(Method::GET, url)
            .send()
            .await
            .context("Failed to send interface lookup")?;

        let body: InterfaceResponse = check(response, "look up network interface")
            .await?
            .json()
            .await
            .context("Failed to parse interface response")?;

        Ok(body.public_ip.filter(|ip| !ip.is_empty()))
    }
}
