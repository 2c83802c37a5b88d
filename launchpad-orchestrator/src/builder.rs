//! Maps a resource type plus caller parameters to a launch specification.
//!
//! Every workload goes through the same path: resolve the [`Workload`] variant,
//! look up its [`WorkloadProfile`] (image family, container port, URI template)
//! and assemble the environment. Nothing here performs I/O, so a plan can be
//! rebuilt from a stored record at any time.

use crate::error::{OrchestratorError, Result};
use crate::git_trigger::RepoRef;
use crate::resource::{DatabaseEngine, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const DEFAULT_APP_PORT: u16 = 3000;
const DEFAULT_GIT_BRANCH: &str = "main";

/// Caller-supplied provisioning parameters. Which fields are required depends
/// on the workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisionParams {
    #[serde(alias = "resourceName", alias = "projectName")]
    pub name: Option<String>,
    pub dbtype: Option<String>,
    pub dbuser: Option<String>,
    pub dbpass: Option<String>,
    pub dbname: Option<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "repoUrl")]
    pub git_url: Option<String>,
    #[serde(alias = "branch")]
    pub git_branch: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ProvisionParams {
    fn required<'a>(&'a self, field: &'static str, value: &'a Option<String>) -> Result<&'a str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OrchestratorError::InvalidInput(format!("missing required field '{field}'")))
    }
}

/// The concrete thing being launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    Database(DatabaseEngine),
    Webbuilder,
    Virtualspace,
    Chatbot,
    App,
}

impl Workload {
    pub fn resolve(kind: ResourceKind, params: &ProvisionParams) -> Result<Self> {
        Ok(match kind {
            ResourceKind::Database => {
                let dbtype = params.required("dbtype", &params.dbtype)?;
                Self::Database(dbtype.parse()?)
            }
            ResourceKind::Webbuilder => Self::Webbuilder,
            ResourceKind::Virtualspace => Self::Virtualspace,
            ResourceKind::Chatbot => Self::Chatbot,
            ResourceKind::App => Self::App,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Database(_) => ResourceKind::Database,
            Self::Webbuilder => ResourceKind::Webbuilder,
            Self::Virtualspace => ResourceKind::Virtualspace,
            Self::Chatbot => ResourceKind::Chatbot,
            Self::App => ResourceKind::App,
        }
    }

    pub fn engine(&self) -> Option<DatabaseEngine> {
        match self {
            Self::Database(engine) => Some(*engine),
            _ => None,
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            Self::Database(engine) => engine.as_str(),
            other => other.kind().as_str(),
        }
    }
}

/// How a resolved endpoint becomes the caller-facing URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriTemplate {
    Mysql,
    Mongodb,
    Redis,
    Qdrant,
    PublicHost { host_suffix: String },
}

/// URIs handed back once a workload is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    #[serde(rename = "connectionURI")]
    pub connection_uri: String,
    pub ui_url: Option<String>,
    pub project_url: Option<String>,
}

impl UriTemplate {
    pub fn render(&self, resource_name: &str, params: &ProvisionParams, endpoint: &str) -> ConnectionDetails {
        let user = params.dbuser.as_deref().unwrap_or_default();
        let pass = params.dbpass.as_deref().unwrap_or_default();
        let db = params.dbname.as_deref().unwrap_or_default();

        match self {
            Self::Mysql => ConnectionDetails {
                connection_uri: format!("mysql://{user}:{pass}@{endpoint}:3306/{db}"),
                ui_url: None,
                project_url: None,
            },
            Self::Mongodb => ConnectionDetails {
                connection_uri: format!("mongodb://{user}:{pass}@{endpoint}:27017/{db}"),
                ui_url: None,
                project_url: None,
            },
            Self::Redis => ConnectionDetails {
                connection_uri: format!("redis://:{pass}@{endpoint}:6379"),
                ui_url: Some(format!("http://{endpoint}:8081")),
                project_url: None,
            },
            Self::Qdrant => ConnectionDetails {
                connection_uri: format!("https://{endpoint}:6333"),
                ui_url: Some(format!("https://{endpoint}:6333/dashboard")),
                project_url: None,
            },
            Self::PublicHost { host_suffix } => {
                let url = public_url(resource_name, host_suffix);
                ConnectionDetails {
                    connection_uri: url.clone(),
                    ui_url: None,
                    project_url: Some(url),
                }
            }
        }
    }
}

fn public_url(resource_name: &str, host_suffix: &str) -> String {
    format!("https://{resource_name}.{host_suffix}")
}

#[derive(Debug, Clone)]
pub struct WorkloadProfile {
    pub task_family: String,
    pub container_port: u16,
    pub template: UriTemplate,
}

/// Fixed network/security-group profile every workload is placed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPlacement {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    pub cluster: String,
    pub task_family: String,
    pub container_name: String,
    pub container_port: u16,
    pub replicas: u32,
    pub environment: BTreeMap<String, String>,
    pub network: NetworkPlacement,
}

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub cluster: String,
    pub base_domain: String,
    pub task_family_prefix: String,
    pub network: NetworkPlacement,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            cluster: "launchpad".to_string(),
            base_domain: "launchpad.dev".to_string(),
            task_family_prefix: "launchpad".to_string(),
            network: NetworkPlacement {
                subnets: Vec::new(),
                security_groups: Vec::new(),
                assign_public_ip: true,
            },
        }
    }
}

impl BuilderConfig {
    pub fn host_suffix(&self, kind: ResourceKind) -> String {
        let sub = match kind {
            ResourceKind::Webbuilder => "sites",
            ResourceKind::Virtualspace => "spaces",
            ResourceKind::Chatbot => "bots",
            ResourceKind::App | ResourceKind::Database => "apps",
        };
        format!("{sub}.{}", self.base_domain)
    }
}

/// Everything needed to launch one resource and interpret its endpoint.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub workload: Workload,
    pub resource_name: String,
    pub spec: LaunchSpec,
    pub template: UriTemplate,
    params: ProvisionParams,
}

impl ProvisionPlan {
    pub fn connection_for(&self, endpoint: &str) -> ConnectionDetails {
        self.template.render(&self.resource_name, &self.params, endpoint)
    }

    pub fn params(&self) -> &ProvisionParams {
        &self.params
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequestBuilder {
    config: BuilderConfig,
    profiles: HashMap<Workload, WorkloadProfile>,
}

impl Default for ProvisionRequestBuilder {
    fn default() -> Self {
        Self::new(BuilderConfig::default())
    }
}

impl ProvisionRequestBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        let family = |slug: &str| format!("{}-{slug}", config.task_family_prefix);
        let hosted = |kind: ResourceKind| UriTemplate::PublicHost {
            host_suffix: config.host_suffix(kind),
        };

        let table = [
            (Workload::Database(DatabaseEngine::Mysql), 3306, UriTemplate::Mysql),
            (Workload::Database(DatabaseEngine::Mongodb), 27017, UriTemplate::Mongodb),
            (Workload::Database(DatabaseEngine::Redis), 6379, UriTemplate::Redis),
            (Workload::Database(DatabaseEngine::Qdrant), 6333, UriTemplate::Qdrant),
            (Workload::Webbuilder, 80, hosted(ResourceKind::Webbuilder)),
            (Workload::Virtualspace, 8080, hosted(ResourceKind::Virtualspace)),
            (Workload::Chatbot, 3000, hosted(ResourceKind::Chatbot)),
            (Workload::App, DEFAULT_APP_PORT, hosted(ResourceKind::App)),
        ];

        let profiles = table
            .into_iter()
            .map(|(workload, container_port, template)| {
                let profile = WorkloadProfile {
                    task_family: family(workload.slug()),
                    container_port,
                    template,
                };
                (workload, profile)
            })
            .collect();

        Self { config, profiles }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Validate `resource_type` and `params` and produce a launch plan.
    pub fn build(&self, resource_type: &str, params: &ProvisionParams) -> Result<ProvisionPlan> {
        let kind: ResourceKind = resource_type.parse()?;
        let workload = Workload::resolve(kind, params)?;
        let profile = self.profiles.get(&workload).ok_or_else(|| {
            OrchestratorError::InvalidResourceType(format!("{kind}/{}", workload.slug()))
        })?;

        let resource_name = resource_name(workload, params)?;
        let (environment, container_port) = self.environment(workload, &resource_name, params, profile)?;

        let spec = LaunchSpec {
            cluster: self.config.cluster.clone(),
            task_family: profile.task_family.clone(),
            container_name: format!("{}-{}", workload.slug(), resource_name),
            container_port,
            replicas: 1,
            environment,
            network: self.config.network.clone(),
        };

        Ok(ProvisionPlan {
            workload,
            resource_name,
            spec,
            template: profile.template.clone(),
            params: params.clone(),
        })
    }

    fn environment(
        &self,
        workload: Workload,
        resource_name: &str,
        params: &ProvisionParams,
        profile: &WorkloadProfile,
    ) -> Result<(BTreeMap<String, String>, u16)> {
        // Caller extras first so profile keys always win.
        let mut env = params.env.clone();
        let mut port = profile.container_port;
        let mut set = |key: &str, value: &str| {
            env.insert(key.to_string(), value.to_string());
        };

        match workload {
            Workload::Database(DatabaseEngine::Mysql) => {
                let user = params.required("dbuser", &params.dbuser)?;
                let pass = params.required("dbpass", &params.dbpass)?;
                let db = params.required("dbname", &params.dbname)?;
                set("MYSQL_ROOT_PASSWORD", pass);
                set("MYSQL_DATABASE", db);
                // The mysql image refuses MYSQL_USER=root.
                if user != "root" {
                    set("MYSQL_USER", user);
                    set("MYSQL_PASSWORD", pass);
                }
            }
            Workload::Database(DatabaseEngine::Mongodb) => {
                set("MONGO_INITDB_ROOT_USERNAME", params.required("dbuser", &params.dbuser)?);
                set("MONGO_INITDB_ROOT_PASSWORD", params.required("dbpass", &params.dbpass)?);
                set("MONGO_INITDB_DATABASE", params.required("dbname", &params.dbname)?);
            }
            Workload::Database(DatabaseEngine::Redis) => {
                let pass = params.required("dbpass", &params.dbpass)?;
                set("REDIS_PASSWORD", pass);
                set("REDIS_ARGS", &format!("--requirepass {pass}"));
            }
            Workload::Database(DatabaseEngine::Qdrant) => {
                set("QDRANT_COLLECTION", params.required("dbname", &params.dbname)?);
            }
            Workload::Webbuilder => {
                set("SITE_NAME", resource_name);
                if let Some(user) = &params.admin_user {
                    set("ADMIN_USER", user);
                }
                if let Some(pass) = &params.admin_password {
                    set("ADMIN_PASSWORD", pass);
                }
            }
            Workload::Virtualspace => {
                set("WORKSPACE_NAME", resource_name);
                if let Some(pass) = &params.admin_password {
                    set("PASSWORD", pass);
                }
            }
            Workload::Chatbot => {
                set("BOT_NAME", resource_name);
            }
            Workload::App => {
                let git_url = params.required("gitUrl", &params.git_url)?;
                RepoRef::parse(git_url)?;
                port = params.port.unwrap_or(DEFAULT_APP_PORT);
                set("GIT_URL", git_url);
                set(
                    "GIT_BRANCH",
                    params.git_branch.as_deref().unwrap_or(DEFAULT_GIT_BRANCH),
                );
                set("PORT", &port.to_string());
            }
        }

        if let UriTemplate::PublicHost { host_suffix } = &profile.template {
            set("PUBLIC_URL", &public_url(resource_name, host_suffix));
        }

        Ok((env, port))
    }
}

/// Name used in container names and public hostnames.
///
/// Hosted workloads put the name straight into a hostname, so it must already
/// be a DNS label. Databases keep their raw `dbname` for the engine and URI and
/// only derive a label from it here.
fn resource_name(workload: Workload, params: &ProvisionParams) -> Result<String> {
    let name = match workload {
        Workload::Database(_) => {
            let raw = params
                .name
                .as_deref()
                .or(params.dbname.as_deref())
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| OrchestratorError::InvalidInput("missing required field 'dbname'".into()))?;
            label_from(raw)
        }
        _ => params.required("name", &params.name)?.to_ascii_lowercase(),
    };

    if !is_dns_label(&name) {
        return Err(OrchestratorError::InvalidInput(format!(
            "'{name}' is not a valid resource name (lowercase letters, digits and '-', at most 63 characters)"
        )));
    }

    Ok(name)
}

/// Lowercase, map anything outside `[a-z0-9-]` to '-', trim dashes, cap at 63.
fn label_from(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    let trimmed = mapped.trim_matches('-');
    let capped = &trimmed[..trimmed.len().min(63)];
    capped.trim_end_matches('-').to_string()
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
