//! Project data model: validated identifiers, resource requests and the
//! `Project` aggregate persisted by the registry.
//!
//! All types serialize to camelCase JSON so the on-disk files match the
//! layout the platform scripts already consume. Collections use the ordered
//! `BTreeMap`/`BTreeSet` variants: generated manifests and job definitions
//! must be deterministic for the same project.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// Project ID
// =============================================================================

/// A validated project identifier.
///
/// The ID must:
/// * contain 2 to 54 characters,
/// * contain only lowercase alphanumeric characters or `-`,
/// * start and end with an alphanumeric character.
///
/// The shape makes the ID safe to reuse downstream as a DNS label prefix,
/// a Kubernetes namespace suffix and a Jenkins job name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Validates and wraps a project ID.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !Self::is_valid(&id) {
            return Err(Error::Validation(format!(
                "invalid project id '{id}': must be 2 to 54 characters, \
                 lowercase alphanumeric or '-', starting and ending with an \
                 alphanumeric character"
            )));
        }
        Ok(Self(id))
    }

    /// Checks the ID shape without constructing.
    pub fn is_valid(id: &str) -> bool {
        let bytes = id.as_bytes();
        if bytes.len() < 2 || bytes.len() > 54 {
            return false;
        }
        let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        alnum(bytes[0])
            && alnum(bytes[bytes.len() - 1])
            && bytes.iter().all(|&b| alnum(b) || b == b'-')
    }

    /// The raw ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Resources
// =============================================================================

/// A memory/CPU ceiling or request.
///
/// Immutable value type; validated at construction and on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResources", rename_all = "camelCase")]
pub struct Resources {
    memory_mb: u32,
    cpu: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResources {
    memory_mb: u32,
    cpu: f32,
}

impl TryFrom<RawResources> for Resources {
    type Error = Error;
    fn try_from(raw: RawResources) -> Result<Self> {
        Self::new(raw.memory_mb, raw.cpu)
    }
}

impl Resources {
    /// Default sizing for a running app: 256 MB, 1 CPU.
    pub const DEFAULT_RUNTIME: Resources = Resources {
        memory_mb: 256,
        cpu: 1.0,
    };

    /// Default sizing for a build: 2048 MB, 2 CPUs.
    pub const DEFAULT_BUILD: Resources = Resources {
        memory_mb: 2048,
        cpu: 2.0,
    };

    /// Validates and constructs a resource request.
    ///
    /// The 64 MB floor matches the `requests/memory` value in the generated
    /// Kubernetes manifests; anything below it cannot be scheduled.
    pub fn new(memory_mb: u32, cpu: f32) -> Result<Self> {
        if memory_mb < 64 {
            return Err(Error::Validation(format!(
                "give the process at least 64 Mb: {memory_mb}"
            )));
        }
        if cpu <= 0.0 {
            return Err(Error::Validation(format!(
                "cpu: must be greater than 0 but got {cpu}"
            )));
        }
        Ok(Self { memory_mb, cpu })
    }

    /// Max memory, in megabytes.
    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }

    /// Max CPU cores; 1.0 means one full core.
    pub fn cpu(&self) -> f32 {
        self.cpu
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memory: {} MB; CPU: {} cores", self.memory_mb, self.cpu)
    }
}

/// Measured current usage of a running workload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesUsage {
    /// Current memory usage in megabytes.
    pub memory_mb: u32,
    /// Current CPU usage; 1.0 means one full core.
    pub cpu: f32,
}

impl ResourcesUsage {
    /// The canonical "nothing running" value.
    pub const ZERO: ResourcesUsage = ResourcesUsage {
        memory_mb: 0,
        cpu: 0.0,
    };
}

// =============================================================================
// Project Parts
// =============================================================================

/// The contact person responsible for a project. Build failure
/// notifications are mailed to [`ProjectOwner::email`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOwner {
    pub name: String,
    pub email: String,
}

impl fmt::Display for ProjectOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The git repository a project is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepo {
    /// E.g. `https://github.com/mvysny/vaadin-boot-example-gradle`.
    pub url: String,
    /// Usually `master` or `main`.
    pub branch: String,
    /// CI credentials UUID for private repositories.
    #[serde(rename = "credentialsID", default, skip_serializing_if = "Option::is_none")]
    pub credentials_id: Option<String>,
}

impl GitRepo {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_git_url(&self.url)?;
        if self.branch.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "branch '{}' must not contain whitespace",
                self.branch
            )));
        }
        if let Some(id) = &self.credentials_id {
            uuid::Uuid::parse_str(id).map_err(|e| {
                Error::Validation(format!("credentialsID '{id}' is not a UUID: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Validates a git clone URL: either `scheme://...` or scp-like
/// `[user@]host:path` syntax. Local paths are rejected.
pub fn validate_git_url(url: &str) -> Result<()> {
    if url.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "url '{url}' must not contain whitespace"
        )));
    }
    if !url.contains(':') {
        return Err(Error::Validation(format!(
            "url '{url}' must contain a colon (can not be a local path)"
        )));
    }
    if url.contains("://") {
        url::Url::parse(url)
            .map_err(|e| Error::Validation(format!("url '{url}' is not a valid URL: {e}")))?;
        return Ok(());
    }
    // scp-like: [user@]host:path, see git-clone(1) URLS
    if !is_scp_like(url) {
        return Err(Error::Validation(format!(
            "url '{url}' doesn't have valid scp-like syntax"
        )));
    }
    Ok(())
}

fn is_scp_like(url: &str) -> bool {
    let rest = match url.split_once('@') {
        Some((user, rest)) => {
            let mut chars = user.chars();
            let valid_user = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && user[1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "+.-".contains(c));
            if !valid_user {
                return false;
            }
            rest
        }
        None => url,
    };
    let Some((host, path)) = rest.split_once(':') else {
        return false;
    };
    let valid_host = host.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && host[1..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+.-".contains(c));
    valid_host
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+.-/~".contains(c))
}

/// How a running app is sized and configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRuntime {
    /// Resources the app needs while running. Keep these as low as
    /// possible so the host can fit more projects.
    pub resources: Resources,
    /// Environment variables passed to the main container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
}

impl ProjectRuntime {
    pub(crate) fn validate(&self) -> Result<()> {
        for key in self.env_vars.keys() {
            if key.chars().any(char::is_whitespace) {
                return Err(Error::Validation(format!(
                    "env var key '{key}' must not contain whitespace"
                )));
            }
        }
        Ok(())
    }
}

/// How a project is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Resources allocated for the build job.
    pub resources: Resources,
    /// Passed as `--build-arg name=value` to `docker build`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
    /// Alternative dockerfile path; defaults to `Dockerfile` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_file: Option<String>,
    /// Build context directory, relative to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_context: Option<String>,
}

impl BuildSpec {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(ctx) = &self.build_context {
            let bad = ctx.starts_with('/')
                || ctx.chars().any(char::is_whitespace)
                || ctx.split('/').any(|seg| seg == "..");
            if bad {
                return Err(Error::Validation(format!(
                    "buildContext '{ctx}' must be a relative path without '..' or whitespace"
                )));
            }
        }
        Ok(())
    }
}

/// Additional service types a project can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    /// A PostgreSQL database, reachable from the project's containers only.
    Postgres,
}

/// An additional service attached to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
}

/// Reverse-proxy tuning for a published project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Max request body size in megabytes; raise to allow large uploads.
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: u32,
    /// Proxy read timeout in seconds; raise for server-push workloads.
    #[serde(default = "default_proxy_read_timeout")]
    pub proxy_read_timeout_seconds: u32,
}

fn default_max_body_size_mb() -> u32 {
    1
}

fn default_proxy_read_timeout() -> u32 {
    60
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_body_size_mb: default_max_body_size_mb(),
            proxy_read_timeout_seconds: default_proxy_read_timeout(),
        }
    }
}

impl IngressConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_body_size_mb < 1 {
            return Err(Error::Validation(format!(
                "maxBodySizeMb: must be 1 or greater but was {}",
                self.max_body_size_mb
            )));
        }
        if self.proxy_read_timeout_seconds < 1 {
            return Err(Error::Validation(format!(
                "proxyReadTimeoutSeconds: must be 1 or greater but was {}",
                self.proxy_read_timeout_seconds
            )));
        }
        Ok(())
    }
}

/// How a project is published over http/https.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    /// Publish under the main host domain (`<host>/<id>` or `<id>.<host>`).
    #[serde(default = "default_true")]
    pub publish_on_main_domain: bool,
    /// Only affects additional domains; the main domain is always https.
    /// Set false when an upstream proxy already terminates TLS.
    #[serde(default = "default_true")]
    pub https: bool,
    /// Extra domains to publish at; must not include the main domain.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub additional_domains: BTreeSet<String>,
    #[serde(default)]
    pub ingress_config: IngressConfig,
}

fn default_true() -> bool {
    true
}

impl Default for Publication {
    fn default() -> Self {
        Self {
            publish_on_main_domain: true,
            https: true,
            additional_domains: BTreeSet::new(),
            ingress_config: IngressConfig::default(),
        }
    }
}

// =============================================================================
// Project
// =============================================================================

/// A hosted project: the aggregate root persisted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique, immutable identifier.
    pub id: ProjectId,
    /// Any additional vital information about the project.
    pub description: String,
    /// Project home page; falls back to the git URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage: Option<String>,
    pub git_repo: GitRepo,
    pub owner: ProjectOwner,
    pub runtime: ProjectRuntime,
    pub build: BuildSpec,
    #[serde(default)]
    pub publication: Publication,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub additional_services: BTreeSet<Service>,
    /// E-mails of additional users allowed to manage the project; they are
    /// also notified of build failures.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub additional_admins: BTreeSet<String>,
}

impl Project {
    /// Validates every nested value. Called before the project is persisted
    /// or handed to a backend.
    pub fn validate(&self) -> Result<()> {
        self.git_repo.validate()?;
        self.runtime.validate()?;
        self.build.validate()?;
        self.publication.ingress_config.validate()?;
        Ok(())
    }

    /// URLs this project can be browsed at when hosted on `host`.
    pub fn published_urls(&self, host: &str) -> Vec<String> {
        let mut urls = vec![format!("https://{host}/{}", self.id)];
        urls.extend(
            self.publication
                .additional_domains
                .iter()
                .map(|d| format!("https://{d}")),
        );
        urls
    }

    /// The project home page, defaulting to the git repository URL.
    pub fn resolve_webpage(&self) -> &str {
        self.webpage.as_deref().unwrap_or(&self.git_repo.url)
    }

    /// Whether `email` may manage this project (edit settings, view logs,
    /// delete it).
    pub fn can_edit(&self, email: &str) -> bool {
        self.owner.email == email || self.additional_admins.contains(email)
    }

    /// Owner plus additional admins; the notification and authorization set.
    pub fn all_admins(&self) -> BTreeSet<&str> {
        let mut admins: BTreeSet<&str> =
            self.additional_admins.iter().map(String::as_str).collect();
        admins.insert(self.owner.email.as_str());
        admins
    }

    /// Parses a project from JSON and validates it.
    pub fn from_json(json: &str) -> Result<Project> {
        let project: Project = serde_json::from_str(json)?;
        project.validate()?;
        Ok(project)
    }

    /// Pretty-printed JSON form, as stored in the registry.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_shapes() {
        assert!(ProjectId::new("vaadin-boot-example-gradle").is_ok());
        assert!(ProjectId::new("a9").is_ok());
        assert!(ProjectId::new("aa").is_ok());
        assert!(ProjectId::new("").is_err());
        // Single character: too short to satisfy both the leading and the
        // trailing alphanumeric position.
        assert!(ProjectId::new("a").is_err());
        assert!(ProjectId::new("9").is_err());
        assert!(ProjectId::new("-leading").is_err());
        assert!(ProjectId::new("trailing-").is_err());
        assert!(ProjectId::new("UpperCase").is_err());
        assert!(ProjectId::new("under_score").is_err());
        assert!(ProjectId::new("a".repeat(54)).is_ok());
        assert!(ProjectId::new("a".repeat(55)).is_err());
    }

    #[test]
    fn test_resources_floor() {
        assert!(Resources::new(64, 0.5).is_ok());
        assert!(Resources::new(63, 0.5).is_err());
        assert!(Resources::new(256, 0.0).is_err());
        assert!(Resources::new(256, -1.0).is_err());
    }

    #[test]
    fn test_git_url_validation() {
        assert!(validate_git_url("https://github.com/mvysny/shepherd").is_ok());
        assert!(validate_git_url("ssh://git@github.com/mvysny/shepherd").is_ok());
        assert!(validate_git_url("git@github.com:mvysny/shepherd").is_ok());
        assert!(validate_git_url("github.com:mvysny/shepherd").is_ok());
        assert!(validate_git_url("/home/user/repo").is_err());
        assert!(validate_git_url("https://github.com/a b").is_err());
    }

    #[test]
    fn test_scp_like_rejects_bad_hosts() {
        assert!(!is_scp_like("9host:path"));
        assert!(!is_scp_like("nopath"));
        assert!(is_scp_like("user@host:some/path"));
    }
}
