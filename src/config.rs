//! Global configuration and the filesystem layout the orchestrator works in.
//!
//! The config file is re-read at the start of every privileged operation so
//! that admin edits to the quota ceilings take effect immediately; nothing
//! in the core caches it across operations.

use crate::error::{Error, Result};
use crate::project::{ProjectId, Resources};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which container backend runs the project workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerSystem {
    #[serde(rename = "kubernetes")]
    Kubernetes,
    #[serde(rename = "traefik-docker")]
    TraefikDocker,
}

/// Jenkins endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// Process-wide configuration, loaded once per privileged operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Memory available for project runtimes plus provisioned builds:
    /// the host memory minus Jenkins, the container system itself and the OS.
    pub memory_quota_mb: u32,
    /// Number of concurrent job runners in Jenkins; build memory is
    /// provisioned for at most this many simultaneous builds.
    #[serde(default = "default_builders")]
    pub concurrent_jenkins_builders: usize,
    /// Per-project ceiling for runtime resources.
    #[serde(default = "default_max_runtime")]
    pub max_project_runtime_resources: Resources,
    /// Per-project ceiling for build resources.
    #[serde(default = "default_max_build")]
    pub max_project_build_resources: Resources,
    /// The main domain the host serves, e.g. `v-herd.eu`.
    #[serde(rename = "hostDNS")]
    pub host_dns: String,
    /// Which container backend to drive.
    pub container_system: ContainerSystem,
    #[serde(default)]
    pub jenkins: JenkinsConfig,
}

fn default_builders() -> usize {
    2
}

fn default_max_runtime() -> Resources {
    Resources::DEFAULT_RUNTIME
}

fn default_max_build() -> Resources {
    Resources::DEFAULT_BUILD
}

impl Config {
    /// Loads the config from a JSON file; fails clearly when the file is
    /// missing or malformed.
    pub fn load(path: &Path) -> Result<Config> {
        debug!("loading config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Validation(format!("config {} is malformed: {e}", path.display()))
        })
    }
}

// =============================================================================
// Filesystem Layout
// =============================================================================

/// The configuration folder the orchestrator works in, `/etc/shepherd` by
/// default. Holds the global config, the project registry and the generated
/// Kubernetes manifests.
#[derive(Debug, Clone)]
pub struct ConfigFolder {
    root: PathBuf,
}

impl ConfigFolder {
    pub const DEFAULT_ROOT: &'static str = "/etc/shepherd";

    /// Opens the folder at `root`, creating the projects directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("projects"))?;
        Ok(Self { root })
    }

    /// The global config file, `<root>/config.json`.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Loads the current global config.
    pub fn load_config(&self) -> Result<Config> {
        Config::load(&self.config_file())
    }

    /// Where project JSON records are stored, `<root>/projects`.
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Where generated Kubernetes manifests are stored, `<root>/k8s`.
    /// The platform build scripts expect this location.
    pub fn kubernetes_yaml_dir(&self) -> PathBuf {
        self.root.join("k8s")
    }
}

/// Per-project build cache, `/var/cache/shepherd` by default.
#[derive(Debug, Clone)]
pub struct CacheFolder {
    root: PathBuf,
}

impl CacheFolder {
    pub const DEFAULT_ROOT: &'static str = "/var/cache/shepherd";

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Docker build cache directory for `id`.
    pub fn docker_cache_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join("docker").join(id.as_str())
    }

    /// Best-effort removal of the build cache; absence is not an error.
    pub fn delete_cache_if_exists(&self, id: &ProjectId) {
        let dir = self.docker_cache_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!("deleted build cache {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to delete build cache {}: {e}", dir.display()),
        }
    }
}
