//! Container runtime adapter trait.
//!
//! The orchestrator is backend-agnostic: everything it needs from the
//! container substrate is expressed here, and a backend is picked once per
//! process from the `containerSystem` config value.
//!
//! # Implementations
//!
//! - [`KubernetesRuntime`](crate::runtimes::KubernetesRuntime): drives
//!   `kubectl` and generates per-project manifests
//! - [`TraefikDockerRuntime`](crate::runtimes::TraefikDockerRuntime): drives
//!   the `docker` CLI with Traefik routing labels

use crate::error::Result;
use crate::project::{Project, ProjectId, ResourcesUsage};
use async_trait::async_trait;

/// A container runtime capable of hosting project workloads.
///
/// # Lifecycle
///
/// ```text
/// create_project → (CI build completes, workload starts) →
///     update_project_config / restart_project / ... → delete_project
/// ```
///
/// A freshly created project has no image yet - the first CI build produces
/// it - so `create_project` only provisions static resources (a namespace,
/// an isolated network) and must not try to start the main workload.
#[async_trait]
pub trait ContainerRuntimeAdapter: Send + Sync {
    /// Returns the backend name, for logs.
    fn name(&self) -> &str;

    /// Provisions the static backend resources the project needs before any
    /// build has completed. Must not start the main workload.
    async fn create_project(&self, project: &Project) -> Result<()>;

    /// Best-effort full teardown: stops and removes the main workload if
    /// present, ancillary services, isolation resources and generated
    /// config. Safe to call when nothing was ever created - that case is a
    /// no-op, not an error.
    async fn delete_project(&self, id: &ProjectId) -> Result<()>;

    /// Rewrites backend config derived from the new project shape.
    ///
    /// Returns whether the running workload configuration actually changed
    /// - a content diff against the previous config, not a dirty flag - so
    /// the orchestrator can skip a restart when nothing material changed.
    async fn update_project_config(
        &self,
        new_project: &Project,
        old_project: &Project,
    ) -> Result<bool>;

    /// Whether the main workload is currently running. False when it was
    /// never built or is stopped.
    async fn is_project_running(&self, id: &ProjectId) -> Result<bool>;

    /// (Re)starts the main workload from the current build output,
    /// starting/stopping ancillary services to match the project's service
    /// set. Tolerates the workload not existing yet (equivalent to a first
    /// start).
    async fn restart_project(&self, project: &Project) -> Result<()>;

    /// Run logs of the main workload. Returns an empty string when the
    /// workload isn't up; both backends also return empty (rather than
    /// failing) when the project was never created at the backend level.
    async fn get_run_logs(&self, id: &ProjectId) -> Result<String>;

    /// Current CPU/memory usage of the main workload;
    /// [`ResourcesUsage::ZERO`] when it isn't running.
    async fn get_run_metrics(&self, id: &ProjectId) -> Result<ResourcesUsage>;

    /// The URL the project is served at on the main domain.
    fn main_domain_deploy_url(&self, id: &ProjectId) -> String;
}
