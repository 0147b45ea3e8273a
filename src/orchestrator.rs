//! Lifecycle orchestration: the public entry point tying together the
//! registry, admission control, the container backend and CI.
//!
//! Every privileged operation follows the same ordering: validate first,
//! admit against the quota, persist the registry record, then touch the
//! backends. The registry write happens before backend calls so a backend
//! failure leaves a record an operator can re-drive, rather than an
//! untracked workload.

use crate::config::{CacheFolder, Config, ConfigFolder};
use crate::error::{Error, Result};
use crate::jenkins::{needs_full_rebuild, Build, BuildSystemAdapter, JenkinsBuildSystem};
use crate::project::{Project, ProjectId, ResourcesUsage};
use crate::quota::{self, ProjectMemoryStats};
use crate::registry::ProjectRegistry;
use crate::runtime::ContainerRuntimeAdapter;
use crate::runtimes::select_backend;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Host-level statistics, for dashboards and the `stats` CLI command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShepherdStats {
    pub project_count: usize,
    pub project_memory_stats: ProjectMemoryStats,
    pub concurrent_jenkins_builders: usize,
}

/// Orchestrates project lifecycles on one host.
///
/// Cheap to construct; holds no cross-operation state besides the adapter
/// handles. The global config is re-read per privileged operation so admin
/// edits take effect immediately.
pub struct LifecycleOrchestrator {
    config_folder: ConfigFolder,
    registry: ProjectRegistry,
    cache: CacheFolder,
    runtime: Arc<dyn ContainerRuntimeAdapter>,
    build_system: Arc<dyn BuildSystemAdapter>,
}

impl LifecycleOrchestrator {
    /// Opens the orchestrator over `config_folder`, selecting the container
    /// backend and CI endpoint from the global config.
    pub fn open(config_folder: ConfigFolder, cache: CacheFolder) -> Result<Self> {
        let config = config_folder.load_config()?;
        let runtime = select_backend(&config, &config_folder);
        let build_system = Arc::new(JenkinsBuildSystem::new(&config.jenkins));
        Self::with_adapters(config_folder, cache, runtime, build_system)
    }

    /// Like [`open`](Self::open) but with caller-supplied adapters.
    pub fn with_adapters(
        config_folder: ConfigFolder,
        cache: CacheFolder,
        runtime: Arc<dyn ContainerRuntimeAdapter>,
        build_system: Arc<dyn BuildSystemAdapter>,
    ) -> Result<Self> {
        let registry = ProjectRegistry::open(config_folder.projects_dir())?;
        Ok(Self {
            config_folder,
            registry,
            cache,
            runtime,
            build_system,
        })
    }

    fn config(&self) -> Result<Config> {
        self.config_folder.load_config()
    }

    /// Additional domains must live outside the main host domain; names
    /// under it are assigned to projects by the host itself.
    fn validate_additional_domains(project: &Project, config: &Config) -> Result<()> {
        for domain in &project.publication.additional_domains {
            if domain == &config.host_dns || domain.ends_with(&format!(".{}", config.host_dns)) {
                return Err(Error::Validation(format!(
                    "additional domain '{domain}' is under the main domain '{}'",
                    config.host_dns
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers a new project, provisions backend resources, creates its CI
    /// job and kicks off the first build.
    pub async fn create_project(&self, project: &Project) -> Result<()> {
        project.validate()?;
        self.registry.require_absent(&project.id)?;
        let config = self.config()?;
        Self::validate_additional_domains(project, &config)?;
        quota::validate(project, &config, &self.registry.all()?)?;

        info!("creating project {}", project.id);
        self.registry.put(project)?;
        self.runtime.create_project(project).await?;
        self.build_system.create_or_update_job(project).await?;
        self.build_system.trigger_build(&project.id).await?;
        Ok(())
    }

    /// Applies a settings change to an existing project, then rebuilds,
    /// restarts or does nothing, depending on what changed.
    pub async fn update_project(&self, project: &Project) -> Result<()> {
        project.validate()?;
        let old = self.registry.get(&project.id)?;
        if old.git_repo.url != project.git_repo.url {
            // Changing the source repository means a different project;
            // delete and re-create instead.
            return Err(Error::ImmutableFieldChanged {
                id: project.id.clone(),
                field: "gitRepo.url",
                old: old.git_repo.url.clone(),
                new: project.git_repo.url.clone(),
            });
        }
        let config = self.config()?;
        Self::validate_additional_domains(project, &config)?;
        quota::validate(project, &config, &self.registry.all_except(&project.id)?)?;

        info!("updating project {}", project.id);
        self.registry.put(project)?;
        let needs_restart = self.runtime.update_project_config(project, &old).await?;
        self.build_system.create_or_update_job(project).await?;

        if !self.runtime.is_project_running(&project.id).await? {
            // Nothing deployed yet (or crashed); a fresh build both produces
            // the image and starts the workload.
            info!("{} isn't running, launching a build", project.id);
            self.build_system.trigger_build(&project.id).await?;
        } else if needs_full_rebuild(project, &old) {
            info!("{} needs a full rebuild", project.id);
            self.build_system.trigger_build(&project.id).await?;
        } else if needs_restart {
            info!("{} runtime config changed, quick-restarting", project.id);
            self.runtime.restart_project(project).await?;
        } else {
            info!("{} config change needs no further action", project.id);
        }
        Ok(())
    }

    /// Deletes the project and everything belonging to it: the CI job (and
    /// its in-flight builds), the build cache, the backend resources and
    /// finally the registry record.
    ///
    /// The record goes last so a partial failure leaves the project visible
    /// for a retried delete.
    pub async fn delete_project(&self, id: &ProjectId) -> Result<()> {
        info!("deleting project {id}");
        self.build_system.delete_job_if_exists(id).await?;
        self.cache.delete_cache_if_exists(id);
        self.runtime.delete_project(id).await?;
        self.registry.delete(id)?;
        Ok(())
    }

    /// (Re)starts the project's workload from the last built image.
    pub async fn restart_project(&self, id: &ProjectId) -> Result<()> {
        let project = self.registry.get(id)?;
        self.runtime.restart_project(&project).await
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// IDs of all registered projects, sorted.
    pub fn list_project_ids(&self) -> Result<Vec<ProjectId>> {
        self.registry.list()
    }

    /// The registry record for `id`.
    pub fn get_project(&self, id: &ProjectId) -> Result<Project> {
        self.registry.get(id)
    }

    pub fn project_exists(&self, id: &ProjectId) -> bool {
        self.registry.exists(id)
    }

    /// Run logs of the project's main workload; empty when it isn't up.
    pub async fn get_run_logs(&self, id: &ProjectId) -> Result<String> {
        self.registry.require_exists(id)?;
        self.runtime.get_run_logs(id).await
    }

    /// Current resource usage of the main workload;
    /// [`ResourcesUsage::ZERO`] when it isn't running.
    pub async fn get_run_metrics(&self, id: &ProjectId) -> Result<ResourcesUsage> {
        self.registry.require_exists(id)?;
        self.runtime.get_run_metrics(id).await
    }

    /// Recent CI builds of the project, oldest first.
    pub async fn get_recent_builds(&self, id: &ProjectId) -> Result<Vec<Build>> {
        self.registry.require_exists(id)?;
        self.build_system.get_recent_builds(id).await
    }

    /// Console log of one CI build.
    pub async fn get_build_log(&self, id: &ProjectId, build_number: u32) -> Result<String> {
        self.registry.require_exists(id)?;
        self.build_system.get_build_log(id, build_number).await
    }

    /// The URL the project is served at on the main domain.
    pub fn main_domain_deploy_url(&self, id: &ProjectId) -> String {
        self.runtime.main_domain_deploy_url(id)
    }

    /// Host-level statistics over the full project set.
    pub fn stats(&self) -> Result<ShepherdStats> {
        let config = self.config()?;
        let projects = self.registry.all()?;
        Ok(ShepherdStats {
            project_count: projects.len(),
            project_memory_stats: ProjectMemoryStats::calculate(&config, &projects),
            concurrent_jenkins_builders: config.concurrent_jenkins_builders,
        })
    }
}
