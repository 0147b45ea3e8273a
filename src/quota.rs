//! Memory admission control.
//!
//! The host must never be brought down by OOMs or excessive swapping, so a
//! project create/update is rejected when the prospective project set would
//! overcommit the configured memory quota.
//!
//! Build memory is provisioned for the worst case that can actually happen:
//! at most `concurrent_jenkins_builders` builds run at once, so the
//! provisioned build usage is the sum of the N largest per-project build
//! memory values, not the sum over all projects.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::project::Project;
use serde::Serialize;

/// A usage/limit pair, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsageStats {
    pub usage_mb: u64,
    pub limit_mb: u64,
}

impl std::fmt::Display for MemoryUsageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Mb of {} Mb", self.usage_mb, self.limit_mb)
    }
}

/// Derived memory statistics over the full project set. Never persisted;
/// recomputed from the registry and config on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMemoryStats {
    /// Memory taken by project runtimes, limited by whatever the global
    /// quota leaves after build provisioning.
    pub project_runtime_quota: MemoryUsageStats,
    /// Runtime usage plus provisioned build usage, against the global quota.
    pub total_quota: MemoryUsageStats,
}

impl ProjectMemoryStats {
    /// Computes the quota statistics for `projects` under `config`.
    pub fn calculate<'a>(
        config: &Config,
        projects: impl IntoIterator<Item = &'a Project> + Clone,
    ) -> ProjectMemoryStats {
        let runtime_usage_mb: u64 = projects
            .clone()
            .into_iter()
            .map(|p| u64::from(p.runtime.resources.memory_mb()))
            .sum();

        // Provision for the N largest builds running simultaneously.
        let mut build_memories: Vec<u64> = projects
            .into_iter()
            .map(|p| u64::from(p.build.resources.memory_mb()))
            .collect();
        build_memories.sort_unstable_by(|a, b| b.cmp(a));
        let build_usage_mb: u64 = build_memories
            .iter()
            .take(config.concurrent_jenkins_builders)
            .sum();

        let quota_mb = u64::from(config.memory_quota_mb);
        ProjectMemoryStats {
            project_runtime_quota: MemoryUsageStats {
                usage_mb: runtime_usage_mb,
                limit_mb: quota_mb.saturating_sub(build_usage_mb),
            },
            total_quota: MemoryUsageStats {
                usage_mb: runtime_usage_mb + build_usage_mb,
                limit_mb: quota_mb,
            },
        }
    }
}

/// Validates a prospective create/update against the configured ceilings.
///
/// `other_projects` is the current registry contents minus any existing
/// record for `candidate.id`; the candidate replaces that record in the
/// aggregate check.
///
/// Per-field ceilings are checked first so cheap, local violations are
/// rejected before the full-registry aggregation runs.
pub fn validate(candidate: &Project, config: &Config, other_projects: &[Project]) -> Result<()> {
    let max_runtime = &config.max_project_runtime_resources;
    if candidate.runtime.resources.memory_mb() > max_runtime.memory_mb() {
        return Err(Error::Validation(format!(
            "a project can ask for max {} Mb of runtime memory but it asked for {} Mb",
            max_runtime.memory_mb(),
            candidate.runtime.resources.memory_mb()
        )));
    }
    if candidate.runtime.resources.cpu() > max_runtime.cpu() {
        return Err(Error::Validation(format!(
            "a project can ask for max {} runtime CPUs but it asked for {} CPUs",
            max_runtime.cpu(),
            candidate.runtime.resources.cpu()
        )));
    }
    let max_build = &config.max_project_build_resources;
    if candidate.build.resources.memory_mb() > max_build.memory_mb() {
        return Err(Error::Validation(format!(
            "a project can ask for max {} Mb of build memory but it asked for {} Mb",
            max_build.memory_mb(),
            candidate.build.resources.memory_mb()
        )));
    }
    if candidate.build.resources.cpu() > max_build.cpu() {
        return Err(Error::Validation(format!(
            "a project can ask for max {} build CPUs but it asked for {} CPUs",
            max_build.cpu(),
            candidate.build.resources.cpu()
        )));
    }

    let prospective = other_projects.iter().chain(std::iter::once(candidate));
    let stats = ProjectMemoryStats::calculate(config, prospective);
    if stats.total_quota.usage_mb > stats.total_quota.limit_mb {
        return Err(Error::QuotaExceeded {
            usage_mb: stats.total_quota.usage_mb,
            limit_mb: stats.total_quota.limit_mb,
        });
    }
    Ok(())
}
