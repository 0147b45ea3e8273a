//! # shepherd
//!
//! **Lifecycle orchestration client for a multi-tenant app-hosting host**
//!
//! This crate manages hosted projects end to end: it validates and persists
//! per-project configuration, enforces a host-wide memory quota before
//! admitting changes, and drives the container substrate and CI server so
//! that a registered project gets built from git and kept running. It is a
//! client of one host - fleet coordination and any web UI live elsewhere.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            shepherd                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                 LifecycleOrchestrator                       │    │
//! │  │   create(project) → update(project) → delete(id)            │    │
//! │  │   logs / metrics / builds / stats                            │    │
//! │  └──────┬──────────────────┬──────────────────────┬───────────┘    │
//! │         │                  │                      │                │
//! │  ┌──────┴───────┐   ┌──────┴────────┐   ┌─────────┴────────┐       │
//! │  │ ProjectRegistry│ │ Quota Engine  │   │ BuildSystemAdapter│      │
//! │  │ one JSON file │  │ largest-N     │   │  Jenkins REST     │      │
//! │  │ per project   │  │ build         │   │  job per project  │      │
//! │  │ atomic writes │  │ provisioning  │   │  crumb + basic    │      │
//! │  └───────────────┘  └───────────────┘   └───────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                  ContainerRuntimeAdapter                            │
//! │  ┌─────────────────────────┐  ┌────────────────────────────┐        │
//! │  │    KubernetesRuntime    │  │    TraefikDockerRuntime    │        │
//! │  │  namespace per project  │  │  network per project       │        │
//! │  │  generated manifests    │  │  routing labels on the     │        │
//! │  │  driven via kubectl     │  │  container, via docker CLI │        │
//! │  └─────────────────────────┘  └────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Project Lifecycle
//!
//! ```text
//!   ┌─────────┐  create   ┌────────────┐  CI build   ┌─────────┐
//!   │ (none)  │ ────────► │ Registered │ ──────────► │ Running │ ◄──┐
//!   └─────────┘           └────────────┘             └────┬────┘    │
//!        ▲                      │                         │ update  │
//!        │        delete        │                         ├─────────┘
//!        └──────────────────────┴─────────────────────────┘ (rebuild,
//!                                                            restart or
//!                                                            nothing)
//! ```
//!
//! Creation registers the project, provisions static backend resources (a
//! Kubernetes namespace or a Docker network), creates the CI job and kicks
//! off the first build; the build output starting the workload is CI's job,
//! not this crate's. An update rewrites everything derived from the project
//! record and then picks the cheapest sufficient action: full rebuild when
//! the image inputs changed, quick restart when only runtime config
//! changed, nothing otherwise.
//!
//! # Admission Control
//!
//! The host must not OOM, so every create/update is admitted against a
//! memory quota first. Build memory is provisioned for the worst case that
//! can actually happen - at most `concurrent_jenkins_builders` builds run
//! at once - so the provisioned build usage is the sum of the N largest
//! per-project build memory values, and:
//!
//! ```text
//! sum(runtime memory) + sum(N largest build memories) ≤ memory quota
//! ```
//!
//! # Example
//!
//! ```no_run
//! use shepherd::{CacheFolder, ConfigFolder, LifecycleOrchestrator};
//!
//! # async fn example() -> shepherd::Result<()> {
//! let folder = ConfigFolder::open("/etc/shepherd")?;
//! let cache = CacheFolder::open("/var/cache/shepherd");
//! let orchestrator = LifecycleOrchestrator::open(folder, cache)?;
//! for id in orchestrator.list_project_ids()? {
//!     println!("{id}: {}", orchestrator.main_domain_deploy_url(&id));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod jenkins;
pub mod orchestrator;
pub mod project;
pub mod quota;
pub mod registry;
pub mod runtime;
pub mod runtimes;

pub use config::{CacheFolder, Config, ConfigFolder, ContainerSystem, JenkinsConfig};
pub use error::{Error, Result};
pub use jenkins::{needs_full_rebuild, Build, BuildResult, BuildSystemAdapter, JenkinsBuildSystem};
pub use orchestrator::{LifecycleOrchestrator, ShepherdStats};
pub use project::{
    BuildSpec, GitRepo, IngressConfig, Project, ProjectId, ProjectOwner, ProjectRuntime,
    Publication, Resources, ResourcesUsage, Service, ServiceType,
};
pub use quota::{MemoryUsageStats, ProjectMemoryStats};
pub use registry::ProjectRegistry;
pub use runtime::ContainerRuntimeAdapter;
pub use runtimes::{KubernetesRuntime, TraefikDockerRuntime};
