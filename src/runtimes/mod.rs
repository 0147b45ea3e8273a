//! Container runtime backends.
//!
//! Each backend implements [`ContainerRuntimeAdapter`] for one substrate.
//! The backend is selected once per process from the config; there is no
//! dynamic re-selection at runtime.

pub mod docker;
pub mod kubernetes;

pub use self::docker::TraefikDockerRuntime;
pub use self::kubernetes::KubernetesRuntime;

use crate::config::{Config, ConfigFolder, ContainerSystem};
use crate::runtime::ContainerRuntimeAdapter;
use std::sync::Arc;

/// Constructs the container backend named by `config.container_system`.
pub fn select_backend(config: &Config, folder: &ConfigFolder) -> Arc<dyn ContainerRuntimeAdapter> {
    match config.container_system {
        ContainerSystem::Kubernetes => Arc::new(KubernetesRuntime::new(
            folder.kubernetes_yaml_dir(),
            config.host_dns.clone(),
        )),
        ContainerSystem::TraefikDocker => {
            Arc::new(TraefikDockerRuntime::new(config.host_dns.clone()))
        }
    }
}
