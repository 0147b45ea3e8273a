//! Docker+Traefik backend, driven through the `docker` binary.
//!
//! Isolation model: every project gets its own Docker network
//! `<id>.shepherd`, connected only to the Traefik reverse-proxy container,
//! so projects can't reach each other. The main container `shepherd_<id>`
//! runs the image `shepherd/<id>:latest` that CI builds, with Traefik
//! routing labels on the container itself - there is no per-project config
//! file, the whole runtime configuration lives in the `docker run` command
//! line.

use crate::error::{Error, Result};
use crate::exec::{exec, split_by_whitespace};
use crate::project::{Project, ProjectId, ResourcesUsage, ServiceType};
use crate::runtime::ContainerRuntimeAdapter;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::info;

/// Name of the Traefik reverse-proxy container every project network is
/// connected to.
const TRAEFIK_CONTAINER: &str = "int_traefik";

/// Docker+Traefik-backed container runtime.
pub struct TraefikDockerRuntime {
    /// Main domain projects are served under, e.g. `v-herd.eu`.
    host_dns: String,
}

impl TraefikDockerRuntime {
    pub fn new(host_dns: impl Into<String>) -> Self {
        Self {
            host_dns: host_dns.into(),
        }
    }

    fn network_name(id: &ProjectId) -> String {
        format!("{id}.shepherd")
    }

    fn container_name(id: &ProjectId) -> String {
        format!("shepherd_{id}")
    }

    fn postgres_container_name(id: &ProjectId) -> String {
        format!("shepherd_{id}_psql")
    }

    fn image_name(id: &ProjectId) -> String {
        format!("shepherd/{id}")
    }

    async fn require_traefik(&self) -> Result<()> {
        if !docker::ps().await?.contains(TRAEFIK_CONTAINER) {
            return Err(Error::NotFoundInBackend(format!(
                "Traefik container {TRAEFIK_CONTAINER} is not running"
            )));
        }
        Ok(())
    }

    /// The `docker run` command line for the main project container.
    ///
    /// Deterministic for a given project; `update_project_config` diffs the
    /// old and new command lines to decide whether a restart is needed.
    fn run_command(&self, project: &Project) -> Vec<String> {
        let id = &project.id;
        let mut cmd: Vec<String> = [
            "docker",
            "run",
            "-d",
            "-t",
            "--name",
            &Self::container_name(id),
            "--restart",
            "always",
            "--network",
            &Self::network_name(id),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        cmd.push("-m".to_string());
        cmd.push(format!("{}m", project.runtime.resources.memory_mb()));
        cmd.push("--cpus".to_string());
        cmd.push(project.runtime.resources.cpu().to_string());
        for (key, value) in &project.runtime.env_vars {
            cmd.push("-e".to_string());
            cmd.push(format!("{key}={value}"));
        }
        if project.publication.publish_on_main_domain {
            let host = &self.host_dns;
            for label in [
                format!("traefik.http.routers.shepherd_{id}.entrypoints=https"),
                format!("traefik.http.routers.shepherd_{id}.rule=Host(`{id}.{host}`)"),
                format!("traefik.http.routers.shepherd_{id}.tls=true"),
                format!("traefik.http.routers.shepherd_{id}.tls.certresolver=default_shepherd"),
                format!("traefik.http.routers.shepherd_{id}.tls.domains[0].main={host}"),
                format!("traefik.http.routers.shepherd_{id}.tls.domains[0].sans=*.{host}"),
            ] {
                cmd.push("--label".to_string());
                cmd.push(label);
            }
        }
        if !project.publication.additional_domains.is_empty() {
            let host_clause: Vec<String> = project
                .publication
                .additional_domains
                .iter()
                .map(|d| format!("Host(`{d}`)"))
                .collect();
            cmd.push("--label".to_string());
            cmd.push(format!(
                "traefik.http.routers.shepherd_{id}_http.entrypoints=http"
            ));
            cmd.push("--label".to_string());
            cmd.push(format!(
                "traefik.http.routers.shepherd_{id}_http.rule={}",
                host_clause.join(" || ")
            ));
        }
        cmd.push(format!("{}:latest", Self::image_name(id)));
        cmd
    }
}

#[async_trait]
impl ContainerRuntimeAdapter for TraefikDockerRuntime {
    fn name(&self) -> &str {
        "traefik-docker"
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        if !project.additional_services.is_empty() {
            return Err(Error::Validation(
                "additional services are not supported by the traefik-docker backend".to_string(),
            ));
        }
        self.require_traefik().await?;
        // The project containers join the network later, when CI finishes
        // the first build.
        docker::network_create(&Self::network_name(&project.id)).await?;
        docker::network_connect(&Self::network_name(&project.id), TRAEFIK_CONTAINER).await?;
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<()> {
        docker::kill_if_exists(&Self::container_name(id)).await?;
        docker::kill_if_exists(&Self::postgres_container_name(id)).await?;
        let network = Self::network_name(id);
        if docker::network_exists(&network).await? {
            docker::network_disconnect(&network, TRAEFIK_CONTAINER).await?;
            docker::network_rm(&network).await?;
        }
        Ok(())
    }

    async fn update_project_config(
        &self,
        new_project: &Project,
        old_project: &Project,
    ) -> Result<bool> {
        // The whole runtime config lives in the docker command line, so a
        // changed command line is exactly "the workload config changed".
        Ok(self.run_command(old_project) != self.run_command(new_project))
    }

    async fn is_project_running(&self, id: &ProjectId) -> Result<bool> {
        docker::is_running(&Self::container_name(id)).await
    }

    async fn restart_project(&self, project: &Project) -> Result<()> {
        let id = &project.id;
        docker::kill_if_exists(&Self::container_name(id)).await?;
        if !project
            .additional_services
            .iter()
            .any(|s| s.service_type == ServiceType::Postgres)
        {
            docker::kill_if_exists(&Self::postgres_container_name(id)).await?;
        }
        info!("starting main container for {id}");
        let cmd = self.run_command(project);
        let argv: Vec<&str> = cmd.iter().map(String::as_str).collect();
        exec(&argv).await?;
        Ok(())
    }

    async fn get_run_logs(&self, id: &ProjectId) -> Result<String> {
        let container = Self::container_name(id);
        if !docker::container_exists(&container).await? {
            return Ok(String::new());
        }
        docker::logs(&container).await
    }

    async fn get_run_metrics(&self, id: &ProjectId) -> Result<ResourcesUsage> {
        let container = Self::container_name(id);
        if !docker::is_running(&container).await? {
            return Ok(ResourcesUsage::ZERO);
        }
        docker::container_stats(&container).await
    }

    fn main_domain_deploy_url(&self, id: &ProjectId) -> String {
        format!("https://{id}.{}", self.host_dns)
    }
}

// =============================================================================
// Docker CLI
// =============================================================================

/// Thin wrappers over the `docker` binary.
pub(crate) mod docker {
    use super::*;

    /// `docker network create`; fails if the network already exists.
    pub async fn network_create(network: &str) -> Result<()> {
        exec(&["docker", "network", "create", network]).await?;
        Ok(())
    }

    pub async fn network_connect(network: &str, container: &str) -> Result<()> {
        exec(&["docker", "network", "connect", network, container]).await?;
        Ok(())
    }

    /// Disconnects a network from a container; fails if either doesn't
    /// exist or they're not connected.
    pub async fn network_disconnect(network: &str, container: &str) -> Result<()> {
        exec(&["docker", "network", "disconnect", network, container]).await?;
        Ok(())
    }

    /// Removes a network; fails if it's still connected to any container.
    pub async fn network_rm(network: &str) -> Result<()> {
        exec(&["docker", "network", "rm", network]).await?;
        Ok(())
    }

    pub async fn network_ls() -> Result<BTreeSet<String>> {
        let out = exec(&["docker", "network", "ls", "--format", "{{.Name}}"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    pub async fn network_exists(network: &str) -> Result<bool> {
        Ok(network_ls().await?.contains(network))
    }

    /// Names of running containers.
    pub async fn ps() -> Result<BTreeSet<String>> {
        let out = exec(&["docker", "ps", "--format", "{{.Names}}"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    /// Names of all containers, running and stopped.
    pub async fn ps_a() -> Result<BTreeSet<String>> {
        let out = exec(&["docker", "ps", "-a", "--format", "{{.Names}}"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    pub async fn is_running(container: &str) -> Result<bool> {
        Ok(ps().await?.contains(container))
    }

    pub async fn container_exists(container: &str) -> Result<bool> {
        Ok(ps_a().await?.contains(container))
    }

    /// Stops (SIGTERM, grace period, SIGKILL) and removes the container.
    /// When this returns, the container no longer exists.
    pub async fn kill(container: &str) -> Result<()> {
        exec(&["docker", "container", "stop", container]).await?;
        exec(&["docker", "container", "rm", container]).await?;
        Ok(())
    }

    /// Like [`kill`] but a no-op when the container doesn't exist.
    pub async fn kill_if_exists(container: &str) -> Result<()> {
        if container_exists(container).await? {
            kill(container).await?;
        }
        Ok(())
    }

    /// Stdout of the container; works for stopped containers too.
    pub async fn logs(container: &str) -> Result<String> {
        exec(&["docker", "logs", container]).await
    }

    pub async fn container_stats(container: &str) -> Result<ResourcesUsage> {
        let stats = exec(&[
            "docker",
            "container",
            "stats",
            "--no-stream",
            "--format",
            "{{.CPUPerc}} {{.MemUsage}}",
            container,
        ])
        .await?;
        parse_container_stats(stats.trim())
    }

    /// Parses `docker stats` output such as `0.16% 128.1MiB / 256MiB`.
    pub(crate) fn parse_container_stats(stats: &str) -> Result<ResourcesUsage> {
        let parts = split_by_whitespace(stats);
        if parts.len() < 2 {
            return Err(Error::Validation(format!("unexpected stats line: '{stats}'")));
        }
        let cpu: f32 = parts[0]
            .trim_end_matches('%')
            .parse()
            .map_err(|_| Error::Validation(format!("unexpected cpu value: '{stats}'")))?;
        let mem = parts[1];
        let (value, scale) = if let Some(v) = mem.strip_suffix("GiB") {
            (v, 1000.0)
        } else if let Some(v) = mem.strip_suffix("MiB") {
            (v, 1.0)
        } else {
            return Err(Error::Validation(format!(
                "unexpected stats: '{stats}': the memory value doesn't end with MiB or GiB"
            )));
        };
        let memory: f32 = value
            .parse()
            .map_err(|_| Error::Validation(format!("unexpected memory value: '{stats}'")))?;
        Ok(ResourcesUsage {
            memory_mb: (memory * scale) as u32,
            cpu,
        })
    }
}
