//! Kubernetes backend, driven through the `kubectl` binary.
//!
//! Each project gets its own namespace `shepherd-<id>` and a generated
//! manifest at `<k8s dir>/<id>.yaml`. The manifest carries an
//! `<<IMAGE_AND_HASH>>` placeholder: after a successful build, the CI
//! pipeline substitutes the freshly pushed image reference and applies the
//! manifest. A quick restart substitutes the currently deployed image
//! instead, skipping the build entirely.

use crate::error::{Error, Result};
use crate::exec::{exec, split_by_whitespace};
use crate::project::{Project, ProjectId, ResourcesUsage, Service, ServiceType};
use crate::runtime::ContainerRuntimeAdapter;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, warn};

/// Placeholder the CI pipeline replaces with the built image reference.
pub const IMAGE_PLACEHOLDER: &str = "<<IMAGE_AND_HASH>>";

/// Kubernetes-backed container runtime.
pub struct KubernetesRuntime {
    /// The kubectl invocation, e.g. `["microk8s", "kubectl"]`.
    kubectl: Vec<String>,
    /// Where per-project manifests are written; the platform build scripts
    /// expect `/etc/shepherd/k8s`.
    yaml_dir: PathBuf,
    /// Main domain the ingress serves, e.g. `v-herd.eu`.
    host_dns: String,
}

impl KubernetesRuntime {
    pub fn new(yaml_dir: impl Into<PathBuf>, host_dns: impl Into<String>) -> Self {
        Self {
            kubectl: vec!["microk8s".to_string(), "kubectl".to_string()],
            yaml_dir: yaml_dir.into(),
            host_dns: host_dns.into(),
        }
    }

    /// Overrides the kubectl invocation (e.g. plain `kubectl`).
    pub fn with_kubectl(mut self, kubectl: Vec<String>) -> Self {
        self.kubectl = kubectl;
        self
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String> {
        let mut argv: Vec<&str> = self.kubectl.iter().map(String::as_str).collect();
        argv.extend_from_slice(args);
        exec(&argv).await
    }

    fn namespace(id: &ProjectId) -> String {
        format!("shepherd-{id}")
    }

    fn manifest_file(&self, id: &ProjectId) -> PathBuf {
        self.yaml_dir.join(format!("{id}.yaml"))
    }

    /// Pod names in `namespace`; empty when nothing is scheduled there.
    async fn get_pods(&self, namespace: &str) -> Result<Vec<String>> {
        let stdout = self
            .kubectl(&["get", "pods", "--namespace", namespace])
            .await?;
        let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= 1 || lines[0].starts_with("No resources found") {
            return Ok(Vec::new());
        }
        Ok(lines[1..]
            .iter()
            .filter_map(|l| split_by_whitespace(l).first().map(|s| s.to_string()))
            .collect())
    }

    /// The main app pod, or `None` when no successful build has deployed
    /// one yet. The main deployment is always named `deployment`.
    async fn main_pod_name(&self, id: &ProjectId) -> Result<Option<String>> {
        let pods = self.get_pods(&Self::namespace(id)).await?;
        Ok(pods.into_iter().find(|p| p.starts_with("deployment-")))
    }

    async fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        let stdout = self.kubectl(&["get", "ns"]).await?;
        Ok(parse_namespaces(&stdout))
    }

    /// The image the main pod currently runs, or `None` if not deployed.
    async fn current_docker_image(&self, id: &ProjectId) -> Result<Option<String>> {
        let Some(pod) = self.main_pod_name(id).await? else {
            return Ok(None);
        };
        let image = self
            .kubectl(&[
                "get",
                "pod",
                &pod,
                "--namespace",
                &Self::namespace(id),
                "-o",
                "jsonpath={.spec.containers[*].image}",
            ])
            .await?;
        let image = image.trim().trim_matches('\'');
        Ok((!image.is_empty()).then(|| image.to_string()))
    }

    async fn top_pod(&self, pod: &str, namespace: &str) -> Result<ResourcesUsage> {
        let stdout = match self
            .kubectl(&["top", "pod", pod, "--namespace", namespace])
            .await
        {
            Ok(stdout) => stdout,
            // A dead pod has no metrics object; report zero usage.
            Err(Error::BackendCommandFailed {
                exit_code: 1,
                ref output,
                ..
            }) if output.contains("Error from server (NotFound): podmetrics.metrics.k8s.io") => {
                return Ok(ResourcesUsage::ZERO)
            }
            Err(e) => return Err(e),
        };
        let last = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        parse_top_pod(last)
    }

    /// Writes the project manifest (with the image placeholder),
    /// returning whether the content actually changed.
    fn write_manifest(&self, project: &Project) -> Result<bool> {
        std::fs::create_dir_all(&self.yaml_dir)?;
        let file = self.manifest_file(&project.id);
        info!("writing Kubernetes manifest {}", file.display());
        let yaml = project_manifest(project, IMAGE_PLACEHOLDER, &self.host_dns);
        let old = match std::fs::read_to_string(&file) {
            Ok(old) => old,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let tmp = file.with_extension("yaml.tmp");
        std::fs::write(&tmp, &yaml)?;
        std::fs::rename(&tmp, &file)?;
        Ok(old != yaml)
    }
}

#[async_trait]
impl ContainerRuntimeAdapter for KubernetesRuntime {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        // Only the manifest is written here; the namespace and workload come
        // alive when CI applies it after the first successful build.
        self.write_manifest(project)?;
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<()> {
        let file = self.manifest_file(id);
        if !file.exists() {
            warn!(
                "{} doesn't exist, not deleting project objects from Kubernetes",
                file.display()
            );
            return Ok(());
        }
        let namespace = Self::namespace(id);
        if self.list_namespaces().await?.contains(&namespace) {
            info!("deleting Kubernetes objects in {namespace}, may take up to a minute");
            // Nuke everything in the namespace rather than `delete -f`: the
            // manifest may no longer list all live resources (e.g. a
            // database that was removed from the project).
            self.kubectl(&["delete", "all", "--all", "-n", &namespace])
                .await?;
            self.kubectl(&["delete", "namespace", &namespace]).await?;
        } else {
            warn!(
                "namespace {namespace} does not exist, nothing to delete; \
                 the project may never have had a successful build"
            );
        }
        info!("deleting Kubernetes manifest {}", file.display());
        std::fs::remove_file(&file)?;
        Ok(())
    }

    async fn update_project_config(
        &self,
        new_project: &Project,
        _old_project: &Project,
    ) -> Result<bool> {
        self.write_manifest(new_project)
    }

    async fn is_project_running(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.current_docker_image(id).await?.is_some())
    }

    async fn restart_project(&self, project: &Project) -> Result<()> {
        let Some(image) = self.current_docker_image(&project.id).await? else {
            // Nothing can start without a built image; the first start
            // happens when CI applies the manifest.
            return Err(Error::NotFoundInBackend(format!(
                "project {} has no deployed image yet; a build must complete first",
                project.id
            )));
        };
        let yaml = project_manifest(project, &image, &self.host_dns);
        let tmp = std::env::temp_dir().join(format!("shepherd-apply-{}.yaml", project.id));
        std::fs::write(&tmp, &yaml)?;
        let result = self
            .kubectl(&["apply", "-f", &tmp.to_string_lossy()])
            .await;
        let _ = std::fs::remove_file(&tmp);
        result?;
        Ok(())
    }

    async fn get_run_logs(&self, id: &ProjectId) -> Result<String> {
        let Some(pod) = self.main_pod_name(id).await? else {
            return Ok(String::new());
        };
        self.kubectl(&["logs", &pod, "--namespace", &Self::namespace(id)])
            .await
    }

    async fn get_run_metrics(&self, id: &ProjectId) -> Result<ResourcesUsage> {
        let Some(pod) = self.main_pod_name(id).await? else {
            return Ok(ResourcesUsage::ZERO);
        };
        self.top_pod(&pod, &Self::namespace(id)).await
    }

    fn main_domain_deploy_url(&self, id: &ProjectId) -> String {
        format!("https://{}/{id}", self.host_dns)
    }
}

// =============================================================================
// Manifest Generation
// =============================================================================

/// Generates the per-project manifest: namespace, deployment, service and
/// ingress, plus optional Postgres and additional-domain ingresses.
///
/// Deterministic: the same project always yields the same text (modulo the
/// `image` argument), which is what makes the content-diff in
/// `update_project_config` meaningful.
pub fn project_manifest(project: &Project, image: &str, host_dns: &str) -> String {
    let id = project.id.as_str();
    let namespace = KubernetesRuntime::namespace(&project.id);
    let max_memory = format!("{}Mi", project.runtime.resources.memory_mb());
    let max_cpu = format!("{}m", (project.runtime.resources.cpu() * 1000.0) as u32);
    let env = if project.runtime.env_vars.is_empty() {
        String::new()
    } else {
        let mut env = String::from("\n        env:\n");
        let vars: Vec<String> = project
            .runtime
            .env_vars
            .iter()
            .map(|(k, v)| format!("        - name: {k}\n          value: \"{v}\""))
            .collect();
        env.push_str(&vars.join("\n"));
        env
    };
    let ingress = &project.publication.ingress_config;

    let mut yaml = format!(
        r#"#
# Resource config file for {id}
#

apiVersion: v1
kind: Namespace
metadata:
  name: {namespace}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: deployment
  namespace: {namespace}
spec:
  selector:
    matchLabels:
      app: pod
  template:
    metadata:
      labels:
        app: pod
    spec:
      containers:
      - name: main
        image: {image}{env}
        ports:
        - containerPort: 8080
        resources:
          requests:
            memory: "64Mi"
            cpu: 0
          limits:
            memory: "{max_memory}"
            cpu: "{max_cpu}"
---
apiVersion: v1
kind: Service
metadata:
  name: service
  namespace: {namespace}
spec:
  selector:
    app: pod
  ports:
    - port: 8080
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: ingress-main
  namespace: {namespace}
  annotations:
    nginx.ingress.kubernetes.io/rewrite-target: /$3
    nginx.ingress.kubernetes.io/proxy-cookie-path: / /$1
    nginx.ingress.kubernetes.io/configuration-snippet: |
      rewrite ^(/{id})$ $1/ permanent;
    nginx.ingress.kubernetes.io/proxy-redirect-from: https://{host_dns}/
    nginx.ingress.kubernetes.io/proxy-redirect-to: https://{host_dns}/$1/
    nginx.ingress.kubernetes.io/proxy-read-timeout: "{read_timeout}"
    nginx.ingress.kubernetes.io/proxy-send-timeout: "{read_timeout}"
    nginx.ingress.kubernetes.io/proxy-body-size: {max_body}m
spec:
  tls:
  - hosts:
    - {host_dns}
  rules:
    - host: {host_dns}
      http:
        paths:
          - path: /({id})(/|$)(.*)
            pathType: Prefix
            backend:
              service:
                name: service
                port:
                  number: 8080"#,
        read_timeout = ingress.proxy_read_timeout_seconds,
        max_body = ingress.max_body_size_mb,
    );

    for service in &project.additional_services {
        yaml.push('\n');
        yaml.push_str(&postgres_manifest(service, &namespace));
    }
    for domain in &project.publication.additional_domains {
        yaml.push('\n');
        yaml.push_str(&custom_domain_ingress(
            domain,
            project.publication.https,
            &namespace,
        ));
    }
    yaml
}

fn postgres_manifest(service: &Service, namespace: &str) -> String {
    debug_assert_eq!(service.service_type, ServiceType::Postgres);
    format!(
        r#"---
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: postgres-pvc
  namespace: {namespace}
spec:
  accessModes: [ReadWriteOnce]
  resources: {{ requests: {{ storage: 512Mi }} }}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: postgresql-deployment
  namespace: {namespace}
spec:
  selector:
    matchLabels:
      app: postgres-pod
  template:
    metadata:
      labels:
        app: postgres-pod
    spec:
      volumes:
        - name: postgres-vol
          persistentVolumeClaim:
            claimName: postgres-pvc
      containers:
        - name: postgresql
          image: postgres:15.2
          ports:
            - containerPort: 5432
          env:
            - name: POSTGRES_PASSWORD
              value: mysecretpassword
          resources:
            requests:
              memory: "2Mi"
              cpu: 0
            limits:
              memory: "128Mi"
              cpu: "500m"
          volumeMounts:
            - name: postgres-vol
              mountPath: /var/lib/postgresql/data
---
apiVersion: v1
kind: Service
metadata:
  name: postgres-service
  namespace: {namespace}
spec:
  selector:
    app: postgres-pod
  ports:
    - port: 5432"#
    )
}

fn custom_domain_ingress(dns: &str, https: bool, namespace: &str) -> String {
    let name = dns_to_ingress_id(dns);
    let mut yaml = String::from("---\n");
    let _ = write!(
        yaml,
        "apiVersion: networking.k8s.io/v1\nkind: Ingress\nmetadata:\n  name: {name}\n  namespace: {namespace}"
    );
    if https {
        yaml.push_str("\n  annotations:\n    cert-manager.io/cluster-issuer: lets-encrypt");
    }
    yaml.push_str("\nspec:");
    if https {
        let _ = write!(
            yaml,
            "\n  tls:\n    - hosts:\n      - {dns}\n      secretName: {name}-tls"
        );
    }
    let _ = write!(
        yaml,
        r#"
  rules:
    - host: "{dns}"
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: service
                port:
                  number: 8080"#
    );
    yaml
}

/// Turns a DNS name into a valid ingress resource name.
fn dns_to_ingress_id(dns: &str) -> String {
    let sanitized: String = dns
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("ingress-{}", sanitized.trim_end_matches('-'))
}

/// Parses one `kubectl top pod` output line, e.g.
/// `deployment-59b67fd4c5-2sdmw   2m           126Mi`.
fn parse_top_pod(line: &str) -> Result<ResourcesUsage> {
    let values = split_by_whitespace(line.trim());
    if values.len() != 3 {
        return Err(Error::Validation(format!(
            "invalid top line: '{line}', parsed: {values:?}"
        )));
    }
    let memory_mb: u32 = values[2]
        .strip_suffix("Mi")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Validation(format!("invalid memory value in '{line}'")))?;
    let cpu: f32 = values[1]
        .strip_suffix('m')
        .and_then(|v| v.parse::<f32>().ok())
        .map(|m| m / 1000.0)
        .ok_or_else(|| Error::Validation(format!("invalid cpu value in '{line}'")))?;
    Ok(ResourcesUsage { memory_mb, cpu })
}

/// Parses `kubectl get ns` output into the set of namespace names.
fn parse_namespaces(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| split_by_whitespace(l).first().map(|s| s.to_string()))
        .collect()
}
