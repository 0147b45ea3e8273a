//! CI integration: the build system trait and its Jenkins implementation.
//!
//! Every project gets one Jenkins job, named after the project ID. The job
//! polls git, builds the project image with docker and pushes it where the
//! container backend picks it up; a Mailer publisher notifies the project
//! admins of build failures.
//!
//! Jenkins is driven over its JSON/XML REST API with HTTP basic auth plus
//! the CSRF crumb (fetched from `/crumbIssuer/api/json` before every
//! mutating request).

use crate::config::JenkinsConfig;
use crate::error::{Error, Result};
use crate::project::{Project, ProjectId};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// How many builds [`BuildSystemAdapter::get_recent_builds`] returns at most.
const RECENT_BUILD_LIMIT: usize = 30;

/// How many one-second polls to wait for cancelled builds to actually stop
/// before giving up on a job deletion.
const CANCEL_POLL_ATTEMPTS: u32 = 30;

// =============================================================================
// Builds
// =============================================================================

/// Outcome of a CI build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    /// Build succeeded but was flagged (e.g. failing tests recorded as
    /// non-fatal).
    Unstable,
    /// Cancelled by a user before it finished.
    Aborted,
    NotBuilt,
    /// Still in progress; the CI server reports no result yet.
    #[default]
    Building,
}

/// One CI build of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// Build number; starts at 1 and increments per job.
    pub number: u32,
    /// How long the build took, in milliseconds. 0 while still building.
    pub duration_ms: u64,
    /// The CI server's duration estimate, in milliseconds. Useful for
    /// progress display while [`BuildResult::Building`].
    pub estimated_duration_ms: u64,
    /// When the build started.
    pub started: DateTime<Utc>,
    pub outcome: BuildResult,
}

/// Whether changing a project's settings from `old` to `new` invalidates the
/// previously built image, requiring a full CI rebuild (as opposed to just
/// restarting the workload with new runtime settings).
pub fn needs_full_rebuild(new: &Project, old: &Project) -> bool {
    new.build.build_args != old.build.build_args
        || new.build.docker_file != old.build.docker_file
        || new.build.build_context != old.build.build_context
        || new.build.resources.memory_mb() != old.build.resources.memory_mb()
        || new.git_repo != old.git_repo
        || new.owner != old.owner
}

// =============================================================================
// Build system trait
// =============================================================================

/// A CI system that builds project images from git.
#[async_trait]
pub trait BuildSystemAdapter: Send + Sync {
    /// Creates the CI job for the project, or updates it in place when it
    /// already exists.
    async fn create_or_update_job(&self, project: &Project) -> Result<()>;

    /// Starts a build of the project's job.
    async fn trigger_build(&self, id: &ProjectId) -> Result<()>;

    /// Deletes the project's CI job, cancelling any in-flight builds first.
    /// A no-op when the job doesn't exist.
    async fn delete_job_if_exists(&self, id: &ProjectId) -> Result<()>;

    /// Recent builds, oldest first, at most 30.
    async fn get_recent_builds(&self, id: &ProjectId) -> Result<Vec<Build>>;

    /// Full console log of one build.
    async fn get_build_log(&self, id: &ProjectId, build_number: u32) -> Result<String>;
}

// =============================================================================
// Jenkins
// =============================================================================

/// Jenkins-backed [`BuildSystemAdapter`].
pub struct JenkinsBuildSystem {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Crumb {
    crumb: String,
    #[serde(rename = "crumbRequestField")]
    crumb_request_field: String,
}

#[derive(Deserialize)]
struct JenkinsBuilds {
    #[serde(default)]
    builds: Vec<JenkinsBuild>,
}

/// One entry of the `builds[...]` tree. Jenkins reports `result: null`
/// while the build is still running.
#[derive(Deserialize)]
struct JenkinsBuild {
    number: u32,
    result: Option<BuildResult>,
    /// Millis since epoch.
    timestamp: i64,
    duration: u64,
    #[serde(rename = "estimatedDuration")]
    estimated_duration: u64,
}

impl JenkinsBuild {
    fn into_build(self) -> Build {
        Build {
            number: self.number,
            duration_ms: self.duration,
            estimated_duration_ms: self.estimated_duration,
            started: Utc
                .timestamp_millis_opt(self.timestamp)
                .single()
                .unwrap_or_default(),
            outcome: self.result.unwrap_or_default(),
        }
    }
}

impl JenkinsBuildSystem {
    pub fn new(config: &JenkinsConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn fetch_crumb(&self) -> Result<Option<Crumb>> {
        let response = self
            .client
            .get(self.url("/crumbIssuer/api/json"))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        // 404 means the CSRF crumb issuer is disabled on this server.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, "/crumbIssuer/api/json").await?;
        Ok(Some(response.json().await?))
    }

    /// GETs `path`, returning the response body.
    async fn get(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let response = Self::check(response, path).await?;
        Ok(response.text().await?)
    }

    /// POSTs to `path` with the CSRF crumb attached.
    async fn post(&self, path: &str, body: Option<String>) -> Result<()> {
        let mut request = self
            .client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password));
        if let Some(crumb) = self.fetch_crumb().await? {
            request = request.header(crumb.crumb_request_field, crumb.crumb);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
                .body(body);
        }
        let response = request.send().await?;
        Self::check(response, path).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::BackendHttpFailed {
            endpoint: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn job_exists(&self, id: &ProjectId) -> Result<bool> {
        let path = format!("/job/{id}/api/json?tree=name");
        let response = self
            .client
            .get(self.url(&path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, &path).await?;
        Ok(true)
    }

    async fn builds(&self, id: &ProjectId) -> Result<Vec<JenkinsBuild>> {
        let body = self
            .get(&format!(
                "/job/{id}/api/json?tree=builds[number,result,timestamp,duration,estimatedDuration]"
            ))
            .await?;
        let builds: JenkinsBuilds = serde_json::from_str(&body)?;
        Ok(builds.builds)
    }

    /// Cancels in-flight builds of the job and waits until none is running.
    async fn cancel_running_builds(&self, id: &ProjectId) -> Result<()> {
        for build in self.builds(id).await? {
            if build.result.is_none() {
                info!("cancelling in-flight build #{} of {id}", build.number);
                self.post(&format!("/job/{id}/{}/stop", build.number), None)
                    .await?;
            }
        }
        for _ in 0..CANCEL_POLL_ATTEMPTS {
            if self.builds(id).await?.iter().all(|b| b.result.is_some()) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(Error::Timeout(format!(
            "in-flight builds of {id} didn't stop within {CANCEL_POLL_ATTEMPTS} seconds"
        )))
    }
}

#[async_trait]
impl BuildSystemAdapter for JenkinsBuildSystem {
    async fn create_or_update_job(&self, project: &Project) -> Result<()> {
        let xml = job_xml(project);
        if self.job_exists(&project.id).await? {
            self.post(&format!("/job/{}/config.xml", project.id), Some(xml))
                .await
        } else {
            self.post(&format!("/createItem?name={}", project.id), Some(xml))
                .await
        }
    }

    async fn trigger_build(&self, id: &ProjectId) -> Result<()> {
        self.post(&format!("/job/{id}/build"), None).await
    }

    async fn delete_job_if_exists(&self, id: &ProjectId) -> Result<()> {
        if !self.job_exists(id).await? {
            warn!("CI job for {id} doesn't exist, nothing to delete");
            return Ok(());
        }
        self.cancel_running_builds(id).await?;
        self.post(&format!("/job/{id}/doDelete"), None).await
    }

    async fn get_recent_builds(&self, id: &ProjectId) -> Result<Vec<Build>> {
        // Jenkins lists builds newest-first; flip to oldest-first.
        let mut builds: Vec<Build> = self
            .builds(id)
            .await?
            .into_iter()
            .take(RECENT_BUILD_LIMIT)
            .map(JenkinsBuild::into_build)
            .collect();
        builds.reverse();
        Ok(builds)
    }

    async fn get_build_log(&self, id: &ProjectId, build_number: u32) -> Result<String> {
        self.get(&format!("/job/{id}/{build_number}/logText/progressiveText"))
            .await
    }
}

// =============================================================================
// Job XML
// =============================================================================

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
}

/// The full Jenkins freestyle job definition for a project.
///
/// Deterministic for a given project. The build step exports the sizing and
/// docker parameters as environment variables and hands off to the
/// `shepherd-build` script, which runs the actual `docker build`.
pub fn job_xml(project: &Project) -> String {
    let recipients = {
        let admins: Vec<&str> = project.all_admins().into_iter().collect();
        admins.join(" ")
    };
    let mut exports = vec![
        format!("export BUILD_MEMORY={}m", project.build.resources.memory_mb()),
        format!(
            "export CPU_QUOTA={}",
            (project.build.resources.cpu() as f64 * 100000.0) as i64
        ),
    ];
    if !project.build.build_args.is_empty() {
        // Don't wrap the value in "" - --build-arg can't handle that.
        let build_args: Vec<String> = project
            .build
            .build_args
            .iter()
            .map(|(k, v)| format!("--build-arg {k}={v}"))
            .collect();
        exports.push(format!("export BUILD_ARGS='{}'", build_args.join(" ")));
    }
    if let Some(docker_file) = &project.build.docker_file {
        exports.push(format!("export DOCKERFILE={docker_file}"));
    }
    if let Some(build_context) = &project.build.build_context {
        exports.push(format!("export BUILD_CONTEXT={build_context}"));
    }
    let command = format!(
        "{}\n/opt/shepherd/shepherd-build {}",
        exports.join("\n"),
        project.id
    );
    let credentials = match &project.git_repo.credentials_id {
        Some(id) => format!("\n        <credentialsId>{}</credentialsId>", xml_escape(id)),
        None => String::new(),
    };
    format!(
        r#"<?xml version='1.1' encoding='UTF-8'?>
<project>
  <actions/>
  <description>{description}. Web page: {webpage}. Owner: {owner}</description>
  <keepDependencies>false</keepDependencies>
  <properties>
    <jenkins.model.BuildDiscarderProperty>
      <strategy class="hudson.tasks.LogRotator">
        <daysToKeep>3</daysToKeep>
        <numToKeep>-1</numToKeep>
        <artifactDaysToKeep>-1</artifactDaysToKeep>
        <artifactNumToKeep>-1</artifactNumToKeep>
      </strategy>
    </jenkins.model.BuildDiscarderProperty>
  </properties>
  <scm class="hudson.plugins.git.GitSCM" plugin="git">
    <configVersion>2</configVersion>
    <userRemoteConfigs>
      <hudson.plugins.git.UserRemoteConfig>
        <url>{git_url}</url>{credentials}
      </hudson.plugins.git.UserRemoteConfig>
    </userRemoteConfigs>
    <branches>
      <hudson.plugins.git.BranchSpec>
        <name>*/{branch}</name>
      </hudson.plugins.git.BranchSpec>
    </branches>
    <doGenerateSubmoduleConfigurations>false</doGenerateSubmoduleConfigurations>
    <submoduleCfg class="empty-list"/>
    <extensions/>
  </scm>
  <canRoam>true</canRoam>
  <disabled>false</disabled>
  <blockBuildWhenDownstreamBuilding>false</blockBuildWhenDownstreamBuilding>
  <blockBuildWhenUpstreamBuilding>false</blockBuildWhenUpstreamBuilding>
  <triggers>
    <hudson.triggers.SCMTrigger>
      <spec>H/5 * * * *</spec>
      <ignorePostCommitHooks>false</ignorePostCommitHooks>
    </hudson.triggers.SCMTrigger>
  </triggers>
  <concurrentBuild>false</concurrentBuild>
  <builders>
    <hudson.tasks.Shell>
      <command>{command}</command>
      <configuredLocalRules/>
    </hudson.tasks.Shell>
  </builders>
  <publishers>
    <hudson.tasks.Mailer plugin="mailer">
      <recipients>{recipients}</recipients>
      <dontNotifyEveryUnstableBuild>false</dontNotifyEveryUnstableBuild>
      <sendToIndividuals>false</sendToIndividuals>
    </hudson.tasks.Mailer>
  </publishers>
  <buildWrappers>
    <hudson.plugins.timestamper.TimestamperBuildWrapper plugin="timestamper"/>
    <hudson.plugins.build__timeout.BuildTimeoutWrapper plugin="build-timeout">
      <strategy class="hudson.plugins.build_timeout.impl.AbsoluteTimeOutStrategy">
        <timeoutMinutes>15</timeoutMinutes>
      </strategy>
      <operationList/>
    </hudson.plugins.build__timeout.BuildTimeoutWrapper>
  </buildWrappers>
</project>"#,
        description = xml_escape(&project.description),
        webpage = xml_escape(project.resolve_webpage()),
        owner = xml_escape(&project.owner.to_string()),
        git_url = xml_escape(&project.git_repo.url),
        credentials = credentials,
        branch = xml_escape(&project.git_repo.branch),
        command = xml_escape(&command),
        recipients = xml_escape(&recipients),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{
        BuildSpec, GitRepo, ProjectOwner, ProjectRuntime, Publication, Resources,
    };
    use std::collections::BTreeMap;

    fn project() -> Project {
        Project {
            id: ProjectId::new("vaadin-boot-example-gradle").unwrap(),
            description: "Example project for Vaadin Boot built via Gradle".to_string(),
            webpage: None,
            git_repo: GitRepo {
                url: "https://github.com/mvysny/vaadin-boot-example-gradle".to_string(),
                branch: "master".to_string(),
                credentials_id: None,
            },
            owner: ProjectOwner {
                name: "Martin Vysny".to_string(),
                email: "mavi@vaadin.com".to_string(),
            },
            runtime: ProjectRuntime {
                resources: Resources::DEFAULT_RUNTIME,
                env_vars: BTreeMap::new(),
            },
            build: BuildSpec {
                resources: Resources::DEFAULT_BUILD,
                build_args: BTreeMap::new(),
                docker_file: None,
                build_context: None,
            },
            publication: Publication::default(),
            additional_services: Default::default(),
            additional_admins: Default::default(),
        }
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&'c"), "a&lt;b&gt;&amp;&apos;c");
        assert_eq!(xml_escape("plain"), "plain");
    }

    #[test]
    fn test_job_xml_simple() {
        let xml = job_xml(&project());
        assert!(xml.contains(
            "<description>Example project for Vaadin Boot built via Gradle. \
             Web page: https://github.com/mvysny/vaadin-boot-example-gradle. \
             Owner: Martin Vysny &lt;mavi@vaadin.com&gt;</description>"
        ));
        assert!(xml.contains(
            "<command>export BUILD_MEMORY=2048m\nexport CPU_QUOTA=200000\n\
             /opt/shepherd/shepherd-build vaadin-boot-example-gradle</command>"
        ));
        assert!(xml.contains("<recipients>mavi@vaadin.com</recipients>"));
        assert!(xml.contains("<name>*/master</name>"));
        assert!(!xml.contains("credentialsId"));
    }

    #[test]
    fn test_job_xml_complex() {
        let mut p = project();
        p.git_repo.credentials_id = Some("c4d257ce-0048-11ee-a0b5-ffedf9ffccf4".to_string());
        p.build.build_args =
            BTreeMap::from([("offlinekey".to_string(), "q3984askdjalkd9823".to_string())]);
        p.build.docker_file = Some("vherd.Dockerfile".to_string());
        let xml = job_xml(&p);
        assert!(xml.contains(
            "<credentialsId>c4d257ce-0048-11ee-a0b5-ffedf9ffccf4</credentialsId>"
        ));
        assert!(xml.contains(
            "export BUILD_ARGS=&apos;--build-arg offlinekey=q3984askdjalkd9823&apos;"
        ));
        assert!(xml.contains("export DOCKERFILE=vherd.Dockerfile"));
    }

    #[test]
    fn test_job_xml_notifies_additional_admins() {
        let mut p = project();
        p.additional_admins.insert("ops@example.com".to_string());
        let xml = job_xml(&p);
        assert!(xml.contains("<recipients>mavi@vaadin.com ops@example.com</recipients>"));
    }

    #[test]
    fn test_job_xml_is_deterministic() {
        assert_eq!(job_xml(&project()), job_xml(&project()));
    }

    #[test]
    fn test_needs_full_rebuild() {
        let old = project();

        let mut new = project();
        assert!(!needs_full_rebuild(&new, &old));

        new.runtime.resources = Resources::new(512, 1.0).unwrap();
        assert!(!needs_full_rebuild(&new, &old));

        let mut new = project();
        new.build.build_args = BTreeMap::from([("k".to_string(), "v".to_string())]);
        assert!(needs_full_rebuild(&new, &old));

        let mut new = project();
        new.build.docker_file = Some("other.Dockerfile".to_string());
        assert!(needs_full_rebuild(&new, &old));

        let mut new = project();
        new.build.build_context = Some("backend".to_string());
        assert!(needs_full_rebuild(&new, &old));

        let mut new = project();
        new.build.resources = Resources::new(4096, 2.0).unwrap();
        assert!(needs_full_rebuild(&new, &old));

        let mut new = project();
        new.git_repo.branch = "main".to_string();
        assert!(needs_full_rebuild(&new, &old));

        let mut new = project();
        new.owner.email = "other@vaadin.com".to_string();
        assert!(needs_full_rebuild(&new, &old));
    }

    #[test]
    fn test_cancel_timeout_error_is_not_http_shaped() {
        let err = Error::Timeout(format!(
            "in-flight builds of myapp didn't stop within {CANCEL_POLL_ATTEMPTS} seconds"
        ));
        let msg = err.to_string();
        assert!(msg.starts_with("timed out:"), "{msg}");
        assert!(!msg.contains("HTTP"), "{msg}");
    }

    #[test]
    fn test_build_result_parses_jenkins_json() {
        let json = r#"{"builds":[
            {"number":2,"result":null,"timestamp":1700000000000,"duration":0,"estimatedDuration":120000},
            {"number":1,"result":"SUCCESS","timestamp":1699990000000,"duration":95000,"estimatedDuration":100000}
        ]}"#;
        let parsed: JenkinsBuilds = serde_json::from_str(json).unwrap();
        let builds: Vec<Build> = parsed.builds.into_iter().map(JenkinsBuild::into_build).collect();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].number, 2);
        assert_eq!(builds[0].outcome, BuildResult::Building);
        assert_eq!(builds[1].outcome, BuildResult::Success);
        assert_eq!(builds[1].duration_ms, 95000);
    }
}
