//! Tests for memory admission control.
//!
//! Validates the aggregate quota rule (runtime memory plus the N largest
//! build memories), the per-field ceilings and their precedence.

use shepherd::{
    quota, BuildSpec, Config, ContainerSystem, GitRepo, JenkinsConfig, Project, ProjectId,
    ProjectMemoryStats, ProjectOwner, ProjectRuntime, Publication, Resources,
};
use std::collections::BTreeMap;

fn config(quota_mb: u32, builders: usize) -> Config {
    Config {
        memory_quota_mb: quota_mb,
        concurrent_jenkins_builders: builders,
        max_project_runtime_resources: Resources::new(512, 1.0).unwrap(),
        max_project_build_resources: Resources::new(2048, 2.0).unwrap(),
        host_dns: "v-herd.eu".to_string(),
        container_system: ContainerSystem::Kubernetes,
        jenkins: JenkinsConfig::default(),
    }
}

fn project(id: &str, runtime_mb: u32, build_mb: u32) -> Project {
    Project {
        id: ProjectId::new(id).unwrap(),
        description: "Example".to_string(),
        webpage: None,
        git_repo: GitRepo {
            url: format!("https://github.com/example/{id}"),
            branch: "master".to_string(),
            credentials_id: None,
        },
        owner: ProjectOwner {
            name: "Martin Vysny".to_string(),
            email: "mavi@vaadin.com".to_string(),
        },
        runtime: ProjectRuntime {
            resources: Resources::new(runtime_mb, 1.0).unwrap(),
            env_vars: BTreeMap::new(),
        },
        build: BuildSpec {
            resources: Resources::new(build_mb, 2.0).unwrap(),
            build_args: BTreeMap::new(),
            docker_file: None,
            build_context: None,
        },
        publication: Publication::default(),
        additional_services: Default::default(),
        additional_admins: Default::default(),
    }
}

// =============================================================================
// Aggregation
// =============================================================================

#[test]
fn test_single_default_project_aggregation() {
    let config = config(4000, 2);
    let p = project("myapp", 256, 2048);
    let stats = ProjectMemoryStats::calculate(&config, [&p]);

    assert_eq!(stats.project_runtime_quota.usage_mb, 256);
    assert_eq!(stats.project_runtime_quota.limit_mb, 4000 - 2048);
    assert_eq!(stats.total_quota.usage_mb, 256 + 2048);
    assert_eq!(stats.total_quota.limit_mb, 4000);
}

#[test]
fn test_build_usage_is_sum_of_n_largest() {
    // Two projects, one builder: only the larger build can ever run, so
    // only it is provisioned.
    let config = config(4000, 1);
    let a = project("small-build", 256, 1024);
    let b = project("big-build", 256, 2048);
    let stats = ProjectMemoryStats::calculate(&config, [&a, &b]);

    assert_eq!(stats.total_quota.usage_mb, 512 + 2048);
    assert_eq!(stats.project_runtime_quota.limit_mb, 4000 - 2048);
}

#[test]
fn test_build_usage_with_two_builders() {
    let config = config(8000, 2);
    let a = project("aa", 256, 1024);
    let b = project("bb", 256, 2048);
    let c = project("cc", 256, 1536);
    let stats = ProjectMemoryStats::calculate(&config, [&a, &b, &c]);

    // The two largest builds: 2048 + 1536.
    assert_eq!(stats.total_quota.usage_mb, 768 + 2048 + 1536);
}

#[test]
fn test_empty_project_set() {
    let config = config(4000, 2);
    let stats = ProjectMemoryStats::calculate(&config, []);
    assert_eq!(stats.total_quota.usage_mb, 0);
    assert_eq!(stats.project_runtime_quota.limit_mb, 4000);
}

#[test]
fn test_build_usage_larger_than_quota_saturates() {
    let config = config(1000, 2);
    let p = project("heavy", 256, 2048);
    let stats = ProjectMemoryStats::calculate(&config, [&p]);
    assert_eq!(stats.project_runtime_quota.limit_mb, 0);
}

// =============================================================================
// Admission
// =============================================================================

#[test]
fn test_validate_admits_within_quota() {
    let config = config(4000, 2);
    let candidate = project("myapp", 256, 2048);
    quota::validate(&candidate, &config, &[]).unwrap();
}

#[test]
fn test_validate_rejects_over_quota() {
    let config = config(2000, 2);
    let existing = vec![project("first", 256, 1024)];
    let candidate = project("second", 256, 1024);
    // 512 runtime + 2048 provisioned builds > 2000.
    let err = quota::validate(&candidate, &config, &existing).unwrap_err();
    match err {
        shepherd::Error::QuotaExceeded { usage_mb, limit_mb } => {
            assert!(usage_mb > limit_mb);
            assert_eq!(limit_mb, 2000);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_per_field_ceiling_beats_aggregate_check() {
    // The aggregate would fit easily, but the per-project runtime ceiling
    // (512 Mb) is violated; that must be reported, not QuotaExceeded.
    let config = config(100_000, 2);
    let candidate = project("greedy", 600, 1024);
    let err = quota::validate(&candidate, &config, &[]).unwrap_err();
    match err {
        shepherd::Error::Validation(msg) => {
            assert!(msg.contains("600"), "message should carry the value: {msg}");
            assert!(msg.contains("512"), "message should carry the ceiling: {msg}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_build_ceiling_checked() {
    let mut config = config(100_000, 2);
    config.max_project_build_resources = Resources::new(1024, 2.0).unwrap();
    let candidate = project("big-build", 256, 2048);
    assert!(matches!(
        quota::validate(&candidate, &config, &[]),
        Err(shepherd::Error::Validation(_))
    ));
}

#[test]
fn test_usage_exactly_at_limit_is_admitted() {
    // One builder: both projects ask for a 2048 Mb build but only one is
    // provisioned, so 512 + 2048 = 2560 fits a 2560 Mb quota exactly.
    let config = config(2560, 1);
    let others = vec![project("other", 256, 2048)];
    let candidate = project("myapp", 256, 2048);
    quota::validate(&candidate, &config, &others).unwrap();
}
