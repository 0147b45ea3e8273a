//! Tests for the project data model.
//!
//! Validates ID shape enforcement at the serde boundary, JSON round trips
//! (including empty optional collections) and the documented defaults.

use shepherd::{
    BuildSpec, GitRepo, IngressConfig, Project, ProjectId, ProjectOwner, ProjectRuntime,
    Publication, Resources, Service, ServiceType,
};
use std::collections::{BTreeMap, BTreeSet};

fn minimal_project() -> Project {
    Project {
        id: ProjectId::new("vaadin-boot-example-gradle").unwrap(),
        description: "Example project".to_string(),
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
        additional_services: BTreeSet::new(),
        additional_admins: BTreeSet::new(),
    }
}

fn full_project() -> Project {
    let mut p = minimal_project();
    p.webpage = Some("https://example.com".to_string());
    p.git_repo.credentials_id = Some("c4d257ce-0048-11ee-a0b5-ffedf9ffccf4".to_string());
    p.runtime.env_vars = BTreeMap::from([("SPRING_PROFILE".to_string(), "prod".to_string())]);
    p.build.build_args = BTreeMap::from([("offlinekey".to_string(), "abc".to_string())]);
    p.build.docker_file = Some("vherd.Dockerfile".to_string());
    p.build.build_context = Some("backend".to_string());
    p.publication = Publication {
        publish_on_main_domain: true,
        https: false,
        additional_domains: BTreeSet::from(["demo.example.com".to_string()]),
        ingress_config: IngressConfig {
            max_body_size_mb: 10,
            proxy_read_timeout_seconds: 300,
        },
    };
    p.additional_services = BTreeSet::from([Service {
        service_type: ServiceType::Postgres,
    }]);
    p.additional_admins = BTreeSet::from(["ops@example.com".to_string()]);
    p
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_minimal_project_round_trip() {
    let p = minimal_project();
    let json = p.to_json().unwrap();
    assert_eq!(Project::from_json(&json).unwrap(), p);
}

#[test]
fn test_full_project_round_trip() {
    let p = full_project();
    let json = p.to_json().unwrap();
    assert_eq!(Project::from_json(&json).unwrap(), p);
}

#[test]
fn test_empty_collections_are_omitted() {
    let json = minimal_project().to_json().unwrap();
    assert!(!json.contains("envVars"));
    assert!(!json.contains("buildArgs"));
    assert!(!json.contains("additionalServices"));
    assert!(!json.contains("additionalAdmins"));
    assert!(!json.contains("webpage"));
}

#[test]
fn test_parses_record_with_defaults() {
    // A record written before publication/services existed still parses,
    // with the documented defaults.
    let json = r#"{
        "id": "myapp",
        "description": "Example",
        "gitRepo": {"url": "https://github.com/example/myapp", "branch": "main"},
        "owner": {"name": "Martin Vysny", "email": "mavi@vaadin.com"},
        "runtime": {"resources": {"memoryMb": 256, "cpu": 1.0}},
        "build": {"resources": {"memoryMb": 2048, "cpu": 2.0}}
    }"#;
    let p = Project::from_json(json).unwrap();
    assert!(p.publication.publish_on_main_domain);
    assert!(p.publication.https);
    assert_eq!(p.publication.ingress_config.max_body_size_mb, 1);
    assert_eq!(p.publication.ingress_config.proxy_read_timeout_seconds, 60);
    assert!(p.additional_services.is_empty());
    assert_eq!(p.resolve_webpage(), "https://github.com/example/myapp");
}

// =============================================================================
// Boundary Validation
// =============================================================================

#[test]
fn test_bad_id_rejected_at_serde_boundary() {
    let json = r#"{
        "id": "Bad_ID",
        "description": "Example",
        "gitRepo": {"url": "https://github.com/example/x", "branch": "main"},
        "owner": {"name": "N", "email": "n@example.com"},
        "runtime": {"resources": {"memoryMb": 256, "cpu": 1.0}},
        "build": {"resources": {"memoryMb": 2048, "cpu": 2.0}}
    }"#;
    assert!(Project::from_json(json).is_err());
}

#[test]
fn test_undersized_resources_rejected_at_serde_boundary() {
    let json = r#"{"memoryMb": 32, "cpu": 1.0}"#;
    assert!(serde_json::from_str::<Resources>(json).is_err());
    let json = r#"{"memoryMb": 256, "cpu": 0.0}"#;
    assert!(serde_json::from_str::<Resources>(json).is_err());
}

#[test]
fn test_bad_credentials_id_rejected() {
    let mut p = minimal_project();
    p.git_repo.credentials_id = Some("not-a-uuid".to_string());
    assert!(p.validate().is_err());
}

#[test]
fn test_bad_build_context_rejected() {
    let mut p = minimal_project();
    p.build.build_context = Some("../escape".to_string());
    assert!(p.validate().is_err());
    p.build.build_context = Some("/absolute".to_string());
    assert!(p.validate().is_err());
    p.build.build_context = Some("nested/dir".to_string());
    assert!(p.validate().is_ok());
}

// =============================================================================
// Derived Accessors
// =============================================================================

#[test]
fn test_published_urls() {
    let p = full_project();
    assert_eq!(
        p.published_urls("v-herd.eu"),
        vec![
            "https://v-herd.eu/vaadin-boot-example-gradle".to_string(),
            "https://demo.example.com".to_string(),
        ]
    );
}

#[test]
fn test_can_edit_and_all_admins() {
    let p = full_project();
    assert!(p.can_edit("mavi@vaadin.com"));
    assert!(p.can_edit("ops@example.com"));
    assert!(!p.can_edit("stranger@example.com"));
    assert_eq!(
        p.all_admins().into_iter().collect::<Vec<_>>(),
        vec!["mavi@vaadin.com", "ops@example.com"]
    );
}
