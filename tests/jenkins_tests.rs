//! HTTP-level tests for the Jenkins adapter, against a mock server.
//!
//! Validates the CSRF crumb handshake, the create-vs-update decision and
//! the builds-list parsing.

use shepherd::{BuildResult, BuildSystemAdapter, JenkinsBuildSystem, JenkinsConfig, ProjectId};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jenkins(server: &MockServer) -> JenkinsBuildSystem {
    JenkinsBuildSystem::new(&JenkinsConfig {
        url: server.uri(),
        username: "admin".to_string(),
        password: "admin".to_string(),
    })
}

async fn mock_crumb(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "crumb": "abc123",
            "crumbRequestField": "Jenkins-Crumb"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_trigger_build_sends_crumb() {
    let server = MockServer::start().await;
    mock_crumb(&server).await;
    Mock::given(method("POST"))
        .and(path("/job/myapp/build"))
        .and(header("Jenkins-Crumb", "abc123"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    jenkins(&server)
        .trigger_build(&ProjectId::new("myapp").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_trigger_build_works_with_crumb_issuer_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/job/myapp/build"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    jenkins(&server)
        .trigger_build(&ProjectId::new("myapp").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_job_posts_to_create_item_when_absent() {
    let server = MockServer::start().await;
    mock_crumb(&server).await;
    Mock::given(method("GET"))
        .and(path("/job/myapp/api/json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/createItem"))
        .and(query_param("name", "myapp"))
        .and(header("content-type", "text/xml; charset=utf-8"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let project = test_project();
    jenkins(&server).create_or_update_job(&project).await.unwrap();
}

#[tokio::test]
async fn test_create_job_updates_config_when_present() {
    let server = MockServer::start().await;
    mock_crumb(&server).await;
    Mock::given(method("GET"))
        .and(path("/job/myapp/api/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "myapp"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/job/myapp/config.xml"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let project = test_project();
    jenkins(&server).create_or_update_job(&project).await.unwrap();
}

#[tokio::test]
async fn test_delete_absent_job_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/job/ghost/api/json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // No POST mock mounted: any delete attempt would fail the test.

    jenkins(&server)
        .delete_job_if_exists(&ProjectId::new("ghost").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recent_builds_are_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/job/myapp/api/json"))
        .and(query_param(
            "tree",
            "builds[number,result,timestamp,duration,estimatedDuration]",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "builds": [
                {"number": 3, "result": null, "timestamp": 1700000200000i64,
                 "duration": 0, "estimatedDuration": 100000},
                {"number": 2, "result": "FAILURE", "timestamp": 1700000100000i64,
                 "duration": 90000, "estimatedDuration": 100000},
                {"number": 1, "result": "SUCCESS", "timestamp": 1700000000000i64,
                 "duration": 95000, "estimatedDuration": 100000}
            ]
        })))
        .mount(&server)
        .await;

    let builds = jenkins(&server)
        .get_recent_builds(&ProjectId::new("myapp").unwrap())
        .await
        .unwrap();
    assert_eq!(builds.len(), 3);
    assert_eq!(builds[0].number, 1);
    assert_eq!(builds[0].outcome, BuildResult::Success);
    assert_eq!(builds[1].outcome, BuildResult::Failure);
    assert_eq!(builds[2].number, 3);
    assert_eq!(builds[2].outcome, BuildResult::Building);
}

#[tokio::test]
async fn test_build_log_fetches_console_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/job/myapp/3/logText/progressiveText"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Started by timer\n"))
        .mount(&server)
        .await;

    let log = jenkins(&server)
        .get_build_log(&ProjectId::new("myapp").unwrap(), 3)
        .await
        .unwrap();
    assert_eq!(log, "Started by timer\n");
}

fn test_project() -> shepherd::Project {
    shepherd::Project::from_json(
        r#"{
            "id": "myapp",
            "description": "Example",
            "gitRepo": {"url": "https://github.com/example/myapp", "branch": "main"},
            "owner": {"name": "Martin Vysny", "email": "mavi@vaadin.com"},
            "runtime": {"resources": {"memoryMb": 256, "cpu": 1.0}},
            "build": {"resources": {"memoryMb": 2048, "cpu": 2.0}}
        }"#,
    )
    .unwrap()
}
