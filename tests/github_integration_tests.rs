use review_apps::scm::{
    DeploymentFilter, DeploymentRequest, DeploymentState, GitHubClient, SourceControl,
    SourceControlError,
};
use serde_json::json;
mod test_utils;
use test_utils::widgets_archive;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path, query_param},
};

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new_with_api_base("ghp_test_token", server.uri()).unwrap()
}

#[tokio::test]
async fn test_register_hook_sends_pull_request_subscription() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/hooks"))
        .and(header("authorization", "Bearer ghp_test_token"))
        .and(header("accept", "application/vnd.github.v3+json"))
        .and(body_json(json!({
            "name": "web",
            "active": true,
            "events": ["pull_request"],
            "config": {
                "url": "https://review.example.com/hook/inst-1",
                "secret": "s3cret",
                "content_type": "json"
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 4242 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let hook_id = client(&mock_server)
        .register_hook(
            "acme",
            "widgets",
            "https://review.example.com/hook/inst-1",
            "s3cret",
        )
        .await
        .unwrap();

    assert_eq!(hook_id, 4242);
}

#[tokio::test]
async fn test_register_hook_surfaces_api_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/hooks"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Validation Failed"
        })))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .register_hook("acme", "widgets", "https://review.example.com/hook/x", "s")
        .await
        .unwrap_err();

    match err {
        SourceControlError::Api { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Validation Failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unregister_hook_deletes_by_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/repos/acme/widgets/hooks/4242"))
        .and(header("authorization", "Bearer ghp_test_token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    client(&mock_server)
        .unregister_hook("acme", "widgets", 4242)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unregister_missing_hook_reports_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/repos/acme/widgets/hooks/1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .unregister_hook("acme", "widgets", 1)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceControlError::Api { status: 404, .. }));
}

#[tokio::test]
async fn test_create_deployment_disables_merge_and_contexts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/deployments"))
        .and(body_json(json!({
            "ref": "abc1234",
            "task": "deploy:review",
            "environment": "review",
            "auto_merge": false,
            "required_contexts": []
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 99 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let id = client(&mock_server)
        .create_deployment(
            "acme",
            "widgets",
            DeploymentRequest {
                git_ref: "abc1234",
                task: "deploy:review",
                environment: "review",
            },
        )
        .await
        .unwrap();

    assert_eq!(id, 99);
}

#[tokio::test]
async fn test_deployment_status_omits_absent_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/deployments/99/statuses"))
        .and(body_json(json!({
            "state": "success",
            "target_url": "https://widgets.apps.example.com",
            "description": "Deployed review app"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/deployments/100/statuses"))
        .and(body_json(json!({ "state": "inactive" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 2 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let github = client(&mock_server);
    github
        .create_deployment_status(
            "acme",
            "widgets",
            99,
            DeploymentState::Success,
            Some("https://widgets.apps.example.com"),
            Some("Deployed review app"),
        )
        .await
        .unwrap();
    github
        .create_deployment_status("acme", "widgets", 100, DeploymentState::Inactive, None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_deployments_filters_by_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/deployments"))
        .and(query_param("sha", "abc1234"))
        .and(query_param("task", "deploy:review"))
        .and(query_param("environment", "review"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 3, "sha": "abc1234", "ref": "abc1234", "task": "deploy:review", "environment": "review" },
            { "id": 5, "sha": "abc1234", "ref": "abc1234", "task": "deploy:review", "environment": "review" }
        ])))
        .mount(&mock_server)
        .await;

    let deployments = client(&mock_server)
        .list_deployments(
            "acme",
            "widgets",
            DeploymentFilter {
                sha: "abc1234",
                task: "deploy:review",
                environment: "review",
            },
        )
        .await
        .unwrap();

    let ids: Vec<i64> = deployments.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![3, 5]);
    assert_eq!(deployments[0].git_ref, "abc1234");
}

#[tokio::test]
async fn test_fetch_archive_extracts_top_level_directory() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/tarball/abc1234"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(widgets_archive()))
        .mount(&mock_server)
        .await;

    let dest = tempfile::tempdir().unwrap();
    let app_dir = client(&mock_server)
        .fetch_archive("acme", "widgets", "abc1234", dest.path())
        .await
        .unwrap();

    assert_eq!(app_dir, dest.path().join("acme-widgets-abc1234"));
    assert!(app_dir.join("app.yml").is_file());
    assert!(app_dir.join("manifest.yml").is_file());
}

#[tokio::test]
async fn test_fetch_archive_rejects_multiple_roots() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/tarball/abc1234"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(two_root_archive()))
        .mount(&mock_server)
        .await;

    let dest = tempfile::tempdir().unwrap();
    let err = client(&mock_server)
        .fetch_archive("acme", "widgets", "abc1234", dest.path())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceControlError::Archive(_)));
}

fn two_root_archive() -> Vec<u8> {
    use flate2::{Compression, write::GzEncoder};

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for name in ["one/a.txt", "two/b.txt"] {
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, &b"x"[..]).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
