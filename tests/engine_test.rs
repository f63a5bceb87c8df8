//! Engine reload tests against a mock controller

use std::path::Path;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subkeeper::config::ControllerConfig;
use subkeeper::engine::{applier_for, ConfigApplier, ControllerApplier};
use subkeeper::utils::error::ApplyError;

fn controller(server: &MockServer, secret: &str) -> ControllerApplier {
    ControllerApplier::new(&ControllerConfig {
        url: server.uri(),
        secret: secret.to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_reload_sends_path_with_secret() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/configs"))
        .and(query_param("force", "true"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_json(json!({ "path": "/srv/clash/subscribe/work.yaml" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    controller(&server, "s3cret")
        .apply(Path::new("/srv/clash/subscribe/work.yaml"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reload_rejected_by_controller() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad config"))
        .expect(1)
        .mount(&server)
        .await;

    let err = controller(&server, "")
        .apply(Path::new("/tmp/work.yaml"))
        .await
        .unwrap_err();

    match err {
        ApplyError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad config");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_applier_for_uses_controller_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/configs"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = ControllerConfig {
        url: server.uri(),
        secret: String::new(),
    };
    let applier = applier_for(Some(&config)).unwrap();
    applier.apply(Path::new("/tmp/work.yaml")).await.unwrap();

    // without a controller the log applier never touches the network
    applier_for(None)
        .unwrap()
        .apply(Path::new("/tmp/work.yaml"))
        .await
        .unwrap();
}
