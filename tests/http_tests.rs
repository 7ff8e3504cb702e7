//! HTTP surface tests: authentication, tenant isolation, upload slot gating
//! and export state conflicts.

mod test_utils;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use stockpile::concurrency::OPERATION_FILE_UPLOAD;
use test_utils::{TEST_TOKEN, TestApp, body_json, create_test_user, json_request, user_request};

const ARCHIVE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<inventory exportDate="2025-01-01T00:00:00Z" exportType="locations">
  <locations>
    <location id="6f1d1e8e-53c2-4c8e-9f0a-0b0c4b1f2a01">
      <name>Home</name>
      <address>Main street 1</address>
    </location>
  </locations>
</inventory>
"#;

#[tokio::test]
async fn root_and_health_are_public() {
    let app = TestApp::new().await.unwrap();

    let root = app
        .send(Request::get("/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(root.status(), StatusCode::OK);
    assert_eq!(body_json(root).await["service"], "stockpile");

    let health = app
        .send(Request::get("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn user_routes_require_bearer_and_actor_headers() {
    let app = TestApp::new().await.unwrap();

    let anonymous = app
        .send(Request::get("/exports").body(Body::empty()).unwrap())
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let no_user = app
        .send(
            Request::get("/exports")
                .header("Authorization", format!("Bearer {TEST_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(no_user.status(), StatusCode::BAD_REQUEST);
    let body = body_json(no_user).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn exports_of_other_users_are_hidden() {
    let app = TestApp::new().await.unwrap();
    let owner = create_test_user(&app.state.db).await.unwrap();
    let stranger = create_test_user(&app.state.db).await.unwrap();

    let created = app
        .send(json_request(
            "POST",
            "/exports",
            owner,
            json!({ "export_type": "locations", "description": "mine" }),
        ))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let export = body_json(created).await;
    assert_eq!(export["status"], "pending");
    let uri = format!("/exports/{}", export["id"].as_str().unwrap());

    let peek = app
        .send(user_request("GET", &uri, stranger).body(Body::empty()).unwrap())
        .await;
    assert_eq!(peek.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(peek).await["message"],
        "entity not found or access denied"
    );

    let listed = app
        .send(user_request("GET", "/exports", stranger).body(Body::empty()).unwrap())
        .await;
    assert_eq!(body_json(listed).await["exports"], json!([]));
}

#[tokio::test]
async fn unfinished_exports_cannot_be_downloaded_or_deleted() {
    let app = TestApp::new().await.unwrap();
    let owner = create_test_user(&app.state.db).await.unwrap();

    let created = app
        .send(json_request("POST", "/exports", owner, json!({ "export_type": "areas" })))
        .await;
    let id = body_json(created).await["id"].as_str().unwrap().to_string();

    let download = app
        .send(
            user_request("GET", &format!("/exports/{id}/download"), owner)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(download.status(), StatusCode::CONFLICT);

    let delete = app
        .send(
            user_request("DELETE", &format!("/exports/{id}"), owner)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(delete.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_export_requests_are_rejected() {
    let app = TestApp::new().await.unwrap();
    let owner = create_test_user(&app.state.db).await.unwrap();

    let malformed = app
        .send(
            user_request("POST", "/exports", owner)
                .header("Content-Type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let empty_selection = app
        .send(json_request(
            "POST",
            "/exports",
            owner,
            json!({ "export_type": "selected_items", "selected_items": [] }),
        ))
        .await;
    assert_eq!(empty_selection.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploads_beyond_the_slot_ceiling_get_429() {
    let app = TestApp::new().await.unwrap();
    let owner = create_test_user(&app.state.db).await.unwrap();

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(
            app.state
                .slots
                .start(owner.user_id, OPERATION_FILE_UPLOAD)
                .await
                .unwrap(),
        );
    }

    let rejected = app
        .send(user_request("POST", "/imports", owner).body(Body::from(ARCHIVE)).unwrap())
        .await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        rejected.headers().get("retry-after").unwrap().to_str().unwrap(),
        "30"
    );
    assert_eq!(body_json(rejected).await["code"], "RATE_LIMITED");

    app.state
        .slots
        .finish(owner.user_id, OPERATION_FILE_UPLOAD, held[0])
        .await
        .unwrap();

    let accepted = app
        .send(
            user_request("POST", "/imports?description=nightly", owner)
                .body(Body::from(ARCHIVE))
                .unwrap(),
        )
        .await;
    assert_eq!(accepted.status(), StatusCode::CREATED);
    let export = body_json(accepted).await;
    assert_eq!(export["export_type"], "imported");
    assert_eq!(export["status"], "pending");
    assert_eq!(export["description"], "nightly");

    let status = app
        .send(
            user_request("GET", "/concurrency/file-upload", owner)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let status = body_json(status).await;
    assert_eq!(status["active"], 2);
    assert_eq!(status["max"], 3);
    assert_eq!(status["can_start"], true);
}

#[tokio::test]
async fn rejected_upload_releases_its_slot() {
    let app = TestApp::new().await.unwrap();
    let owner = create_test_user(&app.state.db).await.unwrap();

    let empty = app
        .send(user_request("POST", "/imports", owner).body(Body::empty()).unwrap())
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let status = app
        .state
        .slots
        .status(owner.user_id, OPERATION_FILE_UPLOAD)
        .await
        .unwrap();
    assert_eq!(status.active, 0);
}

#[tokio::test]
async fn operators_manage_tenants_and_see_all_exports() {
    let app = TestApp::new().await.unwrap();
    let operator = |method: &str, uri: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {TEST_TOKEN}"))
    };

    let created = app
        .send(
            operator("POST", "/admin/tenants")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({ "name": "Acme" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let tenant = body_json(created).await;
    assert_eq!(tenant["name"], "Acme");

    let tenants = app
        .send(operator("GET", "/admin/tenants").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body_json(tenants).await["tenants"].as_array().unwrap().len(), 1);

    let first = create_test_user(&app.state.db).await.unwrap();
    let second = create_test_user(&app.state.db).await.unwrap();
    for actor in [first, second] {
        let response = app
            .send(json_request("POST", "/exports", actor, json!({ "export_type": "locations" })))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let all = app
        .send(operator("GET", "/admin/exports").body(Body::empty()).unwrap())
        .await;
    assert_eq!(all.status(), StatusCode::OK);
    let exports = body_json(all).await["exports"].as_array().unwrap().clone();
    assert_eq!(exports.len(), 2);
    assert!(exports.iter().all(|export| export["tenant_id"].is_string()));
}
