// Workspace document REST API.
//
// Point reads and merge writes for the metadata and state documents. The
// daemon's relay store client is the only caller.

mod workspaces;

use std::sync::Arc;

use axum::{routing::get, Router};
use tably_common::types::WorkspaceCode;

use crate::{
    error::{ErrorCode, RelayError},
    store::WorkspaceStore,
};

/// Response header carrying the state document's revision.
pub const REVISION_HEADER: &str = "x-tably-revision";

pub fn router(store: Arc<WorkspaceStore>) -> Router {
    Router::new()
        .route(
            "/v1/workspaces/{code}",
            get(workspaces::get_workspace).put(workspaces::put_workspace),
        )
        .route(
            "/v1/workspaces/{code}/state",
            get(workspaces::get_state).patch(workspaces::merge_state),
        )
        .with_state(store)
}

pub(crate) fn parse_code(raw: &str) -> Result<WorkspaceCode, RelayError> {
    WorkspaceCode::parse(raw).map_err(|error| {
        RelayError::new(ErrorCode::ValidationFailed, error.to_string())
            .with_details(serde_json::json!({ "field": "code" }))
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        router(Arc::new(WorkspaceStore::new()))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request should build"),
            None => builder.body(Body::empty()).expect("request should build"),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = app.clone().oneshot(request).await.expect("request should succeed");
        let status = response.status();
        let revision = response
            .headers()
            .get(REVISION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("body should be json")
        };
        (status, value, revision)
    }

    fn workspace_json(code: &str) -> Value {
        json!({
            "code": code,
            "name": "Research",
            "createdAt": "2026-01-02T03:04:05Z",
            "participants": ["user_1_aaaaaaaaa"],
            "isActive": true
        })
    }

    #[tokio::test]
    async fn put_then_get_workspace() {
        let app = app();

        let (status, body, _) =
            send(&app, request(Method::PUT, "/v1/workspaces/AB12C9", Some(workspace_json("AB12C9"))))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Research");

        let (status, body, _) = send(&app, request(Method::GET, "/v1/workspaces/AB12C9", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], "AB12C9");
        assert_eq!(body["participants"], json!(["user_1_aaaaaaaaa"]));
    }

    #[tokio::test]
    async fn lowercase_path_code_is_normalized() {
        let app = app();
        send(&app, request(Method::PUT, "/v1/workspaces/AB12C9", Some(workspace_json("AB12C9")))).await;

        let (status, body, _) = send(&app, request(Method::GET, "/v1/workspaces/ab12c9", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], "AB12C9");
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let app = app();

        let (status, body, _) = send(&app, request(Method::GET, "/v1/workspaces/ZZZZZZ", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["retryable"], false);

        let (status, _, _) =
            send(&app, request(Method::GET, "/v1/workspaces/ZZZZZZ/state", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_code_is_rejected() {
        let (status, body, _) =
            send(&app(), request(Method::GET, "/v1/workspaces/not-a-code", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(body["error"]["details"]["field"], "code");
    }

    #[tokio::test]
    async fn put_with_mismatched_code_is_rejected() {
        let (status, body, _) = send(
            &app(),
            request(Method::PUT, "/v1/workspaces/AB12C9", Some(workspace_json("QQQQQQ"))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn malformed_body_uses_error_envelope() {
        let (status, body, _) = send(
            &app(),
            request(Method::PATCH, "/v1/workspaces/AB12C9/state", Some(json!({ "tabs": "nope" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn patch_merges_top_level_fields() {
        let app = app();
        let tab = json!({
            "syncId": "https://example.com|Example|0",
            "url": "https://example.com",
            "title": "Example",
            "favIconUrl": "",
            "pinned": false,
            "index": 0
        });

        let (status, body, revision) = send(
            &app,
            request(
                Method::PATCH,
                "/v1/workspaces/AB12C9/state",
                Some(json!({ "tabs": [tab], "lastUpdate": 10, "updatedBy": "user_1_aaaaaaaaa" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tabs"][0]["url"], "https://example.com");
        assert_eq!(revision.as_deref(), Some("1"));

        // Absent fields keep their committed values.
        let (_, body, revision) = send(
            &app,
            request(Method::PATCH, "/v1/workspaces/AB12C9/state", Some(json!({ "lastUpdate": 20 }))),
        )
        .await;
        assert_eq!(body["tabs"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["lastUpdate"], 20);
        assert_eq!(body["updatedBy"], "user_1_aaaaaaaaa");
        assert_eq!(revision.as_deref(), Some("2"));

        let (status, body, revision) =
            send(&app, request(Method::GET, "/v1/workspaces/AB12C9/state", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lastUpdate"], 20);
        assert_eq!(revision.as_deref(), Some("2"));
    }
}
