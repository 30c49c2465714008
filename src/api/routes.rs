//! API route definitions

use super::handlers::{self, ApiState};
use super::ws_handlers;
use axum::{
    routing::{delete, get, patch, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // ====================================================================
        // Recurring task templates
        // ====================================================================
        .route(
            "/api/templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route("/api/templates/{id}", delete(handlers::delete_template))
        // ====================================================================
        // Data retention (one document per owner)
        // ====================================================================
        .route(
            "/api/retention",
            get(handlers::get_retention).put(handlers::save_retention),
        )
        // ====================================================================
        // Contacts
        // ====================================================================
        .route(
            "/api/contacts",
            get(handlers::list_contacts).post(handlers::create_contact),
        )
        .route(
            "/api/contacts/{id}",
            put(handlers::update_contact).delete(handlers::delete_contact),
        )
        // ====================================================================
        // Deals
        // ====================================================================
        .route(
            "/api/deals",
            get(handlers::list_deals).post(handlers::create_deal),
        )
        .route("/api/deals/{id}", delete(handlers::delete_deal))
        .route("/api/deals/{id}/stage", patch(handlers::move_deal_stage))
        // Dashboard
        .route("/api/dashboard", get(handlers::get_dashboard))
        // Live snapshots
        .route("/ws/{collection}", get(ws_handlers::ws_snapshots))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use crate::api::OWNER_HEADER;
    use crate::test_helpers::{mock_app, put_raw};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        owner: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = mock_app().router();
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_owner_header_required() {
        let app = mock_app().router();
        let (status, body) = call(&app, Method::GET, "/api/contacts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, Method::GET, "/api/contacts", Some("  "), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_template_lifecycle() {
        let app = mock_app().router();
        let (status, created) = call(
            &app,
            Method::POST,
            "/api/templates",
            Some("u1"),
            Some(json!({"title": "Weekly review", "interval": "weekly"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (_, listed) = call(&app, Method::GET, "/api/templates", Some("u1"), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["interval"], "weekly");
        assert_eq!(listed[0]["ownerId"], "u1");

        let (_, other) = call(&app, Method::GET, "/api/templates", Some("u2"), None).await;
        assert!(other.as_array().unwrap().is_empty());

        let uri = format!("/api/templates/{id}");
        let (status, _) = call(&app, Method::DELETE, &uri, Some("u2"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::DELETE, &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::DELETE, &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_blank_template_title_is_bad_request() {
        let app = mock_app().router();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/templates",
            Some("u1"),
            Some(json!({"title": "  ", "interval": "daily"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("title"));
    }

    #[tokio::test]
    async fn test_retention_get_and_put() {
        let app = mock_app().router();
        let (status, _) = call(&app, Method::GET, "/api/retention", Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, saved) = call(
            &app,
            Method::PUT,
            "/api/retention",
            Some("u1"),
            Some(json!({"retentionDays": 90})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["retentionDays"], 90);
        assert_eq!(saved["ownerId"], "u1");

        let (status, fetched) = call(&app, Method::GET, "/api/retention", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, saved);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/retention",
            Some("u1"),
            Some(json!({"retentionDays": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_contact_update_and_delete() {
        let app = mock_app().router();
        let (_, created) = call(
            &app,
            Method::POST,
            "/api/contacts",
            Some("u1"),
            Some(json!({"name": "Ada", "email": "ada@example.com"})),
        )
        .await;
        let uri = format!("/api/contacts/{}", created["id"].as_str().unwrap());

        let (status, updated) = call(
            &app,
            Method::PUT,
            &uri,
            Some("u1"),
            Some(json!({"name": "Ada Lovelace", "company": "Analytical"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Ada Lovelace");
        assert_eq!(updated["company"], "Analytical");

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/contacts/missing",
            Some("u1"),
            Some(json!({"name": "Nobody"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::DELETE, &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, listed) = call(&app, Method::GET, "/api/contacts", Some("u1"), None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deal_stage_move_and_dashboard() {
        let app = mock_app().router();
        let (_, created) = call(
            &app,
            Method::POST,
            "/api/deals",
            Some("u1"),
            Some(json!({"title": "Pilot", "value": 5000})),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (status, moved) = call(
            &app,
            Method::PATCH,
            &format!("/api/deals/{id}/stage"),
            Some("u1"),
            Some(json!({"stage": "won"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["stage"], "won");

        let (status, summary) = call(&app, Method::GET, "/api/dashboard", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["totalDeals"], 1);
        assert_eq!(summary["wonValue"], 5000);
        assert_eq!(summary["winRate"], 1.0);
    }

    #[tokio::test]
    async fn test_malformed_document_is_skipped_in_list() {
        let mock = mock_app();
        put_raw(
            &mock.store,
            "contacts",
            "broken",
            json!({"ownerId": "u1", "createdAt": "not a time"}),
        )
        .await;
        let app = mock.router();
        let (status, listed) = call(&app, Method::GET, "/api/contacts", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_503() {
        let mock = mock_app();
        mock.store.disconnect("network down");
        let app = mock.router();
        let (status, body) = call(&app, Method::GET, "/api/deals", Some("u1"), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("unavailable"));
    }
}
