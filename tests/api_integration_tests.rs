//! HTTP API tests driving the router in-process.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tenant_admin::server::create_app;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    FakeEnvironmentSource, FakeTokenClient, OPERATOR_TOKEN, build_state, environment,
    installed_app, setup_test_db, test_config,
};

struct TestApp {
    router: Router,
    tokens: Arc<FakeTokenClient>,
}

impl TestApp {
    async fn new() -> Result<Self> {
        Self::with_source(FakeEnvironmentSource::default()).await
    }

    async fn with_source(source: FakeEnvironmentSource) -> Result<Self> {
        let db = setup_test_db().await?;
        let tokens = Arc::new(FakeTokenClient::default());
        let state = build_state(
            db,
            test_config("http://127.0.0.1:9"),
            tokens.clone(),
            Arc::new(source),
        );
        Ok(Self {
            router: create_app(state),
            tokens,
        })
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn operator(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        self.send(method, uri, Some(OPERATOR_TOKEN), body).await
    }

    async fn create_customer(&self, name: &str) -> Result<String> {
        let (status, body) = self
            .operator(
                Method::POST,
                "/api/v1/customers",
                Some(json!({ "customer_name": name })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        Ok(body["id"].as_str().unwrap_or_default().to_string())
    }

    async fn create_tenant(&self, customer_id: &str) -> Result<String> {
        let (status, body) = self
            .operator(
                Method::POST,
                "/api/v1/tenants",
                Some(json!({
                    "customer_id": customer_id,
                    "description": "Production",
                    "client_id": "client-id",
                    "client_secret": "client-secret",
                    "auth_context": "contoso.example"
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        Ok(body["id"].as_str().unwrap_or_default().to_string())
    }
}

#[tokio::test]
async fn public_routes_need_no_token() -> Result<()> {
    let app = TestApp::new().await?;

    let (status, body) = app.send(Method::GET, "/", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "tenant-admin");

    let (status, body) = app.send(Method::GET, "/healthz", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.send(Method::GET, "/openapi.json", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/api/v1/tenants/{id}/sync").is_some());
    Ok(())
}

#[tokio::test]
async fn operator_routes_reject_missing_or_wrong_tokens() -> Result<()> {
    let app = TestApp::new().await?;

    let (status, body) = app.send(Method::GET, "/api/v1/users", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .send(Method::GET, "/api/v1/customers", Some("nope"), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.operator(Method::GET, "/api/v1/customers", None).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn provisioned_user_completes_password_setup() -> Result<()> {
    let app = TestApp::new().await?;

    let (status, body) = app
        .operator(
            Method::POST,
            "/api/v1/users",
            Some(json!({ "name": "Ada", "email": "Ada@Example.com", "can_access_customers": true })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["has_password"], false);
    let token = body["setup_token"]["token"].as_str().unwrap_or_default().to_string();
    let user_id = body["user"]["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/password-setup",
            None,
            Some(json!({ "token": token, "password": "correct horse battery" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user_id"], user_id.as_str());

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/password-setup",
            None,
            Some(json!({ "token": token, "password": "correct horse battery" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, body) = app
        .operator(Method::GET, &format!("/api/v1/users/{user_id}"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_password"], true);
    assert!(body.get("password").is_none());
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_problem_documents() -> Result<()> {
    let app = TestApp::new().await?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/password-setup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["trace_id"].is_string());

    let (status, body) = app
        .operator(Method::GET, "/api/v1/customers/not-a-uuid", None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, body) = app
        .operator(Method::GET, "/api/v1/users?limit=many", None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() -> Result<()> {
    let app = TestApp::new().await?;
    let user = json!({ "name": "Ada", "email": "ada@example.com" });

    let (status, _) = app
        .operator(Method::POST, "/api/v1/users", Some(user.clone()))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .operator(Method::POST, "/api/v1/users", Some(user))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert!(body["trace_id"].is_string());
    Ok(())
}

#[tokio::test]
async fn user_updates_distinguish_null_from_absent() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, body) = app
        .operator(
            Method::POST,
            "/api/v1/users",
            Some(json!({ "name": "Ada", "email": "ada@example.com", "github_avatar": "https://avatars.example.com/ada" })),
        )
        .await?;
    let uri = format!("/api/v1/users/{}", body["user"]["id"].as_str().unwrap_or_default());

    let (status, body) = app
        .operator(
            Method::PATCH,
            &uri,
            Some(json!({ "github_token": "ghp_example", "is_active": false })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["has_github_token"], true);
    assert_eq!(body["is_active"], false);
    assert_eq!(body["github_avatar"], "https://avatars.example.com/ada");

    let (_, body) = app
        .operator(
            Method::PATCH,
            &uri,
            Some(json!({ "github_token": null, "github_avatar": null })),
        )
        .await?;
    assert_eq!(body["has_github_token"], false);
    assert_eq!(body["github_avatar"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn customer_grants_and_summary() -> Result<()> {
    let app = TestApp::new().await?;
    let contoso = app.create_customer("Contoso").await?;
    app.create_customer("Fabrikam").await?;
    app.create_tenant(&contoso).await?;

    let (_, body) = app
        .operator(
            Method::POST,
            "/api/v1/users",
            Some(json!({ "name": "Ops", "email": "ops@example.com", "can_access_customers": true })),
        )
        .await?;
    let user_id = body["user"]["id"].as_str().unwrap_or_default().to_string();
    let grant = format!("/api/v1/users/{user_id}/customers/{contoso}");

    let (status, _) = app.operator(Method::PUT, &grant, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.operator(Method::PUT, &grant, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT, "granting twice is idempotent");

    let (status, body) = app
        .operator(Method::GET, &format!("/api/v1/users/{user_id}/customers"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["customer_name"], "Contoso");

    let missing = format!("/api/v1/users/{user_id}/customers/{}", Uuid::new_v4());
    let (status, _) = app.operator(Method::PUT, &missing, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .operator(Method::GET, "/api/v1/customers/summary", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_customers"], 2);
    assert_eq!(body["total_tenants"], 1);
    assert_eq!(body["active_users"], 1);

    let (status, _) = app.operator(Method::DELETE, &grant, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.operator(Method::DELETE, &grant, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn customer_listing_paginates_with_cursor() -> Result<()> {
    let app = TestApp::new().await?;
    for name in ["Delta", "Alpha", "Charlie", "Bravo"] {
        app.create_customer(name).await?;
    }

    let (status, body) = app
        .operator(Method::GET, "/api/v1/customers?limit=3", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_more"], true);
    assert_eq!(body["data"][0]["customer_name"], "Alpha");
    let cursor = body["next_cursor"].as_str().unwrap_or_default().to_string();

    let (_, body) = app
        .operator(
            Method::GET,
            &format!("/api/v1/customers?limit=3&cursor={cursor}"),
            None,
        )
        .await?;
    assert_eq!(body["has_more"], false);
    assert_eq!(body["data"][0]["customer_name"], "Delta");

    let (status, body) = app
        .operator(Method::GET, "/api/v1/customers?cursor=***", None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    Ok(())
}

#[tokio::test]
async fn tenant_lifecycle_hides_secrets_and_refreshes_tokens() -> Result<()> {
    let app = TestApp::new().await?;
    let customer = app.create_customer("Contoso").await?;

    let (status, body) = app
        .operator(
            Method::POST,
            "/api/v1/tenants",
            Some(json!({ "customer_id": Uuid::new_v4() })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "FOREIGN_KEY_VIOLATION");

    let tenant = app.create_tenant(&customer).await?;
    let uri = format!("/api/v1/tenants/{tenant}");

    let (status, body) = app.operator(Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_client_secret"], true);
    assert_eq!(body["has_token"], false);
    assert!(body.get("client_secret").is_none());
    assert_eq!(body["environments_by_status"], json!([]));

    let (status, body) = app
        .operator(Method::POST, &format!("{uri}/token"), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["has_token"], true);
    assert!(body["token_expires_at"].is_string());
    assert_eq!(app.tokens.calls(), 1);

    let (_, body) = app
        .operator(
            Method::PATCH,
            &uri,
            Some(json!({ "client_secret": "rotated" })),
        )
        .await?;
    assert_eq!(body["has_token"], false);

    let (status, body) = app
        .operator(Method::GET, &format!("/api/v1/customers/{customer}/tenants"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, _) = app.operator(Method::DELETE, &uri, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app.operator(Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn sync_endpoint_populates_environments_and_installations() -> Result<()> {
    let app_id = Uuid::new_v4();
    let app = TestApp::with_source(FakeEnvironmentSource::new(vec![
        (
            environment("Production", "Active"),
            vec![installed_app(app_id, "Sales Extension", "Installed")],
        ),
        (environment("Sandbox", "Preparing"), Vec::new()),
    ]))
    .await?;
    let customer = app.create_customer("Contoso").await?;
    let tenant = app.create_tenant(&customer).await?;

    let (status, body) = app
        .operator(Method::POST, &format!("/api/v1/tenants/{tenant}/sync"), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["environments_upserted"], 2);
    assert_eq!(body["apps_upserted"], 1);

    let (status, body) = app
        .operator(
            Method::GET,
            &format!("/api/v1/tenants/{tenant}/environments"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Production");
    assert_eq!(body[0]["type"], "Production");

    let (status, body) = app
        .operator(
            Method::GET,
            &format!("/api/v1/tenants/{tenant}/environments/Production/apps"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], app_id.to_string());

    let (status, _) = app
        .operator(
            Method::GET,
            &format!("/api/v1/tenants/{tenant}/environments/Missing/apps"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app
        .operator(Method::GET, &format!("/api/v1/tenants/{tenant}"), None)
        .await?;
    assert_eq!(body["installed_apps_by_state"][0]["value"], "Installed");
    assert_eq!(body["installed_apps_by_state"][0]["count"], 1);

    let (status, _) = app
        .operator(
            Method::POST,
            "/api/v1/applications",
            Some(json!({
                "id": app_id,
                "name": "Sales Extension",
                "publisher": "Contoso",
                "id_ranges": [{ "from": 50100, "to": 50149 }]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .operator(
            Method::GET,
            &format!("/api/v1/applications/{app_id}/installations"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn application_validation_errors_are_bad_requests() -> Result<()> {
    let app = TestApp::new().await?;

    let (status, body) = app
        .operator(
            Method::POST,
            "/api/v1/applications",
            Some(json!({
                "name": "Broken",
                "publisher": "Contoso",
                "id_ranges": [{ "from": 10, "to": 1 }]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) = app
        .operator(
            Method::GET,
            &format!("/api/v1/applications/{}", Uuid::new_v4()),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
