//! # Tests for Handlers
//!
//! Unit tests for handler DTO mapping; routed behaviour is covered by the
//! HTTP integration tests.

use axum::response::Json;
use chrono::{DateTime, FixedOffset};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::handlers::root;
use crate::handlers::tenants::{TenantDetailDto, TenantDto, ValueCount};
use crate::handlers::users::{UpdateUserDto, UserDto};
use crate::models::{tenant, user};

fn ts(value: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(value).unwrap()
}

fn sample_user() -> user::Model {
    user::Model {
        id: Uuid::new_v4(),
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        password: Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string()),
        github_token: Some(vec![1, 2, 3]),
        github_avatar: None,
        created_at: ts("2025-01-01T00:00:00Z"),
        updated_at: ts("2025-01-02T00:00:00Z"),
        can_access_repos: true,
        can_access_customers: true,
        all_customers: false,
        can_access_admin: false,
        is_active: true,
    }
}

fn sample_tenant() -> tenant::Model {
    tenant::Model {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        description: Some("Production".to_string()),
        created_at: ts("2025-01-01T00:00:00Z"),
        modified_at: ts("2025-01-01T00:00:00Z"),
        connection_id: None,
        grant_type: tenant::GRANT_CLIENT_CREDENTIALS.to_string(),
        client_id: Some("client".to_string()),
        client_secret: Some(vec![9; 40]),
        scope: None,
        token: None,
        token_expires_at: None,
        auth_context: Some("contoso.onmicrosoft.com".to_string()),
    }
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "tenant-admin");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[test]
fn user_dto_reports_secrets_as_flags_only() {
    let dto = UserDto::from(sample_user());
    assert!(dto.has_password);
    assert!(dto.has_github_token);

    let body = serde_json::to_value(&dto).unwrap();
    assert!(body.get("password").is_none());
    assert!(body.get("github_token").is_none());
    assert_eq!(body["updated_at"], "2025-01-02T00:00:00+00:00");
}

#[test]
fn tenant_dto_never_serializes_client_secret_or_token() {
    let body = serde_json::to_value(TenantDto::from(sample_tenant())).unwrap();

    assert_eq!(body["has_client_secret"], Value::Bool(true));
    assert_eq!(body["has_token"], Value::Bool(false));
    assert!(body.get("client_secret").is_none());
    assert!(body.get("token").is_none());
    assert_eq!(body["token_expires_at"], Value::Null);
}

#[test]
fn tenant_detail_flattens_tenant_fields() {
    let tenant = sample_tenant();
    let id = tenant.id;
    let body = serde_json::to_value(TenantDetailDto {
        tenant: tenant.into(),
        environments_by_status: vec![ValueCount {
            value: Some("Active".to_string()),
            count: 2,
        }],
        installed_apps_by_state: Vec::new(),
    })
    .unwrap();

    assert_eq!(body["id"], json!(id));
    assert_eq!(body["environments_by_status"][0]["count"], 2);
}

#[test]
fn update_user_dto_distinguishes_null_from_absent() {
    let clear: UpdateUserDto =
        serde_json::from_value(json!({ "github_token": null })).unwrap();
    assert_eq!(clear.github_token, Some(None));
    assert_eq!(clear.github_avatar, None);

    let set: UpdateUserDto =
        serde_json::from_value(json!({ "github_token": "ghp_x", "is_active": false })).unwrap();
    assert_eq!(set.github_token, Some(Some("ghp_x".to_string())));
    assert_eq!(set.is_active, Some(false));
}
