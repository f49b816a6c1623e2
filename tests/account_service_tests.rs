//! Account service flows: provisioning, password setup and visibility.

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tenant_admin::accounts::{AccountError, AccountService, ProvisionUserRequest};
use tenant_admin::cursor::PageRequest;
use tenant_admin::error::RepositoryError;
use tenant_admin::repositories::user::CreateUserRequest;
use tenant_admin::repositories::{PasswordSetupTokenRepository, UserRepository};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{create_customer, setup_test_db};

fn new_user(email: &str) -> CreateUserRequest {
    CreateUserRequest {
        name: "Grace".to_string(),
        email: email.to_string(),
        can_access_customers: true,
        is_active: true,
        ..CreateUserRequest::default()
    }
}

#[tokio::test]
async fn provisioning_grants_customers_and_issues_a_token() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));
    let contoso = create_customer(&db, "Contoso").await?;
    let fabrikam = create_customer(&db, "Fabrikam").await?;
    create_customer(&db, "Northwind").await?;

    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("grace@example.com"),
            customer_ids: vec![contoso.id, fabrikam.id],
        })
        .await?;

    assert!(provisioned.user.password.is_none());
    assert!(!provisioned.setup_token.raw.is_empty());
    assert_eq!(provisioned.setup_token.record.user_id, provisioned.user.id);

    let visible = accounts
        .visible_customers(&provisioned.user, &PageRequest::default())
        .await?;
    let names: Vec<_> = visible.items.iter().map(|c| c.customer_name.as_str()).collect();
    assert_eq!(names, ["Contoso", "Fabrikam"]);

    assert!(accounts.can_view_customer(&provisioned.user, contoso.id).await?);
    Ok(())
}

#[tokio::test]
async fn provisioning_rolls_back_when_a_customer_is_missing() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));

    let result = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("ghost@example.com"),
            customer_ids: vec![Uuid::new_v4()],
        })
        .await;
    assert!(matches!(
        result,
        Err(AccountError::Repository(RepositoryError::ForeignKey(_)))
    ));

    let user = UserRepository::new(db.as_ref())
        .find_by_email("ghost@example.com")
        .await?;
    assert!(user.is_none(), "user insert must be rolled back");
    Ok(())
}

#[tokio::test]
async fn password_setup_consumes_the_token_once() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));
    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("setup@example.com"),
            customer_ids: Vec::new(),
        })
        .await?;
    let raw = provisioned.setup_token.raw.clone();

    let short = accounts.complete_password_setup(&raw, "short").await;
    assert!(matches!(short, Err(AccountError::Password(_))));

    let user = accounts
        .complete_password_setup(&raw, "correct horse battery")
        .await?;
    assert!(user.password.as_deref().is_some_and(|h| h.starts_with("$argon2")));

    let again = accounts
        .complete_password_setup(&raw, "another password")
        .await;
    assert!(matches!(again, Err(AccountError::TokenAlreadyUsed)));

    let unknown = accounts
        .complete_password_setup("not-a-real-token", "correct horse battery")
        .await;
    assert!(matches!(unknown, Err(AccountError::TokenNotFound)));

    let verified = accounts
        .verify_credentials("SETUP@example.com", "correct horse battery")
        .await?;
    assert_eq!(verified.id, user.id);
    assert!(matches!(
        accounts.verify_credentials("setup@example.com", "wrong").await,
        Err(AccountError::InvalidCredentials)
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_setups_with_one_token_succeed_once() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));
    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("race@example.com"),
            customer_ids: Vec::new(),
        })
        .await?;
    let raw = provisioned.setup_token.raw;

    let first = {
        let accounts = accounts.clone();
        let raw = raw.clone();
        tokio::spawn(async move { accounts.complete_password_setup(&raw, "first password").await })
    };
    let second = {
        let accounts = accounts.clone();
        let raw = raw.clone();
        tokio::spawn(async move { accounts.complete_password_setup(&raw, "second password").await })
    };

    let outcomes = [first.await?, second.await?];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AccountError::TokenAlreadyUsed))));
    Ok(())
}

#[tokio::test]
async fn expired_tokens_are_rejected() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::milliseconds(1));
    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("slow@example.com"),
            customer_ids: Vec::new(),
        })
        .await?;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let result = accounts
        .complete_password_setup(&provisioned.setup_token.raw, "correct horse battery")
        .await;
    assert!(matches!(result, Err(AccountError::TokenExpired)));
    assert_eq!(accounts.purge_expired_setup_tokens().await?, 1);
    Ok(())
}

#[tokio::test]
async fn reissue_replaces_outstanding_tokens() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));
    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("again@example.com"),
            customer_ids: Vec::new(),
        })
        .await?;

    let reissued = accounts.reissue_setup_token(provisioned.user.id).await?;
    assert_ne!(reissued.raw, provisioned.setup_token.raw);

    let tokens = PasswordSetupTokenRepository::new(db.as_ref())
        .list_for_user(provisioned.user.id)
        .await?;
    assert_eq!(tokens.len(), 1);

    let old = accounts
        .complete_password_setup(&provisioned.setup_token.raw, "correct horse battery")
        .await;
    assert!(matches!(old, Err(AccountError::TokenNotFound)));

    assert!(matches!(
        accounts.reissue_setup_token(Uuid::new_v4()).await,
        Err(AccountError::Repository(RepositoryError::NotFound(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn visibility_follows_user_flags() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::hours(24));
    let contoso = create_customer(&db, "Contoso").await?;
    create_customer(&db, "Fabrikam").await?;

    let admin = accounts
        .provision_user(ProvisionUserRequest {
            user: CreateUserRequest {
                all_customers: true,
                can_access_admin: true,
                ..new_user("admin@example.com")
            },
            customer_ids: Vec::new(),
        })
        .await?
        .user;
    let all = accounts
        .visible_customers(&admin, &PageRequest::default())
        .await?;
    assert_eq!(all.items.len(), 2);

    let blocked = accounts
        .provision_user(ProvisionUserRequest {
            user: CreateUserRequest {
                can_access_customers: false,
                ..new_user("blocked@example.com")
            },
            customer_ids: vec![contoso.id],
        })
        .await?
        .user;
    assert!(accounts
        .visible_customers(&blocked, &PageRequest::default())
        .await?
        .items
        .is_empty());
    assert!(!accounts.can_view_customer(&blocked, contoso.id).await?);
    Ok(())
}

#[tokio::test]
async fn purge_loop_removes_expired_tokens_until_cancelled() -> Result<()> {
    let db = Arc::new(setup_test_db().await?);
    let accounts = AccountService::new(db.clone(), Duration::milliseconds(1));
    let provisioned = accounts
        .provision_user(ProvisionUserRequest {
            user: new_user("idle@example.com"),
            customer_ids: Vec::new(),
        })
        .await?;

    let shutdown = CancellationToken::new();
    let loop_accounts = accounts.clone();
    let loop_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        loop_accounts
            .run_setup_token_purge(std::time::Duration::from_millis(10), loop_shutdown)
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    shutdown.cancel();
    handle.await?;

    let remaining = PasswordSetupTokenRepository::new(db.as_ref())
        .list_for_user(provisioned.user.id)
        .await?;
    assert!(remaining.is_empty());
    Ok(())
}
