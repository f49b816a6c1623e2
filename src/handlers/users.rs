//! # Users API Handlers
//!
//! Operator endpoints for user accounts, their setup tokens and customer
//! grants. Password hashes and GitHub tokens never leave the service; the
//! DTOs only report whether they are set.

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::customers::CustomersResponse;
use super::types::{PageQuery, double_option, rfc3339};
use crate::accounts::ProvisionUserRequest;
use crate::auth::OperatorAuth;
use crate::cursor::Page;
use crate::db::{self, IsolationLevel};
use crate::error::{ApiError, RepositoryError};
use crate::models::user::Model as UserModel;
use crate::repositories::password_setup_token::IssuedToken;
use crate::repositories::user::{CreateUserRequest, UpdateUserRequest, UserFilter};
use crate::repositories::{CustomerRepository, UserCustomerRepository, UserRepository};
use crate::server::AppState;

/// User account as exposed by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDto {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    pub github_avatar: Option<String>,
    pub can_access_repos: bool,
    pub can_access_customers: bool,
    pub all_customers: bool,
    pub can_access_admin: bool,
    pub is_active: bool,
    /// Whether the user has completed password setup
    pub has_password: bool,
    /// Whether an encrypted GitHub token is stored
    pub has_github_token: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<UserModel> for UserDto {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id,
            has_password: user.password.is_some(),
            has_github_token: user.github_token.is_some(),
            created_at: rfc3339(&user.created_at),
            updated_at: rfc3339(&user.updated_at),
            name: user.name,
            email: user.email,
            github_avatar: user.github_avatar,
            can_access_repos: user.can_access_repos,
            can_access_customers: user.can_access_customers,
            all_customers: user.all_customers,
            can_access_admin: user.can_access_admin,
            is_active: user.is_active,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Request payload for provisioning a user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUserDto {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    pub github_avatar: Option<String>,
    #[serde(default)]
    pub can_access_repos: bool,
    #[serde(default)]
    pub can_access_customers: bool,
    #[serde(default)]
    pub all_customers: bool,
    #[serde(default)]
    pub can_access_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Customers to grant immediately
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub customer_ids: Vec<Uuid>,
}

/// Partial update of a user; `null` clears a nullable field
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserDto {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub github_avatar: Option<Option<String>>,
    /// Stored encrypted; `null` removes the token
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub github_token: Option<Option<String>>,
    pub can_access_repos: Option<bool>,
    pub can_access_customers: Option<bool>,
    pub all_customers: Option<bool>,
    pub can_access_admin: Option<bool>,
    pub is_active: Option<bool>,
}

/// One-time password setup token; the raw value is only returned here
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetupTokenDto {
    pub token: String,
    pub expires_at: String,
}

impl From<IssuedToken> for SetupTokenDto {
    fn from(issued: IssuedToken) -> Self {
        Self {
            expires_at: rfc3339(&issued.record.expires_at),
            token: issued.raw,
        }
    }
}

/// Response of user provisioning
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvisionedUserDto {
    pub user: UserDto,
    pub setup_token: SetupTokenDto,
}

/// Page of users
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsersResponse {
    pub data: Vec<UserDto>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl From<Page<UserModel>> for UsersResponse {
    fn from(page: Page<UserModel>) -> Self {
        Self {
            has_more: page.next_cursor.is_some(),
            next_cursor: page.next_cursor,
            data: page.items.into_iter().map(UserDto::from).collect(),
        }
    }
}

/// Filters for the user listing
#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub is_active: Option<bool>,
    pub can_access_admin: Option<bool>,
}

async fn load_user(state: &AppState, id: Uuid) -> Result<UserModel, ApiError> {
    UserRepository::new(state.db.as_ref())
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("User").into())
}

/// List users ordered by email
#[utoipa::path(
    get,
    path = "/api/v1/users",
    security(("bearer_auth" = [])),
    params(UserListQuery, PageQuery),
    responses(
        (status = 200, description = "Page of users", body = UsersResponse),
        (status = 400, description = "Invalid cursor or limit", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(filter): Query<UserListQuery>,
    Query(page): Query<PageQuery>,
) -> Result<Json<UsersResponse>, ApiError> {
    let filter = UserFilter {
        is_active: filter.is_active,
        can_access_admin: filter.can_access_admin,
    };
    let page = UserRepository::new(state.db.as_ref())
        .list(&filter, &page.page_request()?)
        .await?;
    Ok(Json(page.into()))
}

/// Provision a user and issue their password setup token
#[utoipa::path(
    post,
    path = "/api/v1/users",
    security(("bearer_auth" = [])),
    request_body = CreateUserDto,
    responses(
        (status = 201, description = "User provisioned", body = ProvisionedUserDto, headers(
            ("Location", description = "URL of the created user")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Email already in use", body = ApiError),
        (status = 422, description = "Unknown customer id", body = ApiError)
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<CreateUserDto>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<ProvisionedUserDto>), ApiError> {
    let provisioned = state
        .accounts
        .provision_user(ProvisionUserRequest {
            user: CreateUserRequest {
                name: request.name,
                email: request.email,
                github_avatar: request.github_avatar,
                can_access_repos: request.can_access_repos,
                can_access_customers: request.can_access_customers,
                all_customers: request.all_customers,
                can_access_admin: request.can_access_admin,
                is_active: request.is_active,
            },
            customer_ids: request.customer_ids,
        })
        .await?;

    let location = format!("/api/v1/users/{}", provisioned.user.id);
    Ok((
        StatusCode::CREATED,
        [("Location", location)],
        Json(ProvisionedUserDto {
            user: provisioned.user.into(),
            setup_token: provisioned.setup_token.into(),
        }),
    ))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "User UUID")),
    responses(
        (status = 200, description = "User", body = UserDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDto>, ApiError> {
    Ok(Json(load_user(&state, id).await?.into()))
}

/// Update a user
#[utoipa::path(
    patch,
    path = "/api/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "User UUID")),
    request_body = UpdateUserDto,
    responses(
        (status = 200, description = "Updated user", body = UserDto),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User not found", body = ApiError),
        (status = 409, description = "Email already in use", body = ApiError)
    ),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserDto>,
) -> Result<Json<UserDto>, ApiError> {
    let txn = db::begin(&state.db, IsolationLevel::ReadCommitted).await?;
    let users = UserRepository::new(&txn);

    let mut user = users
        .update(
            id,
            UpdateUserRequest {
                name: request.name,
                email: request.email,
                github_avatar: request.github_avatar,
                can_access_repos: request.can_access_repos,
                can_access_customers: request.can_access_customers,
                all_customers: request.all_customers,
                can_access_admin: request.can_access_admin,
                is_active: request.is_active,
            },
        )
        .await?;

    if let Some(token) = request.github_token {
        let token = token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        user = users
            .set_github_token(&state.crypto_key, id, token)
            .await?;
    }

    txn.commit().await?;
    Ok(Json(user.into()))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "User UUID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    UserRepository::new(state.db.as_ref()).delete(id).await?;
    tracing::info!(user_id = %id, "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke outstanding setup tokens and issue a new one
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/password-setup-tokens",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "User UUID")),
    responses(
        (status = 201, description = "New setup token", body = SetupTokenDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn reissue_setup_token(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SetupTokenDto>), ApiError> {
    let issued = state.accounts.reissue_setup_token(id).await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// Customers visible to a user
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/customers",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "User UUID"), PageQuery),
    responses(
        (status = 200, description = "Page of customers the user can see", body = CustomersResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn list_user_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<CustomersResponse>, ApiError> {
    let user = load_user(&state, id).await?;
    let page = state
        .accounts
        .visible_customers(&user, &page.page_request()?)
        .await?;
    Ok(Json(page.into()))
}

/// Grant a user access to a customer
///
/// Granting an existing assignment again succeeds without change.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/customers/{customer_id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "User UUID"),
        ("customer_id" = Uuid, Path, description = "Customer UUID")
    ),
    responses(
        (status = 204, description = "Access granted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "User or customer not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn grant_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((id, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    load_user(&state, id).await?;
    CustomerRepository::new(state.db.as_ref())
        .find_by_id(customer_id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Customer"))?;

    match UserCustomerRepository::new(state.db.as_ref())
        .grant(id, customer_id)
        .await
    {
        Ok(_) => {
            tracing::info!(user_id = %id, customer_id = %customer_id, "Granted customer access");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(RepositoryError::Conflict(_)) => Ok(StatusCode::NO_CONTENT),
        Err(err) => Err(err.into()),
    }
}

/// Revoke a user's access to a customer
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}/customers/{customer_id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "User UUID"),
        ("customer_id" = Uuid, Path, description = "Customer UUID")
    ),
    responses(
        (status = 204, description = "Access revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Assignment not found", body = ApiError)
    ),
    tag = "users"
)]
pub async fn revoke_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((id, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    UserCustomerRepository::new(state.db.as_ref())
        .revoke(id, customer_id)
        .await?;
    tracing::info!(user_id = %id, customer_id = %customer_id, "Revoked customer access");
    Ok(StatusCode::NO_CONTENT)
}
