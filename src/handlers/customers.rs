//! # Customers API Handlers
//!
//! Customer CRUD, the customer summary and per-customer tenant listing.

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::tenants::TenantDto;
use super::types::{PageQuery, double_option};
use crate::auth::OperatorAuth;
use crate::cursor::Page;
use crate::error::{ApiError, RepositoryError};
use crate::models::customer::{InfrastructureType, Model as CustomerModel};
use crate::repositories::customer::{
    CreateCustomerRequest, CustomerFilter, UpdateCustomerRequest,
};
use crate::repositories::{CustomerRepository, TenantRepository, UserRepository};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerDto {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "Contoso")]
    pub customer_name: String,
    /// Base64 encoded logo
    pub image_base64: Option<String>,
    pub infrastructure_type: InfrastructureType,
    pub description: Option<String>,
}

impl From<CustomerModel> for CustomerDto {
    fn from(customer: CustomerModel) -> Self {
        Self {
            id: customer.id,
            customer_name: customer.customer_name,
            image_base64: customer.image_base64,
            infrastructure_type: customer.infrastructure_type,
            description: customer.description,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateCustomerDto {
    #[schema(example = "Contoso")]
    pub customer_name: String,
    pub image_base64: Option<String>,
    #[serde(default)]
    pub infrastructure_type: InfrastructureType,
    pub description: Option<String>,
}

/// Partial update of a customer; `null` clears a nullable field
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateCustomerDto {
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub image_base64: Option<Option<String>>,
    pub infrastructure_type: Option<InfrastructureType>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

/// Page of customers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomersResponse {
    pub data: Vec<CustomerDto>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl From<Page<CustomerModel>> for CustomersResponse {
    fn from(page: Page<CustomerModel>) -> Self {
        Self {
            has_more: page.next_cursor.is_some(),
            next_cursor: page.next_cursor,
            data: page.items.into_iter().map(CustomerDto::from).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CustomerListQuery {
    pub infrastructure_type: Option<InfrastructureType>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InfrastructureTypeCount {
    pub infrastructure_type: InfrastructureType,
    pub count: i64,
}

/// Fleet-wide counts
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerSummaryDto {
    pub total_customers: u64,
    pub by_infrastructure_type: Vec<InfrastructureTypeCount>,
    pub total_tenants: u64,
    pub active_users: u64,
}

/// List customers ordered by name
#[utoipa::path(
    get,
    path = "/api/v1/customers",
    security(("bearer_auth" = [])),
    params(CustomerListQuery, PageQuery),
    responses(
        (status = 200, description = "Page of customers", body = CustomersResponse),
        (status = 400, description = "Invalid cursor or limit", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(filter): Query<CustomerListQuery>,
    Query(page): Query<PageQuery>,
) -> Result<Json<CustomersResponse>, ApiError> {
    let filter = CustomerFilter {
        infrastructure_type: filter.infrastructure_type,
        ids: None,
    };
    let page = CustomerRepository::new(state.db.as_ref())
        .list(&filter, &page.page_request()?)
        .await?;
    Ok(Json(page.into()))
}

/// Create a customer
#[utoipa::path(
    post,
    path = "/api/v1/customers",
    security(("bearer_auth" = [])),
    request_body = CreateCustomerDto,
    responses(
        (status = 201, description = "Customer created", body = CustomerDto, headers(
            ("Location", description = "URL of the created customer")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Customer name already in use", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn create_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<CreateCustomerDto>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<CustomerDto>), ApiError> {
    let customer = CustomerRepository::new(state.db.as_ref())
        .create(CreateCustomerRequest {
            customer_name: request.customer_name,
            image_base64: request.image_base64,
            infrastructure_type: request.infrastructure_type,
            description: request.description,
        })
        .await?;

    tracing::info!(customer_id = %customer.id, "Created customer");
    let location = format!("/api/v1/customers/{}", customer.id);
    Ok((StatusCode::CREATED, [("Location", location)], Json(customer.into())))
}

/// Customer, tenant and user counts
#[utoipa::path(
    get,
    path = "/api/v1/customers/summary",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Summary counts", body = CustomerSummaryDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn customer_summary(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<CustomerSummaryDto>, ApiError> {
    let customers = CustomerRepository::new(state.db.as_ref());
    let total_customers = customers.count(&CustomerFilter::default()).await?;
    let by_infrastructure_type = customers
        .count_by_infrastructure_type()
        .await?
        .into_iter()
        .map(|(infrastructure_type, count)| InfrastructureTypeCount {
            infrastructure_type,
            count,
        })
        .collect();
    let total_tenants = TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .count()
        .await?;
    let active_users = UserRepository::new(state.db.as_ref()).count_active().await?;

    Ok(Json(CustomerSummaryDto {
        total_customers,
        by_infrastructure_type,
        total_tenants,
        active_users,
    }))
}

/// Get a customer by ID
#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Customer UUID")),
    responses(
        (status = 200, description = "Customer", body = CustomerDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Customer not found", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn get_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerDto>, ApiError> {
    let customer = CustomerRepository::new(state.db.as_ref())
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Customer"))?;
    Ok(Json(customer.into()))
}

/// Update a customer
#[utoipa::path(
    patch,
    path = "/api/v1/customers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Customer UUID")),
    request_body = UpdateCustomerDto,
    responses(
        (status = 200, description = "Updated customer", body = CustomerDto),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Customer not found", body = ApiError),
        (status = 409, description = "Customer name already in use", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn update_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCustomerDto>,
) -> Result<Json<CustomerDto>, ApiError> {
    let customer = CustomerRepository::new(state.db.as_ref())
        .update(
            id,
            UpdateCustomerRequest {
                customer_name: request.customer_name,
                image_base64: request.image_base64,
                infrastructure_type: request.infrastructure_type,
                description: request.description,
            },
        )
        .await?;
    Ok(Json(customer.into()))
}

/// Delete a customer and everything that belongs to it
#[utoipa::path(
    delete,
    path = "/api/v1/customers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Customer UUID")),
    responses(
        (status = 204, description = "Customer deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Customer not found", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn delete_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    CustomerRepository::new(state.db.as_ref()).delete(id).await?;
    tracing::info!(customer_id = %id, "Deleted customer");
    Ok(StatusCode::NO_CONTENT)
}

/// Tenants of a customer, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}/tenants",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Customer UUID")),
    responses(
        (status = 200, description = "Tenants of the customer", body = [TenantDto]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Customer not found", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn list_customer_tenants(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TenantDto>>, ApiError> {
    CustomerRepository::new(state.db.as_ref())
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Customer"))?;

    let tenants = TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .list_by_customer(id)
        .await?;
    Ok(Json(tenants.into_iter().map(TenantDto::from).collect()))
}
