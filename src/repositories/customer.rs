//! # Customer Repository

use base64::Engine;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{MAX_NAME_LEN, optional_text, required_text};
use crate::cursor::{Cursor, Page, PageRequest};
use crate::error::RepositoryError;
use crate::models::customer::{
    self, ActiveModel as CustomerActiveModel, Entity as Customer, InfrastructureType,
    Model as CustomerModel,
};

/// Request data for creating a new customer
#[derive(Debug, Clone, Default)]
pub struct CreateCustomerRequest {
    pub customer_name: String,
    pub image_base64: Option<String>,
    pub infrastructure_type: InfrastructureType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCustomerRequest {
    pub customer_name: Option<String>,
    pub image_base64: Option<Option<String>>,
    pub infrastructure_type: Option<InfrastructureType>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub infrastructure_type: Option<InfrastructureType>,
    /// Restrict to these ids (used for per-user visibility).
    pub ids: Option<Vec<Uuid>>,
}

impl CustomerFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(kind) = self.infrastructure_type {
            condition = condition.add(customer::Column::InfrastructureType.eq(kind));
        }
        if let Some(ids) = &self.ids {
            condition = condition.add(customer::Column::Id.is_in(ids.iter().copied()));
        }
        condition
    }
}

fn validate_image(image: Option<String>) -> Result<Option<String>, RepositoryError> {
    let Some(image) = optional_text(image) else {
        return Ok(None);
    };
    base64::engine::general_purpose::STANDARD
        .decode(image.as_bytes())
        .map_err(|_| RepositoryError::validation_error("image_base64 is not valid base64"))?;
    Ok(Some(image))
}

/// Repository for Customer database operations
pub struct CustomerRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> CustomerRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<CustomerModel, RepositoryError> {
        let name = required_text("customer_name", &request.customer_name, MAX_NAME_LEN)?;
        let image = validate_image(request.image_base64)?;

        CustomerActiveModel {
            id: Set(Uuid::new_v4()),
            customer_name: Set(name.clone()),
            image_base64: Set(image),
            infrastructure_type: Set(request.infrastructure_type),
            description: Set(optional_text(request.description)),
        }
        .insert(self.db)
        .await
        .map_err(|e| {
            RepositoryError::database_error(e)
                .conflict_as(format!("a customer named '{name}' already exists"))
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<CustomerModel>, RepositoryError> {
        Customer::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_name(
        &self,
        customer_name: &str,
    ) -> Result<Option<CustomerModel>, RepositoryError> {
        Customer::find()
            .filter(customer::Column::CustomerName.eq(customer_name.trim()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// List customers ordered by (customer_name, id)
    pub async fn list(
        &self,
        filter: &CustomerFilter,
        page: &PageRequest,
    ) -> Result<Page<CustomerModel>, RepositoryError> {
        let limit = page.limit();
        if filter.ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            return Ok(Page {
                items: Vec::new(),
                next_cursor: None,
            });
        }

        let mut query = Customer::find()
            .filter(filter.condition())
            .order_by_asc(customer::Column::CustomerName)
            .order_by_asc(customer::Column::Id);

        if let Some(after) = &page.after {
            query = query.filter(
                Condition::any()
                    .add(customer::Column::CustomerName.gt(after.key.clone()))
                    .add(
                        Condition::all()
                            .add(customer::Column::CustomerName.eq(after.key.clone()))
                            .add(customer::Column::Id.gt(after.id)),
                    ),
            );
        }

        let rows = query
            .limit(limit + 1)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(Page::from_overfetch(rows, limit, |c| Cursor {
            key: c.customer_name.clone(),
            id: c.id,
        }))
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: UpdateCustomerRequest,
    ) -> Result<CustomerModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Customer"))?;

        let mut active = existing.clone().into_active_model();
        if let Some(name) = update.customer_name {
            active.customer_name = Set(required_text("customer_name", &name, MAX_NAME_LEN)?);
        }
        if let Some(image) = update.image_base64 {
            active.image_base64 = Set(validate_image(image)?);
        }
        if let Some(kind) = update.infrastructure_type {
            active.infrastructure_type = Set(kind);
        }
        if let Some(description) = update.description {
            active.description = Set(optional_text(description));
        }

        if !active.is_changed() {
            return Ok(existing);
        }

        active.update(self.db).await.map_err(|e| {
            RepositoryError::database_error(e).conflict_as("a customer with this name already exists")
        })
    }

    /// Deletes a customer together with its tenants, environments, installed
    /// apps and user grants (cascading foreign keys).
    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = Customer::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Customer"));
        }
        Ok(())
    }

    pub async fn count(&self, filter: &CustomerFilter) -> Result<u64, RepositoryError> {
        Customer::find()
            .filter(filter.condition())
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Number of customers per infrastructure type, ordered by type.
    pub async fn count_by_infrastructure_type(
        &self,
    ) -> Result<Vec<(InfrastructureType, i64)>, RepositoryError> {
        Customer::find()
            .select_only()
            .column(customer::Column::InfrastructureType)
            .column_as(Expr::col(customer::Column::Id).count(), "count")
            .group_by(customer::Column::InfrastructureType)
            .order_by_asc(customer::Column::InfrastructureType)
            .into_tuple::<(InfrastructureType, i64)>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
