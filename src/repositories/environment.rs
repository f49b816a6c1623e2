//! # Environment Repository
//!
//! Environments are identified by name within a tenant and are written
//! mostly by the synchronisation service.

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use super::{MAX_NAME_LEN, optional_text, required_text};
use crate::error::RepositoryError;
use crate::models::environment::{
    self, ActiveModel as EnvironmentActiveModel, Entity as Environment, Model as EnvironmentModel,
};

/// Environment attributes as reported by the admin API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub name: String,
    pub environment_type: String,
    pub status: String,
    pub web_client_url: Option<String>,
    pub location_name: Option<String>,
    pub application_version: Option<String>,
    pub platform_version: Option<String>,
}

pub struct EnvironmentRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> EnvironmentRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn find_by_id(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<EnvironmentModel>, RepositoryError> {
        Environment::find_by_id((tenant_id, name.to_string()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<EnvironmentModel>, RepositoryError> {
        Environment::find()
            .filter(environment::Column::TenantId.eq(tenant_id))
            .order_by_asc(environment::Column::Name)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Inserts or overwrites the environment `(tenant_id, record.name)`.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        record: EnvironmentRecord,
    ) -> Result<EnvironmentModel, RepositoryError> {
        let name = required_text("environment name", &record.name, MAX_NAME_LEN)?;
        let environment_type = required_text("environment type", &record.environment_type, MAX_NAME_LEN)?;
        let status = required_text("environment status", &record.status, MAX_NAME_LEN)?;

        let active = EnvironmentActiveModel {
            tenant_id: Set(tenant_id),
            name: Set(name.clone()),
            environment_type: Set(environment_type),
            status: Set(status),
            web_client_url: Set(optional_text(record.web_client_url)),
            location_name: Set(optional_text(record.location_name)),
            application_version: Set(optional_text(record.application_version)),
            platform_version: Set(optional_text(record.platform_version)),
        };

        Environment::insert(active)
            .on_conflict(
                OnConflict::columns([environment::Column::TenantId, environment::Column::Name])
                    .update_columns([
                        environment::Column::EnvironmentType,
                        environment::Column::Status,
                        environment::Column::WebClientUrl,
                        environment::Column::LocationName,
                        environment::Column::ApplicationVersion,
                        environment::Column::PlatformVersion,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        // Re-fetch: not every backend returns the row from an upsert
        self.find_by_id(tenant_id, &name)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Environment"))
    }

    /// Deletes the tenant's environments whose name is not in `keep`
    /// (cascading to their installed apps). Returns the number removed.
    pub async fn delete_missing(
        &self,
        tenant_id: Uuid,
        keep: &[String],
    ) -> Result<u64, RepositoryError> {
        let mut query =
            Environment::delete_many().filter(environment::Column::TenantId.eq(tenant_id));
        if !keep.is_empty() {
            query = query.filter(environment::Column::Name.is_not_in(keep.iter().cloned()));
        }

        let result = query
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    pub async fn delete(&self, tenant_id: Uuid, name: &str) -> Result<(), RepositoryError> {
        let result = Environment::delete_by_id((tenant_id, name.to_string()))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Environment"));
        }
        Ok(())
    }

    pub async fn count(&self, tenant_id: Uuid) -> Result<u64, RepositoryError> {
        Environment::find()
            .filter(environment::Column::TenantId.eq(tenant_id))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Number of the tenant's environments per status.
    pub async fn count_by_status(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<(String, i64)>, RepositoryError> {
        Environment::find()
            .select_only()
            .column(environment::Column::Status)
            .column_as(Expr::col(environment::Column::Name).count(), "count")
            .filter(environment::Column::TenantId.eq(tenant_id))
            .group_by(environment::Column::Status)
            .order_by_asc(environment::Column::Status)
            .into_tuple::<(String, i64)>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
