//! # Installed App Repository

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use super::{MAX_NAME_LEN, optional_text, required_text};
use crate::error::RepositoryError;
use crate::models::installed_app::{
    self, ActiveModel as InstalledAppActiveModel, Entity as InstalledApp,
    Model as InstalledAppModel,
};

/// An app installation as reported by the admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAppRecord {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub published_as: Option<String>,
    pub state: Option<String>,
}

pub struct InstalledAppRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> InstalledAppRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn find_by_id(
        &self,
        tenant_id: Uuid,
        environment_name: &str,
        app_id: Uuid,
    ) -> Result<Option<InstalledAppModel>, RepositoryError> {
        InstalledApp::find_by_id((tenant_id, environment_name.to_string(), app_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Apps installed in one environment, ordered by (name, id).
    pub async fn list_by_environment(
        &self,
        tenant_id: Uuid,
        environment_name: &str,
    ) -> Result<Vec<InstalledAppModel>, RepositoryError> {
        InstalledApp::find()
            .filter(installed_app::Column::TenantId.eq(tenant_id))
            .filter(installed_app::Column::EnvironmentName.eq(environment_name))
            .order_by_asc(installed_app::Column::Name)
            .order_by_asc(installed_app::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Every installation of the app `app_id` across tenants and environments.
    pub async fn find_installations(
        &self,
        app_id: Uuid,
    ) -> Result<Vec<InstalledAppModel>, RepositoryError> {
        InstalledApp::find()
            .filter(installed_app::Column::Id.eq(app_id))
            .order_by_asc(installed_app::Column::TenantId)
            .order_by_asc(installed_app::Column::EnvironmentName)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Inserts or overwrites the installation `(tenant, environment, record.id)`.
    /// The environment must exist.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        environment_name: &str,
        record: InstalledAppRecord,
    ) -> Result<InstalledAppModel, RepositoryError> {
        let name = required_text("app name", &record.name, MAX_NAME_LEN)?;
        let version = required_text("app version", &record.version, MAX_NAME_LEN)?;
        let publisher = required_text("app publisher", &record.publisher, MAX_NAME_LEN)?;

        let active = InstalledAppActiveModel {
            tenant_id: Set(tenant_id),
            environment_name: Set(environment_name.to_string()),
            id: Set(record.id),
            name: Set(name),
            version: Set(version),
            publisher: Set(publisher),
            published_as: Set(optional_text(record.published_as)),
            state: Set(optional_text(record.state)),
        };

        InstalledApp::insert(active)
            .on_conflict(
                OnConflict::columns([
                    installed_app::Column::TenantId,
                    installed_app::Column::EnvironmentName,
                    installed_app::Column::Id,
                ])
                .update_columns([
                    installed_app::Column::Name,
                    installed_app::Column::Version,
                    installed_app::Column::Publisher,
                    installed_app::Column::PublishedAs,
                    installed_app::Column::State,
                ])
                .to_owned(),
            )
            .exec_without_returning(self.db)
            .await
            .map_err(|e| match RepositoryError::database_error(e) {
                RepositoryError::ForeignKey(_) => RepositoryError::ForeignKey(format!(
                    "environment '{environment_name}' does not exist for tenant {tenant_id}"
                )),
                other => other,
            })?;

        self.find_by_id(tenant_id, environment_name, record.id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Installed app"))
    }

    /// Deletes installations of one environment whose id is not in `keep`.
    pub async fn delete_missing(
        &self,
        tenant_id: Uuid,
        environment_name: &str,
        keep: &[Uuid],
    ) -> Result<u64, RepositoryError> {
        let mut query = InstalledApp::delete_many()
            .filter(installed_app::Column::TenantId.eq(tenant_id))
            .filter(installed_app::Column::EnvironmentName.eq(environment_name));
        if !keep.is_empty() {
            query = query.filter(installed_app::Column::Id.is_not_in(keep.iter().copied()));
        }

        let result = query
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    pub async fn count(&self, tenant_id: Uuid) -> Result<u64, RepositoryError> {
        InstalledApp::find()
            .filter(installed_app::Column::TenantId.eq(tenant_id))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Number of the tenant's installations per state. Installations without
    /// a reported state are grouped under `None`.
    pub async fn count_by_state(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<(Option<String>, i64)>, RepositoryError> {
        InstalledApp::find()
            .select_only()
            .column(installed_app::Column::State)
            .column_as(Expr::col(installed_app::Column::Id).count(), "count")
            .filter(installed_app::Column::TenantId.eq(tenant_id))
            .group_by(installed_app::Column::State)
            .order_by_asc(installed_app::Column::State)
            .into_tuple::<(Option<String>, i64)>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
