//! Environment entity model
//!
//! Environments are identified by name within their tenant and mirror the
//! state reported by the tenant's admin API.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "environments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tenant_id: Uuid,

    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    /// e.g. `Production`, `Sandbox`
    #[sea_orm(column_name = "type")]
    pub environment_type: String,

    pub status: String,

    pub web_client_url: Option<String>,

    pub location_name: Option<String>,

    pub application_version: Option<String>,

    pub platform_version: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id",
        on_delete = "Cascade"
    )]
    Tenant,
    #[sea_orm(has_many = "super::installed_app::Entity")]
    InstalledApp,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::installed_app::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InstalledApp.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
