//! InstalledApp entity model
//!
//! An application installed into one environment of a tenant. The `id` is
//! the application's catalog id, so the same id appears once per
//! environment it is installed in.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "installed_apps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tenant_id: Uuid,

    #[sea_orm(primary_key, auto_increment = false)]
    pub environment_name: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    pub version: String,

    pub publisher: String,

    /// e.g. `Global`, `PTE`, `Dev`
    pub published_as: Option<String>,

    /// e.g. `Installed`, `UpdatePending`
    pub state: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::environment::Entity",
        from = "(Column::TenantId, Column::EnvironmentName)",
        to = "(super::environment::Column::TenantId, super::environment::Column::Name)",
        on_delete = "Cascade"
    )]
    Environment,
}

impl Related<super::environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Environment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
