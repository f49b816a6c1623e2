//! Customer entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub customer_name: String,

    /// Logo as a base64 string
    pub image_base64: Option<String>,

    /// Stored under the historical column spelling
    #[sea_orm(column_name = "infraestructure_type")]
    pub infrastructure_type: InfrastructureType,

    pub description: Option<String>,
}

/// Where a customer's installation runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum InfrastructureType {
    #[sea_orm(string_value = "Saas")]
    #[default]
    Saas,
    #[sea_orm(string_value = "OnPremise")]
    OnPremise,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tenant::Entity")]
    Tenant,
    #[sea_orm(has_many = "super::user_customer::Entity")]
    UserCustomer,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::user_customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCustomer.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_customer::Relation::User.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_customer::Relation::Customer.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
