//! Tenant entity model
//!
//! A tenant belongs to a customer and carries the OAuth client-credentials
//! connection used to call the tenant's admin API. `client_secret` and
//! `token` hold AES-GCM ciphertext bound to the tenant id.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_id: Uuid,

    pub description: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub modified_at: DateTimeWithTimeZone,

    /// Identifier of the connection on the identity provider side
    pub connection_id: Option<String>,

    pub grant_type: String,

    pub client_id: Option<String>,

    pub client_secret: Option<Vec<u8>>,

    pub scope: Option<String>,

    /// Most recent access token
    pub token: Option<Vec<u8>>,

    pub token_expires_at: Option<DateTimeWithTimeZone>,

    /// Directory / authority segment substituted into the token endpoint
    pub auth_context: Option<String>,
}

impl Model {
    /// True when the tenant carries everything needed to request a token.
    pub fn has_client_credentials(&self) -> bool {
        self.grant_type == GRANT_CLIENT_CREDENTIALS
            && self.client_id.as_deref().is_some_and(|v| !v.is_empty())
            && self.client_secret.is_some()
            && self.auth_context.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id",
        on_delete = "Cascade"
    )]
    Customer,
    #[sea_orm(has_many = "super::environment::Entity")]
    Environment,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Environment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
