//! User entity model
//!
//! Operators of the admin console. A user is created without a password and
//! sets one through a one-time password setup token.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// Lower-cased, unique
    #[sea_orm(unique)]
    pub email: String,

    /// Argon2 PHC string; `None` until password setup is completed
    pub password: Option<String>,

    /// Encrypted GitHub personal access token
    pub github_token: Option<Vec<u8>>,

    pub github_avatar: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub can_access_repos: bool,

    pub can_access_customers: bool,

    /// Grants visibility of every customer regardless of assignments
    pub all_customers: bool,

    pub can_access_admin: bool,

    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::password_setup_token::Entity")]
    PasswordSetupToken,
    #[sea_orm(has_many = "super::user_customer::Entity")]
    UserCustomer,
}

impl Related<super::password_setup_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PasswordSetupToken.def()
    }
}

impl Related<super::user_customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCustomer.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_customer::Relation::Customer.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_customer::Relation::User.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
