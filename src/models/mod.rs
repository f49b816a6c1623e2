//! # Data Models
//!
//! SeaORM entities for the tenant admin database, plus shared API types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod application;
pub mod customer;
pub mod environment;
pub mod installed_app;
pub mod password_setup_token;
pub mod tenant;
pub mod user;
pub mod user_customer;

pub use application::Entity as Application;
pub use customer::Entity as Customer;
pub use environment::Entity as Environment;
pub use installed_app::Entity as InstalledApp;
pub use password_setup_token::Entity as PasswordSetupToken;
pub use tenant::Entity as Tenant;
pub use user::Entity as User;
pub use user_customer::Entity as UserCustomer;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "tenant-admin".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
