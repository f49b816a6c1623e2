//! Database migrations for the tenant admin service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_users;
mod m2025_06_01_000002_create_password_setup_tokens;
mod m2025_06_01_000003_create_customers;
mod m2025_06_01_000004_create_user_customers;
mod m2025_06_01_000005_create_tenants;
mod m2025_06_01_000006_create_environments;
mod m2025_06_01_000007_create_installed_apps;
mod m2025_06_01_000008_create_applications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_users::Migration),
            Box::new(m2025_06_01_000002_create_password_setup_tokens::Migration),
            Box::new(m2025_06_01_000003_create_customers::Migration),
            Box::new(m2025_06_01_000004_create_user_customers::Migration),
            Box::new(m2025_06_01_000005_create_tenants::Migration),
            Box::new(m2025_06_01_000006_create_environments::Migration),
            Box::new(m2025_06_01_000007_create_installed_apps::Migration),
            Box::new(m2025_06_01_000008_create_applications::Migration),
        ]
    }
}
