//! # Repository Layer
//!
//! One repository per entity. Every repository borrows anything that
//! implements [`sea_orm::ConnectionTrait`], so the same code runs against the
//! pool or inside a transaction opened with [`crate::db::begin`].

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::error::RepositoryError;

pub mod application;
pub mod customer;
pub mod environment;
pub mod installed_app;
pub mod password_setup_token;
pub mod tenant;
pub mod user;
pub mod user_customer;

pub use application::ApplicationRepository;
pub use customer::CustomerRepository;
pub use environment::EnvironmentRepository;
pub use installed_app::InstalledAppRepository;
pub use password_setup_token::PasswordSetupTokenRepository;
pub use tenant::TenantRepository;
pub use user::UserRepository;
pub use user_customer::UserCustomerRepository;

pub(crate) const MAX_NAME_LEN: usize = 255;

/// Server-assigned timestamp used for `created_at`/`updated_at` columns.
pub(crate) fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

/// Trims `value` and checks it is non-empty and at most `max` characters.
pub(crate) fn required_text(
    field: &str,
    value: &str,
    max: usize,
) -> Result<String, RepositoryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RepositoryError::validation_error(format!(
            "{field} cannot be empty"
        )));
    }
    if trimmed.chars().count() > max {
        return Err(RepositoryError::validation_error(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Normalises an optional free-text column: blank strings become `None`.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_limits() {
        assert_eq!(required_text("name", "  Acme ", 10).unwrap(), "Acme");
        assert!(matches!(
            required_text("name", "   ", 10),
            Err(RepositoryError::Validation(_))
        ));
        assert!(required_text("name", &"x".repeat(11), 10).is_err());
    }

    #[test]
    fn optional_text_drops_blanks() {
        assert_eq!(optional_text(Some("  ".into())), None);
        assert_eq!(optional_text(Some(" a ".into())), Some("a".into()));
        assert_eq!(optional_text(None), None);
    }
}
