//! # User/Customer Grant Repository
//!
//! A row in `user_customers` grants a user visibility of one customer.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::now;
use crate::error::RepositoryError;
use crate::models::customer::{self, Model as CustomerModel};
use crate::models::user::{self, Model as UserModel};
use crate::models::user_customer::{
    self, ActiveModel as GrantActiveModel, Entity as UserCustomer, Model as GrantModel,
};

pub struct UserCustomerRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> UserCustomerRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Grants `user_id` access to `customer_id`.
    ///
    /// A second grant for the same pair is a `Conflict`; a missing user or
    /// customer is a `ForeignKey` error.
    pub async fn grant(&self, user_id: Uuid, customer_id: Uuid) -> Result<GrantModel, RepositoryError> {
        GrantActiveModel {
            user_id: Set(user_id),
            customer_id: Set(customer_id),
            assigned_at: Set(now()),
        }
        .insert(self.db)
        .await
        .map_err(|e| {
            RepositoryError::database_error(e)
                .conflict_as("user already has access to this customer")
        })
    }

    /// Removes a grant; `NotFound` when the pair was not granted.
    pub async fn revoke(&self, user_id: Uuid, customer_id: Uuid) -> Result<(), RepositoryError> {
        let result = UserCustomer::delete_by_id((user_id, customer_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Customer assignment"));
        }
        Ok(())
    }

    pub async fn exists(&self, user_id: Uuid, customer_id: Uuid) -> Result<bool, RepositoryError> {
        let count = UserCustomer::find_by_id((user_id, customer_id))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(count > 0)
    }

    /// Customers granted to a user, ordered by name.
    pub async fn customers_for_user(
        &self,
        user: &UserModel,
    ) -> Result<Vec<CustomerModel>, RepositoryError> {
        user.find_related(customer::Entity)
            .order_by_asc(customer::Column::CustomerName)
            .order_by_asc(customer::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Ids of the customers granted to a user.
    pub async fn customer_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let grants = UserCustomer::find()
            .filter(user_customer::Column::UserId.eq(user_id))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(grants.into_iter().map(|g| g.customer_id).collect())
    }

    /// Users granted access to a customer, ordered by email.
    pub async fn users_for_customer(
        &self,
        customer: &CustomerModel,
    ) -> Result<Vec<UserModel>, RepositoryError> {
        customer
            .find_related(user::Entity)
            .order_by_asc(user::Column::Email)
            .order_by_asc(user::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
