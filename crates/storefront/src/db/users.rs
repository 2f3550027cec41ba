//! User account repository.

use rust_decimal::Decimal;
use tracing::instrument;

use cafe_core::UserId;

use super::RepositoryError;
use super::orders::expect_single_row;
use super::pool::{Connect, ConnectionPool};
use super::statements::AccountStatements;
use crate::models::UserAccount;

/// Repository for user account operations.
pub struct UserRepository<'a, F: Connect> {
    pool: &'a ConnectionPool<F>,
}

impl<'a, F> UserRepository<'a, F>
where
    F: Connect,
    F::Connection: AccountStatements,
{
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: &'a ConnectionPool<F>) -> Self {
        Self { pool }
    }

    /// Get a user's account by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn find_account(&self, user_id: UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        lease
            .connection()?
            .select_account(user_id)
            .await
            .map_err(RepositoryError::from_read)
    }

    /// Set a user's balance (top-up or refund).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the user does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    #[instrument(skip(self))]
    pub async fn update_balance(&self, user_id: UserId, balance: Decimal) -> Result<(), RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        let rows = lease.connection()?.update_balance(user_id, balance).await?;
        expect_single_row(rows)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the login is taken.
    /// Returns `RepositoryError::Database` for other database errors.
    #[instrument(skip(self))]
    pub async fn create_account(
        &self,
        login: &str,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> Result<UserAccount, RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        let account = lease
            .connection()?
            .insert_account(login, balance, loyalty_points)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "login"))?;
        tracing::info!(user_id = %account.id, "account created");
        Ok(account)
    }
}
