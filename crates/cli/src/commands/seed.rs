//! Seed the database with a demo menu and customer accounts.
//!
//! Safe to run repeatedly: dishes and logins that already exist are skipped.

use rust_decimal::Decimal;
use tracing::info;

use cafe_storefront::db::{PgConnectionPool, RepositoryError, UserRepository};

use super::CommandError;

/// Demo menu: name and price in cents.
const DISHES: &[(&str, i64)] = &[
    ("Espresso", 250),
    ("Cappuccino", 380),
    ("Croissant", 290),
    ("Avocado toast", 950),
    ("Cheesecake", 620),
];

/// Demo customers: login, balance and loyalty points.
const ACCOUNTS: &[(&str, i64, i64)] = &[("alice", 100, 5), ("bob", 20, 0), ("carol", 0, 40)];

/// Seed dishes and accounts.
///
/// # Errors
///
/// Returns an error if configuration is missing or a database write fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = super::connect().await?;
    let result = seed(&pool).await;
    pool.close().await;
    let (dishes, accounts) = result?;

    info!("Seeding complete!");
    info!("  Dishes inserted: {dishes}");
    info!("  Accounts created: {accounts}");
    Ok(())
}

async fn seed(pool: &PgConnectionPool) -> Result<(u64, usize), CommandError> {
    let mut dishes = 0;
    {
        let mut lease = pool.acquire().await?;
        for &(name, cents) in DISHES {
            let result = sqlx::query(
                "INSERT INTO cafe.dish (name, price) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
            )
            .bind(name)
            .bind(Decimal::new(cents, 2))
            .execute(&mut *lease.connection()?)
            .await?;
            dishes += result.rows_affected();
        }
    }

    let users = UserRepository::new(pool);
    let mut accounts = 0;
    for &(login, balance, points) in ACCOUNTS {
        match users
            .create_account(login, Decimal::from(balance), Decimal::from(points))
            .await
        {
            Ok(account) => {
                info!(login, user_id = %account.id, "Created account");
                accounts += 1;
            }
            Err(RepositoryError::Conflict(_)) => info!(login, "Account exists, skipping"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok((dishes, accounts))
}
