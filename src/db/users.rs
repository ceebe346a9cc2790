//! User repository.

use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::types::{User, UserRole, UserStatus};

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub role: String,
    pub status: String,
    pub balance: f64,
    pub concurrency_cap: i32,
    pub token_version: i64,
}

impl UserRow {
    pub fn into_user(self) -> Option<User> {
        let role = match self.role.as_str() {
            "admin" => UserRole::Admin,
            "user" => UserRole::User,
            _ => return None,
        };
        let status = match self.status.as_str() {
            "active" => UserStatus::Active,
            "disabled" => UserStatus::Disabled,
            _ => return None,
        };
        Some(User {
            id: self.id,
            role,
            status,
            balance: self.balance,
            concurrency_cap: self.concurrency_cap.max(0) as u32,
            token_version: self.token_version,
        })
    }
}

#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn deduct_balance(&self, id: Uuid, amount: f64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET balance = balance - $1 WHERE id = $2 AND balance >= $1",
        )
        .bind(amount)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
