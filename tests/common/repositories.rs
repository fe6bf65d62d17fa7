use std::sync::Arc;

use sqlx::Row;
use uuid::Uuid;

use uow_coordinator::postgres::PostgresExecutor;
use uow_coordinator::{EntityState, UowResult};

use super::entities::{Order, User};
use super::writers::{OrderWriter, UserWriter};

/// User repository running on whatever transaction its executor is bound to.
///
/// `add` and `remove` are written when the unit of work saves; `insert`
/// writes straight away.
pub struct UserRepository {
    executor: Arc<PostgresExecutor>,
}

impl UserRepository {
    pub fn new(executor: Arc<PostgresExecutor>) -> Self {
        executor.register_writer(Arc::new(UserWriter));
        Self { executor }
    }

    pub fn add(&self, user: &User) {
        self.executor.track(EntityState::Added, user.clone());
    }

    pub fn remove(&self, user: &User) {
        self.executor.track(EntityState::Deleted, user.clone());
    }

    pub async fn insert(&self, user: &User) -> UowResult<()> {
        self.executor
            .execute(
                sqlx::query("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
                    .bind(user.id)
                    .bind(&user.username)
                    .bind(&user.email),
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> UowResult<Option<User>> {
        let row = self
            .executor
            .fetch_optional(sqlx::query("SELECT id, username, email FROM users WHERE id = $1").bind(id))
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            username: r.get("username"),
            email: r.get("email"),
        }))
    }

    pub async fn count(&self) -> UowResult<i64> {
        let row = self
            .executor
            .fetch_one(sqlx::query("SELECT COUNT(*) as count FROM users"))
            .await?;
        Ok(row.get("count"))
    }
}

/// Order repository sharing the user repository's database.
pub struct OrderRepository {
    executor: Arc<PostgresExecutor>,
}

impl OrderRepository {
    pub fn new(executor: Arc<PostgresExecutor>) -> Self {
        executor.register_writer(Arc::new(OrderWriter));
        Self { executor }
    }

    pub fn add(&self, order: &Order) {
        self.executor.track(EntityState::Added, order.clone());
    }

    pub fn remove(&self, order: &Order) {
        self.executor.track(EntityState::Deleted, order.clone());
    }

    pub async fn insert(&self, order: &Order) -> UowResult<()> {
        self.executor
            .execute(
                sqlx::query("INSERT INTO orders (id, user_id, product_name, amount) VALUES ($1, $2, $3, $4)")
                    .bind(order.id)
                    .bind(order.user_id)
                    .bind(&order.product_name)
                    .bind(order.amount),
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> UowResult<Option<Order>> {
        let row = self
            .executor
            .fetch_optional(
                sqlx::query("SELECT id, user_id, product_name, amount FROM orders WHERE id = $1").bind(id),
            )
            .await?;

        Ok(row.map(|r| Order {
            id: r.get("id"),
            user_id: r.get("user_id"),
            product_name: r.get("product_name"),
            amount: r.get("amount"),
        }))
    }
}
