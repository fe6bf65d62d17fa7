use async_trait::async_trait;
use sqlx::PgConnection;

use uow_coordinator::postgres::PostgresEntityWriter;
use uow_coordinator::{EntityRef, EntityState, UnitOfWorkError, UowResult};

use super::entities::{Order, User};

fn downcast<T: 'static>(entity: &EntityRef) -> UowResult<&T> {
    entity
        .downcast_ref::<T>()
        .ok_or_else(|| UnitOfWorkError::backend("flush", "unexpected entity type"))
}

pub struct UserWriter;

#[async_trait]
impl PostgresEntityWriter for UserWriter {
    fn accepts(&self, entity: &EntityRef) -> bool {
        entity.is::<User>()
    }

    async fn write(&self, state: EntityState, entity: &EntityRef, conn: &mut PgConnection) -> UowResult<()> {
        let user = downcast::<User>(entity)?;
        let query = match state {
            EntityState::Added => sqlx::query("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
                .bind(user.id)
                .bind(&user.username)
                .bind(&user.email),
            EntityState::Modified => sqlx::query("UPDATE users SET username = $2, email = $3 WHERE id = $1")
                .bind(user.id)
                .bind(&user.username)
                .bind(&user.email),
            EntityState::Deleted => sqlx::query("DELETE FROM users WHERE id = $1").bind(user.id),
            EntityState::Unchanged => return Ok(()),
        };
        query.execute(conn).await?;
        Ok(())
    }
}

pub struct OrderWriter;

#[async_trait]
impl PostgresEntityWriter for OrderWriter {
    fn accepts(&self, entity: &EntityRef) -> bool {
        entity.is::<Order>()
    }

    async fn write(&self, state: EntityState, entity: &EntityRef, conn: &mut PgConnection) -> UowResult<()> {
        let order = downcast::<Order>(entity)?;
        let query = match state {
            EntityState::Added => {
                sqlx::query("INSERT INTO orders (id, user_id, product_name, amount) VALUES ($1, $2, $3, $4)")
                    .bind(order.id)
                    .bind(order.user_id)
                    .bind(&order.product_name)
                    .bind(order.amount)
            }
            EntityState::Modified => sqlx::query("UPDATE orders SET product_name = $2, amount = $3 WHERE id = $1")
                .bind(order.id)
                .bind(&order.product_name)
                .bind(order.amount),
            EntityState::Deleted => sqlx::query("DELETE FROM orders WHERE id = $1").bind(order.id),
            EntityState::Unchanged => return Ok(()),
        };
        query.execute(conn).await?;
        Ok(())
    }
}
