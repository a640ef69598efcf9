//! Order repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use doku_core::{Error, NewOrder, Order, OrderRepository, Result};

pub(crate) const ORDER_COLUMNS: &str = "id, tenant_id, name, status, updated_at, deleted_at";

pub(crate) fn parse_order_row(row: PgRow) -> Order {
    Order {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        status: row.get("status"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

/// PostgreSQL implementation of OrderRepository.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: Pool<Postgres>,
}

impl PgOrderRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, req: NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO "order" (id, tenant_id, name, status, updated_at)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {ORDER_COLUMNS}"#
        ))
        .bind(Uuid::now_v7())
        .bind(&req.tenant_id)
        .bind(&req.name)
        .bind(&req.status)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(parse_order_row(row))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"SELECT {ORDER_COLUMNS} FROM "order" WHERE id = $1"#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(parse_order_row))
    }
}
