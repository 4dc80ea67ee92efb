//! Order repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use qrl_schemas::{Fill, Order};

fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<Order> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        broker_order_id: row.try_get("broker_order_id")?,
        account_id: row.try_get("account_id")?,
        strategy_id: row.try_get("strategy_id")?,
        symbol: row.try_get("symbol")?,
        side: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("side")?))
            .context("decode side")?,
        kind: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("kind")?))
            .context("decode kind")?,
        limit_price: row.try_get("limit_price")?,
        quantity: row.try_get("quantity")?,
        filled_qty: row.try_get("filled_qty")?,
        avg_fill_price: row.try_get("avg_fill_price")?,
        status: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("status")?,
        ))
        .context("decode status")?,
        error_message: row.try_get("error_message")?,
        close_request_id: row.try_get("close_request_id")?,
        broker_update_seq: row.try_get("broker_update_seq")?,
        reconcile_not_found_count: row.try_get("reconcile_not_found_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new PENDING order.
pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (
          order_id, broker_order_id, account_id, strategy_id, symbol, side, kind,
          limit_price, quantity, filled_qty, avg_fill_price, status, error_message,
          close_request_id, broker_update_seq, reconcile_not_found_count,
          created_at, updated_at
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
        "#,
    )
    .bind(order.order_id)
    .bind(&order.broker_order_id)
    .bind(&order.account_id)
    .bind(&order.strategy_id)
    .bind(&order.symbol)
    .bind(order.side.as_str())
    .bind(order.kind.as_str())
    .bind(order.limit_price)
    .bind(order.quantity)
    .bind(order.filled_qty)
    .bind(order.avg_fill_price)
    .bind(order.status.as_str())
    .bind(&order.error_message)
    .bind(order.close_request_id)
    .bind(order.broker_update_seq)
    .bind(order.reconcile_not_found_count)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(pool)
    .await
    .context("insert_order failed")?;
    Ok(())
}

/// Persist the submit outcome (SUBMITTED with broker id, or REJECTED).
pub async fn update_submit_outcome(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set broker_order_id = $2, status = $3, error_message = $4, updated_at = $5
        where order_id = $1
        "#,
    )
    .bind(order.order_id)
    .bind(&order.broker_order_id)
    .bind(order.status.as_str())
    .bind(&order.error_message)
    .bind(order.updated_at)
    .execute(pool)
    .await
    .context("update_submit_outcome failed")?;
    Ok(())
}

/// Apply a fill's effect on the order row.
pub async fn apply_fill(pool: &PgPool, order: &Order, _fill: &Fill) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set filled_qty = $2, avg_fill_price = $3, status = $4, updated_at = $5
        where order_id = $1 and filled_qty <= $2
        "#,
    )
    .bind(order.order_id)
    .bind(order.filled_qty)
    .bind(order.avg_fill_price)
    .bind(order.status.as_str())
    .bind(order.updated_at)
    .execute(pool)
    .await
    .context("apply_fill failed")?;
    Ok(())
}

pub async fn get_order(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>> {
    let row = sqlx::query("select * from orders where order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
        .context("get_order failed")?;
    row.as_ref().map(order_from_row).transpose()
}

pub async fn get_order_by_broker_id(pool: &PgPool, broker_order_id: &str) -> Result<Option<Order>> {
    let row = sqlx::query("select * from orders where broker_order_id = $1")
        .bind(broker_order_id)
        .fetch_optional(pool)
        .await
        .context("get_order_by_broker_id failed")?;
    row.as_ref().map(order_from_row).transpose()
}

/// All non-terminal orders (kill-switch cancel sweep).
pub async fn active_orders(pool: &PgPool) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select * from orders
        where status in ('pending','submitted','partial_fill','cancel_requested')
        order by created_at
        "#,
    )
    .fetch_all(pool)
    .await
    .context("active_orders failed")?;
    rows.iter().map(order_from_row).collect()
}

/// Non-terminal orders untouched since `cutoff` — zombie candidates for the
/// reconciler.
pub async fn stale_active_orders(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select * from orders
        where status in ('pending','submitted','partial_fill','cancel_requested')
          and updated_at < $1
        order by updated_at
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("stale_active_orders failed")?;
    rows.iter().map(order_from_row).collect()
}

/// Increment the broker-not-found counter; returns the new count.
pub async fn increment_not_found(pool: &PgPool, order_id: Uuid) -> Result<i32> {
    let row = sqlx::query(
        r#"
        update orders
        set reconcile_not_found_count = reconcile_not_found_count + 1, updated_at = now()
        where order_id = $1
        returning reconcile_not_found_count
        "#,
    )
    .bind(order_id)
    .fetch_one(pool)
    .await
    .context("increment_not_found failed")?;
    Ok(row.try_get("reconcile_not_found_count")?)
}

/// Mark a stuck order EXPIRED (terminal).
pub async fn mark_expired(pool: &PgPool, order_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set status = 'expired', updated_at = now()
        where order_id = $1
          and status in ('pending','submitted','partial_fill','cancel_requested')
        "#,
    )
    .bind(order_id)
    .execute(pool)
    .await
    .context("mark_expired failed")?;
    Ok(())
}
