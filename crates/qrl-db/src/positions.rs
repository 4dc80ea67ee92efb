//! Position + account repository (the portfolio's persistence).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use qrl_schemas::{PortfolioSnapshot, Position, PositionView, Side};

fn position_from_row(row: &sqlx::postgres::PgRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        symbol: row.try_get("symbol")?,
        asset_type: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("asset_type")?,
        ))
        .context("decode asset_type")?,
        strategy_id: row.try_get("strategy_id")?,
        status: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("status")?,
        ))
        .context("decode status")?,
        quantity: row.try_get("quantity")?,
        avg_cost: row.try_get("avg_cost")?,
        current_price: row.try_get("current_price")?,
        expiry: row.try_get("expiry")?,
        active_close_request_id: row.try_get("active_close_request_id")?,
        opened_at: row.try_get("opened_at")?,
        updated_at: row.try_get("updated_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

pub async fn get_position(pool: &PgPool, id: i64) -> Result<Option<Position>> {
    let row = sqlx::query("select * from positions where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("get_position failed")?;
    row.as_ref().map(position_from_row).transpose()
}

/// All open-family positions for an account (open, closing, close_retryable,
/// close_failed — everything that still represents held quantity).
pub async fn open_positions(pool: &PgPool, account_id: &str) -> Result<Vec<Position>> {
    let rows = sqlx::query(
        r#"
        select * from positions
        where account_id = $1 and status != 'closed'
        order by symbol
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
    .context("open_positions failed")?;
    rows.iter().map(position_from_row).collect()
}

/// Option positions expiring on or before `cutoff`, for the expiry sweep.
pub async fn expiring_option_positions(
    pool: &PgPool,
    account_id: &str,
    cutoff: chrono::NaiveDate,
) -> Result<Vec<Position>> {
    let rows = sqlx::query(
        r#"
        select * from positions
        where account_id = $1
          and asset_type = 'option'
          and status != 'closed'
          and expiry is not null
          and expiry <= $2
        order by expiry
        "#,
    )
    .bind(account_id)
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("expiring_option_positions failed")?;
    rows.iter().map(position_from_row).collect()
}

/// Apply a fill to the portfolio inside one transaction: upsert the position
/// (VWAP on buys, reduce on sells) and adjust account cash.
pub async fn record_fill(
    pool: &PgPool,
    account_id: &str,
    symbol: &str,
    side: Side,
    quantity: i64,
    price: Decimal,
    strategy_id: Option<&str>,
) -> Result<()> {
    let mut tx: Transaction<'_, Postgres> =
        pool.begin().await.context("record_fill begin failed")?;

    let row = sqlx::query(
        r#"
        select id, quantity, avg_cost from positions
        where account_id = $1 and symbol = $2 and status != 'closed'
        for update
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *tx)
    .await
    .context("record_fill select position failed")?;

    let notional = Decimal::from(quantity) * price;

    match (side, row) {
        (Side::Buy, Some(row)) => {
            let id: i64 = row.try_get("id")?;
            let prev_qty: i64 = row.try_get("quantity")?;
            let prev_avg: Decimal = row.try_get("avg_cost")?;
            let new_qty = prev_qty + quantity;
            let new_avg =
                (prev_avg * Decimal::from(prev_qty) + notional) / Decimal::from(new_qty);
            sqlx::query(
                r#"
                update positions
                set quantity = $2, avg_cost = $3, current_price = $4, updated_at = now()
                where id = $1
                "#,
            )
            .bind(id)
            .bind(new_qty)
            .bind(new_avg)
            .bind(price)
            .execute(&mut *tx)
            .await
            .context("record_fill buy update failed")?;
        }
        (Side::Buy, None) => {
            sqlx::query(
                r#"
                insert into positions (account_id, symbol, strategy_id, quantity, avg_cost, current_price)
                values ($1, $2, $3, $4, $5, $5)
                "#,
            )
            .bind(account_id)
            .bind(symbol)
            .bind(strategy_id)
            .bind(quantity)
            .bind(price)
            .execute(&mut *tx)
            .await
            .context("record_fill buy insert failed")?;
        }
        (Side::Sell, Some(row)) => {
            let id: i64 = row.try_get("id")?;
            let prev_qty: i64 = row.try_get("quantity")?;
            let new_qty = (prev_qty - quantity).max(0);
            if new_qty == 0 {
                sqlx::query(
                    r#"
                    update positions
                    set quantity = 0, status = 'closed', closed_at = now(),
                        active_close_request_id = null, current_price = $2, updated_at = now()
                    where id = $1
                    "#,
                )
                .bind(id)
                .bind(price)
                .execute(&mut *tx)
                .await
                .context("record_fill sell close failed")?;
            } else {
                sqlx::query(
                    r#"
                    update positions
                    set quantity = $2, current_price = $3, updated_at = now()
                    where id = $1
                    "#,
                )
                .bind(id)
                .bind(new_qty)
                .bind(price)
                .execute(&mut *tx)
                .await
                .context("record_fill sell reduce failed")?;
            }
        }
        (Side::Sell, None) => {
            // A sell fill against no local position is a reconciliation
            // problem, not a write; surface it to the caller.
            anyhow::bail!("sell fill for {symbol} with no open local position");
        }
    }

    let cash_delta = match side {
        Side::Buy => -notional,
        Side::Sell => notional,
    };
    sqlx::query(
        r#"
        update accounts
        set cash = cash + $2, updated_at = now()
        where account_id = $1
        "#,
    )
    .bind(account_id)
    .bind(cash_delta)
    .execute(&mut *tx)
    .await
    .context("record_fill account update failed")?;

    tx.commit().await.context("record_fill commit failed")?;
    Ok(())
}

/// Snapshot the account + open positions for the risk gate and reconciler.
pub async fn snapshot(pool: &PgPool, account_id: &str) -> Result<PortfolioSnapshot> {
    let account = sqlx::query(
        r#"
        select cash, buying_power, total_equity, peak_equity, daily_realized_pnl
        from accounts where account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_one(pool)
    .await
    .context("snapshot account failed")?;

    let mut snap = PortfolioSnapshot {
        account_id: account_id.to_string(),
        cash: account.try_get("cash")?,
        buying_power: account.try_get("buying_power")?,
        equity: account.try_get("total_equity")?,
        peak_equity: account.try_get("peak_equity")?,
        daily_pnl: account.try_get("daily_realized_pnl")?,
        positions: Default::default(),
    };

    for position in open_positions(pool, account_id).await? {
        snap.positions.insert(
            position.symbol.clone(),
            PositionView {
                quantity: position.quantity,
                avg_cost: position.avg_cost,
                current_price: position.current_price,
            },
        );
    }
    Ok(snap)
}

/// Transition a position into `closing` and attach its close request id.
/// Part of the close-position business transaction.
pub async fn mark_closing(
    tx: &mut Transaction<'_, Postgres>,
    position_id: i64,
    close_request_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        update positions
        set status = 'closing', active_close_request_id = $2, updated_at = now()
        where id = $1
        "#,
    )
    .bind(position_id)
    .bind(close_request_id)
    .execute(&mut **tx)
    .await
    .context("mark_closing failed")?;
    Ok(())
}

/// Permanent close failure: clear tracking, flag the position.
pub async fn mark_close_failed(pool: &PgPool, position_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        update positions
        set status = 'close_failed', active_close_request_id = null, updated_at = now()
        where id = $1
        "#,
    )
    .bind(position_id)
    .execute(pool)
    .await
    .context("mark_close_failed failed")?;
    Ok(())
}
