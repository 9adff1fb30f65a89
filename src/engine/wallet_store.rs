use sqlx::{Executor, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::entities::{BalanceField, Wallet};
use crate::error::{not_found_error, Error};

#[tracing::instrument(skip(tx))]
pub async fn balance(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<Wallet>, Error> {
    let maybe_row = tx
        .fetch_optional(
            sqlx::query("SELECT wallet, hold_amount FROM users WHERE user_id = $1").bind(user_id),
        )
        .await?;

    match maybe_row {
        Some(row) => Ok(Some(Wallet {
            wallet: row.try_get("wallet")?,
            hold_amount: row.try_get("hold_amount")?,
        })),
        None => Ok(None),
    }
}

/// Increments one balance column by `amount` (negative to deduct). Always
/// part of a larger ledger transaction; a missing user aborts it.
#[tracing::instrument(skip(tx))]
pub async fn adjust(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    field: BalanceField,
    amount: f64,
) -> Result<Wallet, Error> {
    let query = format!(
        "UPDATE users SET {column} = {column} + $1 WHERE user_id = $2
         RETURNING wallet, hold_amount",
        column = field.column()
    );

    let row = tx
        .fetch_optional(sqlx::query(&query).bind(amount).bind(user_id))
        .await?
        .ok_or_else(not_found_error)?;

    Ok(Wallet {
        wallet: row.try_get("wallet")?,
        hold_amount: row.try_get("hold_amount")?,
    })
}

/// Moves `fare_amount` out of the spendable balance and into the hold in
/// one guarded statement; the strict `wallet > fare` WHERE clause is the
/// wallet's concurrency control, mirroring the seat guard. `None` means the
/// balance no longer covers the fare.
#[tracing::instrument(skip(tx))]
pub async fn debit_and_hold(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    fare_amount: f64,
) -> Result<Option<Wallet>, Error> {
    let query = "
        UPDATE users
        SET wallet = wallet - $1,
            hold_amount = hold_amount + $1
        WHERE user_id = $2
          AND wallet > $1
        RETURNING wallet, hold_amount
    ";

    let maybe_row = tx
        .fetch_optional(sqlx::query(query).bind(fare_amount).bind(user_id))
        .await?;

    match maybe_row {
        Some(row) => Ok(Some(Wallet {
            wallet: row.try_get("wallet")?,
            hold_amount: row.try_get("hold_amount")?,
        })),
        None => Ok(None),
    }
}
