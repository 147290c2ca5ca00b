//! Order rows as written by the storefront

use crate::time::{parse_db_timestamp, to_db_timestamp};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Fulfilment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown order status: {}", other))),
        }
    }
}

/// Payment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown payment status: {}", other))),
        }
    }
}

/// One order, reduced to the fields analytics needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    /// Opaque reference to the customer account
    pub customer_id: String,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert (or overwrite) an order row
pub async fn insert_order(pool: &SqlitePool, order: &OrderRecord) -> Result<()> {
    if !(order.total_amount >= 0.0) {
        return Err(Error::InvalidInput(format!(
            "Order {} has invalid total {}",
            order.order_id, order.total_amount
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO orders (order_id, customer_id, total_amount, status, payment_status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(order_id) DO UPDATE SET
            customer_id = excluded.customer_id,
            total_amount = excluded.total_amount,
            status = excluded.status,
            payment_status = excluded.payment_status,
            created_at = excluded.created_at
        "#,
    )
    .bind(&order.order_id)
    .bind(&order.customer_id)
    .bind(order.total_amount)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(to_db_timestamp(order.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Read all orders, optionally only those created at or after `since`
pub async fn fetch_orders(
    pool: &SqlitePool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<OrderRecord>> {
    let rows = match since {
        Some(since) => {
            sqlx::query(
                r#"
                SELECT order_id, customer_id, total_amount, status, payment_status, created_at
                FROM orders
                WHERE created_at >= ?
                ORDER BY order_id
                "#,
            )
            .bind(to_db_timestamp(since))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT order_id, customer_id, total_amount, status, payment_status, created_at
                FROM orders
                ORDER BY order_id
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter()
        .map(|row| -> Result<OrderRecord> {
            let status: String = row.try_get("status")?;
            let payment_status: String = row.try_get("payment_status")?;
            let created_at: String = row.try_get("created_at")?;

            Ok(OrderRecord {
                order_id: row.try_get("order_id")?,
                customer_id: row.try_get("customer_id")?,
                total_amount: row.try_get("total_amount")?,
                status: status.parse()?,
                payment_status: payment_status.parse()?,
                created_at: parse_db_timestamp(&created_at)?,
            })
        })
        .collect()
}
