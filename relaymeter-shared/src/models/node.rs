/// Node model and database operations
///
/// A node is a proxy-serving machine managed by the control plane. The
/// `usage_coefficient` is a per-node multiplier applied to raw reported
/// traffic before it is credited to user and admin totals, letting
/// expensive egress count more (or less) than a byte-for-byte rate.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE nodes (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(128) NOT NULL UNIQUE,
///     address VARCHAR(255) NOT NULL,
///     port INTEGER NOT NULL,
///     api_port INTEGER NOT NULL,
///     status node_status NOT NULL DEFAULT 'connecting',
///     message TEXT,
///     usage_coefficient DOUBLE PRECISION NOT NULL DEFAULT 1.0,
///     uplink BIGINT NOT NULL DEFAULT 0,
///     downlink BIGINT NOT NULL DEFAULT 0,
///     last_status_change TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Node connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "node_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Handshake in progress
    Connecting,

    /// Agent connected and serving
    Connected,

    /// Agent unreachable; excluded from collection until it reconnects
    Disconnected,

    /// Administratively disabled
    Disabled,
}

/// Node model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Node {
    /// Unique node ID (UUID v4)
    pub id: Uuid,

    /// Display name, unique across all nodes
    pub name: String,

    /// Agent address
    pub address: String,

    /// Proxy port
    pub port: i32,

    /// Agent API port
    pub api_port: i32,

    /// Connection status
    pub status: NodeStatus,

    /// Last status message from the agent, if any
    pub message: Option<String>,

    /// Multiplier applied to raw reported traffic (default 1.0)
    pub usage_coefficient: f64,

    /// Total uplink bytes relayed through this node
    pub uplink: i64,

    /// Total downlink bytes relayed through this node
    pub downlink: i64,

    /// When the status last changed
    pub last_status_change: DateTime<Utc>,

    /// When the node was registered
    pub created_at: DateTime<Utc>,
}

/// Input for registering a new node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNode {
    pub name: String,
    pub address: String,
    pub port: i32,
    pub api_port: i32,
    pub usage_coefficient: f64,
}

const NODE_COLUMNS: &str = "id, name, address, port, api_port, status, message, \
     usage_coefficient, uplink, downlink, last_status_change, created_at";

impl Node {
    /// Registers a new node
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the name is taken.
    pub async fn create(pool: &PgPool, data: CreateNode) -> StoreResult<Self> {
        let node = sqlx::query_as::<_, Node>(&format!(
            r#"
            INSERT INTO nodes (name, address, port, api_port, usage_coefficient)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(data.name)
        .bind(data.address)
        .bind(data.port)
        .bind(data.api_port)
        .bind(data.usage_coefficient)
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::on_create(e, "node"))?;

        Ok(node)
    }

    /// Lists all registered nodes
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Node>(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY created_at"))
            .fetch_all(pool)
            .await
    }

    /// Lists nodes that are not administratively disabled
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE status <> 'disabled' ORDER BY created_at"
        ))
        .fetch_all(pool)
        .await
    }

    /// Persists a node status transition, stamping `last_status_change`
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: NodeStatus,
        message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE nodes
            SET status = $2, message = COALESCE($3, message), last_status_change = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(message)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Atomically adds outbound traffic to the node's running totals
    pub async fn increment_traffic(
        pool: &PgPool,
        id: Uuid,
        uplink: i64,
        downlink: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE nodes SET uplink = uplink + $2, downlink = downlink + $3 WHERE id = $1",
        )
        .bind(id)
        .bind(uplink)
        .bind(downlink)
        .execute(pool)
        .await?;

        Ok(())
    }
}
