//! Postgres repositories.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use janus_protocol::{Platform, WebhookCredentials};

use super::{BridgePair, BridgeRepo, MessageMapEntry, MessageMapRepo, NewBridgePair, RepoError};

const PAIR_COLUMNS: &str = "id, a_channel_id, a_guild_id, b_channel_id, b_guild_id, \
     a_webhook_id, a_webhook_token, b_webhook_id, b_webhook_token, \
     is_active, sync_uploads, created_at, updated_at";

fn map_pair(row: &PgRow) -> BridgePair {
    let creds = |id_col: &str, token_col: &str| -> Option<WebhookCredentials> {
        let id: Option<String> = row.get(id_col);
        let token: Option<String> = row.get(token_col);
        match (id, token) {
            (Some(id), Some(token)) => Some(WebhookCredentials { id, token }),
            _ => None,
        }
    };
    BridgePair {
        id: row.get("id"),
        a_channel_id: row.get("a_channel_id"),
        a_guild_id: row.get("a_guild_id"),
        b_channel_id: row.get("b_channel_id"),
        b_guild_id: row.get("b_guild_id"),
        a_webhook: creds("a_webhook_id", "a_webhook_token"),
        b_webhook: creds("b_webhook_id", "b_webhook_token"),
        is_active: row.get("is_active"),
        sync_uploads: row.get("sync_uploads"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn map_entry(row: &PgRow) -> Result<MessageMapEntry, RepoError> {
    let parse = |col: &str| -> Result<Platform, RepoError> {
        let raw: String = row.get(col);
        raw.parse()
            .map_err(|_| RepoError::Backend(format!("bad platform value in {col}: {raw:?}")))
    };
    Ok(MessageMapEntry {
        pair_id: row.get("pair_id"),
        source_platform: parse("source_platform")?,
        source_msg_id: row.get("source_msg_id"),
        dest_platform: parse("dest_platform")?,
        dest_msg_id: row.get("dest_msg_id"),
    })
}

// ---------------------------------------------------------------------------
// BridgeRepo
// ---------------------------------------------------------------------------

pub struct PgBridgeRepo {
    pool: PgPool,
}

impl PgBridgeRepo {
    pub fn new(pool: PgPool) -> Self {
        PgBridgeRepo { pool }
    }
}

#[async_trait]
impl BridgeRepo for PgBridgeRepo {
    async fn insert(&self, new: NewBridgePair) -> Result<BridgePair, RepoError> {
        let row = sqlx::query(sqlx::AssertSqlSafe(format!(
            "INSERT INTO bridge_pairs (a_channel_id, a_guild_id, b_channel_id, b_guild_id, sync_uploads)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PAIR_COLUMNS}"
        )))
        .bind(&new.a_channel_id)
        .bind(&new.a_guild_id)
        .bind(&new.b_channel_id)
        .bind(&new.b_guild_id)
        .bind(new.sync_uploads)
        .fetch_one(&self.pool)
        .await?;
        Ok(map_pair(&row))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<BridgePair>, RepoError> {
        let row = sqlx::query(sqlx::AssertSqlSafe(format!(
            "SELECT {PAIR_COLUMNS} FROM bridge_pairs WHERE id = $1"
        )))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_pair))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM bridge_pairs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<BridgePair>, RepoError> {
        let row = sqlx::query(sqlx::AssertSqlSafe(format!(
            "UPDATE bridge_pairs SET is_active = $2, updated_at = now()
             WHERE id = $1
             RETURNING {PAIR_COLUMNS}"
        )))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_pair))
    }

    async fn set_webhook(
        &self,
        id: Uuid,
        platform: Platform,
        creds: &WebhookCredentials,
    ) -> Result<(), RepoError> {
        let sql = match platform {
            Platform::A => {
                "UPDATE bridge_pairs
                 SET a_webhook_id = $2, a_webhook_token = $3, updated_at = now()
                 WHERE id = $1"
            }
            Platform::B => {
                "UPDATE bridge_pairs
                 SET b_webhook_id = $2, b_webhook_token = $3, updated_at = now()
                 WHERE id = $1"
            }
        };
        sqlx::query(sql)
            .bind(id)
            .bind(&creds.id)
            .bind(&creds.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_for_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, RepoError> {
        let sql = match platform {
            Platform::A => format!(
                "SELECT {PAIR_COLUMNS} FROM bridge_pairs
                 WHERE is_active AND a_channel_id = $1
                 ORDER BY created_at ASC"
            ),
            Platform::B => format!(
                "SELECT {PAIR_COLUMNS} FROM bridge_pairs
                 WHERE is_active AND b_channel_id = $1
                 ORDER BY created_at ASC"
            ),
        };
        let rows = sqlx::query(sqlx::AssertSqlSafe(sql))
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(map_pair).collect())
    }

    async fn all(&self) -> Result<Vec<BridgePair>, RepoError> {
        let rows = sqlx::query(sqlx::AssertSqlSafe(format!(
            "SELECT {PAIR_COLUMNS} FROM bridge_pairs ORDER BY created_at ASC"
        )))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_pair).collect())
    }

    async fn all_active(&self) -> Result<Vec<BridgePair>, RepoError> {
        let rows = sqlx::query(sqlx::AssertSqlSafe(format!(
            "SELECT {PAIR_COLUMNS} FROM bridge_pairs WHERE is_active ORDER BY created_at ASC"
        )))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_pair).collect())
    }
}

// ---------------------------------------------------------------------------
// MessageMapRepo
// ---------------------------------------------------------------------------

pub struct PgMessageMapRepo {
    pool: PgPool,
}

impl PgMessageMapRepo {
    pub fn new(pool: PgPool) -> Self {
        PgMessageMapRepo { pool }
    }
}

#[async_trait]
impl MessageMapRepo for PgMessageMapRepo {
    async fn insert(&self, entry: &MessageMapEntry) -> Result<(), RepoError> {
        // Replays of the same create job overwrite rather than error.
        sqlx::query(
            "INSERT INTO message_map
                 (pair_id, source_platform, source_msg_id, dest_platform, dest_msg_id)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (pair_id, source_platform, source_msg_id)
             DO UPDATE SET dest_platform = $4, dest_msg_id = $5",
        )
        .bind(entry.pair_id)
        .bind(entry.source_platform.as_str())
        .bind(&entry.source_msg_id)
        .bind(entry.dest_platform.as_str())
        .bind(&entry.dest_msg_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<Option<MessageMapEntry>, RepoError> {
        let row = sqlx::query(
            "SELECT pair_id, source_platform, source_msg_id, dest_platform, dest_msg_id
             FROM message_map
             WHERE pair_id = $1 AND source_platform = $2 AND source_msg_id = $3",
        )
        .bind(pair_id)
        .bind(source_platform.as_str())
        .bind(source_msg_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_entry).transpose()
    }

    async fn remove(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "DELETE FROM message_map
             WHERE pair_id = $1 AND source_platform = $2 AND source_msg_id = $3",
        )
        .bind(pair_id)
        .bind(source_platform.as_str())
        .bind(source_msg_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
