//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling with deadpool-postgres and the
//! [`PgContactStore`] implementation of [`ContactStore`].
//!
//! Uniqueness of primaries is enforced twice: the insert itself refuses to
//! create a primary whose identifier is already stored, and partial unique
//! indexes catch two such inserts racing each other.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use linkage_core::{
    Contact, ContactId, LinkPrecedence, LinkageError, LinkageResult, NewContact,
    PrecedenceUpdate, StorageError,
};
use linkage_storage::ContactStore;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a request waits for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "linkage".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("LINKAGE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("LINKAGE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("LINKAGE_DB_NAME").unwrap_or_else(|_| "linkage".to_string()),
            user: std::env::var("LINKAGE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("LINKAGE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LINKAGE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("LINKAGE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size.max(1));
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Idempotent schema bootstrap.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS contact (
    id              BIGSERIAL PRIMARY KEY,
    phone_number    TEXT,
    email           TEXT,
    linked_id       BIGINT REFERENCES contact (id),
    link_precedence TEXT NOT NULL CHECK (link_precedence IN ('primary', 'secondary')),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    CONSTRAINT contact_has_identifier CHECK (email IS NOT NULL OR phone_number IS NOT NULL),
    CONSTRAINT contact_link_matches_precedence
        CHECK ((link_precedence = 'primary') = (linked_id IS NULL))
);

CREATE INDEX IF NOT EXISTS contact_email_idx ON contact (email);
CREATE INDEX IF NOT EXISTS contact_phone_number_idx ON contact (phone_number);
CREATE INDEX IF NOT EXISTS contact_linked_id_idx ON contact (linked_id);

CREATE UNIQUE INDEX IF NOT EXISTS contact_primary_email_key
    ON contact (email) WHERE link_precedence = 'primary' AND email IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS contact_primary_phone_number_key
    ON contact (phone_number) WHERE link_precedence = 'primary' AND phone_number IS NOT NULL;
"#;

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, link_precedence, linked_id, created_at, updated_at";

// ============================================================================
// POSTGRES CONTACT STORE
// ============================================================================

/// [`ContactStore`] over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgContactStore {
    pool: Pool,
}

impl PgContactStore {
    /// Create a new store with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new store from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the contact table and its indexes if they are missing.
    pub async fn ensure_schema(&self) -> LinkageResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| map_pg_error("ensure_schema", e))?;
        tracing::info!("Contact schema ready");
        Ok(())
    }

    async fn conn(&self) -> LinkageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            LinkageError::from(StorageError::Unavailable {
                reason: e.to_string(),
            })
        })
    }

    async fn create_primary(&self, contact: &NewContact) -> LinkageResult<Contact> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO contact (email, phone_number, link_precedence) \
             SELECT $1, $2, 'primary' \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM contact \
                 WHERE ($1::text IS NOT NULL AND email = $1) \
                    OR ($2::text IS NOT NULL AND phone_number = $2)) \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = conn
            .query_opt(&sql, &[&contact.email, &contact.phone_number])
            .await
            .map_err(|e| map_pg_error("create", e))?;

        match row {
            Some(row) => contact_from_row(&row),
            None => Err(StorageError::UniqueViolation {
                identifier: held_identifier(contact),
            }
            .into()),
        }
    }

    async fn create_secondary(
        &self,
        contact: &NewContact,
        linked: ContactId,
    ) -> LinkageResult<Contact> {
        let mut conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| map_pg_error("create", e))?;

        // Blocks a concurrent demotion of the target until this insert commits.
        let target = tx
            .query_opt(
                "SELECT link_precedence FROM contact WHERE id = $1 FOR SHARE",
                &[&linked.get()],
            )
            .await
            .map_err(|e| map_pg_error("create", e))?;

        match target {
            None => return Err(StorageError::NotFound { id: linked }.into()),
            Some(row) => {
                let precedence: String = row
                    .try_get(0)
                    .map_err(|e| map_pg_error("create", e))?;
                if precedence != LinkPrecedence::Primary.as_db_str() {
                    return Err(StorageError::StaleLink { id: linked }.into());
                }
            }
        }

        let sql = format!(
            "INSERT INTO contact (email, phone_number, link_precedence, linked_id) \
             VALUES ($1, $2, 'secondary', $3) \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = tx
            .query_one(&sql, &[&contact.email, &contact.phone_number, &linked.get()])
            .await
            .map_err(|e| map_pg_error("create", e))?;
        let created = contact_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_pg_error("create", e))?;
        Ok(created)
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }

        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contact \
             WHERE ($1::text IS NOT NULL AND email = $1) \
                OR ($2::text IS NOT NULL AND phone_number = $2) \
             ORDER BY id"
        );
        let rows = conn
            .query(&sql, &[&email, &phone_number])
            .await
            .map_err(|e| map_pg_error("find_matching", e))?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn().await?;
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contact \
             WHERE id = ANY($1) OR linked_id = ANY($1) \
             ORDER BY id"
        );
        let rows = conn
            .query(&sql, &[&ids])
            .await
            .map_err(|e| map_pg_error("find_by_ids_or_linked_to", e))?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        if contact.email.is_none() && contact.phone_number.is_none() {
            return Err(StorageError::InsertFailed {
                reason: "contact must carry an email or a phone number".to_string(),
            }
            .into());
        }

        let created = match (contact.precedence, contact.linked_id) {
            (LinkPrecedence::Primary, None) => self.create_primary(&contact).await?,
            (LinkPrecedence::Secondary, Some(linked)) => {
                self.create_secondary(&contact, linked).await?
            }
            (precedence, linked) => {
                return Err(StorageError::InsertFailed {
                    reason: format!("{} contact cannot have linked id {:?}", precedence, linked),
                }
                .into())
            }
        };
        tracing::trace!(contact_id = %created.id, precedence = %created.precedence, "Contact stored");
        Ok(created)
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(map_transaction_error)?;

        // Lock in id order so two batches over overlapping rows cannot deadlock.
        let ids: Vec<i64> = updates
            .iter()
            .map(|u| u.id.get())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let locked = tx
            .query(
                "SELECT id FROM contact WHERE id = ANY($1) ORDER BY id FOR UPDATE",
                &[&ids],
            )
            .await
            .map_err(map_transaction_error)?;
        let found: BTreeSet<i64> = locked.iter().map(|row| row.get::<_, i64>(0)).collect();
        if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
            return Err(StorageError::NotFound {
                id: ContactId(*missing),
            }
            .into());
        }

        for update in updates {
            if update.precedence == LinkPrecedence::Secondary && update.linked_id.is_none() {
                return Err(StorageError::UpdateFailed {
                    id: update.id,
                    reason: "secondary contact requires a linked id".to_string(),
                }
                .into());
            }

            let linked = update.linked_id.map(ContactId::get);
            tx.execute(
                "UPDATE contact \
                 SET link_precedence = $2, linked_id = $3, updated_at = clock_timestamp() \
                 WHERE id = $1",
                &[&update.id.get(), &update.precedence.as_db_str(), &linked],
            )
            .await
            .map_err(|e| LinkageError::from(StorageError::UpdateFailed {
                id: update.id,
                reason: e.to_string(),
            }))?;

            if let Some(canonical) = linked {
                tx.execute(
                    "UPDATE contact \
                     SET linked_id = $2, updated_at = clock_timestamp() \
                     WHERE linked_id = $1 AND id <> $2",
                    &[&update.id.get(), &canonical],
                )
                .await
                .map_err(map_transaction_error)?;
            }
        }

        tx.commit().await.map_err(map_transaction_error)?;
        tracing::debug!(updated = updates.len(), "Precedence batch committed");
        Ok(())
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contact ORDER BY id");
        let rows = conn
            .query(&sql, &[])
            .await
            .map_err(|e| map_pg_error("list_all", e))?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| map_pg_error("health_check", e))?;
        Ok(true)
    }
}

// ============================================================================
// ROW MAPPING AND ERRORS
// ============================================================================

fn contact_from_row(row: &Row) -> LinkageResult<Contact> {
    let column_error = |e: tokio_postgres::Error| map_pg_error("decode_contact", e);

    let precedence: String = row.try_get("link_precedence").map_err(column_error)?;
    let precedence = LinkPrecedence::from_db_str(&precedence).map_err(|e| {
        LinkageError::from(StorageError::QueryFailed {
            operation: "decode_contact".to_string(),
            reason: e.to_string(),
        })
    })?;
    let linked_id: Option<i64> = row.try_get("linked_id").map_err(column_error)?;

    Ok(Contact {
        id: ContactId(row.try_get("id").map_err(column_error)?),
        email: row.try_get("email").map_err(column_error)?,
        phone_number: row.try_get("phone_number").map_err(column_error)?,
        precedence,
        linked_id: linked_id.map(ContactId),
        created_at: row.try_get("created_at").map_err(column_error)?,
        updated_at: row.try_get("updated_at").map_err(column_error)?,
    })
}

fn held_identifier(contact: &NewContact) -> String {
    match (&contact.email, &contact.phone_number) {
        (Some(email), _) => format!("email:{}", email),
        (None, Some(phone)) => format!("phone:{}", phone),
        (None, None) => "contact".to_string(),
    }
}

/// Deadlocks and serialization failures roll the transaction back; the
/// caller may run it again.
fn is_transaction_abort(code: Option<&SqlState>) -> bool {
    code.is_some_and(|c| {
        *c == SqlState::T_R_DEADLOCK_DETECTED || *c == SqlState::T_R_SERIALIZATION_FAILURE
    })
}

/// Map a driver error to the storage taxonomy.
fn map_pg_error(operation: &str, err: tokio_postgres::Error) -> LinkageError {
    if is_transaction_abort(err.code()) {
        return StorageError::TransactionAborted {
            reason: err.to_string(),
        }
        .into();
    }
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let identifier = err
            .as_db_error()
            .and_then(|db| db.constraint())
            .unwrap_or("contact")
            .to_string();
        return StorageError::UniqueViolation { identifier }.into();
    }
    if err.is_closed() {
        return StorageError::Unavailable {
            reason: err.to_string(),
        }
        .into();
    }
    StorageError::QueryFailed {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn map_transaction_error(err: tokio_postgres::Error) -> LinkageError {
    if is_transaction_abort(err.code()) {
        return StorageError::TransactionAborted {
            reason: err.to_string(),
        }
        .into();
    }
    if err.is_closed() {
        return StorageError::Unavailable {
            reason: err.to_string(),
        }
        .into();
    }
    StorageError::TransactionFailed {
        reason: err.to_string(),
    }
    .into()
}
