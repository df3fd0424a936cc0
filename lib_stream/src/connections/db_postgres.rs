//! # PostgreSQL Sink
//!
//! Persists canonical records through a `deadpool_postgres` connection pool.
//! The activities table carries a `UNIQUE (publisher, native_id)` constraint;
//! a violation of it comes back as [`SinkError::Duplicate`].

use std::future::Future;

use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::configs::DatabaseConfig;
use crate::normalize::CanonicalRecord;

use super::sink::{Sink, SinkError};

/// Custom error types for database setup.
#[derive(Debug, Error)]
pub enum DbError {
    /// The pool could not be created or a connection acquired.
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),
    /// A statement failed.
    #[error("Query execution failed: {0}")]
    QueryError(String),
    /// The configured table name is not a plain identifier.
    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

/// A [`Sink`] writing to one PostgreSQL table.
pub struct PostgresSink {
    pool: Pool,
    table: String,
    insert_sql: String,
}

impl PostgresSink {
    /// Creates the connection pool. No connection is opened until first use.
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        if !is_identifier(&config.table) {
            return Err(DbError::InvalidTable(config.table.clone()));
        }

        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.host = Some(config.host.clone());
        pg_pool_config.port = Some(config.port);
        pg_pool_config.dbname = Some(config.schema.clone());
        pg_pool_config.user = Some(config.user_name.clone());
        pg_pool_config.password = Some(config.password.clone());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::ConnectionError(format!("Failed to create database pool: {}", e)))?;
        log::info!("Database pool created for {}:{}/{}", config.host, config.port, config.schema);

        Ok(Self {
            insert_sql: insert_statement(&config.table),
            table: config.table.clone(),
            pool,
        })
    }

    /// Checks the connection by running a trivial query.
    pub async fn ping(&self) -> Result<(), DbError> {
        let client = self.pool.get().await.map_err(|e| DbError::ConnectionError(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;
        Ok(())
    }

    /// Creates the activities table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        let client = self.pool.get().await.map_err(|e| DbError::ConnectionError(e.to_string()))?;
        client
            .batch_execute(&create_statement(&self.table))
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;
        log::info!("Table {} is ready", self.table);
        Ok(())
    }

    async fn insert(&self, record: CanonicalRecord) -> Result<(), SinkError> {
        let client = self.pool.get().await.map_err(|e| SinkError::Storage(e.to_string()))?;
        let params: [&(dyn ToSql + Sync); 12] = [
            &record.native_id,
            &record.publisher,
            &record.raw_content,
            &record.body,
            &record.rule_values,
            &record.rule_tags,
            &record.posted_at,
            &record.latitude,
            &record.longitude,
            &record.place,
            &record.bio_place,
            &record.stream_id,
        ];
        match client.execute(self.insert_sql.as_str(), &params).await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(SinkError::duplicate(&record)),
            Err(e) => Err(SinkError::Storage(e.to_string())),
        }
    }
}

impl Sink for PostgresSink {
    fn save(&self, record: CanonicalRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        self.insert(record)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn create_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            native_id TEXT NOT NULL,
            publisher TEXT NOT NULL,
            content TEXT NOT NULL,
            body TEXT NOT NULL,
            rule_value TEXT NOT NULL,
            rule_tag TEXT NOT NULL,
            posted_at TIMESTAMPTZ NOT NULL,
            latitude DOUBLE PRECISION NOT NULL DEFAULT 0,
            longitude DOUBLE PRECISION NOT NULL DEFAULT 0,
            place TEXT NOT NULL DEFAULT '',
            bio_place TEXT NOT NULL DEFAULT '',
            stream_id BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (publisher, native_id)
        )"
    )
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (native_id, publisher, content, body, rule_value, rule_tag, posted_at, \
         latitude, longitude, place, bio_place, stream_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(table: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            schema: "firehose".to_string(),
            user_name: "app".to_string(),
            password: "pw".to_string(),
            table: table.to_string(),
        }
    }

    #[test]
    fn test_table_name_must_be_identifier() {
        assert!(is_identifier("activities"));
        assert!(is_identifier("_stream_2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("activities; DROP TABLE x"));
        assert!(matches!(PostgresSink::new(&database("bad-name")), Err(DbError::InvalidTable(_))));
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() {
        let sink = PostgresSink::new(&database("activities")).unwrap();
        assert!(sink.insert_sql.starts_with("INSERT INTO activities ("));
        assert_eq!(sink.insert_sql.matches('$').count(), 12);
    }

    #[tokio::test]
    async fn test_ping_reports_unreachable_server() {
        let mut config = database("activities");
        // Nothing listens on the discard port.
        config.port = 9;
        let sink = PostgresSink::new(&config).unwrap();
        assert!(matches!(sink.ping().await, Err(DbError::ConnectionError(_))));
    }

    #[test]
    fn test_create_statement_has_uniqueness_constraint() {
        assert!(create_statement("activities").contains("UNIQUE (publisher, native_id)"));
    }
}
