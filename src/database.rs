use crate::prelude::*;
use crate::store::Store;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{any::AnyConnectOptions, Any, Pool, Row};

enum DatabaseType {
    MySQL,
    Postgres,
    SQLite,
}

/// [`Store`] backed by any sqlx-supported database, one row per device/key.
#[derive(Clone, Debug)]
pub struct DatabaseStore {
    url: String,
    pool: Pool<Any>,
}

impl DatabaseStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("initializing database");
        sqlx::any::install_default_drivers();

        let options = AnyConnectOptions::from_str(url)?;
        let pool = sqlx::any::AnyPoolOptions::new()
            // sqlite in-memory databases exist per connection
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = Self {
            url: url.to_string(),
            pool,
        };
        store.migrate().await?;

        Ok(store)
    }

    fn database(&self) -> Result<DatabaseType> {
        let prefix: Vec<&str> = self.url.splitn(2, ':').collect();
        match prefix[0] {
            "sqlite" => Ok(DatabaseType::SQLite),
            "mysql" => Ok(DatabaseType::MySQL),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            _ => Err(anyhow!("database.rs:unsupported database {}", self.url)),
        }
    }

    async fn migrate(&self) -> Result<()> {
        let ddl = match self.database()? {
            DatabaseType::MySQL => {
                "CREATE TABLE IF NOT EXISTS device_store (
                    device VARCHAR(191) NOT NULL,
                    `key` VARCHAR(191) NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (device, `key`))"
            }
            _ => {
                "CREATE TABLE IF NOT EXISTS device_store (
                    device TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (device, key))"
            }
        };
        sqlx::query(ddl).execute(&self.pool).await?;
        Ok(())
    }

    fn select_query(&self) -> &'static str {
        match self.database() {
            Ok(DatabaseType::MySQL) => "SELECT value FROM device_store WHERE device = ? AND `key` = ?",
            _ => "SELECT value FROM device_store WHERE device = $1 AND key = $2",
        }
    }

    fn upsert_query(&self) -> &'static str {
        match self.database() {
            Ok(DatabaseType::MySQL) => {
                "INSERT INTO device_store (device, `key`, value) VALUES (?, ?, ?)
                 ON DUPLICATE KEY UPDATE value = VALUES(value)"
            }
            _ => {
                "INSERT INTO device_store (device, key, value) VALUES ($1, $2, $3)
                 ON CONFLICT (device, key) DO UPDATE SET value = excluded.value"
            }
        }
    }
}

#[async_trait]
impl Store for DatabaseStore {
    async fn get(&self, device: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let row = sqlx::query(self.select_query())
            .bind(device)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.try_get(0)?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, device: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        sqlx::query(self.upsert_query())
            .bind(device)
            .bind(key)
            .bind(serde_json::to_string(&value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
