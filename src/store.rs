use crate::prelude::*;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const KEY_IP: &str = "ip";
pub const KEY_SN: &str = "sn";
pub const KEY_CHARGE_METER: &str = "chargeMeter";
pub const KEY_DISCHARGE_METER: &str = "dischargeMeter";

type Documents = HashMap<String, HashMap<String, Value>>;

/// Persisted per-device key/value fields. A successful `set` is durable.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, device: &str, key: &str) -> Result<Option<Value>, PersistenceError>;
    async fn set(&self, device: &str, key: &str, value: Value) -> Result<(), PersistenceError>;
}

/// Opens the store named by the config.
pub async fn open(config: &config::Store) -> Result<Arc<dyn Store>> {
    match (config.file(), config.database()) {
        (Some(file), None) => Ok(Arc::new(FileStore::open(file)?)),
        (None, Some(url)) => Ok(Arc::new(crate::database::DatabaseStore::connect(url).await?)),
        _ => bail!("store: exactly one of file or database must be set"),
    }
}

// MemoryStore {{{
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, device: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let documents = self.documents.lock().await;
        Ok(documents.get(device).and_then(|d| d.get(key)).cloned())
    }

    async fn set(&self, device: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        let mut documents = self.documents.lock().await;
        documents
            .entry(device.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
} // }}}

// FileStore {{{
/// All devices in one JSON document, rewritten through a temp file and a
/// rename so a crash leaves either the old or the new file.
pub struct FileStore {
    path: PathBuf,
    documents: Mutex<Documents>,
}

impl FileStore {
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        info!("Opening state file at {}", path);
        let path = PathBuf::from(path);

        let documents = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Documents::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Documents::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            documents: Mutex::new(documents),
        })
    }

    async fn write(path: &Path, documents: &Documents) -> Result<(), PersistenceError> {
        use tokio::io::AsyncWriteExt;

        let content = serde_json::to_string_pretty(documents)?;
        let tmp = path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, device: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let documents = self.documents.lock().await;
        Ok(documents.get(device).and_then(|d| d.get(key)).cloned())
    }

    async fn set(&self, device: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        let mut documents = self.documents.lock().await;

        let mut updated = documents.clone();
        updated
            .entry(device.to_string())
            .or_default()
            .insert(key.to_string(), value);

        // memory only moves forward once the file has
        Self::write(&self.path, &updated).await?;
        *documents = updated;
        Ok(())
    }
} // }}}

/// One device's slice of a [`Store`], with typed accessors.
#[derive(Clone)]
pub struct DeviceStore {
    store: Arc<dyn Store>,
    device: String,
}

impl DeviceStore {
    pub fn new(store: Arc<dyn Store>, device: &str) -> Self {
        Self {
            store,
            device: device.to_string(),
        }
    }

    pub async fn get_f64(&self, key: &str) -> Result<Option<f64>, PersistenceError> {
        Ok(self.store.get(&self.device, key).await?.and_then(|v| v.as_f64()))
    }

    pub async fn set_f64(&self, key: &str, value: f64) -> Result<(), PersistenceError> {
        if !value.is_finite() {
            return Err(PersistenceError::NonFinite(key.to_string(), value));
        }
        self.store.set(&self.device, key, serde_json::json!(value)).await
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .store
            .get(&self.device, key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.store.set(&self.device, key, Value::String(value.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_store() -> Result<()> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = DeviceStore::new(store.clone(), "hub");
        let other = DeviceStore::new(store, "other");

        assert_eq!(hub.get_f64(KEY_CHARGE_METER).await?, None);
        hub.set_f64(KEY_CHARGE_METER, 1.25).await?;
        hub.set_string(KEY_SN, "SN1").await?;

        assert_eq!(hub.get_f64(KEY_CHARGE_METER).await?, Some(1.25));
        assert_eq!(hub.get_string(KEY_SN).await?, Some("SN1".to_string()));
        assert_eq!(other.get_f64(KEY_CHARGE_METER).await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn non_finite_values_are_rejected() -> Result<()> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = DeviceStore::new(store, "hub");

        hub.set_f64(KEY_CHARGE_METER, 1.5).await?;
        assert!(matches!(
            hub.set_f64(KEY_CHARGE_METER, f64::NAN).await,
            Err(PersistenceError::NonFinite(_, _))
        ));
        assert!(hub.set_f64(KEY_DISCHARGE_METER, f64::INFINITY).await.is_err());
        assert_eq!(hub.get_f64(KEY_CHARGE_METER).await?, Some(1.5));

        Ok(())
    }

    #[tokio::test]
    async fn file_store_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state").join("zendure.json");
        let path = path.to_str().unwrap();

        {
            let store: Arc<dyn Store> = Arc::new(FileStore::open(path)?);
            let hub = DeviceStore::new(store, "hub");
            hub.set_f64(KEY_CHARGE_METER, 3.5).await?;
            hub.set_f64(KEY_DISCHARGE_METER, 2.75).await?;
            hub.set_string(KEY_IP, "192.168.1.20").await?;
        }

        let store: Arc<dyn Store> = Arc::new(FileStore::open(path)?);
        let hub = DeviceStore::new(store, "hub");
        assert_eq!(hub.get_f64(KEY_CHARGE_METER).await?, Some(3.5));
        assert_eq!(hub.get_f64(KEY_DISCHARGE_METER).await?, Some(2.75));
        assert_eq!(hub.get_string(KEY_IP).await?, Some("192.168.1.20".to_string()));

        let json: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(json["hub"]["chargeMeter"], 3.5);

        Ok(())
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("zendure.json");
        std::fs::write(&path, "{not json")?;

        assert!(FileStore::open(path.to_str().unwrap()).is_err());
        Ok(())
    }
}
