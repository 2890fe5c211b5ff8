use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use mailbox_common::{CommandRecord, LimitsRecord};

const MEASUREMENTS_FILE: &str = "data.json";
const LIMITS_FILE: &str = "limits.json";
const COMMANDS_FILE: &str = "commands.json";

/// JSON files under one data directory. Each file is rewritten whole through
/// a temp file and a rename; the lock serializes read-modify-write cycles.
#[derive(Clone)]
pub struct AppStore {
    data_dir: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir: Arc::new(data_dir),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("MAILBOX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.mailbox"));
        Self::new(data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_ref()
    }

    pub async fn append_measurement(&self, item: Value) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.data_dir.join(MEASUREMENTS_FILE);
        let mut stored: Vec<Value> = load_json(&path).await.unwrap_or_default();
        stored.push(item);
        save_json(&path, &stored).await
    }

    pub async fn measurements(&self) -> Vec<Value> {
        let _guard = self.lock.lock().await;
        load_json(&self.data_dir.join(MEASUREMENTS_FILE))
            .await
            .unwrap_or_default()
    }

    pub async fn limits(&self, device_id: &str) -> Option<LimitsRecord> {
        let _guard = self.lock.lock().await;
        let mut all: BTreeMap<String, LimitsRecord> =
            load_json(&self.data_dir.join(LIMITS_FILE)).await?;
        all.remove(device_id)
    }

    pub async fn save_limits(&self, device_id: &str, record: &LimitsRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.data_dir.join(LIMITS_FILE);
        let mut all: BTreeMap<String, LimitsRecord> = load_json(&path).await.unwrap_or_default();
        all.insert(device_id.to_string(), record.clone());
        save_json(&path, &all).await
    }

    pub async fn command(&self, device_id: &str) -> Option<CommandRecord> {
        let _guard = self.lock.lock().await;
        let mut all: BTreeMap<String, CommandRecord> =
            load_json(&self.data_dir.join(COMMANDS_FILE)).await?;
        all.remove(device_id)
    }

    pub async fn save_command(&self, device_id: &str, record: &CommandRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.data_dir.join(COMMANDS_FILE);
        let mut all: BTreeMap<String, CommandRecord> = load_json(&path).await.unwrap_or_default();
        all.insert(device_id.to_string(), record.clone());
        save_json(&path, &all).await
    }
}

/// Missing, empty and unparsable files all read as `None`.
async fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("failed to read {}: {err}", path.display());
            return None;
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("failed to parse {}: {err}", path.display());
            None
        }
    }
}

async fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
