//! Persisted device registry
//!
//! Readers get cloned snapshots; a writer holds the lock only long enough to
//! mutate one record. Control calls to the same device are serialized by a
//! per-device lock taken before the network round trip.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::DeviceError;
use crate::{Error, Result};

use super::device::Device;

/// On-disk registry document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub devices: BTreeMap<String, Device>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegistryFile {
    /// Parse a registry document, filling in ids and default names
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the JSON is malformed
    pub fn from_json(text: &str) -> Result<Self> {
        let mut file: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid device registry: {e}")))?;
        for (id, device) in &mut file.devices {
            device.id.clone_from(id);
            if device.name.trim().is_empty() {
                device.name.clone_from(id);
            }
        }
        Ok(file)
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Devices keyed by id, optionally backed by a JSON file
#[derive(Debug)]
pub struct DeviceRegistry {
    path: Option<PathBuf>,
    state: RwLock<RegistryFile>,
    device_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    write_lock: Mutex<()>,
}

impl DeviceRegistry {
    /// Load from `path`; a missing file gives an empty registry
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::read_to_string(path) {
            Ok(text) => RegistryFile::from_json(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "device registry not found, starting empty");
                RegistryFile::default()
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        tracing::info!(
            path = %path.display(),
            devices = file.devices.len(),
            "device registry loaded"
        );

        Ok(Self::with_file(file, Some(path.to_path_buf())))
    }

    /// Registry that never touches disk
    #[must_use]
    pub fn in_memory(file: RegistryFile) -> Self {
        Self::with_file(file, None)
    }

    fn with_file(file: RegistryFile, path: Option<PathBuf>) -> Self {
        Self {
            path,
            state: RwLock::new(file),
            device_locks: StdMutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of one device record
    pub async fn get(&self, id: &str) -> Option<Device> {
        self.state.read().await.devices.get(id).cloned()
    }

    /// Consistent copy of every device, ordered by id
    pub async fn snapshot(&self) -> Vec<Device> {
        self.state.read().await.devices.values().cloned().collect()
    }

    /// Copy of the whole document
    pub async fn to_file(&self) -> RegistryFile {
        self.state.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.devices.is_empty()
    }

    /// Take the control lock for one registered device
    ///
    /// Held across the network call so concurrent commands to the same
    /// device apply in order. Different devices do not contend. Unknown ids
    /// get `None` and leave no lock behind.
    pub async fn lock_device(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        if !self.state.read().await.devices.contains_key(id) {
            return None;
        }
        let lock = {
            let mut locks = self
                .device_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        Some(lock.lock_owned().await)
    }

    /// Mutate one device and persist the result
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::NotFound` for unknown ids, or an IO error if
    /// persisting fails (the in-memory update is kept)
    pub async fn update<F>(&self, id: &str, apply: F) -> Result<Device>
    where
        F: FnOnce(&mut Device),
    {
        let _write = self.write_lock.lock().await;

        let (device, file) = {
            let mut state = self.state.write().await;
            let device = state
                .devices
                .get_mut(id)
                .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
            apply(device);
            let device = device.clone();
            (device, self.path.is_some().then(|| state.clone()))
        };

        if let Some(file) = file {
            self.write_file(file).await?;
        }

        tracing::debug!(device = %id, status = ?device.status, "device updated");
        Ok(device)
    }

    async fn write_file(&self, file: RegistryFile) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || write_atomic(&path, &file))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
    }
}

/// Replace `path` via a temp file in the same directory
fn write_atomic(path: &Path, file: &RegistryFile) -> Result<()> {
    let json = file.to_json()?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 2,
        "devices": {
            "bedroom_light": {
                "name": "Bedroom Light",
                "type": "light",
                "protocol": "http",
                "url": "http://192.168.1.100/api/light/bedroom",
                "headers": {"Authorization": "Bearer token"},
                "status": "off",
                "firmware": {"rev": "1.2"}
            },
            "living_room_light": {
                "type": "light",
                "protocol": "mqtt",
                "mqtt": {"host": "192.168.1.200", "topic": "home/living_room/light"}
            }
        }
    }"#;

    #[test]
    fn test_parse_fills_ids_and_names() {
        let file = RegistryFile::from_json(SAMPLE).unwrap();
        let living = &file.devices["living_room_light"];
        assert_eq!(living.id, "living_room_light");
        assert_eq!(living.name, "living_room_light");
        assert_eq!(living.mqtt.as_ref().unwrap().port, 1883);
        assert_eq!(file.extra["version"], 2);
    }

    #[test]
    fn test_malformed_is_config_error() {
        assert!(matches!(
            RegistryFile::from_json("{\"devices\": 3}"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RegistryFile::from_json(r#"{"devices": {"x": {"protocol": "zigbee"}}}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let file = RegistryFile::from_json(SAMPLE).unwrap();
        let again = RegistryFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_eq!(file, again);
    }

    #[tokio::test]
    async fn test_update_unknown_device() {
        let registry = DeviceRegistry::in_memory(RegistryFile::from_json(SAMPLE).unwrap());
        let err = registry.update("attic_fan", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::NotFound(id)) if id == "attic_fan"));
    }

    #[tokio::test]
    async fn test_locks_only_registered_devices() {
        let registry = DeviceRegistry::in_memory(RegistryFile::from_json(SAMPLE).unwrap());

        for i in 0..1000 {
            assert!(registry.lock_device(&format!("ghost_{i}")).await.is_none());
        }
        assert!(registry.device_locks.lock().unwrap().is_empty());

        drop(registry.lock_device("bedroom_light").await.unwrap());
        drop(registry.lock_device("bedroom_light").await.unwrap());
        assert_eq!(registry.device_locks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load(&dir.path().join("home_config.json")).unwrap();
        assert!(registry.is_empty().await);
    }
}
