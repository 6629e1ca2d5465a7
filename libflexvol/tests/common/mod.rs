//! In-memory collaborators for controller tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libflexvol::{
    BackendKind, FlexController, FlexError, FlexResult, Mounter, MounterFactory, PluginConfig,
    StorageClient, Volume, VolumeConfig,
};
use serde_json::Value;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeState {
    pub volumes: HashMap<String, Volume>,
    pub configs: HashMap<String, VolumeConfig>,
    pub activated: Vec<Vec<String>>,
    pub attach_calls: Vec<(String, String)>,
    pub detach_calls: Vec<(String, String)>,
    pub activate_error: Option<FlexError>,
    pub attach_error: Option<FlexError>,
    pub detach_error: Option<FlexError>,
}

#[derive(Default)]
pub struct FakeStorageClient {
    pub state: Mutex<FakeState>,
}

impl FakeStorageClient {
    pub fn add_volume(&self, name: &str, backend: &str, mountpoint: &str, config: Value) {
        let mut state = self.state.lock().unwrap();
        state.volumes.insert(
            name.to_owned(),
            Volume {
                name: name.to_owned(),
                backend: backend.to_owned(),
                mountpoint: mountpoint.to_owned(),
            },
        );
        let config = config.as_object().cloned().unwrap_or_default();
        state.configs.insert(name.to_owned(), config);
    }

    pub fn detach_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().detach_calls.clone()
    }

    pub fn attach_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().attach_calls.clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorageClient {
    async fn activate(&self, backends: &[String]) -> FlexResult<()> {
        let mut state = self.state.lock().unwrap();
        state.activated.push(backends.to_vec());
        match &state.activate_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn attach(&self, name: &str, host: &str) -> FlexResult<String> {
        let mut state = self.state.lock().unwrap();
        state.attach_calls.push((name.to_owned(), host.to_owned()));
        match &state.attach_error {
            Some(e) => Err(e.clone()),
            None => Ok(String::new()),
        }
    }

    async fn detach(&self, name: &str, host: &str) -> FlexResult<()> {
        let mut state = self.state.lock().unwrap();
        state.detach_calls.push((name.to_owned(), host.to_owned()));
        match &state.detach_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn get_volume(&self, name: &str) -> FlexResult<Volume> {
        let state = self.state.lock().unwrap();
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| FlexError::remote("GetVolume", "volume not found"))
    }

    async fn get_volume_config(&self, name: &str) -> FlexResult<VolumeConfig> {
        let state = self.state.lock().unwrap();
        state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| FlexError::remote("GetVolumeConfig", "volume not found"))
    }

    async fn list_volumes(&self) -> FlexResult<Vec<Volume>> {
        let state = self.state.lock().unwrap();
        Ok(state.volumes.values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Mount executors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MounterCall {
    Mount(PathBuf),
    Unmount,
    AfterDetach,
}

/// Records every call; optionally fails, slows unmount down and tracks overlap.
#[derive(Default)]
pub struct RecordingMounter {
    pub calls: Mutex<Vec<MounterCall>>,
    /// Returned from `mount` instead of the requested mountpoint.
    pub mount_result: Option<PathBuf>,
    pub mount_error: Option<FlexError>,
    pub unmount_error: Option<FlexError>,
    pub unmount_delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingMounter {
    pub fn calls(&self) -> Vec<MounterCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mounter for RecordingMounter {
    async fn mount(&self, mountpoint: &Path, _config: &VolumeConfig) -> FlexResult<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push(MounterCall::Mount(mountpoint.to_path_buf()));
        if let Some(e) = &self.mount_error {
            return Err(e.clone());
        }
        Ok(self
            .mount_result
            .clone()
            .unwrap_or_else(|| mountpoint.to_path_buf()))
    }

    async fn unmount(&self, _config: &VolumeConfig) -> FlexResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.unmount_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(MounterCall::Unmount);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.unmount_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn action_after_detach(&self, _config: &VolumeConfig) -> FlexResult<()> {
        self.calls.lock().unwrap().push(MounterCall::AfterDetach);
        Ok(())
    }
}

/// Hands out one [`RecordingMounter`] per creation and remembers them all.
#[derive(Default)]
pub struct RecordingFactory {
    pub mount_result: Option<PathBuf>,
    pub mount_error: Option<FlexError>,
    pub unmount_error: Option<FlexError>,
    pub unmount_delay: Option<Duration>,
    pub created: Mutex<Vec<(BackendKind, Arc<RecordingMounter>)>>,
}

impl RecordingFactory {
    pub fn created(&self) -> Vec<(BackendKind, Arc<RecordingMounter>)> {
        self.created.lock().unwrap().clone()
    }

    /// The only executor created for `kind`.
    pub fn mounter(&self, kind: BackendKind) -> Arc<RecordingMounter> {
        let created = self.created();
        let mut matching = created.iter().filter(|(k, _)| *k == kind);
        let (_, mounter) = matching.next().expect("no mounter created");
        assert!(matching.next().is_none(), "more than one {kind} mounter");
        Arc::clone(mounter)
    }
}

impl MounterFactory for RecordingFactory {
    fn create(&self, kind: BackendKind) -> FlexResult<Arc<dyn Mounter>> {
        let mounter = Arc::new(RecordingMounter {
            mount_result: self.mount_result.clone(),
            mount_error: self.mount_error.clone(),
            unmount_error: self.unmount_error.clone(),
            unmount_delay: self.unmount_delay,
            ..Default::default()
        });
        self.created
            .lock()
            .unwrap()
            .push((kind, Arc::clone(&mounter)));
        Ok(mounter)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub tmp: TempDir,
    pub client: Arc<FakeStorageClient>,
    pub factory: Arc<RecordingFactory>,
    pub controller: FlexController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_factory(RecordingFactory::default())
    }

    pub fn with_factory(factory: RecordingFactory) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeStorageClient::default());
        let factory = Arc::new(factory);
        let controller = FlexController::with_parts(
            client.clone(),
            factory.clone(),
            &test_config(tmp.path()),
        )
        .unwrap();
        Self {
            tmp,
            client,
            factory,
            controller,
        }
    }

    /// Where a block volume with `wwn` is mounted on this test node.
    pub fn block_mountpoint(&self, wwn: &str) -> PathBuf {
        self.tmp.path().join("ubiquity").join(wwn)
    }

    /// A kubelet-style pod volume path ending in `name`.
    pub fn pod_path(&self, name: &str) -> PathBuf {
        self.tmp
            .path()
            .join("pods/x/volumes/ibm~ubiquity-k8s-flex")
            .join(name)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.tmp.path().join("unmount.lock")
    }
}

pub fn test_config(root: &Path) -> PluginConfig {
    PluginConfig {
        backends: vec!["scbe".to_owned(), "spectrum-scale".to_owned()],
        block_mount_template: format!("{}/ubiquity/{{wwn}}", root.display()),
        unmount_lock_path: root.join("unmount.lock"),
        unmount_retry_interval_ms: 20,
        ..Default::default()
    }
}

pub fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}
