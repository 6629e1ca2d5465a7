//! Backend kind to mount executor resolution.
//!
//! Executors are built lazily through a [`MounterFactory`] and cached for the
//! lifetime of the registry, so every lookup of the same kind yields the same
//! instance.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::FlexResult;
use crate::mounter::{Mounter, MounterFactory};
use crate::types::BackendKind;

pub struct MounterRegistry {
    factory: Arc<dyn MounterFactory>,
    mounters: DashMap<BackendKind, Arc<dyn Mounter>>,
}

impl MounterRegistry {
    pub fn new(factory: Arc<dyn MounterFactory>) -> Self {
        Self {
            factory,
            mounters: DashMap::new(),
        }
    }

    /// Executor for `kind`, creating it on first use.
    ///
    /// A failed creation is not cached; the next lookup tries again.
    pub fn get(&self, kind: BackendKind) -> FlexResult<Arc<dyn Mounter>> {
        if let Some(mounter) = self.mounters.get(&kind) {
            return Ok(Arc::clone(mounter.value()));
        }
        let entry = self.mounters.entry(kind).or_try_insert_with(|| {
            debug!(backend = %kind, "creating mounter");
            self.factory.create(kind)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Executor for a backend name as reported by the control plane.
    ///
    /// Unknown names fail with [`crate::FlexError::NoMounterForBackend`].
    pub fn get_for_backend(&self, backend: &str) -> FlexResult<Arc<dyn Mounter>> {
        self.get(backend.parse()?)
    }

    /// Number of executors created so far.
    pub fn len(&self) -> usize {
        self.mounters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounters.is_empty()
    }
}

impl std::fmt::Debug for MounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<BackendKind> = self.mounters.iter().map(|e| *e.key()).collect();
        f.debug_struct("MounterRegistry")
            .field("mounters", &kinds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::FlexError;
    use crate::types::VolumeConfig;

    struct NoopMounter;

    #[async_trait]
    impl Mounter for NoopMounter {
        async fn mount(&self, mountpoint: &Path, _: &VolumeConfig) -> FlexResult<PathBuf> {
            Ok(mountpoint.to_path_buf())
        }
        async fn unmount(&self, _: &VolumeConfig) -> FlexResult<()> {
            Ok(())
        }
        async fn action_after_detach(&self, _: &VolumeConfig) -> FlexResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        fail: bool,
    }

    impl MounterFactory for CountingFactory {
        fn create(&self, kind: BackendKind) -> FlexResult<Arc<dyn Mounter>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FlexError::NoMounterForBackend(kind.to_string()));
            }
            Ok(Arc::new(NoopMounter))
        }
    }

    #[test]
    fn same_kind_yields_same_instance() {
        let factory = Arc::new(CountingFactory::default());
        let registry = MounterRegistry::new(factory.clone());

        let first = registry.get(BackendKind::Scbe).unwrap();
        let second = registry.get_for_backend("scbe").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        registry.get(BackendKind::SoftlayerNfs).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_backend_is_rejected_without_factory_call() {
        let factory = Arc::new(CountingFactory::default());
        let registry = MounterRegistry::new(factory.clone());

        let err = registry.get_for_backend("ceph").err().unwrap();
        assert_eq!(err.to_string(), "mounter not found for backend: ceph");
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let factory = Arc::new(CountingFactory {
            fail: true,
            ..Default::default()
        });
        let registry = MounterRegistry::new(factory.clone());

        assert!(registry.get(BackendKind::SpectrumScale).is_err());
        assert!(registry.get(BackendKind::SpectrumScale).is_err());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }
}
