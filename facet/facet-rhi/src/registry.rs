//! Device factory: maps backend identifiers to constructor functions.
//!
//! The registry is an ordinary value owned by the application's start-up code; there is no
//! process-wide table. Register backends once, then create the device.

use std::sync::Arc;

use crate::{Device, Result, RhiError, SurfaceTarget};

/// Environment variable selecting the backend in [`DeviceRegistry::create_from_env`].
pub const BACKEND_ENV: &str = "FACET_BACKEND";
/// Environment variable enabling validation (`FACET_VALIDATION=1`).
pub const VALIDATION_ENV: &str = "FACET_VALIDATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    None,
    LowPower,
    #[default]
    HighPerformance,
}

/// Parameters for creating a device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub label: Option<&'static str>,
    pub power_preference: PowerPreference,
    /// Prefer a software/fallback adapter over hardware.
    pub force_fallback_adapter: bool,
    /// Enable backend validation (wgpu debug flags, extra bindless residency checks).
    pub validation: bool,
    /// Presentation target; None for a headless device without a surface.
    pub surface: Option<SurfaceTarget>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            power_preference: PowerPreference::default(),
            force_fallback_adapter: false,
            validation: cfg!(feature = "validation"),
            surface: None,
        }
    }
}

impl DeviceDescriptor {
    /// Defaults, with validation also switched on by `FACET_VALIDATION=1`.
    pub fn from_env() -> Self {
        let mut desc = Self::default();
        if std::env::var(VALIDATION_ENV).map(|v| v == "1").unwrap_or(false) {
            desc.validation = true;
        }
        desc
    }

    pub fn with_surface(mut self, surface: SurfaceTarget) -> Self {
        self.surface = Some(surface);
        self
    }
}

/// Constructor registered for one backend.
pub type DeviceConstructor = fn(&DeviceDescriptor) -> Result<Arc<dyn Device>>;

/// Ordered map from backend identifier to constructor. The first entry is the default backend.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    entries: Vec<(String, DeviceConstructor)>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("backends", &self.backends().collect::<Vec<_>>())
            .finish()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every backend compiled into this crate: "webgpu" (feature `webgpu`) and
    /// "software" (bindless backend on the software driver).
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "webgpu")]
        registry.register("webgpu", crate::webgpu::create_device);
        registry.register("software", crate::bindless::create_software_device);
        registry
    }

    /// Register `constructor` under `id`, returning the constructor it replaced.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        constructor: DeviceConstructor,
    ) -> Option<DeviceConstructor> {
        let id = id.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            return Some(std::mem::replace(&mut slot.1, constructor));
        }
        self.entries.push((id, constructor));
        None
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == id)
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn create(&self, id: &str, desc: &DeviceDescriptor) -> Result<Arc<dyn Device>> {
        let (_, constructor) = self
            .entries
            .iter()
            .find(|(k, _)| k == id)
            .ok_or_else(|| RhiError::UnknownBackend(id.to_string()))?;
        log::info!("creating '{}' device", id);
        constructor(desc)
    }

    /// Create the backend named by `FACET_BACKEND`, or the first registered one.
    pub fn create_from_env(&self, desc: &DeviceDescriptor) -> Result<Arc<dyn Device>> {
        match std::env::var(BACKEND_ENV) {
            Ok(id) if !id.is_empty() => self.create(&id, desc),
            _ => {
                let (id, _) = self
                    .entries
                    .first()
                    .ok_or_else(|| RhiError::UnknownBackend("<empty registry>".to_string()))?;
                self.create(id, desc)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(_: &DeviceDescriptor) -> Result<Arc<dyn Device>> {
        Err(RhiError::AdapterUnavailable("test".into()))
    }

    #[test]
    fn unknown_backend_is_reported() {
        let registry = DeviceRegistry::new();
        let err = registry
            .create("metal", &DeviceDescriptor::default())
            .unwrap_err();
        assert_eq!(err, RhiError::UnknownBackend("metal".into()));
    }

    #[test]
    fn register_replaces_and_keeps_order() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.register("a", failing).is_none());
        assert!(registry.register("b", failing).is_none());
        assert!(registry.register("a", failing).is_some());
        assert_eq!(registry.backends().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(registry.contains("b"));
        assert!(matches!(
            registry.create("a", &DeviceDescriptor::default()),
            Err(RhiError::AdapterUnavailable(_))
        ));
    }

    #[test]
    fn default_backends_include_software() {
        let registry = DeviceRegistry::with_default_backends();
        assert!(registry.contains("software"));
        let device = registry
            .create("software", &DeviceDescriptor::default())
            .expect("software device");
        assert_eq!(device.backend(), crate::Backend::Bindless);
        device.dispose();
    }
}
