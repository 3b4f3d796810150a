//! Capability grants
//!
//! The broker holds, per extension, the requested set from the manifest and
//! the granted set chosen by the user. Checks read the live granted set on
//! every call, so a revocation takes effect for the very next request.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use wt_core::error::{NotFound, WtError, WtResult};

use super::{Capability, ExtensionManifest};

/// Snapshot of an extension's permission state
#[derive(Debug, Clone)]
pub struct ExtensionGrant {
    pub extension_id: String,
    pub requested: HashSet<Capability>,
    pub granted: HashSet<Capability>,
    pub enabled: bool,
}

struct ExtensionEntry {
    manifest: ExtensionManifest,
    requested: HashSet<Capability>,
    granted: HashSet<Capability>,
    enabled: bool,
}

/// Process-wide permission broker for installed extensions
#[derive(Default)]
pub struct PermissionBroker {
    extensions: RwLock<HashMap<String, ExtensionEntry>>,
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension from its manifest.
    ///
    /// Re-registering (an upgrade) replaces the manifest and resets all
    /// grants; the user must enable the new version explicitly.
    pub fn register(&self, manifest: ExtensionManifest) -> WtResult<()> {
        manifest.validate()?;
        let requested: HashSet<Capability> = manifest.capabilities.iter().copied().collect();
        let id = manifest.id.clone();

        self.extensions.write().insert(
            id.clone(),
            ExtensionEntry {
                manifest,
                requested,
                granted: HashSet::new(),
                enabled: false,
            },
        );
        tracing::info!(extension = %id, "extension registered");
        Ok(())
    }

    pub fn unregister(&self, extension_id: &str) -> WtResult<()> {
        self.extensions
            .write()
            .remove(extension_id)
            .ok_or_else(|| NotFound::Extension(extension_id.to_string()))?;
        tracing::info!(extension = extension_id, "extension unregistered");
        Ok(())
    }

    /// Enable an extension with an explicit grant.
    ///
    /// The grant must be a subset of the requested set; a capability the
    /// manifest never declared cannot be granted.
    pub fn enable(&self, extension_id: &str, granted: &[Capability]) -> WtResult<()> {
        let mut extensions = self.extensions.write();
        let entry = extensions
            .get_mut(extension_id)
            .ok_or_else(|| NotFound::Extension(extension_id.to_string()))?;

        for capability in granted {
            if !entry.requested.contains(capability) {
                return Err(WtError::PermissionDenied(format!(
                    "capability '{}' was not requested by extension '{}'",
                    capability, extension_id
                )));
            }
            if capability.is_dangerous() {
                tracing::warn!(
                    extension = extension_id,
                    capability = %capability,
                    "dangerous capability granted"
                );
            }
        }

        entry.granted = granted.iter().copied().collect();
        entry.enabled = true;
        tracing::info!(extension = extension_id, "extension enabled");
        Ok(())
    }

    /// Disable an extension and clear its grants
    pub fn disable(&self, extension_id: &str) -> WtResult<()> {
        let mut extensions = self.extensions.write();
        let entry = extensions
            .get_mut(extension_id)
            .ok_or_else(|| NotFound::Extension(extension_id.to_string()))?;
        entry.enabled = false;
        entry.granted.clear();
        tracing::info!(extension = extension_id, "extension disabled");
        Ok(())
    }

    /// Revoke a single capability. Takes effect for the next check.
    pub fn revoke(&self, extension_id: &str, capability: Capability) -> WtResult<()> {
        let mut extensions = self.extensions.write();
        let entry = extensions
            .get_mut(extension_id)
            .ok_or_else(|| NotFound::Extension(extension_id.to_string()))?;
        entry.granted.remove(&capability);
        tracing::info!(
            extension = extension_id,
            capability = %capability,
            "capability revoked"
        );
        Ok(())
    }

    /// Check whether an extension currently holds a capability
    pub fn check(&self, extension_id: &str, capability: Capability) -> WtResult<()> {
        let extensions = self.extensions.read();
        let entry = extensions
            .get(extension_id)
            .ok_or_else(|| NotFound::Extension(extension_id.to_string()))?;

        if !entry.enabled {
            return Err(WtError::PermissionDenied(format!(
                "extension '{}' is not enabled",
                extension_id
            )));
        }
        if !entry.granted.contains(&capability) {
            return Err(WtError::PermissionDenied(format!(
                "capability '{}' not granted to extension '{}'",
                capability, extension_id
            )));
        }
        Ok(())
    }

    pub fn grant_of(&self, extension_id: &str) -> Option<ExtensionGrant> {
        self.extensions
            .read()
            .get(extension_id)
            .map(|entry| ExtensionGrant {
                extension_id: entry.manifest.id.clone(),
                requested: entry.requested.clone(),
                granted: entry.granted.clone(),
                enabled: entry.enabled,
            })
    }

    pub fn list(&self) -> Vec<ExtensionGrant> {
        self.extensions
            .read()
            .values()
            .map(|entry| ExtensionGrant {
                extension_id: entry.manifest.id.clone(),
                requested: entry.requested.clone(),
                granted: entry.granted.clone(),
                enabled: entry.enabled,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, capabilities: &[Capability]) -> ExtensionManifest {
        ExtensionManifest {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            entry_points: vec!["run".to_string()],
            capabilities: capabilities.to_vec(),
        }
    }

    #[test]
    fn test_disabled_extension_has_no_capabilities() {
        let broker = PermissionBroker::new();
        broker
            .register(manifest("ext", &[Capability::Clipboard]))
            .unwrap();

        let err = broker.check("ext", Capability::Clipboard).unwrap_err();
        assert!(matches!(err, WtError::PermissionDenied(_)));
    }

    #[test]
    fn test_grant_must_be_subset_of_requested() {
        let broker = PermissionBroker::new();
        broker
            .register(manifest("ext", &[Capability::Clipboard]))
            .unwrap();

        let err = broker
            .enable("ext", &[Capability::Clipboard, Capability::Shell])
            .unwrap_err();
        assert!(matches!(err, WtError::PermissionDenied(_)));
        // The failed enable must not have granted anything
        assert!(broker.check("ext", Capability::Clipboard).is_err());
    }

    #[test]
    fn test_enable_then_check() {
        let broker = PermissionBroker::new();
        broker
            .register(manifest("ext", &[Capability::Clipboard, Capability::Network]))
            .unwrap();
        broker.enable("ext", &[Capability::Clipboard]).unwrap();

        assert!(broker.check("ext", Capability::Clipboard).is_ok());
        // Requested but not granted
        assert!(broker.check("ext", Capability::Network).is_err());
    }

    #[test]
    fn test_revocation_is_immediate() {
        let broker = PermissionBroker::new();
        broker
            .register(manifest("ext", &[Capability::Network]))
            .unwrap();
        broker.enable("ext", &[Capability::Network]).unwrap();
        assert!(broker.check("ext", Capability::Network).is_ok());

        broker.revoke("ext", Capability::Network).unwrap();
        assert!(broker.check("ext", Capability::Network).is_err());
    }

    #[test]
    fn test_reregister_resets_grants() {
        let broker = PermissionBroker::new();
        broker
            .register(manifest("ext", &[Capability::Network]))
            .unwrap();
        broker.enable("ext", &[Capability::Network]).unwrap();

        broker
            .register(manifest("ext", &[Capability::Network, Capability::Shell]))
            .unwrap();
        let err = broker.check("ext", Capability::Network).unwrap_err();
        assert!(matches!(err, WtError::PermissionDenied(_)));
    }

    #[test]
    fn test_unknown_extension_is_not_found() {
        let broker = PermissionBroker::new();
        let err = broker.check("ghost", Capability::Network).unwrap_err();
        assert!(matches!(err, WtError::NotFound(NotFound::Extension(_))));
    }
}
