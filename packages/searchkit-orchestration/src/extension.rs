//! Extension registry
//!
//! Extensions are validated and loaded once at startup, strictly in
//! registration order:
//!
//! ```text
//! validate -> check_duplicate_extension_name -> check_manifest
//!          -> check_available -> check_dependence -> load
//! ```
//!
//! Every step except an unavailable extension in lenient mode is fatal.
//! There is no topological ordering: an extension whose init relies on a
//! later-registered one sees it uninitialized.

use crate::error::{ErrorKind, Result, SetupError};
use crate::kit::Kit;
use crate::manifest::Manifest;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host-supplied plugin
#[async_trait]
pub trait Extension: Send + Sync {
    fn manifest(&self) -> &Manifest;

    /// Runtime availability probe; `Err` carries the reason
    fn available(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn init(&self, _kit: &Kit) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ExtensionRegistry {
    core_version: String,
    strict_available: bool,
    registered: Vec<Arc<dyn Extension>>,
    /// Registered extensions that passed the availability probe
    available: Vec<Arc<dyn Extension>>,
    loaded: IndexMap<String, String>,
}

impl ExtensionRegistry {
    pub fn new(core_version: impl Into<String>, strict_available: bool) -> Self {
        Self {
            core_version: core_version.into(),
            strict_available,
            registered: Vec::new(),
            available: Vec::new(),
            loaded: IndexMap::new(),
        }
    }

    pub fn register(&mut self, extension: impl Extension + 'static) {
        self.registered.push(Arc::new(extension));
    }

    pub fn register_arc(&mut self, extension: Arc<dyn Extension>) {
        self.registered.push(extension);
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    fn subject(index: usize, manifest: &Manifest) -> String {
        if manifest.name.trim().is_empty() {
            format!("extension #{}", index)
        } else {
            format!("extension \"{}\"", manifest.name)
        }
    }

    /// Structural check of every manifest; all problems reported at once
    pub fn validate(&self) -> Result<()> {
        let lines: Vec<String> = self
            .registered
            .iter()
            .enumerate()
            .flat_map(|(i, ext)| {
                let manifest = ext.manifest();
                manifest
                    .structural_issues()
                    .into_iter()
                    .map(move |issue| format!("invalid {}: {}", Self::subject(i, manifest), issue))
            })
            .collect();

        if !lines.is_empty() {
            return Err(SetupError::with_lines(ErrorKind::ManifestInvalid, lines));
        }
        Ok(())
    }

    pub fn check_duplicate_extension_name(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for ext in &self.registered {
            let name = &ext.manifest().name;
            if !seen.insert(name.as_str()) {
                return Err(SetupError::duplicate_name(format!(
                    "extension \"{}\" is registered more than once",
                    name
                ))
                .line("remove the duplicate or rename one of the extensions"));
            }
        }
        Ok(())
    }

    /// Versions normalize and every declared constraint parses
    pub fn check_manifest(&self) -> Result<()> {
        let lines: Vec<String> = self
            .registered
            .iter()
            .enumerate()
            .flat_map(|(i, ext)| {
                let manifest = ext.manifest();
                manifest
                    .constraint_issues()
                    .into_iter()
                    .map(move |issue| format!("invalid {}: {}", Self::subject(i, manifest), issue))
            })
            .collect();

        if !lines.is_empty() {
            return Err(SetupError::with_lines(ErrorKind::ManifestInvalid, lines));
        }
        Ok(())
    }

    /// Probe every extension. Unavailable ones are fatal when strict, skipped otherwise.
    pub fn check_available(&mut self) -> Result<()> {
        let mut available = Vec::with_capacity(self.registered.len());
        for ext in &self.registered {
            let name = &ext.manifest().name;
            match ext.available() {
                Ok(()) => available.push(ext.clone()),
                Err(reason) if self.strict_available => {
                    return Err(SetupError::availability_failed(format!(
                        "extension \"{}\" is not available: {}",
                        name, reason
                    ))
                    .line("fix the extension's environment or disable strict availability"));
                }
                Err(reason) => {
                    warn!("Skipping extension \"{}\": {}", name, reason);
                }
            }
        }
        self.available = available;
        Ok(())
    }

    /// Core constraint and extension dependencies, resolved against available extensions
    pub fn check_dependence(&self) -> Result<()> {
        let versions: IndexMap<String, String> = self
            .available
            .iter()
            .map(|ext| {
                let m = ext.manifest();
                (m.name.clone(), m.version.clone())
            })
            .collect();

        for ext in &self.available {
            let manifest = ext.manifest();
            let subject = format!("extension \"{}\"", manifest.name);
            manifest.check_core(&subject, &self.core_version)?;
            manifest.check_extensions(&subject, &versions)?;
        }
        Ok(())
    }

    /// Run init hooks in registration order
    pub async fn load(&mut self, kit: &Kit) -> Result<()> {
        for ext in &self.available {
            let manifest = ext.manifest();
            ext.init(kit).await.map_err(|e| {
                SetupError::init_failed(format!(
                    "extension \"{}\" failed to initialize: {:#}",
                    manifest.name, e
                ))
            })?;
            debug!("Loaded extension \"{}\" {}", manifest.name, manifest.version);
            self.loaded
                .insert(manifest.name.clone(), manifest.version.clone());
        }
        Ok(())
    }

    /// The full fixed sequence
    pub async fn setup(&mut self, kit: &Kit) -> Result<()> {
        info!("Setting up {} extension(s)", self.registered.len());
        self.validate()?;
        self.check_duplicate_extension_name()?;
        self.check_manifest()?;
        self.check_available()?;
        self.check_dependence()?;
        self.load(kit).await?;
        info!("Loaded {} extension(s)", self.loaded.len());
        Ok(())
    }

    /// Loaded extensions, `name -> version`
    pub fn versions(&self) -> &IndexMap<String, String> {
        &self.loaded
    }
}
