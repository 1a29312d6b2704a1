//! Database facade
//!
//! The engine never talks to a database itself. It only reads the facade's
//! manifest for dependency checks; stages reach the concrete client through
//! `as_any` downcasting.

use crate::manifest::Manifest;
use std::any::Any;

/// Opaque database capability handed to stages and extensions via the kit
pub trait Database: Send + Sync {
    fn manifest(&self) -> &Manifest;

    fn as_any(&self) -> &dyn Any;
}

/// Manifest-only facade, for hosts that declare a database but expose no client
#[derive(Debug, Clone)]
pub struct StaticDatabase {
    manifest: Manifest,
}

impl StaticDatabase {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            manifest: Manifest::new(name, version),
        }
    }
}

impl Database for StaticDatabase {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
