use crate::database::Database;
use crate::error::{Result, SetupError};
use crate::version::{Constraint, VersionResolver};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Database a manifest can run against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDependence {
    pub name: String,
    pub version: String,
}

/// Metadata attached to a stage, a pipeline or an extension
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_dependence: Option<String>,
    /// Extension name -> constraint
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependence: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_dependence: Vec<DatabaseDependence>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Require a core version range
    pub fn core(mut self, constraint: impl Into<String>) -> Self {
        self.core_dependence = Some(constraint.into());
        self
    }

    /// Require another extension
    pub fn depends_on(mut self, extension: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependence.insert(extension.into(), constraint.into());
        self
    }

    /// Accept a database (name + version constraint)
    pub fn database(mut self, name: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.database_dependence.push(DatabaseDependence {
            name: name.into(),
            version: constraint.into(),
        });
        self
    }

    /// Missing required fields
    pub fn structural_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("manifest name is empty".to_string());
        }
        if self.version.trim().is_empty() {
            issues.push(format!("manifest \"{}\" has an empty version", self.name));
        }
        issues
    }

    /// Version and constraint strings that do not parse
    pub fn constraint_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if VersionResolver::normalize(&self.version).is_none() {
            issues.push(format!(
                "\"{}\": version \"{}\" is not a valid version",
                self.name, self.version
            ));
        }
        if let Some(core) = &self.core_dependence {
            if Constraint::parse(core).is_none() {
                issues.push(format!(
                    "\"{}\": coreDependence \"{}\" is not a valid constraint",
                    self.name, core
                ));
            }
        }
        for (extension, constraint) in &self.dependence {
            if Constraint::parse(constraint).is_none() {
                issues.push(format!(
                    "\"{}\": dependence on \"{}\" has invalid constraint \"{}\"",
                    self.name, extension, constraint
                ));
            }
        }
        for db in &self.database_dependence {
            if Constraint::parse(&db.version).is_none() {
                issues.push(format!(
                    "\"{}\": databaseDependence \"{}\" has invalid constraint \"{}\"",
                    self.name, db.name, db.version
                ));
            }
        }
        issues
    }

    /// Core version check
    pub fn check_core(&self, subject: &str, core_version: &str) -> Result<()> {
        if let Some(constraint) = &self.core_dependence {
            if !VersionResolver::satisfies(core_version, constraint) {
                return Err(SetupError::version_mismatch(format!(
                    "{} requires core {}, running core is {}",
                    subject, constraint, core_version
                ))
                .line("upgrade the core or relax coreDependence"));
            }
        }
        Ok(())
    }

    /// Direct extension dependencies against `name -> version` of loaded extensions
    pub fn check_extensions(
        &self,
        subject: &str,
        extensions: &IndexMap<String, String>,
    ) -> Result<()> {
        for (name, constraint) in &self.dependence {
            let Some(version) = extensions.get(name) else {
                return Err(SetupError::dependency_missing(format!(
                    "{} depends on extension \"{}\" which is not registered",
                    subject, name
                ))
                .line(format!("add extension \"{}\" ({})", name, constraint)));
            };

            if !VersionResolver::satisfies(version, constraint) {
                return Err(SetupError::version_mismatch(format!(
                    "{} requires extension \"{}\" {}, found {}",
                    subject, name, constraint, version
                )));
            }
        }
        Ok(())
    }

    /// Active database against the declared database list
    pub fn check_database(&self, subject: &str, database: Option<&dyn Database>) -> Result<()> {
        if self.database_dependence.is_empty() {
            return Ok(());
        }

        let accepted = self
            .database_dependence
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let Some(database) = database else {
            return Err(SetupError::database_missing(format!(
                "{} requires a database ({}) but none is attached",
                subject, accepted
            )));
        };

        let active = database.manifest();
        let Some(dep) = self
            .database_dependence
            .iter()
            .find(|d| d.name == active.name)
        else {
            return Err(SetupError::database_missing(format!(
                "{} does not support database \"{}\"",
                subject, active.name
            ))
            .line(format!("supported databases: {}", accepted)));
        };

        if !VersionResolver::satisfies(&active.version, &dep.version) {
            return Err(SetupError::version_mismatch(format!(
                "{} requires database \"{}\" {}, found {}",
                subject, dep.name, dep.version, active.version
            )));
        }
        Ok(())
    }

    /// All three checks, in order: core, database, extensions
    pub fn check_dependence(&self, subject: &str, ctx: &DependencyContext) -> Result<()> {
        self.check_core(subject, &ctx.core_version)?;
        self.check_database(subject, ctx.database.as_deref())?;
        self.check_extensions(subject, &ctx.extensions)
    }
}

/// What dependency checks resolve against
#[derive(Clone, Default)]
pub struct DependencyContext {
    pub core_version: String,
    pub database: Option<Arc<dyn Database>>,
    /// Loaded extensions, `name -> version`
    pub extensions: IndexMap<String, String>,
}

impl DependencyContext {
    pub fn new(core_version: impl Into<String>) -> Self {
        Self {
            core_version: core_version.into(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: Option<Arc<dyn Database>>) -> Self {
        self.database = database;
        self
    }

    pub fn with_extensions(mut self, extensions: IndexMap<String, String>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl std::fmt::Debug for DependencyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyContext")
            .field("core_version", &self.core_version)
            .field("database", &self.database.as_ref().map(|d| d.manifest().name.clone()))
            .field("extensions", &self.extensions)
            .finish()
    }
}
