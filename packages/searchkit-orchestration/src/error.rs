use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Setup-phase result alias
pub type Result<T> = std::result::Result<T, SetupError>;

/// Error taxonomy shared by setup (fatal) and request (recoverable) failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    ManifestInvalid,
    DuplicateName,
    AvailabilityFailed,
    DependencyMissing,
    DependencyVersionMismatch,
    DatabaseCapabilityMissing,
    SchemaContractViolation,
    StageInputInvalid,
    StageRuntimeFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ManifestInvalid => "manifest-invalid",
            ErrorKind::DuplicateName => "duplicate-name",
            ErrorKind::AvailabilityFailed => "availability-failed",
            ErrorKind::DependencyMissing => "dependency-missing",
            ErrorKind::DependencyVersionMismatch => "dependency-version-mismatch",
            ErrorKind::DatabaseCapabilityMissing => "database-capability-missing",
            ErrorKind::SchemaContractViolation => "schema-contract-violation",
            ErrorKind::StageInputInvalid => "stage-input-invalid",
            ErrorKind::StageRuntimeFailure => "stage-runtime-failure",
        }
    }

    /// Setup-time kinds abort startup; the stage kinds are per request.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::StageInputInvalid | ErrorKind::StageRuntimeFailure
        )
    }

    /// Exit status a process wrapper should use when a setup error of this kind escapes
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::ManifestInvalid => 10,
            ErrorKind::DuplicateName => 11,
            ErrorKind::AvailabilityFailed => 12,
            ErrorKind::DependencyMissing => 13,
            ErrorKind::DependencyVersionMismatch => 14,
            ErrorKind::DatabaseCapabilityMissing => 15,
            ErrorKind::SchemaContractViolation => 16,
            ErrorKind::StageInputInvalid => 17,
            ErrorKind::StageRuntimeFailure => 18,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manifest-invalid" => Some(ErrorKind::ManifestInvalid),
            "duplicate-name" => Some(ErrorKind::DuplicateName),
            "availability-failed" => Some(ErrorKind::AvailabilityFailed),
            "dependency-missing" => Some(ErrorKind::DependencyMissing),
            "dependency-version-mismatch" => Some(ErrorKind::DependencyVersionMismatch),
            "database-capability-missing" => Some(ErrorKind::DatabaseCapabilityMissing),
            "schema-contract-violation" => Some(ErrorKind::SchemaContractViolation),
            "stage-input-invalid" => Some(ErrorKind::StageInputInvalid),
            "stage-runtime-failure" => Some(ErrorKind::StageRuntimeFailure),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fatal setup error: a kind tag plus human-readable diagnostic lines
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {}", lines.join("; "))]
pub struct SetupError {
    pub kind: ErrorKind,
    pub lines: Vec<String>,
}

impl SetupError {
    pub fn new(kind: ErrorKind, line: impl Into<String>) -> Self {
        Self {
            kind,
            lines: vec![line.into()],
        }
    }

    pub fn with_lines(kind: ErrorKind, lines: Vec<String>) -> Self {
        Self { kind, lines }
    }

    /// Append a remedy or location line
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    // Convenience constructors
    pub fn manifest_invalid(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::ManifestInvalid, line)
    }

    pub fn duplicate_name(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateName, line)
    }

    pub fn availability_failed(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::AvailabilityFailed, line)
    }

    pub fn dependency_missing(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyMissing, line)
    }

    pub fn version_mismatch(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyVersionMismatch, line)
    }

    pub fn database_missing(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseCapabilityMissing, line)
    }

    pub fn contract_violation(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaContractViolation, line)
    }

    pub fn init_failed(line: impl Into<String>) -> Self {
        Self::new(ErrorKind::StageRuntimeFailure, line)
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

/// Per-request failure returned by a stage (or by its adapter's input validation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl StageFailure {
    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StageInputInvalid,
            message: message.into(),
            error: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StageRuntimeFailure,
            message: message.into(),
            error: None,
        }
    }

    /// Attach structured error details
    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<anyhow::Error> for StageFailure {
    fn from(err: anyhow::Error) -> Self {
        StageFailure::runtime(format!("{:#}", err))
    }
}
