//! Crate-wide error handling
//!
//! Every failure surfaced by the engine is a [`SimError`]. Errors are grouped
//! into four categories so callers can decide their own recovery policy; the
//! engine itself never retries or silently recreates resources.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type SimResult<T> = Result<T, SimError>;

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Setup-time mistakes: slot collisions, malformed descriptors, missing features,
    /// unresolved program includes.
    Configuration,
    /// Program source failed to parse or validate.
    Compilation,
    /// Unsupported formats, zero-sized requests, bad initial data.
    Allocation,
    /// Device lost, out of memory, backend failures at run time.
    Device,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Compilation => "compilation",
            ErrorCategory::Allocation => "allocation",
            ErrorCategory::Device => "device",
        };
        f.write_str(name)
    }
}

/// Position inside a program source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    /// Rendered source excerpt pointing at the error.
    pub snippet: String,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    // Configuration
    #[error("Binding slot {slot} declared twice ('{existing}' and '{incoming}')")]
    SlotCollision {
        slot: u32,
        existing: String,
        incoming: String,
    },

    #[error("Binding slot {slot} is not declared in resource table '{table}'")]
    UnknownSlot { table: String, slot: u32 },

    #[error("Malformed descriptor for '{name}': {reason}")]
    MalformedDescriptor { name: String, reason: String },

    #[error("Missing device capability '{feature}' required by '{name}'")]
    MissingFeature { name: String, feature: String },

    #[error("Program '{program}' includes unknown module '{module}'")]
    UnresolvedInclude { program: String, module: String },

    #[error("Program '{program}' has an include cycle: {chain}")]
    IncludeCycle { program: String, chain: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Binding {binding} ('{name}') is not visible to the {stage} stage of '{program}'")]
    VisibilityMismatch {
        program: String,
        name: String,
        binding: u32,
        stage: String,
    },

    #[error("Program '{program}' declares @group({group}) @binding({binding}) which is not in the bound resource table")]
    UndeclaredBinding {
        program: String,
        group: u32,
        binding: u32,
    },

    #[error("Pass '{pass}' uses a program that was not created against its binding handles")]
    ForeignProgram { pass: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Compilation
    #[error("Program '{program}' failed to compile: {message}{}", .location.as_ref().map(|l| format!(" at {}", l)).unwrap_or_default())]
    Compilation {
        program: String,
        message: String,
        location: Option<SourceLocation>,
    },

    #[error("Entry point '{entry_point}' not found in program '{program}'")]
    MissingEntryPoint { program: String, entry_point: String },

    // Allocation
    #[error("Unsupported format for '{name}': {channels} channel(s) of {element}")]
    UnsupportedFormat {
        name: String,
        channels: u32,
        element: String,
    },

    #[error("Zero-sized allocation requested for '{name}'")]
    ZeroSized { name: String },

    #[error("Initial data for '{name}' does not match its descriptor: {reason}")]
    InitialDataShape { name: String, reason: String },

    // Device
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("GPU out of memory during '{operation}'")]
    OutOfMemory { operation: String },

    #[error("GPU operation '{operation}' failed: {error}")]
    DeviceOperation { operation: String, error: String },

    #[error("Unknown {kind} handle {id}")]
    StaleHandle { kind: &'static str, id: u32 },
}

impl SimError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimError::SlotCollision { .. }
            | SimError::UnknownSlot { .. }
            | SimError::MalformedDescriptor { .. }
            | SimError::MissingFeature { .. }
            | SimError::UnresolvedInclude { .. }
            | SimError::IncludeCycle { .. }
            | SimError::InvalidField { .. }
            | SimError::VisibilityMismatch { .. }
            | SimError::UndeclaredBinding { .. }
            | SimError::ForeignProgram { .. }
            | SimError::Config(_) => ErrorCategory::Configuration,
            SimError::Compilation { .. } | SimError::MissingEntryPoint { .. } => {
                ErrorCategory::Compilation
            }
            SimError::UnsupportedFormat { .. }
            | SimError::ZeroSized { .. }
            | SimError::InitialDataShape { .. } => ErrorCategory::Allocation,
            SimError::DeviceLost(_)
            | SimError::OutOfMemory { .. }
            | SimError::DeviceOperation { .. }
            | SimError::StaleHandle { .. } => ErrorCategory::Device,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

/// Create a device operation error
pub fn device_operation_error(operation: &str, error: impl fmt::Display) -> SimError {
    SimError::DeviceOperation {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a malformed descriptor error
pub fn malformed(name: &str, reason: impl Into<String>) -> SimError {
    SimError::MalformedDescriptor {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Create an initial data shape error
pub fn shape_error(name: &str, reason: impl Into<String>) -> SimError {
    SimError::InitialDataShape {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = SimError::SlotCollision {
            slot: 3,
            existing: "velocity".into(),
            incoming: "pressure".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("slot 3"));
        assert!(err.to_string().contains("pressure"));

        let err = SimError::ZeroSized { name: "grid".into() };
        assert_eq!(err.category(), ErrorCategory::Allocation);

        let err = device_operation_error("submit", "queue closed");
        assert_eq!(err.category(), ErrorCategory::Device);
    }

    #[test]
    fn test_compilation_message_includes_location() {
        let err = SimError::Compilation {
            program: "life".into(),
            message: "expected ';'".into(),
            location: Some(SourceLocation {
                line: 4,
                column: 12,
                snippet: String::new(),
            }),
        };
        assert_eq!(err.category(), ErrorCategory::Compilation);
        assert!(err.to_string().ends_with("at 4:12"));
    }
}
