//! Program sources, include expansion, validation and reflection

pub mod preprocessor;
pub mod program;
pub mod reflect;
pub mod validator;

pub use preprocessor::Preprocessor;
pub use program::{compile_program, CompiledProgram, ProgramLibrary, ProgramSource};
pub use reflect::{ProgramReflection, ReflectedBinding, ReflectedEntryPoint};
pub use validator::ShaderValidator;

use crate::error::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Info,
}

/// A non-fatal message produced while preparing a program
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub program: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// Collected diagnostics. Warnings are also logged as they arrive.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, program: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[Shader] {}: {}", program, message);
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            program: program.to_string(),
            message,
            location: None,
        });
    }

    pub fn info(&mut self, program: &str, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[Shader] {}: {}", program, message);
        self.entries.push(Diagnostic {
            severity: Severity::Info,
            program: program.to_string(),
            message,
            location: None,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}
