//! WGSL validation with source locations
//!
//! Parses and validates programs with naga before they reach a device, so
//! compile errors carry a line/column and an excerpt instead of surfacing as
//! an opaque backend failure.

use crate::error::{SimError, SimResult, SourceLocation};
use crate::gpu::shader::Diagnostics;

/// Shader validator with enhanced error reporting
#[derive(Debug, Default)]
pub struct ShaderValidator {
    validated: usize,
}

impl ShaderValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of programs that passed validation
    pub fn validated_count(&self) -> usize {
        self.validated
    }

    /// Parse and validate `source`, returning the naga module on success
    pub fn validate_wgsl(
        &mut self,
        name: &str,
        source: &str,
        diagnostics: &mut Diagnostics,
    ) -> SimResult<naga::Module> {
        let module = naga::front::wgsl::parse_str(source).map_err(|error| {
            let location = error.location(source).map(|loc| {
                let line = loc.line_number;
                let column = loc.line_position;
                SourceLocation {
                    line,
                    column,
                    snippet: error_snippet(source, line, column),
                }
            });
            SimError::Compilation {
                program: name.to_string(),
                message: error.message().to_string(),
                location,
            }
        })?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(error) = validator.validate(&module) {
            let location = error
                .location(source)
                .map(|loc| SourceLocation {
                    line: loc.line_number,
                    column: loc.line_position,
                    snippet: error_snippet(source, loc.line_number, loc.line_position),
                });
            return Err(SimError::Compilation {
                program: name.to_string(),
                message: error.emit_to_string(source).trim().to_string(),
                location,
            });
        }

        if module.entry_points.is_empty() {
            diagnostics.warn(name, "program declares no entry points");
        }

        self.validated += 1;
        Ok(module)
    }
}

/// Create error snippet with context
fn error_snippet(source: &str, line: u32, column: u32) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut snippet = String::new();

    // Two lines either side
    let start = line.saturating_sub(3) as usize;
    let end = (line + 2).min(lines.len() as u32) as usize;

    for i in start..end {
        let line_num = i + 1;
        let text = lines.get(i).copied().unwrap_or("");
        snippet.push_str(&format!("{:>4} | {}\n", line_num, text));
        if line_num == line as usize {
            snippet.push_str(&format!(
                "     | {}^\n",
                " ".repeat(column.saturating_sub(1) as usize)
            ));
        }
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_program() {
        let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + 1u;
    }
}
"#;
        let mut validator = ShaderValidator::new();
        let mut diagnostics = Diagnostics::new();
        let module = validator
            .validate_wgsl("inc", source, &mut diagnostics)
            .expect("valid");
        assert_eq!(module.entry_points.len(), 1);
        assert_eq!(validator.validated_count(), 1);
    }

    #[test]
    fn test_parse_error_has_location() {
        let source = "fn main() {\n    let x = 1\n}\n";
        let mut validator = ShaderValidator::new();
        let err = validator
            .validate_wgsl("broken", source, &mut Diagnostics::new())
            .unwrap_err();
        match err {
            SimError::Compilation { location, .. } => {
                let location = location.expect("location");
                assert!(location.line >= 2);
                assert!(!location.snippet.is_empty());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_entry_points_warn() {
        let mut diagnostics = Diagnostics::new();
        ShaderValidator::new()
            .validate_wgsl("lib", "fn helper() -> f32 { return 1.0; }", &mut diagnostics)
            .expect("valid");
        assert!(diagnostics.has_warnings());
    }
}
