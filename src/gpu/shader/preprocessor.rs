//! `#include` expansion against a named module library

use crate::error::{SimError, SimResult};
use crate::gpu::shader::program::{ProgramLibrary, ProgramSource};
use crate::gpu::shader::Diagnostics;
use std::collections::HashSet;

/// Expands `#include <name>` and `#include "name"` lines.
///
/// Each directive is replaced by the named module's text, itself expanded.
/// A module pulled in a second time is skipped with a warning; a module that
/// includes itself, directly or through others, is an error.
pub struct Preprocessor<'a> {
    library: &'a ProgramLibrary,
}

impl<'a> Preprocessor<'a> {
    pub fn new(library: &'a ProgramLibrary) -> Self {
        Self { library }
    }

    /// Expand every include in `source`
    pub fn expand(&self, source: &ProgramSource, diagnostics: &mut Diagnostics) -> SimResult<String> {
        // Module names only; the program label is not a module
        let mut stack = Vec::new();
        let mut included = HashSet::new();
        let mut out = String::with_capacity(source.code.len());
        self.expand_into(&source.label, &source.code, &mut stack, &mut included, diagnostics, &mut out)?;
        Ok(out)
    }

    fn expand_into(
        &self,
        program: &str,
        code: &str,
        stack: &mut Vec<String>,
        included: &mut HashSet<String>,
        diagnostics: &mut Diagnostics,
        out: &mut String,
    ) -> SimResult<()> {
        for line in code.lines() {
            let Some(module) = parse_include_directive(line) else {
                out.push_str(line);
                out.push('\n');
                continue;
            };

            if stack.iter().any(|m| m == &module) {
                let mut chain = vec![program.to_string()];
                chain.extend(stack.iter().cloned());
                chain.push(module);
                return Err(SimError::IncludeCycle {
                    program: program.to_string(),
                    chain: chain.join(" -> "),
                });
            }

            if included.contains(&module) {
                diagnostics.warn(
                    program,
                    format!("module '{}' included more than once; later copies skipped", module),
                );
                continue;
            }

            let text = self
                .library
                .get(&module)
                .ok_or_else(|| SimError::UnresolvedInclude {
                    program: program.to_string(),
                    module: module.clone(),
                })?;

            included.insert(module.clone());
            stack.push(module);
            self.expand_into(program, text, stack, included, diagnostics, out)?;
            stack.pop();
        }
        Ok(())
    }
}

/// Parse an #include directive from a line
fn parse_include_directive(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    let name = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.strip_suffix('"')?
    } else {
        rest.strip_prefix('<')?.strip_suffix('>')?
    };
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
