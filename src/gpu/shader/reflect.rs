//! Lightweight reflection of WGSL program text
//!
//! Extracts resource declarations and compute entry points with regular
//! expressions. This runs on every backend, including the software one, so
//! binding checks do not depend on a real shader compiler.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BINDING: Regex = Regex::new(
        r"@group\(\s*(\d+)\s*\)\s*@binding\(\s*(\d+)\s*\)\s*var\s*(<[^>]*>)?\s*(\w+)\s*:\s*([^;]+);"
    )
    .expect("binding regex");
    static ref BINDING_SWAPPED: Regex = Regex::new(
        r"@binding\(\s*(\d+)\s*\)\s*@group\(\s*(\d+)\s*\)\s*var\s*(<[^>]*>)?\s*(\w+)\s*:\s*([^;]+);"
    )
    .expect("binding regex");
    static ref ENTRY: Regex =
        Regex::new(r"((?:@\w+(?:\s*\([^)]*\))?\s*)+)fn\s+(\w+)").expect("entry regex");
    static ref WORKGROUP: Regex =
        Regex::new(r"@workgroup_size\s*\(([^)]*)\)").expect("workgroup regex");
}

/// A `@group(g) @binding(b) var<..> name: type;` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub group: u32,
    pub binding: u32,
    pub name: String,
    /// `<uniform>`, `<storage, read_write>` or empty for handles
    pub address_space: String,
    pub ty: String,
}

impl ReflectedBinding {
    /// Declared type and address space with whitespace removed, for comparison
    pub fn signature(&self) -> String {
        normalize(&format!("{}{}", self.address_space, self.ty))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedEntryPoint {
    pub name: String,
    /// Literal workgroup size, when given as integers
    pub workgroup_size: Option<[u32; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReflection {
    pub bindings: Vec<ReflectedBinding>,
    pub entry_points: Vec<ReflectedEntryPoint>,
}

impl ProgramReflection {
    pub fn from_wgsl(source: &str) -> Self {
        let code = strip_comments(source);
        let mut bindings: Vec<ReflectedBinding> = Vec::new();

        for caps in BINDING.captures_iter(&code) {
            bindings.push(binding_from(&caps, 1, 2));
        }
        for caps in BINDING_SWAPPED.captures_iter(&code) {
            bindings.push(binding_from(&caps, 2, 1));
        }
        bindings.sort_by_key(|b| (b.group, b.binding));

        let entry_points = ENTRY
            .captures_iter(&code)
            .filter(|caps| caps[1].contains("@compute"))
            .map(|caps| ReflectedEntryPoint {
                name: caps[2].to_string(),
                workgroup_size: WORKGROUP
                    .captures(&caps[1])
                    .and_then(|wg| parse_workgroup_size(&wg[1])),
            })
            .collect();

        Self {
            bindings,
            entry_points,
        }
    }

    pub fn entry_point(&self, name: &str) -> Option<&ReflectedEntryPoint> {
        self.entry_points.iter().find(|e| e.name == name)
    }

    pub fn bindings_in_group(&self, group: u32) -> impl Iterator<Item = &ReflectedBinding> {
        self.bindings.iter().filter(move |b| b.group == group)
    }
}

fn binding_from(caps: &regex::Captures<'_>, group_idx: usize, binding_idx: usize) -> ReflectedBinding {
    ReflectedBinding {
        group: caps[group_idx].parse().unwrap_or(u32::MAX),
        binding: caps[binding_idx].parse().unwrap_or(u32::MAX),
        address_space: caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        name: caps[4].to_string(),
        ty: caps[5].trim().to_string(),
    }
}

fn parse_workgroup_size(args: &str) -> Option<[u32; 3]> {
    let mut size = [1u32; 3];
    let parts: Vec<&str> = args.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for (i, part) in parts.iter().enumerate() {
        size[i] = part.trim_end_matches(['u', 'i']).parse().ok()?;
    }
    Some(size)
}

/// Remove `//` line comments and `/* */` block comments
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut depth = 0usize;
    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('/', Some('*')) => {
                chars.next();
                depth += 1;
            }
            ('*', Some('/')) if depth > 0 => {
                chars.next();
                depth -= 1;
            }
            ('/', Some('/')) if depth == 0 => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ if depth > 0 => {
                if c == '\n' {
                    out.push('\n');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
struct Params { phase: u32, count: u32 }
@group(0) @binding(0) var<storage, read_write> links: array<Link>;
@group(0) @binding(1) var<uniform> params: Params;
// @group(0) @binding(7) var ignored: texture_2d<f32>;
@binding(2) @group(1) var grid: texture_storage_2d<r32float, read_write>;

@compute @workgroup_size(8, 8)
fn step(@builtin(global_invocation_id) id: vec3<u32>) {}

@workgroup_size(64u) @compute
fn relax(@builtin(global_invocation_id) id: vec3<u32>) {}

fn helper() {}

@compute @workgroup_size(WG)
fn dynamic_size() {}
"#;

    #[test]
    fn test_bindings() {
        let reflection = ProgramReflection::from_wgsl(SOURCE);
        assert_eq!(reflection.bindings.len(), 3);

        let links = &reflection.bindings[0];
        assert_eq!((links.group, links.binding), (0, 0));
        assert_eq!(links.name, "links");
        assert_eq!(links.signature(), "<storage,read_write>array<Link>");

        let grid = &reflection.bindings[2];
        assert_eq!((grid.group, grid.binding), (1, 2));
        assert_eq!(grid.ty, "texture_storage_2d<r32float, read_write>");
        assert!(grid.address_space.is_empty());
    }

    #[test]
    fn test_entry_points() {
        let reflection = ProgramReflection::from_wgsl(SOURCE);
        let names: Vec<&str> = reflection.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["step", "relax", "dynamic_size"]);
        assert_eq!(
            reflection.entry_point("step").and_then(|e| e.workgroup_size),
            Some([8, 8, 1])
        );
        assert_eq!(
            reflection.entry_point("relax").and_then(|e| e.workgroup_size),
            Some([64, 1, 1])
        );
        assert_eq!(reflection.entry_point("dynamic_size").and_then(|e| e.workgroup_size), None);
        assert!(reflection.entry_point("helper").is_none());
    }
}
