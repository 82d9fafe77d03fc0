//! Typed resource table
//!
//! A table maps binding slots to named resource descriptors. It is the single
//! source of truth for both the host-side allocation and the WGSL binding
//! declarations that programs are checked against.

use crate::error::{malformed, SimError, SimResult};
use crate::gpu::resources::descriptor::ResourceDescriptor;
use std::collections::{BTreeMap, BTreeSet};

/// One declared slot
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub slot: u32,
    pub name: String,
    pub descriptor: ResourceDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTable {
    label: String,
    entries: BTreeMap<u32, ResourceEntry>,
}

impl ResourceTable {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Declare `name` at `slot`. Fails on slot or name collisions and on
    /// descriptors no device could allocate.
    pub fn insert(
        &mut self,
        slot: u32,
        name: impl Into<String>,
        descriptor: ResourceDescriptor,
    ) -> SimResult<()> {
        let name = name.into();
        if let Some(existing) = self.entries.get(&slot) {
            return Err(SimError::SlotCollision {
                slot,
                existing: existing.name.clone(),
                incoming: name,
            });
        }
        if let Some(other) = self.entries.values().find(|e| e.name == name) {
            return Err(malformed(
                &name,
                format!("name already used by slot {}", other.slot),
            ));
        }
        if !is_identifier(&name) {
            return Err(malformed(&name, "name is not a valid WGSL identifier"));
        }
        descriptor.validate(&name)?;

        self.entries.insert(
            slot,
            ResourceEntry {
                slot,
                name,
                descriptor,
            },
        );
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(
        mut self,
        slot: u32,
        name: impl Into<String>,
        descriptor: ResourceDescriptor,
    ) -> SimResult<Self> {
        self.insert(slot, name, descriptor)?;
        Ok(self)
    }

    pub fn get(&self, slot: u32) -> Option<&ResourceEntry> {
        self.entries.get(&slot)
    }

    /// Entry at `slot` or an [`SimError::UnknownSlot`]
    pub fn entry(&self, slot: u32) -> SimResult<&ResourceEntry> {
        self.entries.get(&slot).ok_or_else(|| SimError::UnknownSlot {
            table: self.label.clone(),
            slot,
        })
    }

    pub fn descriptor(&self, slot: u32) -> SimResult<&ResourceDescriptor> {
        self.entry(slot).map(|e| &e.descriptor)
    }

    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.entries.values().find(|e| e.name == name).map(|e| e.slot)
    }

    /// All entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values()
    }

    pub fn textures(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values().filter(|e| e.descriptor.is_texture())
    }

    pub fn buffers(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values().filter(|e| !e.descriptor.is_texture())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reuse the slots of a smaller shared table.
    ///
    /// Entries identical in both tables are kept once; any other overlap is a
    /// collision.
    pub fn merge(&mut self, shared: &ResourceTable) -> SimResult<()> {
        for entry in shared.entries() {
            match self.entries.get(&entry.slot) {
                Some(existing) if existing == entry => continue,
                Some(existing) => {
                    return Err(SimError::SlotCollision {
                        slot: entry.slot,
                        existing: existing.name.clone(),
                        incoming: entry.name.clone(),
                    })
                }
                None => self.insert(entry.slot, entry.name.clone(), entry.descriptor.clone())?,
            }
        }
        Ok(())
    }

    /// WGSL struct and binding declarations for this table at `group`.
    ///
    /// Programs should include this text rather than hand-writing bindings;
    /// the binder checks hand-written declarations against the same source.
    pub fn wgsl_bindings(&self, group: u32) -> String {
        let mut code = String::new();
        let mut emitted = BTreeSet::new();

        for entry in self.entries.values() {
            if let Some(decl) = entry.descriptor.wgsl_struct() {
                if emitted.insert(decl.clone()) {
                    code.push_str(&decl);
                    code.push('\n');
                }
            }
        }

        for entry in self.entries.values() {
            code.push_str(&format!(
                "@group({}) @binding({}) var{} {}: {};\n",
                group,
                entry.slot,
                entry.descriptor.wgsl_address_space(),
                entry.name,
                entry.descriptor.wgsl_type()
            ));
        }
        code
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::resources::descriptor::{StorageAccess, TextureDesc};
    use crate::gpu::resources::pixel_format::PixelFormat;

    fn grid(size: u32) -> ResourceDescriptor {
        ResourceDescriptor::storage_texture(
            TextureDesc::new(size, size, PixelFormat::R32_FLOAT),
            StorageAccess::ReadWrite,
        )
    }

    #[test]
    fn test_collision() {
        let mut table = ResourceTable::new("test");
        table.insert(0, "a", grid(4)).expect("first");
        let err = table.insert(0, "b", grid(4)).unwrap_err();
        assert!(matches!(err, SimError::SlotCollision { slot: 0, .. }));

        let err = table.insert(1, "a", grid(4)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_merge_reuses_shared_slots() {
        let shared = ResourceTable::new("shared").with(0, "params", grid(2)).expect("shared");

        let mut table = ResourceTable::new("big")
            .with(0, "params", grid(2))
            .and_then(|t| t.with(1, "field", grid(8)))
            .expect("big");
        table.merge(&shared).expect("identical entries merge");
        assert_eq!(table.len(), 2);

        let mut clash = ResourceTable::new("clash").with(0, "other", grid(2)).expect("clash");
        assert!(clash.merge(&shared).is_err());
    }

    #[test]
    fn test_bindings_text() {
        let table = ResourceTable::new("t")
            .with(1, "state", grid(4))
            .expect("table");
        let code = table.wgsl_bindings(0);
        assert_eq!(
            code,
            "@group(0) @binding(1) var state: texture_storage_2d<r32float, read_write>;\n"
        );
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut table = ResourceTable::new("t");
        assert!(table.insert(0, "1abc", grid(4)).is_err());
        assert!(table.insert(0, "has space", grid(4)).is_err());
    }
}
