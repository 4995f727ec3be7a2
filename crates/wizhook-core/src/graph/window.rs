//! UI window tree search.

use std::collections::HashSet;

use crate::error::Result;
use crate::graph::{EntityRecord, GraphReader, ListShape};
use crate::memory::layouts;
use crate::process::ProcessMemory;

/// Visible flag in the window's `flags` field.
pub const WINDOW_VISIBLE: u32 = 1;

pub fn is_visible(window: &EntityRecord) -> bool {
    window
        .u32("flags")
        .is_ok_and(|flags| flags & WINDOW_VISIBLE != 0)
}

impl<'a, P: ProcessMemory> GraphReader<'a, P> {
    pub fn window(&self, address: u64) -> Result<EntityRecord> {
        self.record(address, layouts::WINDOW)
    }

    /// Direct children, in the order the client stores them.
    pub fn window_children(&self, window: u64) -> Result<Vec<u64>> {
        let offset = self.layouts().get(layouts::WINDOW)?.field("children")?.offset;
        self.walk(window, ListShape::SharedVector { offset }).collect()
    }

    /// Every descendant of `root` (excluding `root`) accepted by `predicate`,
    /// in depth-first pre-order.
    pub fn windows_with_predicate<F>(&self, root: u64, predicate: F) -> Result<Vec<EntityRecord>>
    where
        F: Fn(&EntityRecord) -> bool,
    {
        let mut found = Vec::new();
        let mut visited = HashSet::from([root]);
        let mut hops = 0usize;

        let mut stack: Vec<u64> = self.window_children(root)?;
        stack.reverse();
        while let Some(address) = stack.pop() {
            if !visited.insert(address) {
                return Err(self.abort(address, hops, "window tree cycle detected"));
            }
            hops += 1;
            if hops > self.max_hops() {
                return Err(self.abort(address, hops, "hop bound exceeded"));
            }

            let window = self.window(address)?;
            if predicate(&window) {
                found.push(window);
            }
            let mut children = self.window_children(address)?;
            children.reverse();
            stack.extend(children);
        }
        Ok(found)
    }

    pub fn windows_with_name(&self, root: u64, name: &str) -> Result<Vec<EntityRecord>> {
        self.windows_with_predicate(root, |w| w.text("name").is_ok_and(|n| n == name))
    }

    /// First direct child called `name`.
    pub fn child_by_name(&self, window: u64, name: &str) -> Result<Option<EntityRecord>> {
        for child in self.window_children(window)? {
            let record = self.window(child)?;
            if record.text("name").is_ok_and(|n| n == name) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Ancestors of `window`, nearest first.
    pub fn parents(&self, window: u64) -> Result<Vec<u64>> {
        let offset = self.layouts().get(layouts::WINDOW)?.field("parent")?.offset;
        let mut parents = Vec::new();
        let mut visited = HashSet::from([window]);
        let mut current = window;
        while let Some(parent) = self.memory().read_pointer(current + offset)? {
            if !visited.insert(parent) {
                return Err(self.abort(parent, parents.len(), "window parent cycle detected"));
            }
            if parents.len() >= self.max_hops() {
                return Err(self.abort(parent, parents.len(), "hop bound exceeded"));
            }
            parents.push(parent);
            current = parent;
        }
        Ok(parents)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Error;
    use crate::memory::{MemoryAccessor, builtin_layouts};
    use crate::process::{MockMemoryBuilder, MockProcess};

    const ROOT: u64 = 0x10000;
    const ALPHA: u64 = 0x11000;
    const BRAVO: u64 = 0x12000;
    const NESTED: u64 = 0x13000;

    fn window(
        builder: MockMemoryBuilder,
        address: u64,
        name: &str,
        parent: u64,
        flags: u32,
        children: &[u64],
    ) -> MockMemoryBuilder {
        let array = address + 0x800;
        let mut builder = builder
            .region(address, 0x900)
            .write_utf8(address + 80, name)
            .write_u64(address + 96, name.len() as u64)
            .write_u64(address + 104, 15)
            .write_u64(address + 136, parent)
            .write_u32(address + 156, flags);
        if !children.is_empty() {
            builder = builder
                .write_u64(address + 112, array)
                .write_u64(address + 120, array + 16 * children.len() as u64);
            for (i, &child) in children.iter().enumerate() {
                builder = builder.write_u64(array + 16 * i as u64, child);
            }
        }
        builder
    }

    fn tree(nested_children: &[u64]) -> MemoryAccessor<MockProcess> {
        let b = MockMemoryBuilder::new();
        let b = window(b, ROOT, "WorldView", 0, 1, &[ALPHA, BRAVO]);
        let b = window(b, ALPHA, "Alpha", ROOT, 1, &[NESTED]);
        let b = window(b, BRAVO, "Bravo", ROOT, 0, &[]);
        let b = window(b, NESTED, "Bravo", ALPHA, 1, nested_children);
        MemoryAccessor::new(Arc::new(b.build()))
    }

    #[test]
    fn test_windows_with_name_depth_first() {
        let memory = tree(&[]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts);

        let found = reader.windows_with_name(ROOT, "Bravo").unwrap();
        assert_eq!(
            found.iter().map(|w| w.address).collect::<Vec<_>>(),
            vec![NESTED, BRAVO]
        );
        assert!(reader.windows_with_name(ROOT, "WorldView").unwrap().is_empty());
    }

    #[test]
    fn test_visible_predicate() {
        let memory = tree(&[]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts);

        let visible = reader.windows_with_predicate(ROOT, is_visible).unwrap();
        assert_eq!(
            visible.iter().map(|w| w.address).collect::<Vec<_>>(),
            vec![ALPHA, NESTED]
        );
    }

    #[test]
    fn test_child_by_name() {
        let memory = tree(&[]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts);

        let child = reader.child_by_name(ROOT, "Bravo").unwrap().unwrap();
        assert_eq!(child.address, BRAVO);
        assert!(reader.child_by_name(ROOT, "Missing").unwrap().is_none());
    }

    #[test]
    fn test_parents() {
        let memory = tree(&[]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts);
        assert_eq!(reader.parents(NESTED).unwrap(), vec![ALPHA, ROOT]);
        assert!(reader.parents(ROOT).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_aborts() {
        let memory = tree(&[ALPHA]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts);
        assert!(matches!(
            reader.windows_with_name(ROOT, "Bravo"),
            Err(Error::TraversalAborted { address: ALPHA, .. })
        ));
    }

    #[test]
    fn test_hop_bound() {
        let memory = tree(&[]);
        let layouts = builtin_layouts();
        let reader = GraphReader::new(&memory, &layouts).with_max_hops(2);
        assert!(matches!(
            reader.windows_with_name(ROOT, "Bravo"),
            Err(Error::TraversalAborted { .. })
        ));
    }
}
