use crate::config::traversal::{MAX_HOPS, MAX_LIST_ELEMENTS};
use crate::error::{Error, Result};
use crate::graph::{EntityFilter, EntityRecord, ListShape, ListWalk};
use crate::memory::{LayoutSet, MemoryAccessor, StructLayout};
use crate::process::ProcessMemory;

/// Where a list lives relative to a root and how its elements are decoded.
#[derive(Debug, Clone)]
pub struct TraversalSpec {
    /// Pointer offsets followed from the root before reaching the list owner.
    pub chain: Vec<u64>,
    pub list: ListShape,
    pub layout: String,
    pub filters: Vec<EntityFilter>,
}

impl TraversalSpec {
    pub fn new(list: ListShape, layout: &str) -> Self {
        Self {
            chain: Vec::new(),
            list,
            layout: layout.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn through(mut self, offset: u64) -> Self {
        self.chain.push(offset);
        self
    }

    pub fn filter(mut self, filter: EntityFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Walks pointer chains and lists through a memory accessor, decoding each
/// element with a layout.
pub struct GraphReader<'a, P: ProcessMemory> {
    memory: &'a MemoryAccessor<P>,
    layouts: &'a LayoutSet,
    max_hops: usize,
}

impl<'a, P: ProcessMemory> GraphReader<'a, P> {
    pub fn new(memory: &'a MemoryAccessor<P>, layouts: &'a LayoutSet) -> Self {
        Self {
            memory,
            layouts,
            max_hops: MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    pub fn memory(&self) -> &'a MemoryAccessor<P> {
        self.memory
    }

    pub fn layouts(&self) -> &'a LayoutSet {
        self.layouts
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub(crate) fn abort(&self, address: u64, hops: usize, reason: &str) -> Error {
        Error::TraversalAborted {
            address,
            hops,
            reason: reason.to_string(),
        }
    }

    /// Follow `chain` from `base`, reading a pointer at each offset.
    ///
    /// A null pointer anywhere along the way yields `None`.
    pub fn follow(&self, base: u64, chain: &[u64]) -> Result<Option<u64>> {
        if chain.len() > self.max_hops {
            return Err(self.abort(base, 0, "pointer chain longer than the hop bound"));
        }
        let mut address = base;
        for &offset in chain {
            match self.memory.read_pointer(address + offset)? {
                Some(next) => address = next,
                None => return Ok(None),
            }
        }
        Ok(Some(address))
    }

    pub fn walk(&self, root: u64, shape: ListShape) -> ListWalk<'a, P> {
        ListWalk::new(
            self.memory,
            root,
            shape,
            self.max_hops.min(MAX_LIST_ELEMENTS),
        )
    }

    pub fn record(&self, address: u64, layout: &str) -> Result<EntityRecord> {
        let layout = self.layouts.get(layout)?;
        self.record_with(address, layout)
    }

    pub fn record_with(&self, address: u64, layout: &StructLayout) -> Result<EntityRecord> {
        Ok(EntityRecord {
            address,
            layout: layout.name.clone(),
            fields: self.memory.read_record(address, layout)?,
        })
    }

    /// Lazily decode the entities of the list described by `spec`.
    pub fn entities(&self, root: u64, spec: &TraversalSpec) -> Result<Entities<'a, P>> {
        let layout = self.layouts.get(&spec.layout)?.clone();
        let walk = self
            .follow(root, &spec.chain)?
            .map(|owner| self.walk(owner, spec.list));
        Ok(Entities {
            memory: self.memory,
            walk,
            layout,
            filters: spec.filters.clone(),
        })
    }
}

/// Lazy sequence of decoded list elements that pass every filter.
///
/// The first error ends the sequence.
pub struct Entities<'a, P: ProcessMemory> {
    memory: &'a MemoryAccessor<P>,
    walk: Option<ListWalk<'a, P>>,
    layout: StructLayout,
    filters: Vec<EntityFilter>,
}

impl<P: ProcessMemory> Entities<'_, P> {
    pub fn first_or_none(mut self) -> Result<Option<EntityRecord>> {
        self.next().transpose()
    }

    pub fn collect_all(self) -> Result<Vec<EntityRecord>> {
        self.collect()
    }
}

impl<P: ProcessMemory> Iterator for Entities<'_, P> {
    type Item = Result<EntityRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let address = match self.walk.as_mut()?.next()? {
                Ok(address) => address,
                Err(e) => {
                    self.walk = None;
                    return Some(Err(e));
                }
            };
            let record = match self.memory.read_record(address, &self.layout) {
                Ok(fields) => EntityRecord {
                    address,
                    layout: self.layout.name.clone(),
                    fields,
                },
                Err(e) => {
                    self.walk = None;
                    return Some(Err(e));
                }
            };
            if self.filters.iter().all(|f| f.matches(&record)) {
                return Some(Ok(record));
            }
        }
    }
}
