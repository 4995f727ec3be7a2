//! Container layouts used by the client, walked lazily.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::MemoryAccessor;
use crate::process::ProcessMemory;

/// Offset of the payload inside a `std::list` node (after next/prev).
const NODE_VALUE_OFFSET: u64 = 16;

/// How a list of objects hangs off its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ListShape {
    /// `std::vector<std::shared_ptr<T>>`: begin/end pointers, 16-byte elements.
    SharedVector { offset: u64 },
    /// `std::vector<T*>`: begin/end pointers, 8-byte elements.
    PointerVector { offset: u64 },
    /// `std::list<T>`: sentinel pointer and 32-bit size, object embedded in each node.
    LinkedList { offset: u64 },
    /// `std::list<std::shared_ptr<T>>`: like `LinkedList`, but each node holds a pointer.
    SharedLinkedList { offset: u64 },
    /// `count` consecutive pointers.
    PointerArray { offset: u64, count: usize },
}

impl ListShape {
    pub fn offset(&self) -> u64 {
        match *self {
            ListShape::SharedVector { offset }
            | ListShape::PointerVector { offset }
            | ListShape::LinkedList { offset }
            | ListShape::SharedLinkedList { offset }
            | ListShape::PointerArray { offset, .. } => offset,
        }
    }
}

enum WalkState {
    Start {
        root: u64,
        shape: ListShape,
    },
    Buffered(std::vec::IntoIter<u64>),
    Linked {
        sentinel: u64,
        node: u64,
        remaining: u64,
        embedded: bool,
    },
    Done,
}

/// Lazy iterator over the element addresses of one list.
///
/// Each linked node is visited at most once; a revisit, a null link or more
/// nodes than `max_elements` ends the walk with `TraversalAborted`.
pub struct ListWalk<'a, P: ProcessMemory> {
    memory: &'a MemoryAccessor<P>,
    state: WalkState,
    max_elements: usize,
    hops: usize,
    visited: HashSet<u64>,
}

impl<'a, P: ProcessMemory> ListWalk<'a, P> {
    pub fn new(
        memory: &'a MemoryAccessor<P>,
        root: u64,
        shape: ListShape,
        max_elements: usize,
    ) -> Self {
        Self {
            memory,
            state: WalkState::Start { root, shape },
            max_elements,
            hops: 0,
            visited: HashSet::new(),
        }
    }

    fn abort(&self, address: u64, reason: impl Into<String>) -> Error {
        Error::TraversalAborted {
            address,
            hops: self.hops,
            reason: reason.into(),
        }
    }

    fn start(&mut self, root: u64, shape: ListShape) -> Result<WalkState> {
        let head = root + shape.offset();
        match shape {
            ListShape::SharedVector { .. } | ListShape::PointerVector { .. } => {
                let stride = if matches!(shape, ListShape::SharedVector { .. }) { 16 } else { 8 };
                let begin = self.memory.read_u64(head)?;
                let end = self.memory.read_u64(head + 8)?;
                if begin == 0 || end <= begin {
                    return Ok(WalkState::Done);
                }
                let count = ((end - begin) / stride) as usize;
                self.pointers(begin, count, stride as usize)
            }
            ListShape::PointerArray { count, .. } => self.pointers(head, count, 8),
            ListShape::LinkedList { .. } | ListShape::SharedLinkedList { .. } => {
                let Some(sentinel) = self.memory.read_pointer(head)? else {
                    return Ok(WalkState::Done);
                };
                let size = self.memory.read_i32(head + 8)?;
                if size <= 0 {
                    return Ok(WalkState::Done);
                }
                if size as usize > self.max_elements {
                    return Err(self.abort(head, format!("list claims {} elements", size)));
                }
                Ok(WalkState::Linked {
                    sentinel,
                    node: self.memory.read_u64(sentinel)?,
                    remaining: size as u64,
                    embedded: matches!(shape, ListShape::LinkedList { .. }),
                })
            }
        }
    }

    fn pointers(&mut self, start: u64, count: usize, stride: usize) -> Result<WalkState> {
        if count == 0 {
            return Ok(WalkState::Done);
        }
        if count > self.max_elements {
            return Err(self.abort(start, format!("vector claims {} elements", count)));
        }
        let block = self.memory.read_bytes(start, count * stride)?;
        let items: Vec<u64> = block
            .chunks_exact(stride)
            .filter_map(|element| {
                let mut pointer = [0u8; 8];
                pointer.copy_from_slice(&element[..8]);
                Some(u64::from_le_bytes(pointer)).filter(|&p| p != 0)
            })
            .collect();
        self.hops += items.len();
        Ok(WalkState::Buffered(items.into_iter()))
    }

    fn step(&mut self) -> Result<Option<u64>> {
        loop {
            match std::mem::replace(&mut self.state, WalkState::Done) {
                WalkState::Done => return Ok(None),
                WalkState::Start { root, shape } => {
                    self.state = self.start(root, shape)?;
                }
                WalkState::Buffered(mut items) => {
                    let next = items.next();
                    self.state = WalkState::Buffered(items);
                    return Ok(next);
                }
                WalkState::Linked {
                    sentinel,
                    node,
                    remaining,
                    embedded,
                } => {
                    if node == sentinel || remaining == 0 {
                        return Ok(None);
                    }
                    if node == 0 {
                        return Err(self.abort(sentinel, "null link"));
                    }
                    if !self.visited.insert(node) {
                        return Err(self.abort(node, "cycle detected"));
                    }
                    self.hops += 1;
                    if self.hops > self.max_elements {
                        return Err(self.abort(node, "hop bound exceeded"));
                    }

                    let value = if embedded {
                        Some(node + NODE_VALUE_OFFSET)
                    } else {
                        self.memory.read_pointer(node + NODE_VALUE_OFFSET)?
                    };
                    self.state = WalkState::Linked {
                        sentinel,
                        node: self.memory.read_u64(node)?,
                        remaining: remaining - 1,
                        embedded,
                    };
                    if value.is_some() {
                        return Ok(value);
                    }
                }
            }
        }
    }

    pub fn hops(&self) -> usize {
        self.hops
    }
}

impl<P: ProcessMemory> Iterator for ListWalk<'_, P> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(address)) => Some(Ok(address)),
            Ok(None) => None,
            Err(e) => {
                self.state = WalkState::Done;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::process::{MockMemoryBuilder, MockProcess};

    fn memory(mock: MockProcess) -> MemoryAccessor<MockProcess> {
        MemoryAccessor::new(Arc::new(mock))
    }

    fn collect(walk: ListWalk<'_, MockProcess>) -> Result<Vec<u64>> {
        walk.collect()
    }

    #[test]
    fn test_shared_vector() {
        let memory = memory(
            MockMemoryBuilder::new()
                .region(0x2000, 0x30)
                .write_u64(0x1050, 0x2000)
                .write_u64(0x1058, 0x2030)
                .write_u64(0x2000, 0xA000)
                .write_u64(0x2010, 0)
                .write_u64(0x2020, 0xC000)
                .write_u64(0x2028, 0)
                .build(),
        );
        let walk = ListWalk::new(&memory, 0x1000, ListShape::SharedVector { offset: 0x50 }, 100);
        assert_eq!(collect(walk).unwrap(), vec![0xA000, 0xC000]);
    }

    #[test]
    fn test_empty_vector() {
        let memory = memory(MockMemoryBuilder::new().region(0x1000, 0x100).build());
        let walk = ListWalk::new(&memory, 0x1000, ListShape::SharedVector { offset: 0x50 }, 100);
        assert!(collect(walk).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_vector_aborts() {
        let memory = memory(
            MockMemoryBuilder::new()
                .write_u64(0x1000, 0x2000)
                .write_u64(0x1008, 0x2000 + 16 * 50)
                .build(),
        );
        let walk = ListWalk::new(&memory, 0x1000, ListShape::SharedVector { offset: 0 }, 10);
        assert!(matches!(
            collect(walk),
            Err(Error::TraversalAborted { .. })
        ));
    }

    /// sentinel at 0x3000 -> node 0x3100 -> node 0x3200 -> sentinel
    fn linked_mock(second_next: u64, size: u64) -> MockProcess {
        MockMemoryBuilder::new()
            .write_u64(0x1048, 0x3000)
            .write_u64(0x1050, size)
            .write_u64(0x3000, 0x3100)
            .write_u64(0x3100, 0x3200)
            .write_u64(0x3110, 0xAAAA)
            .write_u64(0x3200, second_next)
            .write_u64(0x3210, 0xBBBB)
            .build()
    }

    #[test]
    fn test_shared_linked_list() {
        let memory = memory(linked_mock(0x3000, 2));
        let walk = ListWalk::new(&memory, 0x1000, ListShape::SharedLinkedList { offset: 0x48 }, 100);
        assert_eq!(collect(walk).unwrap(), vec![0xAAAA, 0xBBBB]);
    }

    #[test]
    fn test_embedded_linked_list() {
        let memory = memory(linked_mock(0x3000, 2));
        let walk = ListWalk::new(&memory, 0x1000, ListShape::LinkedList { offset: 0x48 }, 100);
        assert_eq!(collect(walk).unwrap(), vec![0x3110, 0x3210]);
    }

    #[test]
    fn test_cycle_aborts() {
        // Second node points back to the first, and the size lies.
        let memory = memory(linked_mock(0x3100, 10));
        let walk = ListWalk::new(&memory, 0x1000, ListShape::SharedLinkedList { offset: 0x48 }, 100);
        match collect(walk) {
            Err(Error::TraversalAborted { address, reason, .. }) => {
                assert_eq!(address, 0x3100);
                assert!(reason.contains("cycle"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_walk_is_lazy() {
        let mock = Arc::new(linked_mock(0x3000, 2));
        let memory = MemoryAccessor::new(Arc::clone(&mock));
        let mut walk = ListWalk::new(&memory, 0x1000, ListShape::SharedLinkedList { offset: 0x48 }, 100);
        assert_eq!(mock.read_count(), 0);
        assert_eq!(walk.next().unwrap().unwrap(), 0xAAAA);
        let after_first = mock.read_count();
        assert_eq!(walk.next().unwrap().unwrap(), 0xBBBB);
        assert!(mock.read_count() > after_first);
    }

    #[test]
    fn test_pointer_array_skips_null() {
        let memory = memory(
            MockMemoryBuilder::new()
                .write_u64(0x1000, 0x10)
                .write_u64(0x1008, 0)
                .write_u64(0x1010, 0x30)
                .build(),
        );
        let walk = ListWalk::new(&memory, 0x1000, ListShape::PointerArray { offset: 0, count: 3 }, 100);
        assert_eq!(collect(walk).unwrap(), vec![0x10, 0x30]);
    }
}
