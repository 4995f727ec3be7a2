//! Object graph traversal over the client's pointer structures.

mod entity;
mod list;
mod reader;
pub mod window;
mod world;

pub use entity::{EntityFilter, EntityRecord, RecordPredicate};
pub use list::{ListShape, ListWalk};
pub use reader::{Entities, GraphReader, TraversalSpec};
pub use window::is_visible;
