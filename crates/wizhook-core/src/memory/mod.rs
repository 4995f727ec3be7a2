mod accessor;
mod bytes;
pub mod layout;
mod scratch;
pub mod value;

pub use accessor::{MemoryAccessor, Xyz};
pub use bytes::ByteBuffer;
pub use layout::{
    FieldRule, LayoutSet, StructLayout, builtin_layouts, layouts, load_layouts, save_layouts,
};
pub use scratch::ScratchPool;
pub use value::{StringRule, TextEncoding, Value, ValueKind};
