mod chunked;
pub mod pattern;
mod resolver;
pub(crate) mod symbol;

pub use chunked::{ChunkedMemoryIterator, MemoryChunk};
pub use pattern::{PatternSpec, format_pattern, parse_pattern};
pub use resolver::{AddressResolver, ScanMode, ScanScope};
pub use symbol::find_export;
