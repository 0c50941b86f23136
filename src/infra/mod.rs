//! Infrastructure adapters: peekable task sources.

pub mod source;

pub use source::dag::DagTaskSource;
pub use source::memory::InMemoryTaskSource;
pub use source::TaskSource;
