//! Persistence sinks for generated responses.

mod libsql_sink;
mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_sink::LibSqlSink;
pub use memory::MemorySink;
pub use traits::{ResponseRecord, ResponseSink};
