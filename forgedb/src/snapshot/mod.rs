mod format;
mod reader;
mod writer;

pub use format::{compile_table, CompiledTable, FORMAT_MAJOR, FORMAT_MINOR};
pub use reader::{Database, RangeIter, RangeView, RecordView, TableReader, ValueRef};
pub use writer::write_snapshot;

pub(crate) use format::{parse_file, FileKind};
pub(crate) use writer::{write_atomic, write_live_file};
