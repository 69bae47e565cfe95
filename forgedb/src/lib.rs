pub mod diagnostics;
pub mod error;
pub mod export;
pub mod index;
pub mod live;
pub mod loader;
pub mod project;
pub mod schema;
pub mod server;
pub mod snapshot;
pub mod validation;
pub mod watcher;

pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use error::{ForgeDbError, Result};
pub use export::{export, ExportOptions, ExportReport};
pub use index::KeyValue;
pub use schema::SchemaDefinition;
pub use server::QueryServer;
pub use snapshot::{Database, RangeIter, RangeView, RecordView, TableReader, ValueRef};
