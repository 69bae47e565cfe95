//! The export pipeline: schema registry -> loader -> validator -> index
//! builder -> writers. One explicit options object per run; no global
//! state. Per-table load work runs on scoped worker threads and
//! synchronizes only at the shared diagnostics sink.

use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::error::{ForgeDbError, Result};
use crate::index::TableIndexes;
use crate::live;
use crate::loader::{self, Record};
use crate::project;
use crate::schema::{self, SchemaDefinition};
use crate::snapshot::{self, CompiledTable, FORMAT_MAJOR, FORMAT_MINOR};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Everything one export run needs, constructed once and passed down.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub root: PathBuf,
    /// Snapshot output path; live delta and manifest are its siblings.
    pub bin_path: Option<PathBuf>,
    pub write_manifest: bool,
    pub write_live: bool,
}

impl ExportOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ExportOptions {
            root: root.into(),
            bin_path: None,
            write_manifest: true,
            write_live: true,
        }
    }
}

/// Outcome of one export run.
#[derive(Debug)]
pub struct ExportReport {
    pub project: String,
    /// All diagnostics, in deterministic reporting order.
    pub diagnostics: Vec<Diagnostic>,
    /// Tables written to the snapshot, sorted by name.
    pub written: Vec<String>,
    /// Tables excluded because of Error diagnostics, sorted by name.
    pub skipped: Vec<String>,
    pub snapshot_path: PathBuf,
    /// Generation of the live delta written by this run, if any.
    pub generation: Option<u64>,
}

impl ExportReport {
    /// False when any Error-severity diagnostic exists; the process exit
    /// code follows this.
    pub fn success(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

/// Run the full pipeline. Schema and validation problems are collected
/// per table and exclude only the affected tables; IO failures on
/// required inputs abort the run.
pub fn export(options: &ExportOptions) -> Result<ExportReport> {
    let root = &options.root;
    if !root.exists() {
        return Err(ForgeDbError::Other(format!(
            "database root does not exist: {}",
            root.display()
        )));
    }
    let descriptor = project::load_descriptor(root)?;
    log::info!("exporting '{}' from {}", descriptor.name, root.display());

    let schema_path = root.join("schema.yaml");
    if !schema_path.exists() {
        return Err(ForgeDbError::Schema(format!(
            "schema.yaml not found in {}",
            root.display()
        )));
    }
    let schema = schema::parse_schema(&schema_path)?;

    let mut sink = DiagnosticSink::new();
    schema::validate_schema(&schema, &mut sink);

    let records = load_all_tables(options, &schema, sink)?;
    let (records, mut sink) = records;

    crate::validation::validate_tables(&schema, &records, &mut sink);

    // Every table's verdict is in before any writer starts.
    let mut compiled: Vec<CompiledTable> = Vec::new();
    let mut written = Vec::new();
    let mut skipped = Vec::new();
    for (name, table) in &schema.tables {
        if sink.table_has_errors(name) {
            log::warn!("table '{name}' excluded from output");
            skipped.push(name.clone());
            continue;
        }
        let rows = records.get(name).map(Vec::as_slice).unwrap_or(&[]);
        let indexes = TableIndexes::build(table, rows)?;
        compiled.push(snapshot::compile_table(name, table, rows, &indexes)?);
        written.push(name.clone());
    }

    let paths = project::artifact_paths(root, options.bin_path.as_deref());

    // Last-known state must be read before the snapshot is replaced.
    let prior = options
        .write_live
        .then(|| live::read_live_state(&paths.snapshot, &paths.live));

    snapshot::write_snapshot(&paths.snapshot, &compiled)?;

    let diagnostics = sink.into_sorted();

    if options.write_manifest {
        write_manifest(&paths.manifest, &descriptor.name, &schema, &diagnostics, &written)?;
    }

    let generation = match prior {
        Some(prior) => Some(live::write_live(&paths.live, &prior, &compiled)?),
        None => None,
    };

    Ok(ExportReport {
        project: descriptor.name,
        diagnostics,
        written,
        skipped,
        snapshot_path: paths.snapshot,
        generation,
    })
}

type LoadedRecords = (BTreeMap<String, Vec<Record>>, DiagnosticSink);

/// Load every table's rows on scoped worker threads. Workers fill local
/// sinks and merge under the shared mutex; an IO error from any worker
/// aborts the run.
fn load_all_tables(
    options: &ExportOptions,
    schema: &SchemaDefinition,
    sink: DiagnosticSink,
) -> Result<LoadedRecords> {
    let shared_sink = Mutex::new(sink);
    let results: Mutex<BTreeMap<String, Result<Vec<Record>>>> = Mutex::new(BTreeMap::new());

    std::thread::scope(|scope| {
        for (name, table) in &schema.tables {
            let shared_sink = &shared_sink;
            let results = &results;
            let root = &options.root;
            scope.spawn(move || {
                let mut local = DiagnosticSink::new();
                let loaded = loader::load_table(root, name, table, &mut local);
                lock_unpoisoned(shared_sink).merge(local);
                lock_unpoisoned(results).insert(name.clone(), loaded);
            });
        }
    });

    let sink = shared_sink
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let results = results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut records = BTreeMap::new();
    for (name, result) in results {
        records.insert(name, result?);
    }
    Ok((records, sink))
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manifest sidecar: schema metadata plus sorted diagnostics, for
/// external tooling. Written with the same atomic discipline as the
/// snapshot.
fn write_manifest(
    path: &std::path::Path,
    project: &str,
    schema: &SchemaDefinition,
    diagnostics: &[Diagnostic],
    written: &[String],
) -> Result<()> {
    let tables: Vec<serde_json::Value> = schema
        .tables
        .iter()
        .map(|(name, table)| {
            json!({
                "name": name,
                "version": table.version,
                "written": written.contains(name),
                "fields": table.fields,
            })
        })
        .collect();

    let manifest = json!({
        "project": project,
        "format": { "major": FORMAT_MAJOR, "minor": FORMAT_MINOR },
        "tables": tables,
        "diagnostics": diagnostics,
    });

    let mut bytes = serde_json::to_vec_pretty(&manifest)?;
    bytes.push(b'\n');
    snapshot::write_atomic(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KeyValue;
    use crate::snapshot::Database;
    use std::path::Path;

    const SCHEMA: &str = r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Category, type: string, key: secondary, index: 0 }
  Player:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
      - { name: BestItemId, type: int, nullable: true, ref: { table: Item, field: Id } }
"#;

    fn write_root(dir: &Path, item_rows: &str, player_rows: &str) {
        std::fs::create_dir_all(dir.join("data")).unwrap();
        std::fs::write(dir.join("forge.yaml"), "name: testgame\n").unwrap();
        std::fs::write(dir.join("schema.yaml"), SCHEMA).unwrap();
        std::fs::write(dir.join("data/Item.yaml"), item_rows).unwrap();
        std::fs::write(dir.join("data/Player.yaml"), player_rows).unwrap();
    }

    const GOOD_ITEMS: &str =
        "- { Id: 1, Category: Weapon }\n- { Id: 2, Category: Armor }\n- { Id: 3, Category: Weapon }\n";
    const GOOD_PLAYERS: &str = "- { Id: 10, BestItemId: 2 }\n- { Id: 11 }\n";

    #[test]
    fn test_export_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), GOOD_ITEMS, GOOD_PLAYERS);

        let report = export(&ExportOptions::new(dir.path())).unwrap();
        assert!(report.success(), "diagnostics: {:?}", report.diagnostics);
        assert_eq!(report.project, "testgame");
        assert_eq!(report.written, vec!["Item", "Player"]);
        assert_eq!(report.generation, Some(1));

        let mut db = Database::load(&report.snapshot_path).unwrap();
        let live = dir.path().join("build/data.live.fdb");
        assert!(live.exists());
        db.apply_live(&live).unwrap();

        let items = db.table("Item").unwrap();
        let weapons = items
            .range("Category", &KeyValue::Str("Weapon".into()))
            .unwrap();
        let ids: Vec<i64> = weapons.iter().map(|r| r.unwrap().int(0).unwrap()).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(dir.path().join("build/data.manifest.json").exists());
    }

    #[test]
    fn test_error_table_is_excluded_but_others_are_written() {
        let dir = tempfile::tempdir().unwrap();
        // Duplicate Item primary key; Player rows avoid the dangling ref
        // so only Item is excluded.
        write_root(
            dir.path(),
            "- { Id: 1, Category: Weapon }\n- { Id: 1, Category: Armor }\n",
            "- { Id: 10 }\n",
        );

        let report = export(&ExportOptions::new(dir.path())).unwrap();
        assert!(!report.success());
        assert_eq!(report.skipped, vec!["Item"]);
        assert_eq!(report.written, vec!["Player"]);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.code == "validation/duplicate-primary-key"));

        let db = Database::load(&report.snapshot_path).unwrap();
        assert!(db.table("Item").is_none());
        assert!(db.table("Player").is_some());
    }

    #[test]
    fn test_dangling_ref_excludes_referencing_table() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), GOOD_ITEMS, "- { Id: 10, BestItemId: 999 }\n");

        let report = export(&ExportOptions::new(dir.path())).unwrap();
        assert!(!report.success());
        assert_eq!(report.skipped, vec!["Player"]);
        assert_eq!(report.written, vec!["Item"]);
        let dangling = report
            .diagnostics
            .iter()
            .find(|d| d.code == "validation/dangling-ref")
            .unwrap();
        assert!(dangling.message.contains("Player.BestItemId"));
        assert!(dangling.message.contains("'Item'"));
    }

    #[test]
    fn test_repeated_export_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), GOOD_ITEMS, GOOD_PLAYERS);

        let report = export(&ExportOptions::new(dir.path())).unwrap();
        let first = std::fs::read(&report.snapshot_path).unwrap();

        let report = export(&ExportOptions::new(dir.path())).unwrap();
        let second = std::fs::read(&report.snapshot_path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_opt_out_flags_skip_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), GOOD_ITEMS, GOOD_PLAYERS);

        let mut options = ExportOptions::new(dir.path());
        options.write_manifest = false;
        options.write_live = false;
        let report = export(&options).unwrap();

        assert!(report.success());
        assert_eq!(report.generation, None);
        assert!(!dir.path().join("build/data.manifest.json").exists());
        assert!(!dir.path().join("build/data.live.fdb").exists());
    }

    #[test]
    fn test_missing_schema_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let err = export(&ExportOptions::new(dir.path())).unwrap_err();
        assert!(err.to_string().contains("schema.yaml"));
    }
}
