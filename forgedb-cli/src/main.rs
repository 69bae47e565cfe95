use clap::{Parser, Subcommand};
use forgedb::{Database, ExportOptions, QueryServer};
use std::path::{Path, PathBuf};
use std::process;

/// ForgeDB CLI — compile and query schema-driven game data
#[derive(Parser)]
#[command(name = "forgedb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile schema + data into a binary snapshot
    Export {
        /// Database root directory
        path: PathBuf,

        /// Write generated typed accessors into this directory
        #[arg(long)]
        generated: Option<PathBuf>,

        /// Snapshot output path (default: <path>/build/data.fdb)
        #[arg(long)]
        bin: Option<PathBuf>,

        /// Skip the manifest sidecar
        #[arg(long)]
        no_manifest: bool,

        /// Skip the hot-reload live delta
        #[arg(long)]
        no_live: bool,
    },

    /// Scaffold an empty database root
    InitGame {
        /// Directory to initialize
        path: PathBuf,

        /// Project name (default: directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Serve line-delimited JSON queries over stdio
    Mcp {
        /// Database root holding build/data.fdb
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Answer at most one request, then exit
        #[arg(long)]
        once: bool,
    },

    /// Export, then re-export whenever schema or data files change
    Watch {
        /// Database root directory
        path: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Export {
            path,
            generated,
            bin,
            no_manifest,
            no_live,
        } => {
            let mut options = ExportOptions::new(path);
            options.bin_path = bin;
            options.write_manifest = !no_manifest;
            options.write_live = !no_live;
            run_export(&options, generated.as_deref())
        }

        Command::InitGame { path, name } => {
            forgedb::project::init_game(&path, name.as_deref())?;
            println!("initialized database root at {}", path.display());
            Ok(0)
        }

        Command::Mcp { workspace, once } => {
            let paths = forgedb::project::artifact_paths(&workspace, None);
            let mut db = Database::load(&paths.snapshot)?;
            if paths.live.exists() {
                db.apply_live(&paths.live)?;
            }
            let server = QueryServer::new(db);
            server.serve(std::io::stdin().lock(), std::io::stdout().lock(), once)?;
            Ok(0)
        }

        Command::Watch { path } => {
            let options = ExportOptions::new(&path);
            report_export(&options, None);

            let watcher = forgedb::watcher::FileWatcher::start(&path)?;
            println!("watching {} for changes", path.display());
            while let Ok(event) = watcher.event_rx.recv() {
                log::info!("{} source file(s) changed", event.paths.len());
                report_export(&options, None);
            }
            Ok(0)
        }
    }
}

/// Run one export, print its diagnostics, and turn the outcome into an
/// exit code.
fn run_export(
    options: &ExportOptions,
    generated: Option<&Path>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let report = forgedb::export(options)?;
    for diagnostic in &report.diagnostics {
        eprintln!("{diagnostic}");
    }

    if let Some(dir) = generated {
        let schema = forgedb::schema::parse_schema(&options.root.join("schema.yaml"))?;
        let code = forgedb_codegen::generate_for_tables(&schema, &report.written);
        std::fs::create_dir_all(dir)?;
        let output = dir.join("generated.rs");
        std::fs::write(&output, code)?;
        println!("generated typed accessors at {}", output.display());
    }

    println!(
        "exported {} table(s) to {} ({} skipped)",
        report.written.len(),
        report.snapshot_path.display(),
        report.skipped.len()
    );
    Ok(if report.success() { 0 } else { 1 })
}

/// Watch-mode wrapper: an export failure is reported and watched past,
/// never fatal.
fn report_export(options: &ExportOptions, generated: Option<&Path>) {
    match run_export(options, generated) {
        Ok(0) => {}
        Ok(_) => eprintln!("export finished with errors"),
        Err(e) => eprintln!("export failed: {e}"),
    }
}
