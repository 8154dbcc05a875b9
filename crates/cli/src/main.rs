#![forbid(unsafe_code)]

mod config;
mod walk;

use config::Config;
use sdb_etl::{
    EtlError, MappingSet, SidecarSet, extract, load, read_script, reconcile, store_extracted,
    transform, write_script,
};
use sdb_storage::{DEFAULT_SCHEMA, Gateway};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn usage() -> &'static str {
    "sidecardb — load sidecar JSON trees into SQLite and reconcile both ways\n\n\
USAGE:\n\
  sidecardb [--config PATH] [--verbose]\n\n\
NOTES:\n\
  - PATH defaults to ./config.json.\n\
  - The config file selects the data tree, mapping tables, database path,\n\
    worker count, and per-stage skips.\n\
  - With `skip_extraction` and `skip_transform` set, loading replays the\n\
    write script from the previous run.\n"
}

fn parse_args() -> Result<(PathBuf, bool), String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut config_path = PathBuf::from("config.json");
    let mut verbose = false;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let v = args.get(i).ok_or("--config requires PATH")?;
                config_path = PathBuf::from(v);
            }
            "--verbose" => verbose = true,
            other => return Err(format!("unknown argument: {other}\n\n{}", usage())),
        }
        i += 1;
    }
    Ok((config_path, verbose))
}

fn main() -> ExitCode {
    let (config_path, verbose) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging is already initialized");
        return ExitCode::from(2);
    }

    match run(&config_path) {
        Ok(true) => ExitCode::SUCCESS,
        // Persistence failures were skipped and counted; signal them
        // without discarding the rest of the run.
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(2)
        }
    }
}

fn run(config_path: &Path) -> Result<bool, EtlError> {
    let config = Config::load(config_path)?;
    tracing::info!(config = %config_path.display(), "configuration loaded");

    let mut gateway = Gateway::open(&config.db_path)?;
    if config.wipe_db {
        gateway.wipe()?;
        tracing::info!("database wiped");
    }
    match &config.schema_path {
        Some(path) => {
            let script = std::fs::read_to_string(path)?;
            gateway.install_schema(&script)?;
        }
        None => gateway.install_schema(DEFAULT_SCHEMA)?,
    }

    let paths = walk::sidecar_files(&config.data_dir)?;
    tracing::info!(
        documents = paths.len(),
        root = %config.data_dir.display(),
        "sidecar walk finished"
    );
    let mut docs = SidecarSet::load(paths);

    let script_path = config.extraction_dir.join("write_script.jsonl");
    let mut batches = None;
    if !config.skip_extraction {
        let records = extract(&docs)?;
        let artifact = store_extracted(&records, &config.extraction_dir)?;
        tracing::info!(
            records = records.len(),
            artifact = %artifact.display(),
            "extraction finished"
        );

        if !config.skip_transform {
            let mappings = MappingSet::load_dir(&config.mapping_dir)?;
            let produced = transform(&records, &mappings, config.workers)?;
            write_script(&script_path, &produced)?;
            tracing::info!(script = %script_path.display(), "write script persisted");
            batches = Some(produced);
        }
    }

    let mut clean = true;
    if !config.skip_loading {
        let batches = match batches {
            Some(batches) => batches,
            None => read_script(&script_path)?,
        };
        let report = load(&mut gateway, &batches)?;
        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "some writes could not be persisted");
            clean = false;
        }
    }

    if !config.skip_reconciliation {
        reconcile(&mut gateway, &mut docs, config.run_backpropagation)?;
    }

    Ok(clean)
}
