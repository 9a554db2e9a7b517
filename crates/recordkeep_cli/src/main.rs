//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `recordkeep_core` linkage and print a deterministic status
//!   report for a configured database.
//!
//! Usage: `recordkeep_cli [config.json]`

use log::info;
use recordkeep_core::db::{open_db, open_db_in_memory};
use recordkeep_core::{
    core_version, init_logging, load_config, ping, CoreConfig, Partition, RecordService,
    RecordType, SqliteDocumentStore,
};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("recordkeep_core ping={}", ping());
    println!("recordkeep_core version={}", core_version());

    let Some(config_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };
    match run(Path::new(&config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }
    report(&config)
}

fn report(config: &CoreConfig) -> Result<(), Box<dyn Error>> {
    let conn = match &config.db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let store = SqliteDocumentStore::try_new(&conn)?;
    let records = RecordService::new(&store);

    for kind in RecordType::ALL {
        let active = records.list(kind, Partition::Active)?.len();
        let archived = records.list(kind, Partition::Archived)?.len();
        println!("{kind} active={active} archived={archived}");
    }
    let pending = records.pending_count(config.near_policy())?;
    println!("reminders pending={pending}");
    info!("event=cli_report module=cli status=ok pending_reminders={pending}");
    Ok(())
}
