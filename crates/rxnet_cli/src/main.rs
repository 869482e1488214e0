//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `rxnet_core` linkage with deterministic output.
//! - Given a database path, report its layout version against the
//!   compiled-in one.
//!
//! Usage: `rxnet_cli [DATABASE_PATH] [--log-dir DIR]`

use rxnet_core::{default_log_level, init_logging, Manager, StoreConfig, LAYOUT_VERSION};
use std::process::ExitCode;

struct Args {
    database: Option<String>,
    log_dir: Option<String>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args {
        database: None,
        log_dir: None,
    };
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--log-dir" => {
                args.log_dir = Some(raw.next().ok_or("--log-dir needs a directory")?);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag `{flag}`")),
            _ if args.database.is_none() => args.database = Some(arg),
            _ => return Err(format!("unexpected argument `{arg}`")),
        }
    }
    Ok(args)
}

fn probe(database: &str) -> Result<(), String> {
    let manager = Manager::open(StoreConfig::file(database)).map_err(|err| err.to_string())?;
    let persisted = manager.db_version().map_err(|err| err.to_string())?;
    let matches = manager.version_matches().map_err(|err| err.to_string())?;
    println!("database={database} db_version={persisted} version_matches={matches}");
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(2);
        }
    };
    if let Some(log_dir) = &args.log_dir {
        if let Err(message) = init_logging(default_log_level(), log_dir) {
            eprintln!("warning: logging disabled: {message}");
        }
    }

    println!("rxnet_core ping={}", rxnet_core::ping());
    println!("rxnet_core version={}", rxnet_core::core_version());
    println!("rxnet_core layout_version={LAYOUT_VERSION}");

    match args.database.as_deref().map(probe) {
        Some(Err(message)) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}
