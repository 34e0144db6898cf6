//! Ampliseq Id Checker
//!
//! Validate an id file (and optional length cut off table) before a run, and
//! optionally split it into one id file per target.

use ampliseq_extract::ids::{IdTable, LengthCutoffTable};
use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;

fn main() -> Result<()> {
    let matches = Command::new("ampliseq-check-ids")
        .version("0.1.0")
        .about("Check an id file and its length cut offs")
        .arg(
            Arg::new("id")
                .long("id")
                .value_name("FILE")
                .help("Id file with the primer table and optional barcode table")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("length_cutoffs")
                .long("length-cutoffs")
                .value_name("FILE")
                .help("Per target length cut offs (columns target, minlen, maxlen)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("split_dir")
                .long("split-dir")
                .value_name("DIRECTORY")
                .help("Write one id file per target into this directory")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("multiplex")
                .long("multiplex")
                .help("Barcode names must be valid, reads are multiplexed")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Log at debug level")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let Some(id_file) = matches.get_one::<PathBuf>("id") else {
        anyhow::bail!("--id is required");
    };

    let ids = IdTable::from_file(id_file)?;
    if matches.get_flag("multiplex") {
        ids.check_mid_names()?;
    }
    println!("🧬 Id file: {}", id_file.display());
    println!("  Targets: {}", ids.target_names().join(", "));
    println!("  Barcodes: {}", ids.barcodes().len());
    println!("  Longest primer: {}", ids.max_primer_len());

    if let Some(path) = matches.get_one::<PathBuf>("length_cutoffs") {
        let cutoffs = LengthCutoffTable::reconcile(LengthCutoffTable::read(path)?, &ids);
        println!("  Length cut offs for {} targets", cutoffs.len());
        for warning in cutoffs.warnings() {
            warn!("{warning}");
        }
    }

    if let Some(dir) = matches.get_one::<PathBuf>("split_dir") {
        std::fs::create_dir_all(dir)?;
        for target in ids.target_names() {
            let path = dir.join(format!("{target}_ids.tab.txt"));
            ids.write_id_file(&path, Some(std::slice::from_ref(&target)))?;
            info!("Wrote {}", path.display());
        }
    }

    println!("✅ Id file is valid");
    Ok(())
}
