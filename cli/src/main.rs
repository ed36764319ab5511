// Copyright (c) 2026 MedLedger Contributors. MIT License.
// See LICENSE for details.

//! # MedLedger CLI
//!
//! Entry point for the `medledger` binary. Parses CLI arguments,
//! initializes logging, opens the ledger in the data directory, and runs
//! one operation. Results go to stdout as pretty-printed JSON; logs go to
//! stderr.

mod cli;
mod logging;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;

use medledger::config::{CANONICAL_FORMAT_VERSION, HASH_ALGORITHM, LEDGER_VERSION};
use medledger::ledger::{AppendRequest, Ledger, TimeRange};
use medledger::storage::{RecordAction, RecordSnapshot};

use cli::{Commands, GlobalArgs, MedLedgerCli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MedLedgerCli::parse();
    logging::init_logging(&cli.global.log_level, cli.global.log_format.into());

    match cli.command {
        Commands::Init => init_ledger(&cli.global),
        Commands::Append(args) => append_event(&cli.global, args),
        Commands::Verify(args) => verify(&cli.global, args).await,
        Commands::VerifyRecord(args) => {
            let ledger = open_ledger(&cli.global)?;
            print_json(&ledger.verify_for_record(&args.record_id)?)
        }
        Commands::History(args) => {
            let ledger = open_ledger(&cli.global)?;
            print_json(&ledger.get_history(&args.record_id)?)
        }
        Commands::Block(args) => {
            let ledger = open_ledger(&cli.global)?;
            print_json(&ledger.get_block_by_index(args.index)?)
        }
        Commands::List(args) => {
            let ledger = open_ledger(&cli.global)?;
            let limit = args.limit.unwrap_or(ledger.config().default_page_limit);
            print_json(&ledger.list_blocks(args.page, limit)?)
        }
        Commands::Record(args) => {
            let ledger = open_ledger(&cli.global)?;
            print_json(&ledger.reconstruct_record(&args.record_id)?)
        }
        Commands::Export(args) => export_chain(&cli.global, args),
        Commands::Import(args) => import_chain(&cli.global, args),
        Commands::Version => print_version(),
    }
}

/// Opens the ledger in an existing data directory.
fn open_ledger(global: &GlobalArgs) -> Result<Ledger> {
    let path = &global.data_dir;
    if !path.exists() {
        bail!(
            "no ledger at {} (run `medledger init` first)",
            path.display()
        );
    }
    let ledger = Ledger::open(path, global.ledger_config())
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    tracing::debug!(path = %path.display(), "ledger opened");
    Ok(ledger)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).context("failed to write JSON output")?;
    writeln!(out)?;
    Ok(())
}

/// Creates the data directory and an empty ledger inside it.
fn init_ledger(global: &GlobalArgs) -> Result<()> {
    let path = &global.data_dir;
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create data directory: {}", path.display()))?;

    let ledger = Ledger::open(path, global.ledger_config())
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    ledger.db().flush().context("failed to flush new ledger")?;

    tracing::info!(data_dir = %path.display(), "ledger initialized");
    print_json(&json!({
        "data_dir": path.display().to_string(),
        "blocks": ledger.db().count(),
        "head": ledger.db().head()?,
    }))
}

fn append_event(global: &GlobalArgs, args: cli::AppendArgs) -> Result<()> {
    let record_id = match (args.record_id, args.action) {
        (Some(id), _) => id,
        (None, RecordAction::Create) => uuid::Uuid::new_v4().to_string(),
        (None, action) => bail!("--record-id is required for {action} events"),
    };

    let request = AppendRequest {
        action: args.action,
        record_id,
        patient_id: args.patient_id,
        doctor_id: args.doctor_id,
        snapshot: RecordSnapshot {
            diagnosis: args.diagnosis,
            treatment: args.treatment,
            medication: args.medication,
            note: args.note,
            follow_up_date: args.follow_up_date,
        },
        actor: args.actor,
    };

    let ledger = open_ledger(global)?;
    let block = ledger.append_event(request)?;
    print_json(&block)
}

/// Runs verification off the async runtime; it is CPU-bound.
async fn verify(global: &GlobalArgs, args: cli::VerifyArgs) -> Result<()> {
    let ledger = Arc::new(open_ledger(global)?);
    let range = TimeRange::new(args.start, args.end)?;
    let patient = args.patient;

    let report = tokio::task::spawn_blocking(move || match patient {
        Some(patient_id) => ledger.verify_for_patient(&patient_id, range),
        None => ledger.verify_all(),
    })
    .await
    .context("verification task panicked")??;

    print_json(&report)?;

    if args.strict && !report.is_valid() {
        bail!(
            "integrity check failed: {} of {} block(s) invalid, genesis valid: {}",
            report.summary.invalid_blocks,
            report.summary.total_blocks,
            report.verification.genesis_block_valid
        );
    }
    Ok(())
}

fn export_chain(global: &GlobalArgs, args: cli::ExportArgs) -> Result<()> {
    let ledger = open_ledger(global)?;

    match args.output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let count = ledger.export_chain(BufWriter::new(file))?;
            print_json(&json!({ "exported": count, "path": path.display().to_string() }))
        }
        None => {
            ledger.export_chain(io::stdout().lock())?;
            Ok(())
        }
    }
}

fn import_chain(global: &GlobalArgs, args: cli::ImportArgs) -> Result<()> {
    let ledger = open_ledger(global)?;
    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let count = ledger
        .import_chain(BufReader::new(file))
        .with_context(|| format!("failed to import {}", args.input.display()))?;

    print_json(&json!({
        "imported": count,
        "head": ledger.db().head()?,
    }))
}

fn print_version() -> Result<()> {
    print_json(&json!({
        "name": "medledger",
        "version": env!("CARGO_PKG_VERSION"),
        "ledger_version": LEDGER_VERSION,
        "hash_algorithm": HASH_ALGORITHM,
        "canonical_format_version": CANONICAL_FORMAT_VERSION,
    }))
}
