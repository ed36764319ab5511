//! # CLI Interface
//!
//! Defines the command-line argument structure for `medledger` using
//! `clap` derive. Every subcommand maps onto one ledger operation and
//! prints its result as JSON on stdout.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use medledger::config::{LedgerConfig, DEFAULT_MAX_APPEND_RETRIES, MAX_PAGE_LIMIT};
use medledger::storage::RecordAction;

/// Medical record integrity ledger.
///
/// Records every create, update and delete of a medical record in an
/// append-only, hash-linked chain and verifies it on demand.
#[derive(Parser, Debug)]
#[command(
    name = "medledger",
    about = "Medical record integrity ledger",
    version,
    propagate_version = true
)]
pub struct MedLedgerCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Directory holding the ledger database. Created by `init`.
    #[arg(
        long,
        short = 'd',
        global = true,
        env = "MEDLEDGER_DATA_DIR",
        default_value = "./medledger-data"
    )]
    pub data_dir: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "MEDLEDGER_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, env = "MEDLEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Appends retried on a head conflict before giving up.
    #[arg(long, global = true, env = "MEDLEDGER_MAX_APPEND_RETRIES", default_value_t = DEFAULT_MAX_APPEND_RETRIES)]
    pub max_append_retries: u32,

    /// Largest page size accepted by `list`.
    #[arg(long, global = true, env = "MEDLEDGER_MAX_PAGE_LIMIT", default_value_t = MAX_PAGE_LIMIT)]
    pub max_page_limit: usize,
}

impl GlobalArgs {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            max_append_retries: self.max_append_retries,
            max_page_limit: self.max_page_limit,
            ..LedgerConfig::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Top-level subcommands for the `medledger` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and an empty ledger.
    Init,
    /// Record a create, update or delete event.
    Append(AppendArgs),
    /// Verify the whole chain, or one patient's blocks.
    Verify(VerifyArgs),
    /// Verify a single record.
    VerifyRecord(RecordArgs),
    /// Print the audit trail of a record.
    History(RecordArgs),
    /// Print one block.
    Block(BlockArgs),
    /// List blocks page by page.
    List(ListArgs),
    /// Print the reconstructed current state of a record.
    Record(RecordArgs),
    /// Write the chain as JSON lines.
    Export(ExportArgs),
    /// Load a JSON-lines export verbatim.
    Import(ImportArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `append` subcommand.
#[derive(Args, Debug)]
pub struct AppendArgs {
    /// create, update or delete.
    #[arg(long)]
    pub action: RecordAction,

    /// Record identifier. Generated for `create` when omitted.
    #[arg(long)]
    pub record_id: Option<String>,

    #[arg(long)]
    pub patient_id: String,

    #[arg(long)]
    pub doctor_id: String,

    /// Who performed the change. Required for update and delete.
    #[arg(long, env = "MEDLEDGER_ACTOR")]
    pub actor: Option<String>,

    #[arg(long, default_value = "")]
    pub diagnosis: String,

    #[arg(long, default_value = "")]
    pub treatment: String,

    #[arg(long, default_value = "")]
    pub medication: String,

    #[arg(long, default_value = "")]
    pub note: String,

    /// Follow-up date, YYYY-MM-DD.
    #[arg(long)]
    pub follow_up_date: Option<NaiveDate>,
}

/// Arguments for the `verify` subcommand.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Only verify this patient's blocks.
    #[arg(long)]
    pub patient: Option<String>,

    /// Earliest block timestamp (RFC 3339), inclusive.
    #[arg(long, requires = "patient")]
    pub start: Option<DateTime<Utc>>,

    /// Latest block timestamp (RFC 3339), inclusive.
    #[arg(long, requires = "patient")]
    pub end: Option<DateTime<Utc>>,

    /// Exit non-zero if verification finds anything.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    pub record_id: String,
}

#[derive(Args, Debug)]
pub struct BlockArgs {
    pub index: u64,
}

/// Arguments for the `list` subcommand.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Blocks per page. Defaults to the ledger's configured page size.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file. Stdout when omitted.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON-lines file produced by `export`.
    pub input: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        MedLedgerCli::command().debug_assert();
    }

    #[test]
    fn parses_append() {
        let cli = MedLedgerCli::try_parse_from([
            "medledger",
            "--data-dir",
            "/tmp/ledger",
            "append",
            "--action",
            "update",
            "--record-id",
            "rec-1",
            "--patient-id",
            "pat-1",
            "--doctor-id",
            "doc-1",
            "--actor",
            "doc-2",
            "--follow-up-date",
            "2026-11-02",
        ])
        .unwrap();

        assert_eq!(cli.global.data_dir, PathBuf::from("/tmp/ledger"));
        match cli.command {
            Commands::Append(args) => {
                assert_eq!(args.action, RecordAction::Update);
                assert_eq!(args.actor.as_deref(), Some("doc-2"));
                assert_eq!(args.follow_up_date, NaiveDate::from_ymd_opt(2026, 11, 2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn verify_range_requires_patient() {
        let err = MedLedgerCli::try_parse_from([
            "medledger",
            "verify",
            "--start",
            "2026-01-01T00:00:00Z",
        ]);
        assert!(err.is_err());

        let ok = MedLedgerCli::try_parse_from([
            "medledger",
            "verify",
            "--patient",
            "pat-1",
            "--start",
            "2026-01-01T00:00:00Z",
        ])
        .unwrap();
        match ok.command {
            Commands::Verify(args) => assert!(args.start.is_some()),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_args_map_onto_config() {
        let cli = MedLedgerCli::try_parse_from([
            "medledger",
            "list",
            "--max-page-limit",
            "10",
            "--max-append-retries",
            "9",
        ])
        .unwrap();
        let cfg = cli.global.ledger_config();
        assert_eq!(cfg.max_page_limit, 10);
        assert_eq!(cfg.max_append_retries, 9);
    }
}
