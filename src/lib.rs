//! # Ledger Audit
//!
//! Accounting-identity validation and opening-balance reconciliation over two
//! general-ledger CSV extracts: a subject balance table and a voucher detail table.
//!
//! ## Core Concepts
//!
//! - **Normal side**: every account is classified from its code (first digit under
//!   the Chinese chart of accounts) as debit-normal or credit-normal
//! - **Signed net**: debit/credit pairs are collapsed to one signed number on the
//!   account's normal side before any comparison
//! - **Identity**: opening + period movement = closing, per row, within one cent
//! - **Reconciliation**: the same identity checked across years, across the account
//!   hierarchy, and between the balance table and its vouchers
//! - **Opening solver**: rewrites opening balances from closing and movement, and is
//!   only committed when every in-scope row passes afterwards
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledger_audit::*;
//!
//! let config = AuditConfig::from_file("audit.json")?;
//! let summary = LedgerAuditor::validate(&config)?;
//! println!("{}", render_text_report(&summary, config.report_error_limit));
//! ```

pub mod balance;
pub mod chart_of_accounts;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod ingestion;
pub mod query;
pub mod report;
pub mod schema;
pub mod search;
pub mod solver;
pub mod tools;
pub mod utils;
pub mod voucher;

pub use balance::{net, to_pair, RowNets};
pub use chart_of_accounts::{classify, classify_code, classify_record, normal_side};
pub use config::AuditConfig;
pub use continuity::{ContinuityMismatch, YearContinuityChecker};
pub use engine::{AuditEngine, AuditSummary, CheckOutcome, Finding};
pub use error::{LedgerAuditError, Result};
pub use hierarchy::{HierarchyMismatch, HierarchyReconciler};
pub use identity::{IdentityValidator, IdentityViolation};
pub use ingestion::{load_balance_table, load_voucher_table, persist_corrected_table};
pub use query::LedgerSnapshot;
pub use report::{render_adjustment_log, render_text_report, write_error_table, AdjustmentContext};
pub use schema::*;
pub use solver::{reconcile_opening_balances, OpeningAdjustment, OpeningBalanceSolver, SolverReport};
pub use utils::TOLERANCE;
pub use voucher::{VoucherMismatch, VoucherReconciler};

use log::{debug, info};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::PathBuf;

/// Outcome of a committed opening-balance adjustment.
#[derive(Debug, Clone)]
pub struct AdjustmentRun {
    pub report: SolverReport,
    pub backup: PathBuf,
    pub log_path: PathBuf,
}

pub struct LedgerAuditor;

impl LedgerAuditor {
    /// Loads both tables and runs every read-only check.
    pub fn validate(config: &AuditConfig) -> Result<AuditSummary> {
        config.validate()?;
        info!("Validating ledger extracts in {}", config.data_dir.display());

        let balances = load_balance_table(config.balance_path())?;
        let vouchers = load_voucher_table(config.voucher_path())?;

        Ok(AuditEngine::new(config.report_error_limit).run(&balances, &vouchers))
    }

    /// [`LedgerAuditor::validate`], then writes the text report and the error table
    /// into the output directory.
    pub fn validate_and_report(config: &AuditConfig) -> Result<AuditSummary> {
        let summary = Self::validate(config)?;

        let out_dir = config.output_dir();
        fs::create_dir_all(&out_dir)?;

        fs::write(
            config.report_path(),
            render_text_report(&summary, config.report_error_limit),
        )?;
        let rows = write_error_table(&summary, File::create(config.error_table_path())?)?;

        info!(
            "Wrote {} and {} ({} rows)",
            config.report_path().display(),
            config.error_table_path().display(),
            rows
        );
        Ok(summary)
    }

    /// Solves opening balances for `years` and, only when the post-check passes,
    /// replaces the balance file (after a timestamped backup) and writes the log.
    /// On failure nothing on disk changes.
    pub fn adjust_opening(config: &AuditConfig, years: &BTreeSet<i32>) -> Result<AdjustmentRun> {
        config.validate()?;
        let source = config.balance_path();
        let mut table = load_balance_table(&source)?;
        debug!("Solving opening balances for years {:?}", years);

        let report = reconcile_opening_balances(&mut table, years)?;
        let backup = persist_corrected_table(&table, &source)?;

        let log = render_adjustment_log(
            &report,
            &AdjustmentContext {
                source: source.clone(),
                backup: Some(backup.clone()),
            },
        );
        fs::create_dir_all(config.output_dir())?;
        let log_path = config.adjustment_log_path();
        fs::write(&log_path, log)?;

        info!(
            "Adjusted {} opening balances; log at {}",
            report.adjusted(),
            log_path.display()
        );
        Ok(AdjustmentRun {
            report,
            backup,
            log_path,
        })
    }

    pub fn snapshot(config: &AuditConfig) -> Result<LedgerSnapshot> {
        LedgerSnapshot::load(config)
    }
}
