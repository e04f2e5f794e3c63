use clap::{Parser, Subcommand};
use ledger_audit::{tools, AuditConfig, LedgerAuditError, LedgerAuditor, Result};
use log::{error, info};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ledger-audit", version, about = "Validate and reconcile general-ledger CSV extracts")]
struct Cli {
    /// JSON configuration file; every field is optional
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the balance and voucher extracts (overrides the config file)
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every check and write the text report and error table
    Validate,

    /// Rewrite opening balances from closing and movement, with backup
    AdjustOpening {
        /// Fiscal year to adjust; repeatable. Defaults to the configured years
        #[arg(short = 'y', long = "year")]
        years: Vec<i32>,
    },

    /// Answer JSON-lines tool requests on stdin/stdout
    Serve,
}

fn load_config(cli: &Cli) -> Result<AuditConfig> {
    let mut config = match &cli.config {
        Some(path) => AuditConfig::from_file(path)?,
        None => AuditConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Command::AdjustOpening { years } = &cli.command {
        if !years.is_empty() {
            config.solver_years = years.iter().copied().collect::<BTreeSet<i32>>();
        }
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Validate => {
            let summary = LedgerAuditor::validate_and_report(&config)?;
            println!(
                "Passed {}, failed {}, skipped {}. Report: {}",
                summary.total_passed(),
                summary.total_failed(),
                summary.total_skipped(),
                config.report_path().display()
            );
        }
        Command::AdjustOpening { .. } => {
            let run = LedgerAuditor::adjust_opening(&config, &config.solver_years)?;
            println!(
                "Adjusted {} opening balances. Backup: {}. Log: {}",
                run.report.adjusted(),
                run.backup.display(),
                run.log_path.display()
            );
        }
        Command::Serve => {
            let snapshot = LedgerAuditor::snapshot(&config)?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            tools::serve(&snapshot, stdin.lock(), stdout.lock())?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(e @ LedgerAuditError::SolverPostCheckFailure { .. }) => {
            error!("{}", e);
            eprintln!("{}; the balance file was not modified", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
