use crate::error::{LedgerAuditError, Result};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

fn default_data_dir() -> PathBuf {
    PathBuf::from("format-data/financial")
}

fn default_balance_file() -> String {
    "final_enhanced_balance.csv".to_string()
}

fn default_voucher_file() -> String {
    "final_voucher_detail.csv".to_string()
}

fn default_solver_years() -> BTreeSet<i32> {
    BTreeSet::from([2024, 2025])
}

fn default_report_error_limit() -> usize {
    10
}

/// Where the extracts live and how a run behaves. Every field has a default,
/// so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditConfig {
    #[serde(default = "default_data_dir")]
    #[schemars(description = "Directory holding the balance and voucher CSV extracts")]
    pub data_dir: PathBuf,

    #[serde(default = "default_balance_file")]
    #[schemars(description = "Balance table file name, relative to data_dir")]
    pub balance_file: String,

    #[serde(default = "default_voucher_file")]
    #[schemars(description = "Voucher detail file name, relative to data_dir")]
    pub voucher_file: String,

    #[serde(default)]
    #[schemars(description = "Where reports are written. Defaults to data_dir")]
    pub output_dir: Option<PathBuf>,

    #[serde(default = "default_solver_years")]
    #[schemars(description = "Fiscal years whose opening balances the solver may rewrite")]
    pub solver_years: BTreeSet<i32>,

    #[serde(default = "default_report_error_limit")]
    #[schemars(description = "How many messages per check the text report lists")]
    pub report_error_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            balance_file: default_balance_file(),
            voucher_file: default_voucher_file(),
            output_dir: None,
            solver_years: default_solver_years(),
            report_error_limit: default_report_error_limit(),
        }
    }
}

impl AuditConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| {
            LedgerAuditError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AuditConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.solver_years.is_empty() {
            return Err(LedgerAuditError::InvalidConfig(
                "solver_years must name at least one year".to_string(),
            ));
        }
        if let Some(year) = self.solver_years.iter().find(|y| !(1900..=2999).contains(*y)) {
            return Err(LedgerAuditError::InvalidConfig(format!(
                "solver year {} is out of range",
                year
            )));
        }
        if self.balance_file.trim().is_empty() || self.voucher_file.trim().is_empty() {
            return Err(LedgerAuditError::InvalidConfig(
                "balance_file and voucher_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn balance_path(&self) -> PathBuf {
        self.data_dir.join(&self.balance_file)
    }

    pub fn voucher_path(&self) -> PathBuf {
        self.data_dir.join(&self.voucher_file)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| self.data_dir.clone())
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir().join("validation_report.txt")
    }

    pub fn error_table_path(&self) -> PathBuf {
        self.output_dir().join("validation_errors.csv")
    }

    pub fn adjustment_log_path(&self) -> PathBuf {
        self.output_dir().join("opening_balance_adjustment_report.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: AuditConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AuditConfig::default());
        assert_eq!(
            config.balance_path(),
            PathBuf::from("format-data/financial/final_enhanced_balance.csv")
        );
        assert_eq!(config.output_dir(), config.data_dir);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config: AuditConfig =
            serde_json::from_str(r#"{"data_dir": "/tmp/gl", "solver_years": [2025], "output_dir": "/tmp/out"}"#)
                .unwrap();
        assert_eq!(config.solver_years, BTreeSet::from([2025]));
        assert_eq!(config.report_path(), PathBuf::from("/tmp/out/validation_report.txt"));
        assert_eq!(config.voucher_file, "final_voucher_detail.csv");
    }

    #[test]
    fn test_validate_rejects_empty_years() {
        let config = AuditConfig {
            solver_years: BTreeSet::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LedgerAuditError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        fs::write(&path, r#"{"report_error_limit": 3}"#).unwrap();
        let config = AuditConfig::from_file(&path).unwrap();
        assert_eq!(config.report_error_limit, 3);

        assert!(AuditConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
