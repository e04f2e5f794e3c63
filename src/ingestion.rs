//! CSV loading and write-back for the balance and voucher extracts.
//!
//! Headers are matched by their Chinese names or an English alias. Numeric
//! cells are coerced rather than rejected; only a missing file or a missing
//! required column aborts a load.

use crate::error::{LedgerAuditError, Result};
use crate::schema::{Amounts, BalanceRecord, BalanceTable, VoucherRecord, VoucherTable};
use crate::utils::{parse_amount, parse_bool_flag, parse_date, parse_fiscal_year};
use chrono::Local;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const COMPANY: &[&str] = &["公司", "company"];
const PERIOD: &[&str] = &["期间", "period"];
const ACCOUNT_CODE: &[&str] = &["科目编码", "account_code"];
const ACCOUNT_CODE_PATH: &[&str] = &["subject_code_path", "account_code_path", "科目编码路径"];
const ACCOUNT_NAME: &[&str] = &["科目名称", "account_name"];
const ACCOUNT_NAME_PATH: &[&str] = &["subject_name_path", "account_name_path", "科目名称路径"];
const IS_DIMENSION_ROW: &[&str] = &["is_dimension_row", "是否维度行"];
const DIMENSION_NAME: &[&str] = &["核算维度名称", "dimension_name"];
const OPENING_DEBIT: &[&str] = &["期初余额借方", "opening_debit"];
const OPENING_CREDIT: &[&str] = &["期初余额贷方", "opening_credit"];
const PERIOD_DEBIT: &[&str] = &["本年累计借方", "period_debit", "cumulative_debit"];
const PERIOD_CREDIT: &[&str] = &["本年累计贷方", "period_credit", "cumulative_credit"];
const CLOSING_DEBIT: &[&str] = &["期末余额借方", "closing_debit"];
const CLOSING_CREDIT: &[&str] = &["期末余额贷方", "closing_credit"];

const ACCOUNT_FULL_NAME: &[&str] = &["科目全名", "account_full_name"];
const DATE: &[&str] = &["日期", "date"];
const VOUCHER_WORD: &[&str] = &["凭证字", "voucher_word"];
const VOUCHER_NUMBER: &[&str] = &["凭证号", "voucher_number"];
const LINE_NUMBER: &[&str] = &["分录行号", "line_number"];
const SUMMARY: &[&str] = &["摘要", "summary"];
const DEBIT_AMOUNT: &[&str] = &["借方金额", "debit_amount", "debit"];
const CREDIT_AMOUNT: &[&str] = &["贷方金额", "credit_amount", "credit"];
const ORIGINAL_AMOUNT: &[&str] = &["原币金额", "original_amount"];
const CURRENCY: &[&str] = &["币别", "currency"];
const FISCAL_YEAR: &[&str] = &["会计年度", "fiscal_year"];
const VOUCHER_ID: &[&str] = &["凭证唯一标识", "voucher_id"];

/// Header and raw cells of a loaded balance file, kept so corrections can be
/// written back with every source column intact.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    pub path: PathBuf,
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
    pub opening_debit_col: usize,
    pub opening_credit_col: usize,
}

struct HeaderIndex<'a> {
    path: &'a Path,
    columns: HashMap<String, usize>,
}

impl<'a> HeaderIndex<'a> {
    fn new(path: &'a Path, headers: &StringRecord) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
            .collect();
        Self { path, columns }
    }

    fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|a| self.columns.get(&a.to_lowercase()).copied())
    }

    fn require(&self, aliases: &[&str]) -> Result<usize> {
        self.find(aliases).ok_or_else(|| LedgerAuditError::MalformedInput {
            path: self.path.to_path_buf(),
            details: format!("missing required column '{}'", aliases.join("' / '")),
        })
    }
}

/// Trimmed cell text; pandas-style null placeholders read as blank.
fn text(record: &StringRecord, col: Option<usize>) -> String {
    let raw = col.and_then(|c| record.get(c)).unwrap_or("").trim();
    match raw {
        "nan" | "NaN" | "None" | "null" | "NULL" => String::new(),
        other => other.to_string(),
    }
}

fn amount(record: &StringRecord, col: usize) -> f64 {
    parse_amount(record.get(col).unwrap_or(""))
}

fn ensure_exists(role: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(LedgerAuditError::MissingInputFile {
        role: role.to_string(),
        path: path.to_path_buf(),
    })
}

fn read_all(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| LedgerAuditError::MalformedInput {
            path: path.to_path_buf(),
            details: format!("row {}: {}", idx + 2, e),
        })?;
        rows.push(record);
    }

    Ok((headers, rows))
}

pub fn load_balance_table<P: AsRef<Path>>(path: P) -> Result<BalanceTable> {
    let path = path.as_ref();
    ensure_exists("balance", path)?;
    info!("Loading balance table: {}", path.display());

    let (headers, rows) = read_all(path)?;
    let index = HeaderIndex::new(path, &headers);

    let company = index.require(COMPANY)?;
    let period = index.require(PERIOD)?;
    let code = index.require(ACCOUNT_CODE)?;
    let name = index.require(ACCOUNT_NAME)?;
    let opening_debit = index.require(OPENING_DEBIT)?;
    let opening_credit = index.require(OPENING_CREDIT)?;
    let period_debit = index.require(PERIOD_DEBIT)?;
    let period_credit = index.require(PERIOD_CREDIT)?;
    let closing_debit = index.require(CLOSING_DEBIT)?;
    let closing_credit = index.require(CLOSING_CREDIT)?;

    let code_path = index.find(ACCOUNT_CODE_PATH);
    let name_path = index.find(ACCOUNT_NAME_PATH);
    let dimension_flag = index.find(IS_DIMENSION_ROW);
    let dimension_name = index.find(DIMENSION_NAME);

    if dimension_flag.is_none() {
        debug!("No is_dimension_row column; inferring from dimension names");
    }

    let records: Vec<BalanceRecord> = rows
        .iter()
        .map(|row| {
            let dimension = Some(text(row, dimension_name)).filter(|d| !d.is_empty());
            let is_dimension_row = match dimension_flag {
                Some(col) => parse_bool_flag(row.get(col).unwrap_or("")),
                None => dimension.is_some(),
            };

            BalanceRecord {
                company: text(row, Some(company)),
                period: text(row, Some(period)),
                account_code: text(row, Some(code)),
                account_code_path: text(row, code_path),
                account_name: text(row, Some(name)),
                account_name_path: text(row, name_path),
                is_dimension_row,
                dimension_name: dimension,
                opening: Amounts::new(amount(row, opening_debit), amount(row, opening_credit)),
                cumulative: Amounts::new(amount(row, period_debit), amount(row, period_credit)),
                closing: Amounts::new(amount(row, closing_debit), amount(row, closing_credit)),
            }
        })
        .collect();

    info!("Loaded {} balance rows", records.len());

    Ok(BalanceTable {
        records,
        layout: Some(SourceLayout {
            path: path.to_path_buf(),
            headers,
            rows,
            opening_debit_col: opening_debit,
            opening_credit_col: opening_credit,
        }),
    })
}

pub fn load_voucher_table<P: AsRef<Path>>(path: P) -> Result<VoucherTable> {
    let path = path.as_ref();
    ensure_exists("voucher", path)?;
    info!("Loading voucher table: {}", path.display());

    let (headers, rows) = read_all(path)?;
    let index = HeaderIndex::new(path, &headers);

    let company = index.require(COMPANY)?;
    let code = index.require(ACCOUNT_CODE)?;
    let date = index.require(DATE)?;
    let debit = index.require(DEBIT_AMOUNT)?;
    let credit = index.require(CREDIT_AMOUNT)?;

    let full_name = index.find(ACCOUNT_FULL_NAME);
    let word = index.find(VOUCHER_WORD);
    let number = index.find(VOUCHER_NUMBER);
    let line = index.find(LINE_NUMBER);
    let summary = index.find(SUMMARY);
    let original = index.find(ORIGINAL_AMOUNT);
    let currency = index.find(CURRENCY);
    let fiscal_year = index.find(FISCAL_YEAR);
    let voucher_id = index.find(VOUCHER_ID);

    let mut undated = 0;
    let records: Vec<VoucherRecord> = rows
        .iter()
        .map(|row| {
            let parsed_date = parse_date(&text(row, Some(date)));
            if parsed_date.is_none() {
                undated += 1;
            }

            VoucherRecord {
                company: text(row, Some(company)),
                account_code: text(row, Some(code)),
                account_full_name: text(row, full_name),
                date: parsed_date,
                voucher_word: text(row, word),
                voucher_number: text(row, number),
                line_number: text(row, line),
                summary: text(row, summary),
                debit_amount: amount(row, debit),
                credit_amount: amount(row, credit),
                original_amount: original.map(|c| amount(row, c)).unwrap_or(0.0),
                currency: text(row, currency),
                fiscal_year: parse_fiscal_year(&text(row, fiscal_year)),
                voucher_id: text(row, voucher_id),
            }
        })
        .collect();

    if undated > 0 {
        warn!("{} voucher lines have no parseable date", undated);
    }
    info!("Loaded {} voucher lines", records.len());

    Ok(VoucherTable::new(records))
}

fn format_cell(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{}", rounded)
}

const CANONICAL_BALANCE_HEADERS: [&str; 14] = [
    "公司",
    "期间",
    "科目编码",
    "subject_code_path",
    "科目名称",
    "subject_name_path",
    "is_dimension_row",
    "核算维度名称",
    "期初余额借方",
    "期初余额贷方",
    "本年累计借方",
    "本年累计贷方",
    "期末余额借方",
    "期末余额贷方",
];

/// Writes the table as CSV. A table loaded from disk keeps its original columns
/// and raw cell text; only rows whose opening pair no longer matches the source
/// get their opening debit/credit cells rewritten.
pub fn write_balance_table<P: AsRef<Path>>(table: &BalanceTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().flexible(true).from_path(path)?;

    match &table.layout {
        Some(layout) if layout.rows.len() == table.records.len() => {
            writer.write_record(&layout.headers)?;
            let mut rewritten = 0;
            for (raw, record) in layout.rows.iter().zip(&table.records) {
                let source = Amounts::new(
                    amount(raw, layout.opening_debit_col),
                    amount(raw, layout.opening_credit_col),
                );
                if source == record.opening {
                    writer.write_record(raw)?;
                    continue;
                }

                rewritten += 1;
                let mut cells: Vec<String> = raw.iter().map(str::to_string).collect();
                let width = layout.opening_debit_col.max(layout.opening_credit_col) + 1;
                if cells.len() < width {
                    cells.resize(width, String::new());
                }
                cells[layout.opening_debit_col] = format_cell(record.opening.debit);
                cells[layout.opening_credit_col] = format_cell(record.opening.credit);
                writer.write_record(&cells)?;
            }
            debug!("Rewrote opening cells of {} rows", rewritten);
        }
        _ => {
            writer.write_record(CANONICAL_BALANCE_HEADERS)?;
            for r in &table.records {
                writer.write_record([
                    r.company.clone(),
                    r.period.clone(),
                    r.account_code.clone(),
                    r.account_code_path.clone(),
                    r.account_name.clone(),
                    r.account_name_path.clone(),
                    r.is_dimension_row.to_string(),
                    r.dimension_name.clone().unwrap_or_default(),
                    format_cell(r.opening.debit),
                    format_cell(r.opening.credit),
                    format_cell(r.cumulative.debit),
                    format_cell(r.cumulative.credit),
                    format_cell(r.closing.debit),
                    format_cell(r.closing.credit),
                ])?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// `<stem>_backup_<YYYYmmdd_HHMMSS>.csv` next to the original.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "balance".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    path.with_file_name(format!("{}_backup_{}.csv", stem, stamp))
}

/// Backs up `path`, writes the corrected table to a temporary sibling, then
/// renames it over the original. Returns the backup location.
pub fn persist_corrected_table<P: AsRef<Path>>(table: &BalanceTable, path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    ensure_exists("balance", path)?;

    let backup = backup_path_for(path);
    fs::copy(path, &backup)?;
    info!("Backed up {} to {}", path.display(), backup.display());

    let staging = path.with_extension("csv.tmp");
    if let Err(e) = write_balance_table(table, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    fs::rename(&staging, path)?;

    info!("Wrote corrected balance table to {}", path.display());
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BALANCE_CSV: &str = "\
公司,期间,科目编码,subject_code_path,科目名称,subject_name_path,is_dimension_row,核算维度名称,期初余额借方,期初余额贷方,本年累计借方,本年累计贷方,期末余额借方,期末余额贷方,备注
A,2024年第12期,1002,/1002/,银行存款,/银行存款/,False,,\"1,000.00\",0,500,200,1300,0,keep me
A,2024年第12期,,/1122/1122.01/,客户甲,/应收账款/客户甲/,True,客户甲,--,nan,10,0,10,0,
";

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_balance_table_coerces_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "balance.csv", BALANCE_CSV);

        let table = load_balance_table(&path).unwrap();
        assert_eq!(table.len(), 2);

        let bank = &table.records[0];
        assert_eq!(bank.account_code, "1002");
        assert_eq!(bank.opening, Amounts::new(1000.0, 0.0));
        assert!(!bank.is_dimension_row);
        assert_eq!(bank.year(), Some(2024));

        let customer = &table.records[1];
        assert!(customer.is_dimension_row);
        assert_eq!(customer.dimension(), Some("客户甲"));
        assert_eq!(customer.effective_code(), "1122.01");
        assert_eq!(customer.opening, Amounts::default());
    }

    #[test]
    fn test_missing_file_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        assert!(matches!(
            load_balance_table(&missing),
            Err(LedgerAuditError::MissingInputFile { .. })
        ));

        let path = write_file(dir.path(), "short.csv", "公司,期间,科目编码\nA,2024,1002\n");
        match load_balance_table(&path) {
            Err(LedgerAuditError::MalformedInput { details, .. }) => {
                assert!(details.contains("科目名称"));
            }
            other => panic!("expected malformed input, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_load_voucher_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "voucher.csv",
            "公司,科目编码,科目全名,日期,凭证字,凭证号,分录行号,摘要,借方金额,贷方金额,会计年度,凭证唯一标识\n\
             B,6602,管理费用_办公费,2024-03-10,记,12,1,购买办公用品,\"1,200.50\",,\"2,024\",B-2024-记-12\n",
        );

        let table = load_voucher_table(&path).unwrap();
        let line = &table.records[0];
        assert_eq!(line.fiscal_year, Some(2024));
        assert_eq!(line.calendar_year(), Some(2024));
        assert!((line.debit_amount - 1200.5).abs() < 0.01);
        assert_eq!(line.credit_amount, 0.0);
        assert_eq!(line.voucher_key(), "B-2024-记-12");
    }

    #[test]
    fn test_persist_keeps_extra_columns_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "balance.csv", BALANCE_CSV);

        let mut table = load_balance_table(&path).unwrap();
        table.records[0].opening = Amounts::new(1100.0, 0.0);

        let backup = persist_corrected_table(&table, &path).unwrap();
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(&backup).unwrap(), BALANCE_CSV);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("keep me"));
        assert!(written.contains(",1100,0,"));

        let reloaded = load_balance_table(&path).unwrap();
        assert_eq!(reloaded.records[0].opening, Amounts::new(1100.0, 0.0));
        assert_eq!(reloaded.records[1].closing, table.records[1].closing);
    }

    #[test]
    fn test_persist_leaves_unadjusted_rows_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let source = "\
公司,期间,科目编码,科目名称,期初余额借方,期初余额贷方,本年累计借方,本年累计贷方,期末余额借方,期末余额贷方
A,2024,1002,银行存款,\"1,000.004\",--,500,200,1300.004,0
A,2024,1122,应收账款,0,nan,800,300,1500,0
";
        let path = write_file(dir.path(), "balance.csv", source);

        let mut table = load_balance_table(&path).unwrap();
        table.records[1].opening = Amounts::new(1000.0, 0.0);
        persist_corrected_table(&table, &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], source.lines().next().unwrap());
        assert_eq!(lines[1], "A,2024,1002,银行存款,\"1,000.004\",--,500,200,1300.004,0");
        assert_eq!(lines[2], "A,2024,1122,应收账款,1000,0,800,300,1500,0");
    }

    #[test]
    fn test_backup_name() {
        let backup = backup_path_for(Path::new("/data/final_enhanced_balance.csv"));
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("final_enhanced_balance_backup_"));
        assert!(name.ends_with(".csv"));
    }
}
