//! JSON-lines tool protocol over a [`LedgerSnapshot`].
//!
//! Each input line is one request:
//! `{"id": 1, "method": "call_tool", "name": "query_balance_sheet", "arguments": {...}}`
//! and produces exactly one response line:
//! `{"id": 1, "content": [{"type": "text", "text": "..."}], "is_error": false}`.
//! A failing request yields an error response and the loop keeps reading.

use crate::error::{LedgerAuditError, Result};
use crate::query::{
    AccountSearch, AccountSearchResult, BalanceQuery, BalanceQueryResult, ConsistencyQuery,
    ConsistencyReport, DimensionDetails, DimensionQuery, FinancialSummary, HierarchyQuery,
    HierarchyView, LedgerSnapshot, SummaryQuery, TransactionSearch, TransactionSearchResult,
    VoucherQuery, VoucherQueryResult,
};
use crate::schema::{BalanceRecord, VoucherRecord};
use crate::utils::format_amount;
use log::{debug, info, warn};
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn describe<T: JsonSchema>(name: &'static str, description: &'static str) -> Result<ToolSpec> {
    Ok(ToolSpec {
        name,
        description,
        input_schema: serde_json::to_value(schema_for!(T))?,
    })
}

pub fn list_tools() -> Result<Vec<ToolSpec>> {
    Ok(vec![
        describe::<BalanceQuery>(
            "query_balance_sheet",
            "Query the account balance table by company, period, account code, code path, dimension or name path",
        )?,
        describe::<VoucherQuery>(
            "query_voucher_details",
            "Query voucher lines by company, account, voucher number, date range and amount range",
        )?,
        describe::<HierarchyQuery>(
            "analyze_subject_hierarchy",
            "List an account and all of its sub-accounts with depth and totals",
        )?,
        describe::<SummaryQuery>(
            "get_financial_summary",
            "Record counts, companies, period and date ranges and totals for either table",
        )?,
        describe::<ConsistencyQuery>(
            "validate_data_consistency",
            "Compare one account's year-to-date movement in the balance table with its voucher lines",
        )?,
        describe::<TransactionSearch>(
            "search_transactions",
            "Search voucher summaries (摘要) by keyword with synonym and fuzzy fallback",
        )?,
        describe::<AccountSearch>(
            "find_subject_by_name",
            "Find account codes by account name, with synonym and relaxed matching",
        )?,
        describe::<DimensionQuery>(
            "query_dimension_details",
            "Break an account down by auxiliary dimension (counterparty, department, project)",
        )?,
    ])
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|e| LedgerAuditError::InvalidToolArguments {
        tool: tool.to_string(),
        details: e.to_string(),
    })
}

/// Runs one tool and renders its result as text.
pub fn call_tool(snapshot: &LedgerSnapshot, name: &str, arguments: &Value) -> Result<String> {
    debug!("Tool call {} with {}", name, arguments);
    match name {
        "query_balance_sheet" => Ok(render_balances(&snapshot.balances(&parse_args(name, arguments)?))),
        "query_voucher_details" => Ok(render_vouchers(&snapshot.vouchers(&parse_args(name, arguments)?)?)),
        "analyze_subject_hierarchy" => Ok(render_hierarchy(&snapshot.hierarchy(&parse_args(name, arguments)?))),
        "get_financial_summary" => Ok(render_summary(&snapshot.summary(&parse_args(name, arguments)?))),
        "validate_data_consistency" => {
            Ok(render_consistency(&snapshot.consistency(&parse_args(name, arguments)?)))
        }
        "search_transactions" => Ok(render_search(&snapshot.search_transactions(&parse_args(name, arguments)?)?)),
        "find_subject_by_name" => Ok(render_accounts(&snapshot.find_accounts(&parse_args(name, arguments)?))),
        "query_dimension_details" => {
            Ok(render_dimensions(&snapshot.dimension_details(&parse_args(name, arguments)?)))
        }
        other => Err(LedgerAuditError::UnknownTool(other.to_string())),
    }
}

fn balance_line(out: &mut String, r: &BalanceRecord) {
    let _ = write!(
        out,
        "{} | {} | {} {}",
        r.company,
        r.period,
        r.effective_code(),
        r.account_name
    );
    if let Some(d) = r.dimension() {
        let _ = write!(out, " [{}]", d);
    }
    let _ = writeln!(
        out,
        " | opening {}/{} | period {}/{} | closing {}/{}",
        format_amount(r.opening.debit),
        format_amount(r.opening.credit),
        format_amount(r.cumulative.debit),
        format_amount(r.cumulative.credit),
        format_amount(r.closing.debit),
        format_amount(r.closing.credit),
    );
}

fn voucher_line(out: &mut String, v: &VoucherRecord) {
    let date = v.date.map(|d| d.to_string()).unwrap_or_default();
    let _ = writeln!(
        out,
        "{} | {} | {}-{} | {} {} | {} | debit {} | credit {}",
        date,
        v.company,
        v.voucher_word,
        v.voucher_number,
        v.account_code,
        v.account_full_name,
        v.summary,
        format_amount(v.debit_amount),
        format_amount(v.credit_amount),
    );
}

fn truncation_note(out: &mut String, shown: usize, total: usize) {
    if total > shown {
        let _ = writeln!(out, "... showing {} of {} matches", shown, total);
    }
}

fn render_balances(result: &BalanceQueryResult) -> String {
    if result.rows.is_empty() {
        return "No balance rows matched the query".to_string();
    }
    let mut out = format!("{} balance rows matched\n", result.total_matches);
    for row in &result.rows {
        balance_line(&mut out, row);
    }
    truncation_note(&mut out, result.rows.len(), result.total_matches);
    out
}

fn render_vouchers(result: &VoucherQueryResult) -> String {
    if result.lines.is_empty() {
        return "No voucher lines matched the query".to_string();
    }
    let mut out = format!("{} voucher lines matched\n", result.total_matches);
    for line in &result.lines {
        voucher_line(&mut out, line);
    }
    truncation_note(&mut out, result.lines.len(), result.total_matches);
    out
}

fn render_hierarchy(view: &HierarchyView) -> String {
    if view.nodes.is_empty() {
        return format!("No rows found under account {}", view.account_code);
    }
    let mut out = format!(
        "Account {} ({}), {} rows\n",
        view.account_code,
        view.class,
        view.nodes.len()
    );
    for node in &view.nodes {
        out.push_str(&"  ".repeat(node.depth));
        balance_line(&mut out, &node.record);
    }
    let _ = writeln!(
        out,
        "Totals: period {}/{} | closing {}/{}",
        format_amount(view.period_total.debit),
        format_amount(view.period_total.credit),
        format_amount(view.closing_total.debit),
        format_amount(view.closing_total.credit),
    );
    out
}

fn render_summary(summary: &FinancialSummary) -> String {
    let mut out = String::new();
    if let Some(b) = &summary.balance {
        let _ = writeln!(out, "Balance table: {} rows, {} companies", b.records, b.companies);
        if let Some((first, last)) = &b.period_range {
            let _ = writeln!(out, "  periods {} .. {}", first, last);
        }
        if let Some((first, last)) = b.year_range {
            let _ = writeln!(out, "  years {} .. {}", first, last);
        }
        for (company, count) in &b.per_company {
            let _ = writeln!(out, "  {}: {}", company, count);
        }
    }
    if let Some(v) = &summary.voucher {
        let _ = writeln!(
            out,
            "Voucher table: {} lines in {} vouchers, {} companies",
            v.lines, v.distinct_vouchers, v.companies
        );
        if let Some((first, last)) = v.date_range {
            let _ = writeln!(out, "  dates {} .. {}", first, last);
        }
        let _ = writeln!(
            out,
            "  total debit {} | total credit {}",
            format_amount(v.total.debit),
            format_amount(v.total.credit)
        );
        for (company, count) in &v.per_company {
            let _ = writeln!(out, "  {}: {}", company, count);
        }
    }
    out
}

fn render_consistency(report: &ConsistencyReport) -> String {
    let status = if report.passed { "PASSED" } else { "FAILED" };
    let mut out = format!(
        "Consistency check for {} ({}): {}\n",
        report.account_code, report.class, status
    );
    if let Some(b) = &report.balance {
        let _ = writeln!(
            out,
            "  balance table: {} rows, period debit {} credit {}",
            b.rows,
            format_amount(b.period.debit),
            format_amount(b.period.credit)
        );
    }
    if let Some(v) = &report.voucher {
        let _ = writeln!(
            out,
            "  vouchers: {} lines, debit {} credit {}, net {}",
            v.lines,
            format_amount(v.total.debit),
            format_amount(v.total.credit),
            format_amount(v.net)
        );
    }
    for d in &report.differences {
        let _ = writeln!(out, "  {}", d);
    }
    for w in &report.warnings {
        let _ = writeln!(out, "  warning: {}", w);
    }
    out
}

fn render_search(result: &TransactionSearchResult) -> String {
    let Some(tier) = result.tier else {
        return format!("No transactions matched '{}'", result.keyword);
    };
    let mut out = format!(
        "{} transactions matched '{}' ({:?} match)\n",
        result.total_matches, result.keyword, tier
    );
    for line in &result.lines {
        voucher_line(&mut out, line);
    }
    truncation_note(&mut out, result.lines.len(), result.total_matches);
    out
}

fn render_accounts(result: &AccountSearchResult) -> String {
    if result.matches.is_empty() {
        return format!("No accounts matched '{}'", result.name);
    }
    let mut out = format!("{} accounts matched '{}'\n", result.matches.len(), result.name);
    for m in &result.matches {
        let _ = write!(
            out,
            "{} {} ({}) | {} | closing {}/{} | {}",
            m.account_code,
            m.account_name,
            m.match_kind,
            m.code_path,
            format_amount(m.closing_total.debit),
            format_amount(m.closing_total.credit),
            m.companies.join(", ")
        );
        if m.other_companies > 0 {
            let _ = write!(out, " and {} more", m.other_companies);
        }
        out.push('\n');
    }
    if result.truncated {
        out.push_str("... more accounts matched; raise the limit to see them\n");
    }
    out
}

fn render_dimensions(details: &DimensionDetails) -> String {
    if details.dimensions.is_empty() {
        return format!("No dimension rows found under account {}", details.account_code);
    }
    let mut out = format!(
        "Account {} ({}): {} dimensions\n",
        details.account_code, details.class, details.total_dimensions
    );
    for d in &details.dimensions {
        let _ = writeln!(
            out,
            "{} | period {}/{} | closing {} {} | {} rows",
            d.dimension_name,
            format_amount(d.period.debit),
            format_amount(d.period.credit),
            d.balance_side.label(),
            format_amount(d.closing_net.abs()),
            d.record_count
        );
    }
    truncation_note(&mut out, details.dimensions.len(), details.total_dimensions);
    out
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: Value,
    pub content: Vec<TextContent>,
    pub is_error: bool,
}

impl ToolResponse {
    fn text(id: Value, text: String, is_error: bool) -> Self {
        Self {
            id,
            content: vec![TextContent {
                kind: "text".to_string(),
                text,
            }],
            is_error,
        }
    }
}

fn dispatch(snapshot: &LedgerSnapshot, request: &ToolRequest) -> Result<String> {
    match request.method.as_str() {
        "list_tools" => Ok(serde_json::to_string_pretty(&list_tools()?)?),
        "call_tool" => {
            let name = request.name.as_deref().unwrap_or_default();
            call_tool(snapshot, name, &request.arguments)
        }
        other => Err(LedgerAuditError::UnknownTool(format!("method '{}'", other))),
    }
}

/// Answers one request line. Never fails; errors are reported in the response.
pub fn handle_line(snapshot: &LedgerSnapshot, line: &str) -> ToolResponse {
    let request: ToolRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unparseable request: {}", e);
            return ToolResponse::text(Value::Null, format!("Invalid request: {}", e), true);
        }
    };

    match dispatch(snapshot, &request) {
        Ok(text) => ToolResponse::text(request.id, text, false),
        Err(e) => {
            warn!("Request {} failed: {}", request.id, e);
            ToolResponse::text(request.id, e.to_string(), true)
        }
    }
}

/// Reads requests until EOF, writing one response per non-blank line.
/// Lines that are not valid UTF-8 are answered with an error response.
/// Returns the number of requests answered.
pub fn serve<R: BufRead, W: Write>(snapshot: &LedgerSnapshot, mut reader: R, mut writer: W) -> Result<usize> {
    info!("Serving ledger tools; snapshot loaded at {}", snapshot.loaded_at());
    let mut answered = 0;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(snapshot, line.trim_end());
        serde_json::to_writer(&mut writer, &response)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        answered += 1;
    }

    info!("Input closed after {} requests", answered);
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Amounts;
    use serde_json::json;

    fn snapshot() -> LedgerSnapshot {
        let row = BalanceRecord {
            company: "甲公司".to_string(),
            period: "2024".to_string(),
            account_code: "1002".to_string(),
            account_code_path: "/1002/".to_string(),
            account_name: "银行存款".to_string(),
            account_name_path: "/银行存款/".to_string(),
            is_dimension_row: false,
            dimension_name: None,
            opening: Amounts::new(1000.0, 0.0),
            cumulative: Amounts::new(500.0, 200.0),
            closing: Amounts::new(1300.0, 0.0),
        };
        let line = VoucherRecord {
            company: "甲公司".to_string(),
            account_code: "1002".to_string(),
            account_full_name: "银行存款".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 5, 6),
            voucher_word: "记".to_string(),
            voucher_number: "7".to_string(),
            line_number: "1".to_string(),
            summary: "收到货款".to_string(),
            debit_amount: 500.0,
            credit_amount: 0.0,
            original_amount: 0.0,
            currency: "CNY".to_string(),
            fiscal_year: Some(2024),
            voucher_id: String::new(),
        };
        LedgerSnapshot::new(vec![row], vec![line])
    }

    #[test]
    fn test_list_tools_has_schemas() {
        let tools = list_tools().unwrap();
        assert_eq!(tools.len(), 8);
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        assert!(names.contains(&"query_dimension_details"));
        assert!(tools.iter().all(|t| t.input_schema.is_object()));
    }

    #[test]
    fn test_call_tool_renders_text() {
        let snap = snapshot();
        let text = call_tool(&snap, "query_balance_sheet", &json!({"subject_code": "1002"})).unwrap();
        assert!(text.contains("1 balance rows matched"));
        assert!(text.contains("1,300.00"));

        let text = call_tool(&snap, "get_financial_summary", &Value::Null).unwrap();
        assert!(text.contains("Balance table: 1 rows"));
        assert!(text.contains("Voucher table: 1 lines"));
    }

    #[test]
    fn test_call_tool_errors() {
        let snap = snapshot();
        assert!(matches!(
            call_tool(&snap, "drop_tables", &json!({})),
            Err(LedgerAuditError::UnknownTool(_))
        ));
        assert!(matches!(
            call_tool(&snap, "analyze_subject_hierarchy", &json!({"year": 2024})),
            Err(LedgerAuditError::InvalidToolArguments { .. })
        ));
        assert!(matches!(
            call_tool(&snap, "query_voucher_details", &json!({"date_start": "tomorrow"})),
            Err(LedgerAuditError::DateError(_))
        ));
    }

    #[test]
    fn test_serve_survives_bad_requests() {
        let snap = snapshot();
        let input = concat!(
            "{\"id\": 1, \"method\": \"call_tool\", \"name\": \"search_transactions\", \"arguments\": {\"keyword\": \"货款\"}}\n",
            "not json\n",
            "\n",
            "{\"id\": 3, \"method\": \"call_tool\", \"name\": \"nope\"}\n",
            "{\"id\": 4, \"method\": \"list_tools\"}\n",
        );
        let mut output = Vec::new();
        let answered = serve(&snap, input.as_bytes(), &mut output).unwrap();
        assert_eq!(answered, 4);

        let responses: Vec<ToolResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 4);
        assert!(!responses[0].is_error);
        assert!(responses[0].content[0].text.contains("收到货款"));
        assert!(responses[1].is_error);
        assert_eq!(responses[2].id, json!(3));
        assert!(responses[2].is_error);
        assert!(!responses[3].is_error);
        assert!(responses[3].content[0].text.contains("find_subject_by_name"));
    }

    #[test]
    fn test_serve_answers_invalid_utf8_and_continues() {
        let snap = snapshot();
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"id\": 1, \"method\": \"list_tools\"}\n");
        input.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        input.extend_from_slice(b"{\"id\": 3, \"method\": \"call_tool\", \"name\": \"get_financial_summary\"}");

        let mut output = Vec::new();
        let answered = serve(&snap, input.as_slice(), &mut output).unwrap();
        assert_eq!(answered, 3);

        let responses: Vec<ToolResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert!(!responses[0].is_error);
        assert!(responses[1].is_error);
        assert_eq!(responses[2].id, json!(3));
        assert!(!responses[2].is_error);
    }
}
