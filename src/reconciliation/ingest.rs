//! Bank statement ingest
//!
//! Turns tabular bank exports (or manually keyed rows) into normalized
//! statement lines. Bad rows are reported by row number and skipped; the
//! rest of the batch is still stored.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::{BalancePolicy, EngineConfig};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{fits_scale, within_magnitude, MAX_INTEGER_DIGITS};

/// Date layouts tried in order; the first that parses wins
pub const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%m/%d/%Y"];

const REQUIRED_COLUMNS: [&str; 5] = ["Date", "Description", "Debit", "Credit", "Balance"];

/// One unparsed statement row as it arrived
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawStatementRow {
    /// 1-based row number in the source, header included
    pub row: usize,
    pub date: String,
    pub description: String,
    pub debit: String,
    pub credit: String,
    pub balance: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

impl RowError {
    fn new(row: usize, message: impl Into<String>) -> Self {
        Self {
            row,
            message: message.into(),
        }
    }
}

/// A reported running balance that disagrees with the recomputed one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDivergence {
    pub row: usize,
    pub reported: BigDecimal,
    pub computed: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub lines_created: usize,
    pub row_errors: Vec<RowError>,
    pub balance_divergences: Vec<BalanceDivergence>,
}

/// Totals over every line of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSummary {
    pub statement_id: StatementId,
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    /// Opening plus credits minus debits
    pub calculated_closing: BigDecimal,
    pub line_count: usize,
    pub reconciled_count: usize,
    pub unreconciled_count: usize,
}

/// Parse a date trying each of [`DATE_FORMATS`]
pub fn parse_statement_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Parse an amount cell. Thousands separators are dropped and a blank cell is zero.
///
/// Only plain decimals are accepted: exponent notation is an error, as is
/// anything beyond [`MAX_INTEGER_DIGITS`] integer digits.
pub fn parse_statement_amount(value: &str) -> Result<BigDecimal, String> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Ok(BigDecimal::from(0));
    }
    if cleaned.contains(|c: char| c == 'e' || c == 'E') {
        return Err(format!("invalid amount '{}'", value.trim()));
    }
    let amount = BigDecimal::from_str(&cleaned)
        .map_err(|_| format!("invalid amount '{}'", value.trim()))?;
    if !within_magnitude(&amount) {
        return Err(format!(
            "amount '{}' exceeds {} integer digits",
            value.trim(),
            MAX_INTEGER_DIGITS
        ));
    }
    Ok(amount)
}

/// Split CSV text into raw rows.
///
/// A header missing a required column yields a single row-1 error and no rows.
pub fn parse_statement_csv(text: &str) -> (Vec<RawStatementRow>, Vec<RowError>) {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => return (Vec::new(), vec![RowError::new(1, e.to_string())]),
    };
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| column(name).is_none())
        .collect();
    if !missing.is_empty() {
        return (
            Vec::new(),
            vec![RowError::new(
                1,
                format!("missing required columns: {}", missing.join(", ")),
            )],
        );
    }

    let date = column("Date");
    let description = column("Description");
    let debit = column("Debit");
    let credit = column("Credit");
    let balance = column("Balance");
    let reference = column("Reference");
    let short_ref = column("Ref");

    let cell = |record: &StringRecord, idx: Option<usize>| -> String {
        idx.and_then(|i| record.get(i))
            .unwrap_or("")
            .trim()
            .to_string()
    };

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 2;
        match result {
            Ok(record) => {
                let mut reference_value = cell(&record, reference);
                if reference_value.is_empty() {
                    reference_value = cell(&record, short_ref);
                }
                rows.push(RawStatementRow {
                    row,
                    date: cell(&record, date),
                    description: cell(&record, description),
                    debit: cell(&record, debit),
                    credit: cell(&record, credit),
                    balance: cell(&record, balance),
                    reference: reference_value,
                });
            }
            Err(e) => errors.push(RowError::new(row, e.to_string())),
        }
    }
    (rows, errors)
}

struct ParsedRow {
    date: NaiveDate,
    description: String,
    debit: BigDecimal,
    credit: BigDecimal,
    reported_balance: Option<BigDecimal>,
    reference: String,
}

fn parse_row(raw: &RawStatementRow, scale: i64) -> Result<ParsedRow, String> {
    let zero = BigDecimal::from(0);
    let date = parse_statement_date(&raw.date)
        .ok_or_else(|| format!("invalid date format '{}'", raw.date.trim()))?;
    let debit = parse_statement_amount(&raw.debit)?;
    let credit = parse_statement_amount(&raw.credit)?;

    if debit < zero || credit < zero {
        return Err("amounts cannot be negative".to_string());
    }
    match (debit > zero, credit > zero) {
        (true, true) => return Err("row has both a debit and a credit".to_string()),
        (false, false) => return Err("row has neither a debit nor a credit".to_string()),
        _ => {}
    }
    if !fits_scale(&debit, scale) || !fits_scale(&credit, scale) {
        return Err(format!("amount has more than {} fractional digits", scale));
    }

    let reported_balance = if raw.balance.trim().is_empty() {
        None
    } else {
        Some(parse_statement_amount(&raw.balance)?)
    };

    Ok(ParsedRow {
        date,
        description: raw.description.trim().to_string(),
        debit,
        credit,
        reported_balance,
        reference: raw.reference.trim().to_string(),
    })
}

/// Loads bank accounts, statements and statement lines
pub struct StatementIngest<S: LedgerStorage> {
    storage: S,
    config: EngineConfig,
}

impl<S: LedgerStorage> StatementIngest<S> {
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Link a bank account to the ledger account that carries its cash book
    pub async fn register_bank_account(&mut self, bank_account: BankAccount) -> LedgerResult<BankAccount> {
        if bank_account.id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Bank account ID cannot be empty".to_string(),
            ));
        }
        if self
            .storage
            .get_account(&bank_account.gl_account_id)
            .await?
            .is_none()
        {
            return Err(LedgerError::AccountNotFound(bank_account.gl_account_id.clone()));
        }
        if self.storage.get_bank_account(&bank_account.id).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Bank account '{}' already exists",
                bank_account.id
            )));
        }
        self.storage.save_bank_account(&bank_account).await?;
        info!(bank_account = %bank_account.id, gl_account = %bank_account.gl_account_id, "bank account registered");
        Ok(bank_account)
    }

    pub async fn create_statement(
        &mut self,
        bank_account_id: &str,
        month: u32,
        fiscal_period: &str,
        opening_balance: BigDecimal,
        closing_balance: BigDecimal,
    ) -> LedgerResult<BankStatement> {
        if !(1..=12).contains(&month) {
            return Err(LedgerError::Validation(format!(
                "Month must be between 1 and 12, got {}",
                month
            )));
        }
        if fiscal_period.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Fiscal period cannot be empty".to_string(),
            ));
        }
        let scale = self.config.amount_scale;
        if !within_magnitude(&opening_balance) || !within_magnitude(&closing_balance) {
            return Err(LedgerError::Validation(format!(
                "Statement balances may carry at most {} integer digits",
                MAX_INTEGER_DIGITS
            )));
        }
        if !fits_scale(&opening_balance, scale) || !fits_scale(&closing_balance, scale) {
            return Err(LedgerError::Validation(format!(
                "Statement balances may carry at most {} fractional digits",
                scale
            )));
        }
        if self.storage.get_bank_account(bank_account_id).await?.is_none() {
            return Err(LedgerError::BankAccountNotFound(bank_account_id.to_string()));
        }

        let now = chrono::Utc::now().naive_utc();
        let statement = self
            .storage
            .insert_statement(BankStatement {
                id: 0,
                bank_account_id: bank_account_id.to_string(),
                month,
                fiscal_period: fiscal_period.to_string(),
                opening_balance,
                closing_balance,
                status: StatementStatus::Draft,
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(statement_id = statement.id, bank_account = bank_account_id, month, "statement created");
        Ok(statement)
    }

    /// Parse CSV text and append its rows to a statement
    pub async fn ingest_csv(
        &mut self,
        statement_id: StatementId,
        text: &str,
    ) -> LedgerResult<IngestReport> {
        let statement = self.open_statement(statement_id).await?;
        let (rows, parse_errors) = parse_statement_csv(text);
        self.store_rows(&statement, rows, parse_errors).await
    }

    /// Append manually keyed rows to a statement
    pub async fn ingest_rows(
        &mut self,
        statement_id: StatementId,
        rows: Vec<RawStatementRow>,
    ) -> LedgerResult<IngestReport> {
        let statement = self.open_statement(statement_id).await?;
        self.store_rows(&statement, rows, Vec::new()).await
    }

    pub async fn get_statement(&self, statement_id: StatementId) -> LedgerResult<BankStatement> {
        self.storage
            .get_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))
    }

    pub async fn statement_lines(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        self.storage.statement_lines(statement_id, false).await
    }

    pub async fn statement_summary(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<StatementSummary> {
        let statement = self.get_statement(statement_id).await?;
        let lines = self.storage.statement_lines(statement_id, false).await?;

        let total_debits: BigDecimal = lines.iter().map(|l| &l.debit).sum();
        let total_credits: BigDecimal = lines.iter().map(|l| &l.credit).sum();
        let reconciled_count = lines.iter().filter(|l| l.is_reconciled).count();

        Ok(StatementSummary {
            statement_id,
            calculated_closing: &statement.opening_balance + &total_credits - &total_debits,
            opening_balance: statement.opening_balance,
            closing_balance: statement.closing_balance,
            total_debits,
            total_credits,
            line_count: lines.len(),
            reconciled_count,
            unreconciled_count: lines.len() - reconciled_count,
        })
    }

    async fn open_statement(&self, statement_id: StatementId) -> LedgerResult<BankStatement> {
        let statement = self.get_statement(statement_id).await?;
        if statement.is_closed() {
            return Err(LedgerError::StatementClosed(statement_id));
        }
        Ok(statement)
    }

    async fn store_rows(
        &mut self,
        statement: &BankStatement,
        rows: Vec<RawStatementRow>,
        mut row_errors: Vec<RowError>,
    ) -> LedgerResult<IngestReport> {
        let existing = self.storage.statement_lines(statement.id, false).await?;
        let mut running = existing
            .iter()
            .max_by_key(|l| l.id)
            .map(|l| l.balance.clone())
            .unwrap_or_else(|| statement.opening_balance.clone());

        let mut divergences = Vec::new();
        let mut lines = Vec::new();
        for raw in &rows {
            let parsed = match parse_row(raw, self.config.amount_scale) {
                Ok(parsed) => parsed,
                Err(message) => {
                    debug!(statement_id = statement.id, row = raw.row, %message, "row skipped");
                    row_errors.push(RowError::new(raw.row, message));
                    continue;
                }
            };

            let computed = &running + &parsed.credit - &parsed.debit;
            let balance = match parsed.reported_balance {
                Some(reported) if reported != computed => {
                    warn!(
                        statement_id = statement.id,
                        row = raw.row,
                        %reported,
                        %computed,
                        "reported balance diverges"
                    );
                    divergences.push(BalanceDivergence {
                        row: raw.row,
                        reported: reported.clone(),
                        computed: computed.clone(),
                    });
                    match self.config.balance_policy {
                        BalancePolicy::Recompute => computed,
                        BalancePolicy::TrustSource => reported,
                    }
                }
                _ => computed,
            };
            running = balance.clone();

            lines.push(BankStatementLine {
                id: 0,
                statement_id: statement.id,
                date: parsed.date,
                description: parsed.description,
                debit: parsed.debit,
                credit: parsed.credit,
                reference: parsed.reference,
                balance,
                is_reconciled: false,
                reconciled_date: None,
                matched_entry: None,
                match_group: None,
            });
        }

        let lines_created = if lines.is_empty() {
            0
        } else {
            self.storage
                .insert_statement_lines(statement.id, lines)
                .await?
                .len()
        };
        row_errors.sort_by_key(|e| e.row);

        info!(
            statement_id = statement.id,
            lines_created,
            row_errors = row_errors.len(),
            divergences = divergences.len(),
            "statement rows ingested"
        );
        Ok(IngestReport {
            lines_created,
            row_errors,
            balance_divergences: divergences,
        })
    }
}
