//! Matching ledger entries to bank statement lines

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reconciliation::brs::{self, BrsReport};
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub statement_line_id: StatementLineId,
    pub ledger_entry_id: EntryId,
    pub match_group: MatchGroupId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReconcileResult {
    pub statement_id: StatementId,
    pub matched_count: usize,
    pub unmatched_statement_lines: usize,
    pub unmatched_ledger_entries: usize,
    pub pairs: Vec<MatchedPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualMatchResult {
    /// Size of the larger side of the group, so a one-to-one pair and a
    /// one-to-many split both count each item on their busier side once
    pub matched_count: usize,
    pub lines_matched: usize,
    pub entries_matched: usize,
    pub match_group: MatchGroupId,
}

/// Statement with the bank account and cash-book account behind it
struct StatementContext {
    statement: BankStatement,
    bank_account: BankAccount,
    gl_account: Account,
}

impl StatementContext {
    fn ensure_open(&self) -> LedgerResult<()> {
        if self.statement.is_closed() {
            return Err(LedgerError::StatementClosed(self.statement.id));
        }
        Ok(())
    }

    fn entry_query(&self, fiscal_period: Option<String>, unreconciled_only: bool) -> EntryQuery {
        EntryQuery {
            organization: self.bank_account.organization.clone(),
            account_id: self.gl_account.id.clone(),
            fiscal_period,
            unreconciled_only,
        }
    }
}

/// Instrument references compare trimmed and case-insensitively
pub fn normalize_reference(reference: &str) -> String {
    reference.trim().to_uppercase()
}

/// Reconciles one bank account's cash book against its statements
pub struct ReconciliationEngine<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> ReconciliationEngine<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Pair entries and lines sharing a reference and a mirrored amount.
    ///
    /// Lines are visited by date then id; each entry and line is consumed at
    /// most once. Items already reconciled are skipped, so a rerun only picks
    /// up what is new.
    pub async fn auto_reconcile(
        &mut self,
        statement_id: StatementId,
        on: NaiveDate,
    ) -> LedgerResult<AutoReconcileResult> {
        let ctx = self.context(statement_id).await?;
        ctx.ensure_open()?;

        let entries = self
            .storage
            .query_entries(&ctx.entry_query(None, true))
            .await?;
        let lines = self.storage.statement_lines(statement_id, true).await?;

        let mut by_reference: HashMap<String, Vec<&LedgerEntryView>> = HashMap::new();
        for view in &entries {
            let Some(reference) = view.entry.instrument_ref.as_deref() else {
                continue;
            };
            let key = normalize_reference(reference);
            if !key.is_empty() {
                by_reference.entry(key).or_default().push(view);
            }
        }

        let mut consumed: HashSet<EntryId> = HashSet::new();
        let mut pairs = Vec::new();
        for line in &lines {
            let key = normalize_reference(&line.reference);
            if key.is_empty() {
                continue;
            }
            let Some(candidates) = by_reference.get(&key) else {
                continue;
            };
            let ledger_side = line.ledger_side();
            let amount = line.amount();
            let Some(view) = candidates.iter().find(|v| {
                !consumed.contains(&v.entry.id)
                    && v.entry.side() == Some(ledger_side)
                    && v.entry.amount() == amount
            }) else {
                continue;
            };

            let group = Uuid::new_v4();
            let mark = ReconciliationMark {
                statement_id,
                line_ids: vec![line.id],
                entry_ids: vec![view.entry.id],
                reconciled_on: on,
                group,
            };
            match self.storage.mark_reconciled(mark).await {
                Ok(()) => {
                    consumed.insert(view.entry.id);
                    debug!(line_id = line.id, entry_id = view.entry.id, reference = %key, "matched");
                    pairs.push(MatchedPair {
                        statement_line_id: line.id,
                        ledger_entry_id: view.entry.id,
                        match_group: group,
                    });
                }
                Err(e) if e.is_transient() => {
                    // lines are visited once; the entry stays available unless it was the one taken
                    let entry_taken = self
                        .storage
                        .get_entry(view.entry.id)
                        .await?
                        .map_or(true, |current| current.entry.is_reconciled);
                    warn!(
                        line_id = line.id,
                        entry_id = view.entry.id,
                        entry_taken,
                        error = %e,
                        "match skipped"
                    );
                    if entry_taken {
                        consumed.insert(view.entry.id);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.mark_reconciling(&ctx.statement).await?;

        let unmatched_statement_lines = self.storage.statement_lines(statement_id, true).await?.len();
        let unmatched_ledger_entries = self
            .storage
            .query_entries(&ctx.entry_query(None, true))
            .await?
            .len();

        info!(
            statement_id,
            matched = pairs.len(),
            unmatched_statement_lines,
            unmatched_ledger_entries,
            "auto reconciliation finished"
        );
        Ok(AutoReconcileResult {
            statement_id,
            matched_count: pairs.len(),
            unmatched_statement_lines,
            unmatched_ledger_entries,
            pairs,
        })
    }

    /// Reconcile an operator-chosen group whose totals mirror each other
    pub async fn manual_match(
        &mut self,
        statement_id: StatementId,
        line_ids: &[StatementLineId],
        entry_ids: &[EntryId],
        on: NaiveDate,
    ) -> LedgerResult<ManualMatchResult> {
        let ctx = self.context(statement_id).await?;
        ctx.ensure_open()?;

        if line_ids.is_empty() || entry_ids.is_empty() {
            return Err(LedgerError::Validation(
                "A manual match needs at least one statement line and one ledger entry"
                    .to_string(),
            ));
        }
        if has_duplicates(line_ids) || has_duplicates(entry_ids) {
            return Err(LedgerError::Validation(
                "A manual match cannot name the same item twice".to_string(),
            ));
        }

        let statement_lines: HashMap<StatementLineId, BankStatementLine> = self
            .storage
            .statement_lines(statement_id, false)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        let mut statement_debit = BigDecimal::from(0);
        let mut statement_credit = BigDecimal::from(0);
        for line_id in line_ids {
            let line = statement_lines
                .get(line_id)
                .ok_or(LedgerError::StatementLineNotFound(*line_id))?;
            if line.is_reconciled {
                return Err(LedgerError::Validation(format!(
                    "Statement line {} is already reconciled",
                    line_id
                )));
            }
            statement_debit += &line.debit;
            statement_credit += &line.credit;
        }

        let mut ledger_debit = BigDecimal::from(0);
        let mut ledger_credit = BigDecimal::from(0);
        for entry_id in entry_ids {
            let view = self
                .storage
                .get_entry(*entry_id)
                .await?
                .ok_or(LedgerError::EntryNotFound(*entry_id))?;
            if view.entry.account_id != ctx.gl_account.id
                || view.organization != ctx.bank_account.organization
            {
                return Err(LedgerError::Validation(format!(
                    "Journal entry {} is not on bank account '{}'",
                    entry_id, ctx.bank_account.id
                )));
            }
            if view.voucher_status == VoucherStatus::Draft {
                return Err(LedgerError::Validation(format!(
                    "Journal entry {} belongs to an unposted voucher",
                    entry_id
                )));
            }
            if view.entry.is_reconciled {
                return Err(LedgerError::Validation(format!(
                    "Journal entry {} is already reconciled",
                    entry_id
                )));
            }
            ledger_debit += &view.entry.debit;
            ledger_credit += &view.entry.credit;
        }

        if statement_debit != ledger_credit || statement_credit != ledger_debit {
            warn!(
                statement_id,
                %statement_debit,
                %statement_credit,
                %ledger_debit,
                %ledger_credit,
                "manual match totals do not mirror"
            );
            return Err(LedgerError::ReconciliationMismatch {
                statement_debit,
                statement_credit,
                ledger_debit,
                ledger_credit,
            });
        }

        let group = Uuid::new_v4();
        self.storage
            .mark_reconciled(ReconciliationMark {
                statement_id,
                line_ids: line_ids.to_vec(),
                entry_ids: entry_ids.to_vec(),
                reconciled_on: on,
                group,
            })
            .await?;
        self.mark_reconciling(&ctx.statement).await?;

        let matched_count = line_ids.len().max(entry_ids.len());
        info!(
            statement_id,
            lines = line_ids.len(),
            entries = entry_ids.len(),
            %group,
            "manual match recorded"
        );
        Ok(ManualMatchResult {
            matched_count,
            lines_matched: line_ids.len(),
            entries_matched: entry_ids.len(),
            match_group: group,
        })
    }

    /// Undo the whole match group a statement line belongs to
    pub async fn unmatch(
        &mut self,
        statement_id: StatementId,
        line_id: StatementLineId,
    ) -> LedgerResult<usize> {
        let ctx = self.context(statement_id).await?;
        ctx.ensure_open()?;

        let line = self
            .storage
            .statement_lines(statement_id, false)
            .await?
            .into_iter()
            .find(|l| l.id == line_id)
            .ok_or(LedgerError::StatementLineNotFound(line_id))?;
        let Some(group) = line.match_group else {
            return Err(LedgerError::Validation(format!(
                "Statement line {} is not reconciled",
                line_id
            )));
        };

        let released = self.storage.clear_match_group(statement_id, group).await?;
        info!(statement_id, line_id, %group, released, "match undone");
        Ok(released)
    }

    /// Bank Reconciliation Statement; reads only
    pub async fn brs(&self, statement_id: StatementId) -> LedgerResult<BrsReport> {
        let ctx = self.context(statement_id).await?;
        let cash_book = self
            .storage
            .query_entries(&ctx.entry_query(Some(ctx.statement.fiscal_period.clone()), false))
            .await?;
        let outstanding = self
            .storage
            .query_entries(&ctx.entry_query(None, true))
            .await?;
        let unmatched = self.storage.statement_lines(statement_id, true).await?;
        Ok(brs::compute(&ctx.statement, &cash_book, &outstanding, &unmatched))
    }

    pub async fn is_fully_reconciled(&self, statement_id: StatementId) -> LedgerResult<bool> {
        Ok(self.brs(statement_id).await?.is_fully_reconciled())
    }

    /// Close a statement once nothing is left to explain
    pub async fn finalize(&mut self, statement_id: StatementId) -> LedgerResult<BankStatement> {
        let ctx = self.context(statement_id).await?;
        ctx.ensure_open()?;

        let report = self.brs(statement_id).await?;
        if !report.is_fully_reconciled() {
            return Err(LedgerError::Validation(format!(
                "Statement {} is not fully reconciled: difference {}, {} unpresented, {} uncredited, {} unmatched bank lines",
                statement_id,
                report.difference,
                report.unpresented_list.len(),
                report.uncredited_list.len(),
                report.unmatched_bank_list.len()
            )));
        }

        self.storage
            .update_statement_status(statement_id, StatementStatus::Reconciled)
            .await?;
        info!(statement_id, "statement finalized");
        self.storage
            .get_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))
    }

    async fn context(&self, statement_id: StatementId) -> LedgerResult<StatementContext> {
        let statement = self
            .storage
            .get_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))?;
        let bank_account = self
            .storage
            .get_bank_account(&statement.bank_account_id)
            .await?
            .ok_or_else(|| LedgerError::BankAccountNotFound(statement.bank_account_id.clone()))?;
        let gl_account = self
            .storage
            .get_account(&bank_account.gl_account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(bank_account.gl_account_id.clone()))?;
        if natural_side(gl_account.nature) != EntrySide::Debit {
            return Err(LedgerError::Validation(format!(
                "Bank ledger account '{}' must be an asset account",
                gl_account.id
            )));
        }
        Ok(StatementContext {
            statement,
            bank_account,
            gl_account,
        })
    }

    async fn mark_reconciling(&mut self, statement: &BankStatement) -> LedgerResult<()> {
        if statement.status == StatementStatus::Draft {
            self.storage
                .update_statement_status(statement.id, StatementStatus::Reconciling)
                .await?;
        }
        Ok(())
    }
}

fn has_duplicates(ids: &[u64]) -> bool {
    let mut seen = HashSet::new();
    ids.iter().any(|id| !seen.insert(id))
}
