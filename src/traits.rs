//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::*;
use crate::utils::validation::{line_rejections, validate_account_id, validate_account_name};

/// Change to one allocation's spent amount, valid only against `expected_version`
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDelta {
    pub key: BudgetKey,
    pub expected_version: u64,
    /// Positive consumes budget, negative gives it back
    pub delta: BigDecimal,
}

/// Links a reversal voucher to the voucher it cancels
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalLink {
    pub original_id: VoucherId,
    pub reason: String,
}

/// Everything that changes when a draft is posted, applied as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct PostingCommit {
    pub voucher_id: VoucherId,
    pub posted_by: String,
    pub posted_at: NaiveDateTime,
    pub allocations: Vec<AllocationDelta>,
    pub reverses: Option<ReversalLink>,
    pub audit: Vec<VoucherAuditRecord>,
}

/// Everything that changes when a posted voucher is returned to draft
#[derive(Debug, Clone, PartialEq)]
pub struct UnpostCommit {
    pub voucher_id: VoucherId,
    pub allocations: Vec<AllocationDelta>,
    pub audit: VoucherAuditRecord,
}

/// Statement lines and journal entries reconciled together
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationMark {
    pub statement_id: StatementId,
    pub line_ids: Vec<StatementLineId>,
    pub entry_ids: Vec<EntryId>,
    pub reconciled_on: NaiveDate,
    pub group: MatchGroupId,
}

/// Filter over posted journal entries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntryQuery {
    pub organization: String,
    pub account_id: String,
    pub fiscal_period: Option<String>,
    pub unreconciled_only: bool,
}

/// A journal entry with the voucher header fields reports need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntryView {
    pub entry: JournalEntry,
    pub voucher_no: String,
    pub voucher_date: NaiveDate,
    pub organization: String,
    pub fiscal_period: String,
    pub voucher_status: VoucherStatus,
}

/// Storage abstraction for the ledger system
///
/// Any backend (PostgreSQL, SQLite, in-memory, ...) can host the engine by
/// implementing these methods. The `commit_*` and `mark_reconciled` methods
/// are the engine's atomic units: a backend must apply each one completely or
/// not at all, and must re-check the preconditions documented on them inside
/// that unit.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()>;

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>>;

    /// Flip the active flag in place and return the stored account
    async fn set_account_active(&mut self, account_id: &str, active: bool)
        -> LedgerResult<Account>;

    /// Balance moved by posted vouchers of one organization and fiscal period
    async fn get_account_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<Option<AccountBalance>>;

    /// Insert an allocation, or overwrite the stored one if `allocation.version`
    /// still matches it (`Conflict` otherwise). Bumps the version.
    async fn save_allocation(&mut self, allocation: &BudgetAllocation) -> LedgerResult<()>;

    async fn get_allocation(&self, key: &BudgetKey) -> LedgerResult<Option<BudgetAllocation>>;

    /// Apply spend deltas outside a voucher.
    ///
    /// Fails with `Conflict` if any allocation's version moved.
    async fn commit_allocation_deltas(&mut self, deltas: Vec<AllocationDelta>) -> LedgerResult<()>;

    /// Next number in the (organization, period, type) voucher sequence
    async fn next_voucher_sequence(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        voucher_type: VoucherType,
    ) -> LedgerResult<u64>;

    /// Store a draft, assigning voucher and entry ids
    async fn insert_voucher(&mut self, voucher: Voucher) -> LedgerResult<Voucher>;

    async fn get_voucher(&self, voucher_id: VoucherId) -> LedgerResult<Option<Voucher>>;

    async fn list_vouchers(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<Vec<Voucher>>;

    /// Replace the lines of a draft; `NotDraft` once posted
    async fn replace_draft_entries(
        &mut self,
        voucher_id: VoucherId,
        entries: Vec<JournalEntry>,
    ) -> LedgerResult<Voucher>;

    /// Remove a draft; `NotDraft` once posted
    async fn delete_draft(&mut self, voucher_id: VoucherId) -> LedgerResult<()>;

    /// Post a draft.
    ///
    /// Must verify the voucher is still a draft (`AlreadyPosted`), that every
    /// allocation version is unchanged (`Conflict`) and, for reversals, that
    /// the original is still posted and unreversed (`AlreadyReversed`).
    async fn commit_posting(&mut self, commit: PostingCommit) -> LedgerResult<()>;

    /// Return a posted voucher to draft.
    ///
    /// Must verify the voucher is posted (`NotPosted`), that no line is
    /// reconciled (`ReconciledLinesFrozen`) and allocation versions.
    async fn commit_unposting(&mut self, commit: UnpostCommit) -> LedgerResult<()>;

    async fn append_audit(&mut self, record: VoucherAuditRecord) -> LedgerResult<()>;

    async fn audit_log(&self, voucher_id: VoucherId) -> LedgerResult<Vec<VoucherAuditRecord>>;

    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<Option<LedgerEntryView>>;

    /// Entries of posted (including reversed) vouchers matching the query
    async fn query_entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntryView>>;

    async fn save_bank_account(&mut self, bank_account: &BankAccount) -> LedgerResult<()>;

    async fn get_bank_account(&self, bank_account_id: &str) -> LedgerResult<Option<BankAccount>>;

    /// Store a statement, assigning its id; unique per (bank account, month, period)
    async fn insert_statement(&mut self, statement: BankStatement) -> LedgerResult<BankStatement>;

    async fn get_statement(&self, statement_id: StatementId)
        -> LedgerResult<Option<BankStatement>>;

    async fn update_statement_status(
        &mut self,
        statement_id: StatementId,
        status: StatementStatus,
    ) -> LedgerResult<()>;

    /// Append lines, assigning ids
    async fn insert_statement_lines(
        &mut self,
        statement_id: StatementId,
        lines: Vec<BankStatementLine>,
    ) -> LedgerResult<Vec<BankStatementLine>>;

    /// Lines ordered by date, then id
    async fn statement_lines(
        &self,
        statement_id: StatementId,
        unreconciled_only: bool,
    ) -> LedgerResult<Vec<BankStatementLine>>;

    /// Mark lines and entries reconciled as one group.
    ///
    /// Must fail with `Conflict`, changing nothing, if any item is already
    /// reconciled. A one-to-one group also links the line to its entry.
    async fn mark_reconciled(&mut self, mark: ReconciliationMark) -> LedgerResult<()>;

    /// Undo a match group; returns how many statement lines were released
    async fn clear_match_group(
        &mut self,
        statement_id: StatementId,
        group: MatchGroupId,
    ) -> LedgerResult<usize>;
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom voucher validation rules
pub trait VoucherValidator: Send + Sync {
    /// Structural problems with a voucher's lines; empty when it may proceed
    fn validate_voucher(&self, voucher: &Voucher, amount_scale: i64) -> Vec<Rejection>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        validate_account_id(&account.id)?;
        validate_account_name(&account.name)?;
        if account.budget_control && !account.posting_allowed {
            return Err(LedgerError::Validation(format!(
                "Aggregation account '{}' cannot be budget controlled",
                account.id
            )));
        }
        Ok(())
    }
}

/// Default voucher validator with the double-entry rules
pub struct DefaultVoucherValidator;

impl VoucherValidator for DefaultVoucherValidator {
    fn validate_voucher(&self, voucher: &Voucher, amount_scale: i64) -> Vec<Rejection> {
        let mut rejections = Vec::new();

        if voucher.entries.len() < 2 {
            rejections.push(Rejection::TooFewLines {
                count: voucher.entries.len(),
            });
        }

        let mut amounts_in_range = true;
        for entry in &voucher.entries {
            let line = line_rejections(entry, amount_scale);
            amounts_in_range &= !line.iter().any(|r| {
                matches!(
                    r,
                    Rejection::AmountTooLarge { .. } | Rejection::ExcessPrecision { .. }
                )
            });
            rejections.extend(line);
        }

        // totals over out-of-range amounts are not computed
        if amounts_in_range && !voucher.is_balanced() {
            rejections.push(Rejection::Unbalanced {
                debit: voucher.total_debits(),
                credit: voucher.total_credits(),
            });
        }

        rejections
    }
}
