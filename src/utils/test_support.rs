//! Storage that lets a second writer act between an engine's read and its commit

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::traits::*;
use crate::types::*;
use crate::utils::MemoryStorage;

/// A write another session makes first
pub(crate) enum Interleave {
    Reconcile(ReconciliationMark),
    /// Bump the allocation's version without changing its spend
    TouchAllocation(BudgetKey),
}

/// Wraps [`MemoryStorage`]; each `mark_reconciled`, `commit_posting` and
/// `commit_allocation_deltas` first applies the next queued write
#[derive(Clone)]
pub(crate) struct InterleavedStorage {
    inner: MemoryStorage,
    pending: Arc<Mutex<VecDeque<Interleave>>>,
}

impl InterleavedStorage {
    pub(crate) fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            pending: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub(crate) fn queue(&self, write: Interleave) {
        self.pending.lock().unwrap().push_back(write);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    async fn interleave(&mut self) -> LedgerResult<()> {
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some(Interleave::Reconcile(mark)) => self.inner.mark_reconciled(mark).await,
            Some(Interleave::TouchAllocation(key)) => {
                let allocation = self
                    .inner
                    .get_allocation(&key)
                    .await?
                    .ok_or_else(|| LedgerError::AllocationNotFound(key.clone()))?;
                self.inner
                    .commit_allocation_deltas(vec![AllocationDelta {
                        key,
                        expected_version: allocation.version,
                        delta: BigDecimal::from(0),
                    }])
                    .await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerStorage for InterleavedStorage {
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.inner.save_account(account).await
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.inner.get_account(account_id).await
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn set_account_active(
        &mut self,
        account_id: &str,
        active: bool,
    ) -> LedgerResult<Account> {
        self.inner.set_account_active(account_id, active).await
    }

    async fn get_account_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<Option<AccountBalance>> {
        self.inner
            .get_account_balance(organization, fiscal_period, account_id)
            .await
    }

    async fn save_allocation(&mut self, allocation: &BudgetAllocation) -> LedgerResult<()> {
        self.inner.save_allocation(allocation).await
    }

    async fn get_allocation(&self, key: &BudgetKey) -> LedgerResult<Option<BudgetAllocation>> {
        self.inner.get_allocation(key).await
    }

    async fn commit_allocation_deltas(&mut self, deltas: Vec<AllocationDelta>) -> LedgerResult<()> {
        self.interleave().await?;
        self.inner.commit_allocation_deltas(deltas).await
    }

    async fn next_voucher_sequence(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        voucher_type: VoucherType,
    ) -> LedgerResult<u64> {
        self.inner
            .next_voucher_sequence(organization, fiscal_period, voucher_type)
            .await
    }

    async fn insert_voucher(&mut self, voucher: Voucher) -> LedgerResult<Voucher> {
        self.inner.insert_voucher(voucher).await
    }

    async fn get_voucher(&self, voucher_id: VoucherId) -> LedgerResult<Option<Voucher>> {
        self.inner.get_voucher(voucher_id).await
    }

    async fn list_vouchers(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<Vec<Voucher>> {
        self.inner.list_vouchers(organization, fiscal_period).await
    }

    async fn replace_draft_entries(
        &mut self,
        voucher_id: VoucherId,
        entries: Vec<JournalEntry>,
    ) -> LedgerResult<Voucher> {
        self.inner.replace_draft_entries(voucher_id, entries).await
    }

    async fn delete_draft(&mut self, voucher_id: VoucherId) -> LedgerResult<()> {
        self.inner.delete_draft(voucher_id).await
    }

    async fn commit_posting(&mut self, commit: PostingCommit) -> LedgerResult<()> {
        self.interleave().await?;
        self.inner.commit_posting(commit).await
    }

    async fn commit_unposting(&mut self, commit: UnpostCommit) -> LedgerResult<()> {
        self.inner.commit_unposting(commit).await
    }

    async fn append_audit(&mut self, record: VoucherAuditRecord) -> LedgerResult<()> {
        self.inner.append_audit(record).await
    }

    async fn audit_log(&self, voucher_id: VoucherId) -> LedgerResult<Vec<VoucherAuditRecord>> {
        self.inner.audit_log(voucher_id).await
    }

    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<Option<LedgerEntryView>> {
        self.inner.get_entry(entry_id).await
    }

    async fn query_entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntryView>> {
        self.inner.query_entries(query).await
    }

    async fn save_bank_account(&mut self, bank_account: &BankAccount) -> LedgerResult<()> {
        self.inner.save_bank_account(bank_account).await
    }

    async fn get_bank_account(&self, bank_account_id: &str) -> LedgerResult<Option<BankAccount>> {
        self.inner.get_bank_account(bank_account_id).await
    }

    async fn insert_statement(&mut self, statement: BankStatement) -> LedgerResult<BankStatement> {
        self.inner.insert_statement(statement).await
    }

    async fn get_statement(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<Option<BankStatement>> {
        self.inner.get_statement(statement_id).await
    }

    async fn update_statement_status(
        &mut self,
        statement_id: StatementId,
        status: StatementStatus,
    ) -> LedgerResult<()> {
        self.inner.update_statement_status(statement_id, status).await
    }

    async fn insert_statement_lines(
        &mut self,
        statement_id: StatementId,
        lines: Vec<BankStatementLine>,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        self.inner.insert_statement_lines(statement_id, lines).await
    }

    async fn statement_lines(
        &self,
        statement_id: StatementId,
        unreconciled_only: bool,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        self.inner
            .statement_lines(statement_id, unreconciled_only)
            .await
    }

    async fn mark_reconciled(&mut self, mark: ReconciliationMark) -> LedgerResult<()> {
        self.interleave().await?;
        self.inner.mark_reconciled(mark).await
    }

    async fn clear_match_group(
        &mut self,
        statement_id: StatementId,
        group: MatchGroupId,
    ) -> LedgerResult<usize> {
        self.inner.clear_match_group(statement_id, group).await
    }
}
