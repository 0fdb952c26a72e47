//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    balances: HashMap<BudgetKey, AccountBalance>,
    allocations: HashMap<BudgetKey, BudgetAllocation>,
    vouchers: BTreeMap<VoucherId, Voucher>,
    entry_index: HashMap<EntryId, VoucherId>,
    sequences: HashMap<(String, String, VoucherType), u64>,
    audit: Vec<VoucherAuditRecord>,
    bank_accounts: HashMap<String, BankAccount>,
    statements: BTreeMap<StatementId, BankStatement>,
    lines: BTreeMap<StatementLineId, BankStatementLine>,
    last_voucher_id: VoucherId,
    last_entry_id: EntryId,
    last_statement_id: StatementId,
    last_line_id: StatementLineId,
}

impl MemoryState {
    fn check_versions(&self, deltas: &[AllocationDelta]) -> LedgerResult<()> {
        for delta in deltas {
            let allocation = self
                .allocations
                .get(&delta.key)
                .ok_or_else(|| LedgerError::AllocationNotFound(delta.key.clone()))?;
            if allocation.version != delta.expected_version {
                return Err(LedgerError::Conflict(format!(
                    "allocation {} moved from version {} to {}",
                    delta.key, delta.expected_version, allocation.version
                )));
            }
        }
        Ok(())
    }

    fn apply_deltas(&mut self, deltas: &[AllocationDelta]) {
        let now = chrono::Utc::now().naive_utc();
        for delta in deltas {
            if let Some(allocation) = self.allocations.get_mut(&delta.key) {
                allocation.spent_amount += &delta.delta;
                allocation.version += 1;
                allocation.updated_at = now;
            }
        }
    }

    fn check_accounts(&self, voucher: &Voucher) -> LedgerResult<()> {
        for entry in &voucher.entries {
            if !self.accounts.contains_key(&entry.account_id) {
                return Err(LedgerError::AccountNotFound(entry.account_id.clone()));
            }
        }
        Ok(())
    }

    /// Move the voucher's organization/period balances by every line,
    /// mirrored when `undo` is set
    fn apply_balances(&mut self, voucher_id: VoucherId, undo: bool) {
        let Some(voucher) = self.vouchers.get(&voucher_id) else {
            return;
        };
        for entry in &voucher.entries {
            let Some(side) = entry.side() else { continue };
            let Some(account) = self.accounts.get(&entry.account_id) else {
                continue;
            };
            let side = if undo { side.opposite() } else { side };
            let key = BudgetKey::new(
                voucher.organization.as_str(),
                voucher.fiscal_period.as_str(),
                entry.account_id.as_str(),
            );
            self.balances
                .entry(key)
                .or_insert_with(|| {
                    AccountBalance::zero(&voucher.organization, &voucher.fiscal_period, account)
                })
                .apply(side, &entry.amount());
        }
    }

    fn assign_entry_ids(&mut self, voucher_id: VoucherId, entries: &mut [JournalEntry]) {
        for (idx, entry) in entries.iter_mut().enumerate() {
            self.last_entry_id += 1;
            entry.id = self.last_entry_id;
            entry.voucher_id = voucher_id;
            entry.line_no = idx + 1;
            self.entry_index.insert(entry.id, voucher_id);
        }
    }

    fn entry_mut(&mut self, entry_id: EntryId) -> Option<&mut JournalEntry> {
        let voucher_id = self.entry_index.get(&entry_id)?;
        self.vouchers
            .get_mut(voucher_id)?
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
    }

    fn entry_view(&self, entry_id: EntryId) -> Option<LedgerEntryView> {
        let voucher = self.vouchers.get(self.entry_index.get(&entry_id)?)?;
        let entry = voucher.entries.iter().find(|e| e.id == entry_id)?;
        Some(view_of(voucher, entry))
    }
}

fn view_of(voucher: &Voucher, entry: &JournalEntry) -> LedgerEntryView {
    LedgerEntryView {
        entry: entry.clone(),
        voucher_no: voucher.voucher_no.clone(),
        voucher_date: voucher.date,
        organization: voucher.organization.clone(),
        fiscal_period: voucher.fiscal_period.clone(),
        voucher_status: voucher.status,
    }
}

fn status_error(voucher: &Voucher) -> LedgerError {
    match voucher.status {
        VoucherStatus::Draft => LedgerError::NotPosted(voucher.id),
        VoucherStatus::Posted => LedgerError::AlreadyPosted(voucher.id),
        VoucherStatus::Reversed => LedgerError::AlreadyReversed(voucher.id),
    }
}

/// In-memory storage implementation for testing and development.
///
/// Clones share state, so several engines can work against one store. Each
/// atomic unit runs under a single write lock.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> LedgerResult<()> {
        *self.write()? = MemoryState::default();
        Ok(())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.write()?
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.read()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn set_account_active(&mut self, account_id: &str, active: bool) -> LedgerResult<Account> {
        let mut state = self.write()?;
        let account = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        account.is_active = active;
        account.updated_at = chrono::Utc::now().naive_utc();
        Ok(account.clone())
    }

    async fn get_account_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<Option<AccountBalance>> {
        let key = BudgetKey::new(organization, fiscal_period, account_id);
        Ok(self.read()?.balances.get(&key).cloned())
    }

    async fn save_allocation(&mut self, allocation: &BudgetAllocation) -> LedgerResult<()> {
        let mut state = self.write()?;
        let version = match state.allocations.get(&allocation.key) {
            Some(existing) if existing.version != allocation.version => {
                return Err(LedgerError::Conflict(format!(
                    "allocation {} moved from version {} to {}",
                    allocation.key, allocation.version, existing.version
                )));
            }
            Some(existing) => existing.version + 1,
            None => 0,
        };
        let mut stored = allocation.clone();
        stored.version = version;
        stored.updated_at = chrono::Utc::now().naive_utc();
        state.allocations.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_allocation(&self, key: &BudgetKey) -> LedgerResult<Option<BudgetAllocation>> {
        Ok(self.read()?.allocations.get(key).cloned())
    }

    async fn commit_allocation_deltas(&mut self, deltas: Vec<AllocationDelta>) -> LedgerResult<()> {
        let mut state = self.write()?;
        state.check_versions(&deltas)?;
        state.apply_deltas(&deltas);
        Ok(())
    }

    async fn next_voucher_sequence(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        voucher_type: VoucherType,
    ) -> LedgerResult<u64> {
        let mut state = self.write()?;
        let counter = state
            .sequences
            .entry((
                organization.to_string(),
                fiscal_period.to_string(),
                voucher_type,
            ))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_voucher(&mut self, mut voucher: Voucher) -> LedgerResult<Voucher> {
        let mut state = self.write()?;
        state.last_voucher_id += 1;
        voucher.id = state.last_voucher_id;
        let mut entries = std::mem::take(&mut voucher.entries);
        state.assign_entry_ids(voucher.id, &mut entries);
        voucher.entries = entries;
        state.vouchers.insert(voucher.id, voucher.clone());
        Ok(voucher)
    }

    async fn get_voucher(&self, voucher_id: VoucherId) -> LedgerResult<Option<Voucher>> {
        Ok(self.read()?.vouchers.get(&voucher_id).cloned())
    }

    async fn list_vouchers(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<Vec<Voucher>> {
        Ok(self
            .read()?
            .vouchers
            .values()
            .filter(|v| v.organization == organization && v.fiscal_period == fiscal_period)
            .cloned()
            .collect())
    }

    async fn replace_draft_entries(
        &mut self,
        voucher_id: VoucherId,
        mut entries: Vec<JournalEntry>,
    ) -> LedgerResult<Voucher> {
        let mut state = self.write()?;
        let old_ids: Vec<EntryId> = {
            let voucher = state
                .vouchers
                .get(&voucher_id)
                .ok_or(LedgerError::VoucherNotFound(voucher_id))?;
            if voucher.status != VoucherStatus::Draft {
                return Err(LedgerError::NotDraft(voucher_id));
            }
            voucher.entries.iter().map(|e| e.id).collect()
        };
        for id in old_ids {
            state.entry_index.remove(&id);
        }
        state.assign_entry_ids(voucher_id, &mut entries);
        let voucher = state
            .vouchers
            .get_mut(&voucher_id)
            .ok_or(LedgerError::VoucherNotFound(voucher_id))?;
        voucher.entries = entries;
        Ok(voucher.clone())
    }

    async fn delete_draft(&mut self, voucher_id: VoucherId) -> LedgerResult<()> {
        let mut state = self.write()?;
        let voucher = state
            .vouchers
            .get(&voucher_id)
            .ok_or(LedgerError::VoucherNotFound(voucher_id))?;
        if voucher.status != VoucherStatus::Draft {
            return Err(LedgerError::NotDraft(voucher_id));
        }
        if let Some(voucher) = state.vouchers.remove(&voucher_id) {
            for entry in &voucher.entries {
                state.entry_index.remove(&entry.id);
            }
        }
        Ok(())
    }

    async fn commit_posting(&mut self, commit: PostingCommit) -> LedgerResult<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let voucher = state
            .vouchers
            .get(&commit.voucher_id)
            .ok_or(LedgerError::VoucherNotFound(commit.voucher_id))?;
        if voucher.status != VoucherStatus::Draft {
            return Err(status_error(voucher));
        }
        state.check_accounts(voucher)?;
        if let Some(link) = &commit.reverses {
            let original = state
                .vouchers
                .get(&link.original_id)
                .ok_or(LedgerError::VoucherNotFound(link.original_id))?;
            if original.status != VoucherStatus::Posted {
                return Err(match original.status {
                    VoucherStatus::Draft => LedgerError::NotPosted(original.id),
                    _ => LedgerError::AlreadyReversed(original.id),
                });
            }
        }
        state.check_versions(&commit.allocations)?;

        state.apply_deltas(&commit.allocations);
        state.apply_balances(commit.voucher_id, false);

        if let Some(voucher) = state.vouchers.get_mut(&commit.voucher_id) {
            voucher.status = VoucherStatus::Posted;
            voucher.posted_at = Some(commit.posted_at);
            voucher.posted_by = Some(commit.posted_by.clone());
            if let Some(link) = &commit.reverses {
                voucher.reverses_voucher = Some(link.original_id);
                voucher.reversal_reason = Some(link.reason.clone());
            }
        }
        if let Some(link) = &commit.reverses {
            if let Some(original) = state.vouchers.get_mut(&link.original_id) {
                original.status = VoucherStatus::Reversed;
                original.reversed_at = Some(commit.posted_at);
                original.reversed_by = Some(commit.posted_by.clone());
                original.reversed_by_voucher = Some(commit.voucher_id);
                original.reversal_reason = Some(link.reason.clone());
            }
        }
        state.audit.extend(commit.audit);
        Ok(())
    }

    async fn commit_unposting(&mut self, commit: UnpostCommit) -> LedgerResult<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let voucher = state
            .vouchers
            .get(&commit.voucher_id)
            .ok_or(LedgerError::VoucherNotFound(commit.voucher_id))?;
        if voucher.status != VoucherStatus::Posted {
            return Err(status_error(voucher));
        }
        if voucher.has_reconciled_entries() {
            return Err(LedgerError::ReconciledLinesFrozen(voucher.id));
        }
        state.check_versions(&commit.allocations)?;

        state.apply_deltas(&commit.allocations);
        state.apply_balances(commit.voucher_id, true);

        if let Some(voucher) = state.vouchers.get_mut(&commit.voucher_id) {
            voucher.status = VoucherStatus::Draft;
            voucher.posted_at = None;
            voucher.posted_by = None;
        }
        state.audit.push(commit.audit);
        Ok(())
    }

    async fn append_audit(&mut self, record: VoucherAuditRecord) -> LedgerResult<()> {
        self.write()?.audit.push(record);
        Ok(())
    }

    async fn audit_log(&self, voucher_id: VoucherId) -> LedgerResult<Vec<VoucherAuditRecord>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|r| r.voucher_id == voucher_id)
            .cloned()
            .collect())
    }

    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<Option<LedgerEntryView>> {
        Ok(self.read()?.entry_view(entry_id))
    }

    async fn query_entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntryView>> {
        let state = self.read()?;
        let mut views: Vec<LedgerEntryView> = state
            .vouchers
            .values()
            .filter(|v| v.is_posted() && v.organization == query.organization)
            .filter(|v| {
                query
                    .fiscal_period
                    .as_ref()
                    .map_or(true, |p| v.fiscal_period == *p)
            })
            .flat_map(|v| {
                v.entries
                    .iter()
                    .filter(|e| e.account_id == query.account_id)
                    .filter(|e| !(query.unreconciled_only && e.is_reconciled))
                    .map(move |e| view_of(v, e))
            })
            .collect();
        views.sort_by(|a, b| {
            a.voucher_date
                .cmp(&b.voucher_date)
                .then(a.entry.id.cmp(&b.entry.id))
        });
        Ok(views)
    }

    async fn save_bank_account(&mut self, bank_account: &BankAccount) -> LedgerResult<()> {
        self.write()?
            .bank_accounts
            .insert(bank_account.id.clone(), bank_account.clone());
        Ok(())
    }

    async fn get_bank_account(&self, bank_account_id: &str) -> LedgerResult<Option<BankAccount>> {
        Ok(self.read()?.bank_accounts.get(bank_account_id).cloned())
    }

    async fn insert_statement(
        &mut self,
        mut statement: BankStatement,
    ) -> LedgerResult<BankStatement> {
        let mut state = self.write()?;
        let duplicate = state.statements.values().any(|s| {
            s.bank_account_id == statement.bank_account_id
                && s.month == statement.month
                && s.fiscal_period == statement.fiscal_period
        });
        if duplicate {
            return Err(LedgerError::Validation(format!(
                "A statement for bank account '{}' month {} of {} already exists",
                statement.bank_account_id, statement.month, statement.fiscal_period
            )));
        }
        state.last_statement_id += 1;
        statement.id = state.last_statement_id;
        state.statements.insert(statement.id, statement.clone());
        Ok(statement)
    }

    async fn get_statement(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<Option<BankStatement>> {
        Ok(self.read()?.statements.get(&statement_id).cloned())
    }

    async fn update_statement_status(
        &mut self,
        statement_id: StatementId,
        status: StatementStatus,
    ) -> LedgerResult<()> {
        let mut state = self.write()?;
        let statement = state
            .statements
            .get_mut(&statement_id)
            .ok_or(LedgerError::StatementNotFound(statement_id))?;
        statement.status = status;
        statement.updated_at = chrono::Utc::now().naive_utc();
        Ok(())
    }

    async fn insert_statement_lines(
        &mut self,
        statement_id: StatementId,
        lines: Vec<BankStatementLine>,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        let mut state = self.write()?;
        if !state.statements.contains_key(&statement_id) {
            return Err(LedgerError::StatementNotFound(statement_id));
        }
        let mut stored = Vec::with_capacity(lines.len());
        for mut line in lines {
            state.last_line_id += 1;
            line.id = state.last_line_id;
            line.statement_id = statement_id;
            state.lines.insert(line.id, line.clone());
            stored.push(line);
        }
        Ok(stored)
    }

    async fn statement_lines(
        &self,
        statement_id: StatementId,
        unreconciled_only: bool,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        let state = self.read()?;
        let mut lines: Vec<BankStatementLine> = state
            .lines
            .values()
            .filter(|l| l.statement_id == statement_id)
            .filter(|l| !(unreconciled_only && l.is_reconciled))
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(lines)
    }

    async fn mark_reconciled(&mut self, mark: ReconciliationMark) -> LedgerResult<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        for line_id in &mark.line_ids {
            let line = state
                .lines
                .get(line_id)
                .filter(|l| l.statement_id == mark.statement_id)
                .ok_or(LedgerError::StatementLineNotFound(*line_id))?;
            if line.is_reconciled {
                return Err(LedgerError::Conflict(format!(
                    "statement line {} was reconciled concurrently",
                    line_id
                )));
            }
        }
        for entry_id in &mark.entry_ids {
            let view = state
                .entry_view(*entry_id)
                .ok_or(LedgerError::EntryNotFound(*entry_id))?;
            if view.entry.is_reconciled {
                return Err(LedgerError::Conflict(format!(
                    "journal entry {} was reconciled concurrently",
                    entry_id
                )));
            }
        }

        let pair_entry = match (mark.line_ids.len(), mark.entry_ids.as_slice()) {
            (1, [entry_id]) => Some(*entry_id),
            _ => None,
        };
        for line_id in &mark.line_ids {
            if let Some(line) = state.lines.get_mut(line_id) {
                line.is_reconciled = true;
                line.reconciled_date = Some(mark.reconciled_on);
                line.match_group = Some(mark.group);
                line.matched_entry = pair_entry;
            }
        }
        for entry_id in &mark.entry_ids {
            if let Some(entry) = state.entry_mut(*entry_id) {
                entry.is_reconciled = true;
                entry.reconciled_date = Some(mark.reconciled_on);
                entry.match_group = Some(mark.group);
            }
        }
        Ok(())
    }

    async fn clear_match_group(
        &mut self,
        statement_id: StatementId,
        group: MatchGroupId,
    ) -> LedgerResult<usize> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let mut released = 0;
        for line in state.lines.values_mut() {
            if line.statement_id == statement_id && line.match_group == Some(group) {
                line.is_reconciled = false;
                line.reconciled_date = None;
                line.match_group = None;
                line.matched_entry = None;
                released += 1;
            }
        }
        for voucher in state.vouchers.values_mut() {
            for entry in voucher.entries.iter_mut() {
                if entry.match_group == Some(group) {
                    entry.is_reconciled = false;
                    entry.reconciled_date = None;
                    entry.match_group = None;
                }
            }
        }
        Ok(released)
    }
}
