//! Main ledger orchestrator that coordinates accounts, posting and reconciliation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::EngineConfig;
use crate::ledger::account::{utils::create_standard_chart, AccountManager};
use crate::ledger::budget::BudgetTracker;
use crate::ledger::posting::{net_by_account, PostingEngine, SubmissionOutcome};
use crate::reconciliation::{
    AutoReconcileResult, BrsReport, IngestReport, ManualMatchResult, RawStatementRow,
    ReconciliationEngine, StatementIngest, StatementSummary,
};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all accounting operations
pub struct Ledger<S: LedgerStorage> {
    account_manager: AccountManager<S>,
    posting: PostingEngine<S>,
    ingest: StatementIngest<S>,
    reconciliation: ReconciliationEngine<S>,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Open a ledger over the given storage backend
    pub async fn open(storage: S, config: EngineConfig) -> LedgerResult<Self> {
        let posting = PostingEngine::open(storage.clone(), config.clone()).await?;
        Ok(Self {
            account_manager: AccountManager::new(storage.clone()),
            posting,
            ingest: StatementIngest::new(storage.clone(), config),
            reconciliation: ReconciliationEngine::new(storage),
        })
    }

    /// Open a ledger with custom validators
    pub async fn with_validators(
        storage: S,
        config: EngineConfig,
        account_validator: Box<dyn AccountValidator>,
        voucher_validator: Box<dyn VoucherValidator>,
    ) -> LedgerResult<Self> {
        let mut ledger = Self::open(storage.clone(), config).await?;
        ledger.account_manager = AccountManager::with_validator(storage, account_validator);
        ledger.posting = ledger.posting.with_validator(voucher_validator);
        Ok(ledger)
    }
}

impl<S: LedgerStorage> Ledger<S> {
    pub fn accounts(&self) -> &AccountManager<S> {
        &self.account_manager
    }

    pub fn posting(&self) -> &PostingEngine<S> {
        &self.posting
    }

    pub fn budget(&self) -> &BudgetTracker<S> {
        self.posting.budget()
    }

    pub fn budget_mut(&mut self) -> &mut BudgetTracker<S> {
        self.posting.budget_mut()
    }

    pub fn ingest(&self) -> &StatementIngest<S> {
        &self.ingest
    }

    pub fn reconciliation(&self) -> &ReconciliationEngine<S> {
        &self.reconciliation
    }

    // Account operations
    /// Create a new account; role holders become resolvable immediately
    pub async fn create_account(&mut self, account: Account) -> LedgerResult<Account> {
        let account = self.account_manager.create_account(account).await?;
        if account.system_role.is_some() {
            self.posting.reload_system_accounts().await?;
        }
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.account_manager.get_account(account_id).await
    }

    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.account_manager.list_accounts().await
    }

    pub async fn set_account_active(
        &mut self,
        account_id: &str,
        active: bool,
    ) -> LedgerResult<Account> {
        self.account_manager.set_active(account_id, active).await
    }

    pub async fn get_account_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<AccountBalance> {
        self.account_manager
            .get_balance(organization, fiscal_period, account_id)
            .await
    }

    /// Setup a small municipal chart of accounts
    pub async fn setup_standard_chart_of_accounts(
        &mut self,
    ) -> LedgerResult<HashMap<String, Account>> {
        let chart = create_standard_chart(&mut self.account_manager).await?;
        self.posting.reload_system_accounts().await?;
        Ok(chart)
    }

    // Budget operations
    pub async fn allocate_budget(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
        original: BigDecimal,
        released: BigDecimal,
    ) -> LedgerResult<BudgetAllocation> {
        self.budget_mut()
            .allocate(organization, fiscal_period, account_id, original, released)
            .await
    }

    pub async fn get_available_budget(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<BigDecimal> {
        self.budget()
            .get_available(organization, fiscal_period, account_id)
            .await
    }

    // Voucher operations
    pub async fn create_draft(&mut self, submission: VoucherSubmission) -> LedgerResult<Voucher> {
        self.posting.create_draft(submission).await
    }

    pub async fn post_voucher(&mut self, voucher_id: VoucherId, actor: &Actor) -> LedgerResult<Voucher> {
        self.posting.post(voucher_id, actor).await
    }

    pub async fn submit_voucher(
        &mut self,
        submission: VoucherSubmission,
        actor: &Actor,
    ) -> LedgerResult<SubmissionOutcome> {
        self.posting.submit(submission, actor).await
    }

    pub async fn reverse_voucher(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<VoucherId> {
        self.posting.reverse(voucher_id, actor, reason).await
    }

    pub async fn unpost_voucher(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<Voucher> {
        self.posting.unpost(voucher_id, actor, reason).await
    }

    pub async fn discard_draft(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<()> {
        self.posting.discard_draft(voucher_id, actor, reason).await
    }

    pub async fn get_voucher(&self, voucher_id: VoucherId) -> LedgerResult<Option<Voucher>> {
        self.posting.get_voucher(voucher_id).await
    }

    pub async fn audit_log(&self, voucher_id: VoucherId) -> LedgerResult<Vec<VoucherAuditRecord>> {
        self.posting.audit_log(voucher_id).await
    }

    // Bank statement operations
    pub async fn register_bank_account(
        &mut self,
        bank_account: BankAccount,
    ) -> LedgerResult<BankAccount> {
        self.ingest.register_bank_account(bank_account).await
    }

    pub async fn create_statement(
        &mut self,
        bank_account_id: &str,
        month: u32,
        fiscal_period: &str,
        opening_balance: BigDecimal,
        closing_balance: BigDecimal,
    ) -> LedgerResult<BankStatement> {
        self.ingest
            .create_statement(
                bank_account_id,
                month,
                fiscal_period,
                opening_balance,
                closing_balance,
            )
            .await
    }

    pub async fn ingest_statement_csv(
        &mut self,
        statement_id: StatementId,
        text: &str,
    ) -> LedgerResult<IngestReport> {
        self.ingest.ingest_csv(statement_id, text).await
    }

    pub async fn ingest_statement_rows(
        &mut self,
        statement_id: StatementId,
        rows: Vec<RawStatementRow>,
    ) -> LedgerResult<IngestReport> {
        self.ingest.ingest_rows(statement_id, rows).await
    }

    pub async fn statement_summary(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<StatementSummary> {
        self.ingest.statement_summary(statement_id).await
    }

    pub async fn statement_lines(
        &self,
        statement_id: StatementId,
    ) -> LedgerResult<Vec<BankStatementLine>> {
        self.ingest.statement_lines(statement_id).await
    }

    // Reconciliation operations
    pub async fn auto_reconcile(
        &mut self,
        statement_id: StatementId,
        on: NaiveDate,
    ) -> LedgerResult<AutoReconcileResult> {
        self.reconciliation.auto_reconcile(statement_id, on).await
    }

    pub async fn manual_match(
        &mut self,
        statement_id: StatementId,
        line_ids: &[StatementLineId],
        entry_ids: &[EntryId],
        on: NaiveDate,
    ) -> LedgerResult<ManualMatchResult> {
        self.reconciliation
            .manual_match(statement_id, line_ids, entry_ids, on)
            .await
    }

    pub async fn unmatch(
        &mut self,
        statement_id: StatementId,
        line_id: StatementLineId,
    ) -> LedgerResult<usize> {
        self.reconciliation.unmatch(statement_id, line_id).await
    }

    pub async fn brs(&self, statement_id: StatementId) -> LedgerResult<BrsReport> {
        self.reconciliation.brs(statement_id).await
    }

    pub async fn is_fully_reconciled(&self, statement_id: StatementId) -> LedgerResult<bool> {
        self.reconciliation.is_fully_reconciled(statement_id).await
    }

    pub async fn finalize_statement(
        &mut self,
        statement_id: StatementId,
    ) -> LedgerResult<BankStatement> {
        self.reconciliation.finalize(statement_id).await
    }

    // Reporting
    /// Trial balance over the posted vouchers of one organization and period
    pub async fn trial_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<TrialBalance> {
        let vouchers = self.posted_vouchers(organization, fiscal_period).await?;
        let net = net_by_account(vouchers.iter());
        let zero = BigDecimal::from(0);

        let mut rows = Vec::new();
        for account in self.account_manager.list_accounts().await? {
            let Some(balance) = net.get(&account.id) else {
                continue;
            };
            if *balance == zero {
                continue;
            }
            let (debit_balance, credit_balance) = if *balance > zero {
                (Some(balance.clone()), None)
            } else {
                (None, Some(-balance.clone()))
            };
            rows.push(TrialBalanceRow {
                account_id: account.id,
                account_name: account.name,
                nature: account.nature,
                debit_balance,
                credit_balance,
            });
        }

        let total_debits: BigDecimal = rows.iter().filter_map(|r| r.debit_balance.as_ref()).sum();
        let total_credits: BigDecimal = rows.iter().filter_map(|r| r.credit_balance.as_ref()).sum();
        Ok(TrialBalance {
            organization: organization.to_string(),
            fiscal_period: fiscal_period.to_string(),
            is_balanced: total_debits == total_credits,
            rows,
            total_debits,
            total_credits,
        })
    }

    /// Validate the integrity of the ledger for one organization and period
    pub async fn validate_integrity(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<LedgerIntegrityReport> {
        let vouchers = self.posted_vouchers(organization, fiscal_period).await?;
        let mut issues = Vec::new();

        for voucher in &vouchers {
            if !voucher.is_balanced() {
                issues.push(format!(
                    "{} is not balanced: debits = {}, credits = {}",
                    voucher.voucher_no,
                    voucher.total_debits(),
                    voucher.total_credits()
                ));
            }
            if voucher.status == VoucherStatus::Reversed && voucher.reversed_by_voucher.is_none() {
                issues.push(format!(
                    "{} is marked reversed without a reversing voucher",
                    voucher.voucher_no
                ));
            }
        }

        let trial_balance = self.trial_balance(organization, fiscal_period).await?;
        if !trial_balance.is_balanced {
            issues.push(format!(
                "Trial balance is not balanced: debits = {}, credits = {}",
                trial_balance.total_debits, trial_balance.total_credits
            ));
        }

        info!(
            organization,
            fiscal_period,
            vouchers = vouchers.len(),
            issues = issues.len(),
            "integrity check finished"
        );
        Ok(LedgerIntegrityReport {
            organization: organization.to_string(),
            fiscal_period: fiscal_period.to_string(),
            is_valid: issues.is_empty(),
            issues,
            posted_vouchers: vouchers.len(),
            trial_balance_total_debits: trial_balance.total_debits,
            trial_balance_total_credits: trial_balance.total_credits,
        })
    }

    async fn posted_vouchers(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<Vec<Voucher>> {
        Ok(self
            .posting
            .list_vouchers(organization, fiscal_period)
            .await?
            .into_iter()
            .filter(|v| v.is_posted())
            .collect())
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub organization: String,
    pub fiscal_period: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub posted_vouchers: usize,
    pub trial_balance_total_debits: BigDecimal,
    pub trial_balance_total_credits: BigDecimal,
}
