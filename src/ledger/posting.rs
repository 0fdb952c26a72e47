//! Voucher posting, reversal and unposting

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::ledger::account::SystemAccounts;
use crate::ledger::budget::BudgetTracker;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Posted,
    /// Left in draft; `reasons` says why
    Rejected,
}

/// Answer to a voucher submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub voucher_id: VoucherId,
    pub voucher_no: String,
    pub status: SubmissionStatus,
    pub reasons: Vec<Rejection>,
}

/// Owns the DRAFT -> POSTED -> REVERSED state machine
pub struct PostingEngine<S: LedgerStorage> {
    storage: S,
    budget: BudgetTracker<S>,
    system_accounts: SystemAccounts,
    validator: Box<dyn VoucherValidator>,
    config: EngineConfig,
}

impl<S: LedgerStorage + Clone> PostingEngine<S> {
    /// Open the engine, resolving system accounts up front
    pub async fn open(storage: S, config: EngineConfig) -> LedgerResult<Self> {
        config.validate()?;
        let system_accounts =
            SystemAccounts::resolve(&storage, &config.required_system_roles).await?;
        Ok(Self {
            budget: BudgetTracker::new(storage.clone(), config.clone()),
            storage,
            system_accounts,
            validator: Box::new(DefaultVoucherValidator),
            config,
        })
    }

    /// Replace the double-entry validator
    pub fn with_validator(mut self, validator: Box<dyn VoucherValidator>) -> Self {
        self.validator = validator;
        self
    }
}

impl<S: LedgerStorage> PostingEngine<S> {
    /// Re-read role assignments after the chart changed
    pub async fn reload_system_accounts(&mut self) -> LedgerResult<()> {
        self.system_accounts =
            SystemAccounts::resolve(&self.storage, &self.config.required_system_roles).await?;
        Ok(())
    }

    pub fn system_accounts(&self) -> &SystemAccounts {
        &self.system_accounts
    }

    pub fn budget(&self) -> &BudgetTracker<S> {
        &self.budget
    }

    pub fn budget_mut(&mut self) -> &mut BudgetTracker<S> {
        &mut self.budget
    }

    /// Store a submission as a numbered draft
    pub async fn create_draft(&mut self, submission: VoucherSubmission) -> LedgerResult<Voucher> {
        validate_scope(&submission.organization, &submission.fiscal_period)?;
        let entries = self.build_entries(&submission.lines)?;

        let seq = self
            .storage
            .next_voucher_sequence(
                &submission.organization,
                &submission.fiscal_period,
                submission.voucher_type,
            )
            .await?;
        let mut voucher = Voucher::draft(
            voucher_number(submission.voucher_type, &submission.fiscal_period, seq),
            submission.organization,
            submission.fiscal_period,
            submission.date,
            submission.voucher_type,
            submission.description,
        );
        voucher.entries = entries;

        let voucher = self.storage.insert_voucher(voucher).await?;
        debug!(voucher_id = voucher.id, voucher_no = %voucher.voucher_no, "draft created");
        Ok(voucher)
    }

    /// Swap out every line of a draft
    pub async fn replace_draft_lines(
        &mut self,
        voucher_id: VoucherId,
        lines: Vec<VoucherLine>,
    ) -> LedgerResult<Voucher> {
        let voucher = self.get_voucher_required(voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(LedgerError::NotDraft(voucher_id));
        }
        let entries = self.build_entries(&lines)?;
        self.storage.replace_draft_entries(voucher_id, entries).await
    }

    /// Delete a draft, leaving an audit record behind
    pub async fn discard_draft(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<()> {
        let voucher = self.get_voucher_required(voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(LedgerError::NotDraft(voucher_id));
        }
        self.storage.delete_draft(voucher_id).await?;
        self.storage
            .append_audit(VoucherAuditRecord::new(
                &voucher,
                AuditAction::Discard,
                &actor.id,
                reason,
            ))
            .await?;
        info!(voucher_id, voucher_no = %voucher.voucher_no, actor = %actor.id, "draft discarded");
        Ok(())
    }

    /// Post a draft; all preconditions hold or nothing changes
    pub async fn post(&mut self, voucher_id: VoucherId, actor: &Actor) -> LedgerResult<Voucher> {
        actor.require(Permission::PostVoucher)?;
        self.post_draft(voucher_id, actor, None).await
    }

    /// Create and post in one call.
    ///
    /// A rejected voucher stays in draft for correction. Any other failure
    /// removes the draft again before the error is returned.
    pub async fn submit(
        &mut self,
        submission: VoucherSubmission,
        actor: &Actor,
    ) -> LedgerResult<SubmissionOutcome> {
        actor.require(Permission::PostVoucher)?;
        let draft = self.create_draft(submission).await?;

        match self.post_draft(draft.id, actor, None).await {
            Ok(voucher) => Ok(SubmissionOutcome {
                voucher_id: voucher.id,
                voucher_no: voucher.voucher_no,
                status: SubmissionStatus::Posted,
                reasons: Vec::new(),
            }),
            Err(LedgerError::PostingRejected(reasons)) => Ok(SubmissionOutcome {
                voucher_id: draft.id,
                voucher_no: draft.voucher_no,
                status: SubmissionStatus::Rejected,
                reasons,
            }),
            Err(e) => {
                self.drop_draft(draft.id).await;
                Err(e)
            }
        }
    }

    /// Cancel a posted voucher with a mirrored one; returns the new voucher's id
    pub async fn reverse(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<VoucherId> {
        actor.require(Permission::ReverseVoucher)?;
        let reason = reason.trim();
        if self.config.require_reversal_reason && reason.is_empty() {
            return Err(LedgerError::Validation(
                "A reason is required to reverse a voucher".to_string(),
            ));
        }

        let original = self.get_voucher_required(voucher_id).await?;
        match original.status {
            VoucherStatus::Draft => return Err(LedgerError::NotPosted(voucher_id)),
            VoucherStatus::Reversed => return Err(LedgerError::AlreadyReversed(voucher_id)),
            VoucherStatus::Posted => {}
        }
        if original.reverses_voucher.is_some() {
            return Err(LedgerError::Validation(format!(
                "{} is itself a reversal and cannot be reversed",
                original.voucher_no
            )));
        }
        if let (Some(days), Some(posted_at)) = (self.config.reversal_cutoff_days, original.posted_at)
        {
            let age = chrono::Utc::now().naive_utc() - posted_at;
            if age.num_days() > days {
                return Err(LedgerError::Validation(format!(
                    "{} was posted {} days ago; reversals are allowed within {} days",
                    original.voucher_no,
                    age.num_days(),
                    days
                )));
            }
        }

        let seq = self
            .storage
            .next_voucher_sequence(
                &original.organization,
                &original.fiscal_period,
                VoucherType::Reversal,
            )
            .await?;
        let mut mirror = Voucher::draft(
            voucher_number(VoucherType::Reversal, &original.fiscal_period, seq),
            original.organization.clone(),
            original.fiscal_period.clone(),
            chrono::Utc::now().date_naive(),
            VoucherType::Reversal,
            format!("REVERSAL of {}: {}", original.voucher_no, reason),
        );
        mirror.entries = original
            .entries
            .iter()
            .map(|entry| JournalEntry {
                id: 0,
                voucher_id: 0,
                line_no: entry.line_no,
                account_id: entry.account_id.clone(),
                description: format!("Reversal: {}", entry.description),
                debit: entry.credit.clone(),
                credit: entry.debit.clone(),
                instrument_ref: entry.instrument_ref.clone(),
                is_reconciled: false,
                reconciled_date: None,
                match_group: None,
            })
            .collect();
        let mirror = self.storage.insert_voucher(mirror).await?;

        let link = ReversalLink {
            original_id: voucher_id,
            reason: reason.to_string(),
        };
        if let Err(e) = self.post_draft(mirror.id, actor, Some(link)).await {
            self.drop_draft(mirror.id).await;
            return Err(e);
        }

        info!(
            voucher_id,
            voucher_no = %original.voucher_no,
            reversal_id = mirror.id,
            reversal_no = %mirror.voucher_no,
            actor = %actor.id,
            "voucher reversed"
        );
        Ok(mirror.id)
    }

    /// Return a posted voucher to draft without a mirror voucher
    pub async fn unpost(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reason: &str,
    ) -> LedgerResult<Voucher> {
        actor.require(Permission::UnpostVoucher)?;

        let mut attempt = 0;
        loop {
            let voucher = self.get_voucher_required(voucher_id).await?;
            match voucher.status {
                VoucherStatus::Draft => return Err(LedgerError::NotPosted(voucher_id)),
                VoucherStatus::Reversed => return Err(LedgerError::AlreadyReversed(voucher_id)),
                VoucherStatus::Posted => {}
            }
            if voucher.reverses_voucher.is_some() {
                return Err(LedgerError::Validation(format!(
                    "{} is a reversal; reverse the original again instead",
                    voucher.voucher_no
                )));
            }
            if voucher.has_reconciled_entries() {
                return Err(LedgerError::ReconciledLinesFrozen(voucher_id));
            }

            let accounts = self.load_accounts(&voucher).await?;
            let commit = UnpostCommit {
                voucher_id,
                allocations: self.budget.plan_release(&voucher, &accounts).await?,
                audit: VoucherAuditRecord::new(&voucher, AuditAction::Unpost, &actor.id, reason),
            };
            match self.storage.commit_unposting(commit).await {
                Ok(()) => {
                    info!(voucher_id, voucher_no = %voucher.voucher_no, actor = %actor.id, "voucher unposted");
                    return self.get_voucher_required(voucher_id).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(voucher_id, attempt, "unpost conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_voucher(&self, voucher_id: VoucherId) -> LedgerResult<Option<Voucher>> {
        self.storage.get_voucher(voucher_id).await
    }

    pub async fn get_voucher_required(&self, voucher_id: VoucherId) -> LedgerResult<Voucher> {
        self.storage
            .get_voucher(voucher_id)
            .await?
            .ok_or(LedgerError::VoucherNotFound(voucher_id))
    }

    pub async fn list_vouchers(
        &self,
        organization: &str,
        fiscal_period: &str,
    ) -> LedgerResult<Vec<Voucher>> {
        self.storage.list_vouchers(organization, fiscal_period).await
    }

    pub async fn audit_log(&self, voucher_id: VoucherId) -> LedgerResult<Vec<VoucherAuditRecord>> {
        self.storage.audit_log(voucher_id).await
    }

    async fn post_draft(
        &mut self,
        voucher_id: VoucherId,
        actor: &Actor,
        reverses: Option<ReversalLink>,
    ) -> LedgerResult<Voucher> {
        let mut attempt = 0;
        loop {
            let voucher = self.get_voucher_required(voucher_id).await?;
            match voucher.status {
                VoucherStatus::Draft => {}
                VoucherStatus::Posted => return Err(LedgerError::AlreadyPosted(voucher_id)),
                VoucherStatus::Reversed => return Err(LedgerError::AlreadyReversed(voucher_id)),
            }

            let accounts = self.load_accounts(&voucher).await?;
            let rejections = self.check_voucher(&voucher, &accounts);
            if !rejections.is_empty() {
                warn!(
                    voucher_id,
                    voucher_no = %voucher.voucher_no,
                    reasons = rejections.len(),
                    "posting rejected"
                );
                return Err(LedgerError::PostingRejected(rejections));
            }

            let plan = self.budget.plan_posting(&voucher, &accounts).await?;
            if !plan.shortfalls.is_empty() {
                warn!(voucher_id, voucher_no = %voucher.voucher_no, "posting rejected on budget");
                return Err(LedgerError::PostingRejected(plan.shortfalls));
            }

            let mut audit = vec![VoucherAuditRecord::new(
                &voucher,
                AuditAction::Post,
                &actor.id,
                "",
            )];
            if let Some(link) = &reverses {
                let original = self.get_voucher_required(link.original_id).await?;
                audit.push(VoucherAuditRecord::new(
                    &original,
                    AuditAction::Reverse,
                    &actor.id,
                    &link.reason,
                ));
            }

            let commit = PostingCommit {
                voucher_id,
                posted_by: actor.id.clone(),
                posted_at: chrono::Utc::now().naive_utc(),
                allocations: plan.deltas,
                reverses: reverses.clone(),
                audit,
            };
            match self.storage.commit_posting(commit).await {
                Ok(()) => {
                    info!(
                        voucher_id,
                        voucher_no = %voucher.voucher_no,
                        amount = %voucher.total_debits(),
                        actor = %actor.id,
                        "voucher posted"
                    );
                    return self.get_voucher_required(voucher_id).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(voucher_id, attempt, "allocation conflict, retrying post");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_voucher(&self, voucher: &Voucher, accounts: &HashMap<String, Account>) -> Vec<Rejection> {
        let mut rejections = self
            .validator
            .validate_voucher(voucher, self.config.amount_scale);
        for entry in &voucher.entries {
            match accounts.get(&entry.account_id) {
                None => rejections.push(Rejection::AccountNotFound {
                    line: entry.line_no,
                    account_id: entry.account_id.clone(),
                }),
                Some(account) if !account.is_postable() => {
                    rejections.push(Rejection::AccountNotPostable {
                        line: entry.line_no,
                        account_id: entry.account_id.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        rejections
    }

    async fn load_accounts(&self, voucher: &Voucher) -> LedgerResult<HashMap<String, Account>> {
        let mut accounts = HashMap::new();
        for entry in &voucher.entries {
            if accounts.contains_key(&entry.account_id) {
                continue;
            }
            if let Some(account) = self.storage.get_account(&entry.account_id).await? {
                accounts.insert(entry.account_id.clone(), account);
            }
        }
        Ok(accounts)
    }

    fn build_entries(&self, lines: &[VoucherLine]) -> LedgerResult<Vec<JournalEntry>> {
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let account_id = match &line.account {
                    AccountRef::Id(id) => id.clone(),
                    AccountRef::Role(role) => self.system_accounts.get(*role)?.id.clone(),
                };
                Ok(JournalEntry {
                    id: 0,
                    voucher_id: 0,
                    line_no: idx + 1,
                    account_id,
                    description: line.description.clone(),
                    debit: line.debit.clone(),
                    credit: line.credit.clone(),
                    instrument_ref: line
                        .instrument_ref
                        .as_ref()
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty()),
                    is_reconciled: false,
                    reconciled_date: None,
                    match_group: None,
                })
            })
            .collect()
    }

    async fn drop_draft(&mut self, voucher_id: VoucherId) {
        if let Err(e) = self.storage.delete_draft(voucher_id).await {
            warn!(voucher_id, error = %e, "could not remove draft after failed posting");
        }
    }
}

/// `"{PREFIX}-{fiscal_period}-{seq:04}"`
pub fn voucher_number(voucher_type: VoucherType, fiscal_period: &str, seq: u64) -> String {
    format!("{}-{}-{:04}", voucher_type.prefix(), fiscal_period, seq)
}

/// Sum of debits minus credits per account over a set of vouchers
pub fn net_by_account<'a>(
    vouchers: impl IntoIterator<Item = &'a Voucher>,
) -> HashMap<String, BigDecimal> {
    let mut net: HashMap<String, BigDecimal> = HashMap::new();
    for voucher in vouchers {
        for entry in &voucher.entries {
            *net.entry(entry.account_id.clone())
                .or_insert_with(|| BigDecimal::from(0)) += &entry.debit - &entry.credit;
        }
    }
    net
}
