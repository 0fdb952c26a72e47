//! Core types and data structures for the ledger and reconciliation engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type VoucherId = u64;
pub type EntryId = u64;
pub type StatementId = u64;
pub type StatementLineId = u64;

/// Identifier shared by every statement line and journal entry reconciled together
pub type MatchGroupId = Uuid;

/// Account nature following standard government accounting classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountNature {
    /// What the organization owns (bank, receivables, advances)
    Asset,
    /// What the organization owes (payables, withheld taxes, deposits)
    Liability,
    /// Accumulated fund balance
    Equity,
    /// Taxes, fees and grants received
    Revenue,
    /// Salaries, contingencies, development spending
    Expenditure,
}

/// Side of a double-entry movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn opposite(self) -> Self {
        match self {
            EntrySide::Debit => EntrySide::Credit,
            EntrySide::Credit => EntrySide::Debit,
        }
    }
}

/// Returns the side on which an account of this nature grows.
///
/// Assets and expenditure grow on the debit side; liabilities, equity and
/// revenue grow on the credit side. Every sign decision in the crate (running
/// balances, budget spend, bank polarity) goes through this function.
pub fn natural_side(nature: AccountNature) -> EntrySide {
    match nature {
        AccountNature::Asset | AccountNature::Expenditure => EntrySide::Debit,
        AccountNature::Liability | AccountNature::Equity | AccountNature::Revenue => {
            EntrySide::Credit
        }
    }
}

/// Functional role an account plays for automated posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemRole {
    #[serde(rename = "suspense")]
    Suspense,
    #[serde(rename = "cheque-clearing")]
    ChequeClearing,
    #[serde(rename = "tax-withheld-income")]
    IncomeTaxWithheld,
    #[serde(rename = "tax-withheld-sales")]
    SalesTaxWithheld,
    #[serde(rename = "security-retention")]
    SecurityRetention,
    #[serde(rename = "accounts-payable")]
    AccountsPayable,
    #[serde(rename = "accounts-receivable")]
    AccountsReceivable,
    #[serde(rename = "income-tax-payable")]
    IncomeTaxPayable,
    #[serde(rename = "sales-tax-payable")]
    SalesTaxPayable,
    #[serde(rename = "stamp-duty-payable")]
    StampDutyPayable,
}

impl SystemRole {
    pub const ALL: [SystemRole; 10] = [
        SystemRole::Suspense,
        SystemRole::ChequeClearing,
        SystemRole::IncomeTaxWithheld,
        SystemRole::SalesTaxWithheld,
        SystemRole::SecurityRetention,
        SystemRole::AccountsPayable,
        SystemRole::AccountsReceivable,
        SystemRole::IncomeTaxPayable,
        SystemRole::SalesTaxPayable,
        SystemRole::StampDutyPayable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::Suspense => "suspense",
            SystemRole::ChequeClearing => "cheque-clearing",
            SystemRole::IncomeTaxWithheld => "tax-withheld-income",
            SystemRole::SalesTaxWithheld => "tax-withheld-sales",
            SystemRole::SecurityRetention => "security-retention",
            SystemRole::AccountsPayable => "accounts-payable",
            SystemRole::AccountsReceivable => "accounts-receivable",
            SystemRole::IncomeTaxPayable => "income-tax-payable",
            SystemRole::SalesTaxPayable => "sales-tax-payable",
            SystemRole::StampDutyPayable => "stamp-duty-payable",
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemRole {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SystemRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s.trim())
            .ok_or_else(|| LedgerError::Validation(format!("Unknown system role '{}'", s)))
    }
}

/// Ledger account (budget head)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Classification code, unique across the chart
    pub id: String,
    /// Human-readable account name
    pub name: String,
    /// Nature of the account (Asset, Liability, etc.)
    pub nature: AccountNature,
    /// Optional parent account for hierarchical chart of accounts
    pub parent_id: Option<String>,
    /// Role resolved by automated posting, if any
    pub system_role: Option<SystemRole>,
    /// Whether spending on this account is limited by a budget allocation
    pub budget_control: bool,
    /// False for aggregation (parent) heads that only roll up children
    pub posting_allowed: bool,
    /// Inactive accounts keep their history but accept no new postings
    pub is_active: bool,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new active, postable account without budget control
    pub fn new(id: impl Into<String>, name: impl Into<String>, nature: AccountNature) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: id.into(),
            name: name.into(),
            nature,
            parent_id: None,
            system_role: None,
            budget_control: false,
            posting_allowed: true,
            is_active: true,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_system_role(mut self, role: SystemRole) -> Self {
        self.system_role = Some(role);
        self
    }

    pub fn with_budget_control(mut self) -> Self {
        self.budget_control = true;
        self
    }

    /// Mark the account as a pure aggregation head
    pub fn aggregation(mut self) -> Self {
        self.posting_allowed = false;
        self
    }

    /// Whether journal entries may be posted against this account
    pub fn is_postable(&self) -> bool {
        self.is_active && self.posting_allowed
    }
}

/// Running balance of one account within one organization and fiscal period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub organization: String,
    pub fiscal_period: String,
    pub account_id: String,
    pub nature: AccountNature,
    /// Signed balance on the account's natural side
    pub balance: BigDecimal,
    pub updated_at: NaiveDateTime,
}

impl AccountBalance {
    pub fn zero(organization: &str, fiscal_period: &str, account: &Account) -> Self {
        Self {
            organization: organization.to_string(),
            fiscal_period: fiscal_period.to_string(),
            account_id: account.id.clone(),
            nature: account.nature,
            balance: BigDecimal::from(0),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Move the balance by an entry on the given side
    pub fn apply(&mut self, side: EntrySide, amount: &BigDecimal) {
        if side == natural_side(self.nature) {
            self.balance += amount;
        } else {
            self.balance -= amount;
        }
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Kind of voucher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherType {
    Journal,
    Payment,
    Receipt,
    Contra,
    Reversal,
}

impl VoucherType {
    /// Prefix used in voucher numbers
    pub fn prefix(&self) -> &'static str {
        match self {
            VoucherType::Journal => "JV",
            VoucherType::Payment => "PV",
            VoucherType::Receipt => "RV",
            VoucherType::Contra => "CV",
            VoucherType::Reversal => "REV",
        }
    }
}

/// Posting state of a voucher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Draft,
    Posted,
    /// Posted and later reversed; terminal
    Reversed,
}

/// How a submitted line names its account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRef {
    Id(String),
    Role(SystemRole),
}

impl From<&str> for AccountRef {
    fn from(id: &str) -> Self {
        AccountRef::Id(id.to_string())
    }
}

impl From<String> for AccountRef {
    fn from(id: String) -> Self {
        AccountRef::Id(id)
    }
}

impl From<SystemRole> for AccountRef {
    fn from(role: SystemRole) -> Self {
        AccountRef::Role(role)
    }
}

/// One line of a voucher submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherLine {
    pub account: AccountRef,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: String,
    /// Cheque number or bank transfer reference
    pub instrument_ref: Option<String>,
}

impl VoucherLine {
    pub fn debit(
        account: impl Into<AccountRef>,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            debit: amount,
            credit: BigDecimal::from(0),
            description: description.into(),
            instrument_ref: None,
        }
    }

    pub fn credit(
        account: impl Into<AccountRef>,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            debit: BigDecimal::from(0),
            credit: amount,
            description: description.into(),
            instrument_ref: None,
        }
    }

    pub fn with_instrument(mut self, instrument_ref: impl Into<String>) -> Self {
        self.instrument_ref = Some(instrument_ref.into());
        self
    }
}

/// Candidate voucher handed in by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherSubmission {
    pub date: NaiveDate,
    pub voucher_type: VoucherType,
    pub fiscal_period: String,
    pub organization: String,
    pub description: String,
    pub lines: Vec<VoucherLine>,
}

/// Ledger line belonging to exactly one voucher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub voucher_id: VoucherId,
    /// 1-based position within the voucher
    pub line_no: usize,
    pub account_id: String,
    pub description: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub instrument_ref: Option<String>,
    pub is_reconciled: bool,
    pub reconciled_date: Option<NaiveDate>,
    pub match_group: Option<MatchGroupId>,
}

impl JournalEntry {
    /// The side carrying the amount, or `None` when neither or both are set
    pub fn side(&self) -> Option<EntrySide> {
        let zero = BigDecimal::from(0);
        match (self.debit > zero, self.credit > zero) {
            (true, false) => Some(EntrySide::Debit),
            (false, true) => Some(EntrySide::Credit),
            _ => None,
        }
    }

    /// The non-zero amount of the entry
    pub fn amount(&self) -> BigDecimal {
        match self.side() {
            Some(EntrySide::Credit) => self.credit.clone(),
            _ => self.debit.clone(),
        }
    }
}

/// Transaction header with its ledger lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    pub voucher_no: String,
    pub organization: String,
    pub fiscal_period: String,
    pub date: NaiveDate,
    pub voucher_type: VoucherType,
    pub description: String,
    pub status: VoucherStatus,
    pub entries: Vec<JournalEntry>,
    pub created_at: NaiveDateTime,
    pub posted_at: Option<NaiveDateTime>,
    pub posted_by: Option<String>,
    pub reversed_at: Option<NaiveDateTime>,
    pub reversed_by: Option<String>,
    /// Reversal voucher that cancelled this one
    pub reversed_by_voucher: Option<VoucherId>,
    /// Original voucher this one cancels
    pub reverses_voucher: Option<VoucherId>,
    pub reversal_reason: Option<String>,
}

impl Voucher {
    /// Create an unsaved draft; storage assigns ids on insert
    pub fn draft(
        voucher_no: String,
        organization: String,
        fiscal_period: String,
        date: NaiveDate,
        voucher_type: VoucherType,
        description: String,
    ) -> Self {
        Self {
            id: 0,
            voucher_no,
            organization,
            fiscal_period,
            date,
            voucher_type,
            description,
            status: VoucherStatus::Draft,
            entries: Vec::new(),
            created_at: chrono::Utc::now().naive_utc(),
            posted_at: None,
            posted_by: None,
            reversed_at: None,
            reversed_by: None,
            reversed_by_voucher: None,
            reverses_voucher: None,
            reversal_reason: None,
        }
    }

    pub fn total_debits(&self) -> BigDecimal {
        self.entries.iter().map(|e| &e.debit).sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.entries.iter().map(|e| &e.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    /// Posted or reversed vouchers are part of the books
    pub fn is_posted(&self) -> bool {
        self.status != VoucherStatus::Draft
    }

    pub fn has_reconciled_entries(&self) -> bool {
        self.entries.iter().any(|e| e.is_reconciled)
    }
}

/// Why a voucher could not be posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    TooFewLines { count: usize },
    Unbalanced { debit: BigDecimal, credit: BigDecimal },
    EmptyLine { line: usize },
    BothSides { line: usize },
    NegativeAmount { line: usize },
    ExcessPrecision { line: usize, scale: i64 },
    AmountTooLarge { line: usize },
    AccountNotFound { line: usize, account_id: String },
    AccountNotPostable { line: usize, account_id: String },
    InsufficientBudget {
        account_id: String,
        required: BigDecimal,
        available: BigDecimal,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooFewLines { count } => {
                write!(f, "voucher needs at least two lines, has {}", count)
            }
            Rejection::Unbalanced { debit, credit } => {
                write!(f, "not balanced: debits = {}, credits = {}", debit, credit)
            }
            Rejection::EmptyLine { line } => write!(f, "line {} has no amount", line),
            Rejection::BothSides { line } => {
                write!(f, "line {} carries both a debit and a credit", line)
            }
            Rejection::NegativeAmount { line } => write!(f, "line {} has a negative amount", line),
            Rejection::ExcessPrecision { line, scale } => write!(
                f,
                "line {} has more than {} fractional digits",
                line, scale
            ),
            Rejection::AmountTooLarge { line } => {
                write!(f, "line {} has an amount beyond the supported range", line)
            }
            Rejection::AccountNotFound { line, account_id } => {
                write!(f, "line {}: account '{}' not found", line, account_id)
            }
            Rejection::AccountNotPostable { line, account_id } => write!(
                f,
                "line {}: account '{}' is inactive or does not allow posting",
                line, account_id
            ),
            Rejection::InsufficientBudget {
                account_id,
                required,
                available,
            } => write!(
                f,
                "insufficient budget on '{}': required {}, available {}",
                account_id, required, available
            ),
        }
    }
}

fn join_rejections(rejections: &[Rejection]) -> String {
    rejections
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Scope of one budget allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BudgetKey {
    pub organization: String,
    pub fiscal_period: String,
    pub account_id: String,
}

impl BudgetKey {
    pub fn new(
        organization: impl Into<String>,
        fiscal_period: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            fiscal_period: fiscal_period.into(),
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for BudgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization, self.fiscal_period, self.account_id
        )
    }
}

/// Spend ceiling and running spend for one account in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub key: BudgetKey,
    pub original_allocation: BigDecimal,
    pub revised_allocation: BigDecimal,
    /// What may actually be spent so far; phased releases grow it
    pub released_amount: BigDecimal,
    pub spent_amount: BigDecimal,
    /// Bumped on every write; used for optimistic locking
    pub version: u64,
    pub updated_at: NaiveDateTime,
}

impl BudgetAllocation {
    pub fn new(key: BudgetKey, original: BigDecimal, released: BigDecimal) -> Self {
        Self {
            key,
            revised_allocation: original.clone(),
            original_allocation: original,
            released_amount: released,
            spent_amount: BigDecimal::from(0),
            version: 0,
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Released minus spent; negative when already overspent
    pub fn available(&self) -> BigDecimal {
        &self.released_amount - &self.spent_amount
    }

    pub fn can_spend(&self, amount: &BigDecimal) -> bool {
        &self.spent_amount + amount <= self.released_amount
    }

    /// Spent as a percentage of the revised allocation
    pub fn utilization_percent(&self) -> BigDecimal {
        if self.revised_allocation == BigDecimal::from(0) {
            return BigDecimal::from(0);
        }
        (&self.spent_amount / &self.revised_allocation * BigDecimal::from(100)).with_scale(2)
    }
}

/// Operator capability checked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    PostVoucher,
    ReverseVoucher,
    UnpostVoucher,
}

/// The user performing an operation, with the permissions granted upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub permissions: Vec<Permission>,
}

impl Actor {
    pub fn new(id: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            id: id.into(),
            permissions,
        }
    }

    /// Prepares vouchers but cannot post them
    pub fn maker(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn checker(id: impl Into<String>) -> Self {
        Self::new(id, vec![Permission::PostVoucher, Permission::ReverseVoucher])
    }

    pub fn administrator(id: impl Into<String>) -> Self {
        Self::new(
            id,
            vec![
                Permission::PostVoucher,
                Permission::ReverseVoucher,
                Permission::UnpostVoucher,
            ],
        )
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> LedgerResult<()> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(LedgerError::PermissionDenied {
                actor: self.id.clone(),
                permission,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Post,
    Unpost,
    Reverse,
    Discard,
}

/// Audit trail record, kept even when the draft it describes is discarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherAuditRecord {
    pub voucher_id: VoucherId,
    pub voucher_no: String,
    pub action: AuditAction,
    pub actor: String,
    pub reason: String,
    pub at: NaiveDateTime,
}

impl VoucherAuditRecord {
    pub fn new(voucher: &Voucher, action: AuditAction, actor: &str, reason: &str) -> Self {
        Self {
            voucher_id: voucher.id,
            voucher_no: voucher.voucher_no.clone(),
            action,
            actor: actor.to_string(),
            reason: reason.to_string(),
            at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Bank account linked to a ledger account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub organization: String,
    /// Ledger account that forms the cash book for this bank account
    pub gl_account_id: String,
    pub title: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Draft,
    Reconciling,
    /// Finalized; no further ingest or matching
    Reconciled,
}

/// Monthly statement reported by the bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStatement {
    pub id: StatementId,
    pub bank_account_id: String,
    /// Calendar month, 1-12
    pub month: u32,
    pub fiscal_period: String,
    pub opening_balance: BigDecimal,
    pub closing_balance: BigDecimal,
    pub status: StatementStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BankStatement {
    pub fn is_closed(&self) -> bool {
        self.status == StatementStatus::Reconciled
    }
}

/// One movement as reported by the bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStatementLine {
    pub id: StatementLineId,
    pub statement_id: StatementId,
    pub date: NaiveDate,
    pub description: String,
    /// Withdrawal
    pub debit: BigDecimal,
    /// Deposit
    pub credit: BigDecimal,
    pub reference: String,
    /// Running balance after this line
    pub balance: BigDecimal,
    pub is_reconciled: bool,
    pub reconciled_date: Option<NaiveDate>,
    /// Set only for one-to-one matches
    pub matched_entry: Option<EntryId>,
    pub match_group: Option<MatchGroupId>,
}

impl BankStatementLine {
    /// Side of the movement in the bank's own books
    pub fn bank_side(&self) -> EntrySide {
        if self.debit > BigDecimal::from(0) {
            EntrySide::Debit
        } else {
            EntrySide::Credit
        }
    }

    /// Side on which the same movement appears in the organization's ledger.
    ///
    /// A withdrawal (bank debit) is a credit to the bank ledger account and a
    /// deposit (bank credit) is a debit.
    pub fn ledger_side(&self) -> EntrySide {
        self.bank_side().opposite()
    }

    pub fn amount(&self) -> BigDecimal {
        match self.bank_side() {
            EntrySide::Debit => self.debit.clone(),
            EntrySide::Credit => self.credit.clone(),
        }
    }
}

/// Trial balance for one organization and fiscal period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub organization: String,
    pub fiscal_period: String,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: String,
    pub account_name: String,
    pub nature: AccountNature,
    pub debit_balance: Option<BigDecimal>,
    pub credit_balance: Option<BigDecimal>,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Posting rejected: {}", join_rejections(.0))]
    PostingRejected(Vec<Rejection>),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Voucher not found: {0}")]
    VoucherNotFound(VoucherId),
    #[error("Journal entry not found: {0}")]
    EntryNotFound(EntryId),
    #[error("Bank account not found: {0}")]
    BankAccountNotFound(String),
    #[error("Bank statement not found: {0}")]
    StatementNotFound(StatementId),
    #[error("Bank statement line not found: {0}")]
    StatementLineNotFound(StatementLineId),
    #[error("Budget allocation not found: {0}")]
    AllocationNotFound(BudgetKey),
    #[error("Voucher {0} is already posted")]
    AlreadyPosted(VoucherId),
    #[error("Voucher {0} is already reversed")]
    AlreadyReversed(VoucherId),
    #[error("Voucher {0} is not posted")]
    NotPosted(VoucherId),
    #[error("Voucher {0} is not a draft")]
    NotDraft(VoucherId),
    #[error("Voucher {0} has reconciled lines and cannot be unposted")]
    ReconciledLinesFrozen(VoucherId),
    #[error("Bank statement {0} is already reconciled and closed")]
    StatementClosed(StatementId),
    #[error("{actor} does not have permission {permission:?}")]
    PermissionDenied {
        actor: String,
        permission: Permission,
    },
    #[error("Insufficient budget on {account_id}: required {required}, available {available}")]
    InsufficientBudget {
        account_id: String,
        required: BigDecimal,
        available: BigDecimal,
    },
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
    #[error(
        "Totals do not match: statement Dr {statement_debit} / Cr {statement_credit}, \
         ledger Dr {ledger_debit} / Cr {ledger_credit}; \
         expected statement Dr = ledger Cr and statement Cr = ledger Dr"
    )]
    ReconciliationMismatch {
        statement_debit: BigDecimal,
        statement_credit: BigDecimal,
        ledger_debit: BigDecimal,
        ledger_credit: BigDecimal,
    },
    #[error("No account is configured for system role '{0}'")]
    UnconfiguredSystemAccount(SystemRole),
}

impl LedgerError {
    /// Safe to retry the whole request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }

    /// Deployment defect rather than a bad request
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            LedgerError::UnconfiguredSystemAccount(_) | LedgerError::Config(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
