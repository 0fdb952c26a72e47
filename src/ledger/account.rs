//! Account management functionality

use std::collections::HashMap;
use tracing::{debug, info};

use crate::traits::*;
use crate::types::*;

/// Account manager for handling chart of accounts operations
pub struct AccountManager<S: LedgerStorage> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
}

impl<S: LedgerStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultAccountValidator),
        }
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Register a new account in the chart
    pub async fn create_account(&mut self, account: Account) -> LedgerResult<Account> {
        self.validator.validate_account(&account)?;

        if self.storage.get_account(&account.id).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }

        if let Some(ref parent_id) = account.parent_id {
            match self.storage.get_account(parent_id).await? {
                None => {
                    return Err(LedgerError::Validation(format!(
                        "Parent account '{}' does not exist",
                        parent_id
                    )))
                }
                Some(parent) if parent.nature != account.nature => {
                    return Err(LedgerError::Validation(format!(
                        "Account '{}' must share the nature of its parent '{}'",
                        account.id, parent_id
                    )))
                }
                Some(_) => {}
            }
        }

        // A role must resolve to exactly one account
        if let Some(role) = account.system_role {
            if let Some(holder) = self.role_holders(role).await?.first() {
                return Err(LedgerError::Validation(format!(
                    "System role '{}' is already held by account '{}'",
                    role, holder.id
                )));
            }
        }

        self.storage.save_account(&account).await?;
        debug!(account_id = %account.id, nature = ?account.nature, "account created");
        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.storage.get_account(account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// List all accounts
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts().await
    }

    /// Activation is the only mutable part of an account's identity
    pub async fn set_active(&mut self, account_id: &str, active: bool) -> LedgerResult<Account> {
        let account = self.storage.set_account_active(account_id, active).await?;
        info!(account_id, active, "account activation changed");
        Ok(account)
    }

    /// Balance of an account for one organization and fiscal period
    pub async fn get_balance(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<AccountBalance> {
        let account = self.get_account_required(account_id).await?;
        Ok(self
            .storage
            .get_account_balance(organization, fiscal_period, account_id)
            .await?
            .unwrap_or_else(|| AccountBalance::zero(organization, fiscal_period, &account)))
    }

    /// The account configured for a functional role
    pub async fn find_by_system_role(&self, role: SystemRole) -> LedgerResult<Account> {
        self.role_holders(role)
            .await?
            .into_iter()
            .next()
            .ok_or(LedgerError::UnconfiguredSystemAccount(role))
    }

    /// Direct children of an aggregation head
    pub async fn get_child_accounts(&self, parent_id: &str) -> LedgerResult<Vec<Account>> {
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .filter(|account| account.parent_id.as_deref() == Some(parent_id))
            .collect())
    }

    async fn role_holders(&self, role: SystemRole) -> LedgerResult<Vec<Account>> {
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .filter(|account| account.system_role == Some(role))
            .collect())
    }
}

/// Role to account cache, resolved once when an engine is opened
#[derive(Debug, Clone, Default)]
pub struct SystemAccounts {
    by_role: HashMap<SystemRole, Account>,
}

impl SystemAccounts {
    /// Resolve every role present in the chart.
    ///
    /// Fails with `UnconfiguredSystemAccount` if one of `required` is absent,
    /// and with `Validation` if two accounts claim the same role.
    pub async fn resolve<S: LedgerStorage>(
        storage: &S,
        required: &[SystemRole],
    ) -> LedgerResult<Self> {
        let mut by_role: HashMap<SystemRole, Account> = HashMap::new();
        for account in storage.list_accounts().await? {
            let Some(role) = account.system_role else {
                continue;
            };
            if let Some(existing) = by_role.get(&role) {
                return Err(LedgerError::Validation(format!(
                    "System role '{}' is held by both '{}' and '{}'",
                    role, existing.id, account.id
                )));
            }
            by_role.insert(role, account);
        }

        if let Some(missing) = required.iter().find(|role| !by_role.contains_key(role)) {
            return Err(LedgerError::UnconfiguredSystemAccount(*missing));
        }

        debug!(roles = by_role.len(), "system accounts resolved");
        Ok(Self { by_role })
    }

    pub fn get(&self, role: SystemRole) -> LedgerResult<&Account> {
        self.by_role
            .get(&role)
            .ok_or(LedgerError::UnconfiguredSystemAccount(role))
    }

    pub fn contains(&self, role: SystemRole) -> bool {
        self.by_role.contains_key(&role)
    }
}

/// Utility functions for working with accounts
pub mod utils {
    use super::*;

    /// Create a small municipal chart of accounts.
    ///
    /// Returned map is keyed by a short handle (`"bank"`, `"electricity"`, ...).
    pub async fn create_standard_chart<S: LedgerStorage>(
        account_manager: &mut AccountManager<S>,
    ) -> LedgerResult<HashMap<String, Account>> {
        let chart = vec![
            (
                "bank",
                Account::new("G01101", "Bank - NBP Main Account", AccountNature::Asset),
            ),
            (
                "accounts_receivable",
                Account::new("F01101", "Receivables", AccountNature::Asset)
                    .with_system_role(SystemRole::AccountsReceivable),
            ),
            (
                "accounts_payable",
                Account::new("G11101", "Accounts Payable", AccountNature::Liability)
                    .with_system_role(SystemRole::AccountsPayable),
            ),
            (
                "income_tax_withheld",
                Account::new("G11201", "Income Tax Withheld", AccountNature::Liability)
                    .with_system_role(SystemRole::IncomeTaxWithheld),
            ),
            (
                "sales_tax_withheld",
                Account::new("G11202", "Sales Tax Withheld", AccountNature::Liability)
                    .with_system_role(SystemRole::SalesTaxWithheld),
            ),
            (
                "security_retention",
                Account::new("G11301", "Security Deposits", AccountNature::Liability)
                    .with_system_role(SystemRole::SecurityRetention),
            ),
            (
                "suspense",
                Account::new("G19999", "Suspense", AccountNature::Liability)
                    .with_system_role(SystemRole::Suspense),
            ),
            (
                "fund_balance",
                Account::new("E01101", "Accumulated Fund", AccountNature::Equity),
            ),
            (
                "property_tax",
                Account::new("C01101", "Urban Immovable Property Tax", AccountNature::Revenue),
            ),
            (
                "fees",
                Account::new("C03880", "Fees and Fines", AccountNature::Revenue),
            ),
            (
                "employee_expenses",
                Account::new("A01", "Employee Related Expenses", AccountNature::Expenditure)
                    .aggregation(),
            ),
            (
                "pay_officers",
                Account::new("A01101", "Pay of Officers", AccountNature::Expenditure)
                    .with_parent("A01")
                    .with_budget_control(),
            ),
            (
                "electricity",
                Account::new("A03303", "Electricity", AccountNature::Expenditure)
                    .with_budget_control(),
            ),
            (
                "machinery",
                Account::new("A09601", "Purchase of Plant and Machinery", AccountNature::Expenditure)
                    .with_budget_control(),
            ),
        ];

        let mut accounts = HashMap::new();
        for (handle, account) in chart {
            let account = account_manager.create_account(account).await?;
            accounts.insert(handle.to_string(), account);
        }

        Ok(accounts)
    }
}
