//! Budget allocation tracking and spend control

use bigdecimal::BigDecimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_amount;

/// Allocation changes a voucher would make, plus any ceilings it breaks
#[derive(Debug, Clone, Default)]
pub struct BudgetPlan {
    pub deltas: Vec<AllocationDelta>,
    pub shortfalls: Vec<Rejection>,
}

/// Net spend per account for a voucher.
///
/// A line on the account's natural side adds to spend, a line on the
/// opposite side gives spend back.
pub fn spend_deltas(
    voucher: &Voucher,
    accounts: &HashMap<String, Account>,
) -> BTreeMap<String, BigDecimal> {
    let mut deltas: BTreeMap<String, BigDecimal> = BTreeMap::new();
    for entry in &voucher.entries {
        let (Some(account), Some(side)) = (accounts.get(&entry.account_id), entry.side()) else {
            continue;
        };
        let amount = entry.amount();
        let signed = if side == natural_side(account.nature) {
            amount
        } else {
            -amount
        };
        *deltas
            .entry(entry.account_id.clone())
            .or_insert_with(|| BigDecimal::from(0)) += signed;
    }
    deltas
}

/// Tracks spend against per-period allocations
pub struct BudgetTracker<S: LedgerStorage> {
    storage: S,
    config: EngineConfig,
}

impl<S: LedgerStorage> BudgetTracker<S> {
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Set up a fresh allocation for an account
    pub async fn allocate(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
        original: BigDecimal,
        released: BigDecimal,
    ) -> LedgerResult<BudgetAllocation> {
        validate_amount(&original, self.config.amount_scale)?;
        validate_amount(&released, self.config.amount_scale)?;
        if released > original {
            return Err(LedgerError::Validation(format!(
                "Released amount {} exceeds allocation {}",
                released, original
            )));
        }
        if self.storage.get_account(account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id.to_string()));
        }

        let key = BudgetKey::new(organization, fiscal_period, account_id);
        if self.storage.get_allocation(&key).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Allocation {} already exists",
                key
            )));
        }

        self.storage
            .save_allocation(&BudgetAllocation::new(key.clone(), original, released))
            .await?;
        info!(allocation = %key, "budget allocated");
        self.require_allocation(&key).await
    }

    /// Release a further tranche of the revised allocation
    pub async fn release(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<BudgetAllocation> {
        validate_amount(&amount, self.config.amount_scale)?;
        let key = BudgetKey::new(organization, fiscal_period, account_id);
        self.update_allocation(&key, |allocation| {
            let released = &allocation.released_amount + &amount;
            if released > allocation.revised_allocation {
                return Err(LedgerError::Validation(format!(
                    "Releasing {} would exceed the revised allocation {}",
                    amount, allocation.revised_allocation
                )));
            }
            allocation.released_amount = released;
            Ok(())
        })
        .await
    }

    /// Change the revised allocation; it may not drop below what is released
    pub async fn revise(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
        revised: BigDecimal,
    ) -> LedgerResult<BudgetAllocation> {
        validate_amount(&revised, self.config.amount_scale)?;
        let key = BudgetKey::new(organization, fiscal_period, account_id);
        self.update_allocation(&key, |allocation| {
            if revised < allocation.released_amount {
                return Err(LedgerError::Validation(format!(
                    "Revised allocation {} is below the released amount {}",
                    revised, allocation.released_amount
                )));
            }
            allocation.revised_allocation = revised.clone();
            Ok(())
        })
        .await
    }

    pub async fn get_allocation(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<Option<BudgetAllocation>> {
        self.storage
            .get_allocation(&BudgetKey::new(organization, fiscal_period, account_id))
            .await
    }

    /// Released minus spent. Negative means the account is already overspent.
    pub async fn get_available(
        &self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
    ) -> LedgerResult<BigDecimal> {
        let Some(allocation) = self
            .get_allocation(organization, fiscal_period, account_id)
            .await?
        else {
            return Ok(BigDecimal::from(0));
        };
        let available = allocation.available();
        if available < BigDecimal::from(0) {
            warn!(
                allocation = %allocation.key,
                %available,
                "allocation is overspent"
            );
        }
        Ok(available)
    }

    /// Check and consume budget outside a voucher
    pub async fn reserve_spend(
        &mut self,
        organization: &str,
        fiscal_period: &str,
        account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<()> {
        validate_amount(&amount, self.config.amount_scale)?;
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        let key = BudgetKey::new(organization, fiscal_period, account_id);

        let mut attempt = 0;
        loop {
            let allocation = self.storage.get_allocation(&key).await?;
            if account.budget_control {
                let available = allocation
                    .as_ref()
                    .map(|a| a.available())
                    .unwrap_or_else(|| BigDecimal::from(0));
                if amount > available {
                    warn!(allocation = %key, %amount, %available, "budget reservation refused");
                    return Err(LedgerError::InsufficientBudget {
                        account_id: account_id.to_string(),
                        required: amount,
                        available,
                    });
                }
            }
            let Some(allocation) = allocation else {
                return Ok(());
            };

            let delta = AllocationDelta {
                key: key.clone(),
                expected_version: allocation.version,
                delta: amount.clone(),
            };
            match self.storage.commit_allocation_deltas(vec![delta]).await {
                Ok(()) => {
                    debug!(allocation = %key, %amount, "budget reserved");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(allocation = %key, attempt, "allocation conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deltas and ceiling checks for posting a voucher.
    ///
    /// Only a net increase on a budget-controlled account is checked. A
    /// controlled account without an allocation has nothing available.
    pub(crate) async fn plan_posting(
        &self,
        voucher: &Voucher,
        accounts: &HashMap<String, Account>,
    ) -> LedgerResult<BudgetPlan> {
        let zero = BigDecimal::from(0);
        let mut plan = BudgetPlan::default();

        for (account_id, delta) in spend_deltas(voucher, accounts) {
            if delta == zero {
                continue;
            }
            let controlled = accounts
                .get(&account_id)
                .map(|a| a.budget_control)
                .unwrap_or(false);
            let key = BudgetKey::new(&voucher.organization, &voucher.fiscal_period, &account_id);
            let allocation = self.storage.get_allocation(&key).await?;

            if controlled && delta > zero {
                let available = allocation
                    .as_ref()
                    .map(|a| a.available())
                    .unwrap_or_else(|| zero.clone());
                if delta > available {
                    plan.shortfalls.push(Rejection::InsufficientBudget {
                        account_id: account_id.clone(),
                        required: delta,
                        available,
                    });
                    continue;
                }
            }

            if let Some(allocation) = allocation {
                plan.deltas.push(AllocationDelta {
                    key,
                    expected_version: allocation.version,
                    delta,
                });
            }
        }

        Ok(plan)
    }

    /// Deltas that give back what a posted voucher spent
    pub(crate) async fn plan_release(
        &self,
        voucher: &Voucher,
        accounts: &HashMap<String, Account>,
    ) -> LedgerResult<Vec<AllocationDelta>> {
        let zero = BigDecimal::from(0);
        let mut deltas = Vec::new();
        for (account_id, delta) in spend_deltas(voucher, accounts) {
            if delta == zero {
                continue;
            }
            let key = BudgetKey::new(&voucher.organization, &voucher.fiscal_period, &account_id);
            if let Some(allocation) = self.storage.get_allocation(&key).await? {
                deltas.push(AllocationDelta {
                    key,
                    expected_version: allocation.version,
                    delta: -delta,
                });
            }
        }
        Ok(deltas)
    }

    async fn require_allocation(&self, key: &BudgetKey) -> LedgerResult<BudgetAllocation> {
        self.storage
            .get_allocation(key)
            .await?
            .ok_or_else(|| LedgerError::AllocationNotFound(key.clone()))
    }

    async fn update_allocation<F>(
        &mut self,
        key: &BudgetKey,
        mut change: F,
    ) -> LedgerResult<BudgetAllocation>
    where
        F: FnMut(&mut BudgetAllocation) -> LedgerResult<()> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut allocation = self.require_allocation(key).await?;
            change(&mut allocation)?;
            match self.storage.save_allocation(&allocation).await {
                Ok(()) => {
                    info!(
                        allocation = %key,
                        revised = %allocation.revised_allocation,
                        released = %allocation.released_amount,
                        "allocation updated"
                    );
                    return self.require_allocation(key).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
