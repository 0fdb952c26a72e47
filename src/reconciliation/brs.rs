//! Bank Reconciliation Statement

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::traits::LedgerEntryView;
use crate::types::*;

/// A ledger movement the bank has not yet reflected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingItem {
    pub entry_id: EntryId,
    pub voucher_no: String,
    pub date: NaiveDate,
    pub description: String,
    pub instrument_ref: Option<String>,
    pub amount: BigDecimal,
}

impl OutstandingItem {
    fn from_view(view: &LedgerEntryView, amount: BigDecimal) -> Self {
        Self {
            entry_id: view.entry.id,
            voucher_no: view.voucher_no.clone(),
            date: view.voucher_date,
            description: view.entry.description.clone(),
            instrument_ref: view.entry.instrument_ref.clone(),
            amount,
        }
    }
}

/// A statement line with no counterpart in the books
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedBankItem {
    pub line_id: StatementLineId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrsReport {
    pub statement_id: StatementId,
    pub cash_book_balance: BigDecimal,
    /// Cheques issued that the bank has not yet paid
    pub unpresented_total: BigDecimal,
    /// Receipts the bank has not yet credited
    pub uncredited_total: BigDecimal,
    pub calculated_bank_balance: BigDecimal,
    pub actual_bank_balance: BigDecimal,
    pub difference: BigDecimal,
    pub unpresented_list: Vec<OutstandingItem>,
    pub uncredited_list: Vec<OutstandingItem>,
    pub unmatched_bank_list: Vec<UnmatchedBankItem>,
}

impl BrsReport {
    pub fn is_fully_reconciled(&self) -> bool {
        self.difference == BigDecimal::from(0)
            && self.unpresented_list.is_empty()
            && self.uncredited_list.is_empty()
            && self.unmatched_bank_list.is_empty()
    }
}

/// Build the statement from already-loaded data.
///
/// `cash_book` holds the posted bank-account entries whose debits minus
/// credits form the cash book balance. `outstanding` holds the unreconciled
/// posted entries, and `unmatched` the unreconciled statement lines.
pub fn compute(
    statement: &BankStatement,
    cash_book: &[LedgerEntryView],
    outstanding: &[LedgerEntryView],
    unmatched: &[BankStatementLine],
) -> BrsReport {
    let zero = BigDecimal::from(0);

    let debits: BigDecimal = cash_book.iter().map(|v| &v.entry.debit).sum();
    let credits: BigDecimal = cash_book.iter().map(|v| &v.entry.credit).sum();
    let cash_book_balance = debits - credits;

    let mut unpresented_list = Vec::new();
    let mut uncredited_list = Vec::new();
    for view in outstanding.iter().filter(|v| !v.entry.is_reconciled) {
        if view.entry.credit > zero {
            unpresented_list.push(OutstandingItem::from_view(view, view.entry.credit.clone()));
        } else if view.entry.debit > zero {
            uncredited_list.push(OutstandingItem::from_view(view, view.entry.debit.clone()));
        }
    }
    let unpresented_total: BigDecimal = unpresented_list.iter().map(|i| &i.amount).sum();
    let uncredited_total: BigDecimal = uncredited_list.iter().map(|i| &i.amount).sum();

    let calculated_bank_balance = &cash_book_balance + &unpresented_total - &uncredited_total;
    let difference = &calculated_bank_balance - &statement.closing_balance;

    let unmatched_bank_list = unmatched
        .iter()
        .filter(|l| !l.is_reconciled)
        .map(|l| UnmatchedBankItem {
            line_id: l.id,
            date: l.date,
            description: l.description.clone(),
            reference: l.reference.clone(),
            debit: l.debit.clone(),
            credit: l.credit.clone(),
        })
        .collect();

    BrsReport {
        statement_id: statement.id,
        cash_book_balance,
        unpresented_total,
        uncredited_total,
        calculated_bank_balance,
        actual_bank_balance: statement.closing_balance.clone(),
        difference,
        unpresented_list,
        uncredited_list,
        unmatched_bank_list,
    }
}
