//! A month of municipal bookkeeping: post vouchers, ingest the bank
//! statement and reconcile it

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use gl_engine::utils::MemoryStorage;
use gl_engine::{
    init_tracing, Actor, BankAccount, EngineConfig, Ledger, SubmissionStatus, SystemRole,
    VoucherLine, VoucherSubmission, VoucherType,
};
use std::str::FromStr;

const ORG: &str = "tma-peshawar";
const PERIOD: &str = "2024-25";

const STATEMENT: &str = "\
Date,Description,Debit,Credit,Balance,Reference
01/07/2024,Opening deposit UIPT,,\"250,000.00\",\"1,250,000.00\",DEP-0701
05/07/2024,Cheque paid PESCO,\"38,500.00\",,\"1,211,500.00\",chq100045
09/07/2024,Cheque paid contractor,\"120,000.00\",,\"1,091,500.00\",CHQ100046
15/07/2024,Bank charges,350.00,,\"1,091,150.00\",
31/07/2024,Profit on deposit,,\"4,125.50\",\"1,095,275.50\",
";

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, day).unwrap_or_default()
}

fn amount(value: &str) -> Result<BigDecimal, Box<dyn std::error::Error>> {
    Ok(BigDecimal::from_str(value)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    println!("🏛️  GL Engine - Month-end Reconciliation Example\n");

    let mut ledger = Ledger::open(MemoryStorage::new(), EngineConfig::default()).await?;

    // 1. Chart of accounts and bank account
    println!("📊 Setting up Chart of Accounts...");
    let chart = ledger.setup_standard_chart_of_accounts().await?;
    let mut codes: Vec<_> = chart.values().collect();
    codes.sort_by(|a, b| a.id.cmp(&b.id));
    for account in codes {
        println!("  ✓ {} - {} ({:?})", account.id, account.name, account.nature);
    }
    ledger
        .register_bank_account(BankAccount {
            id: "nbp-main".to_string(),
            organization: ORG.to_string(),
            gl_account_id: "G01101".to_string(),
            title: "TMA Peshawar Main Account".to_string(),
            account_number: "4010-0011223344".to_string(),
        })
        .await?;

    // 2. Budget
    println!("\n💼 Releasing budget...");
    ledger
        .allocate_budget(ORG, PERIOD, "A03303", amount("600000")?, amount("150000")?)
        .await?;
    println!(
        "  Electricity available: Rs {}",
        ledger.get_available_budget(ORG, PERIOD, "A03303").await?
    );

    // 3. Vouchers
    println!("\n🧾 Posting vouchers...");
    let checker = Actor::checker("accounts-officer");
    let submissions = vec![
        VoucherSubmission {
            date: date(1),
            voucher_type: VoucherType::Receipt,
            fiscal_period: PERIOD.to_string(),
            organization: ORG.to_string(),
            description: "UIPT collection deposited".to_string(),
            lines: vec![
                VoucherLine::debit("G01101", amount("250000")?, "Deposit slip")
                    .with_instrument("DEP-0701"),
                VoucherLine::credit("C01101", amount("250000")?, "UIPT July"),
            ],
        },
        VoucherSubmission {
            date: date(3),
            voucher_type: VoucherType::Payment,
            fiscal_period: PERIOD.to_string(),
            organization: ORG.to_string(),
            description: "PESCO electricity bill".to_string(),
            lines: vec![
                VoucherLine::debit("A03303", amount("40000")?, "June bill"),
                VoucherLine::credit(SystemRole::IncomeTaxWithheld, amount("1500")?, "WHT"),
                VoucherLine::credit("G01101", amount("38500")?, "Cheque issued")
                    .with_instrument("CHQ100045"),
            ],
        },
        VoucherSubmission {
            date: date(6),
            voucher_type: VoucherType::Payment,
            fiscal_period: PERIOD.to_string(),
            organization: ORG.to_string(),
            description: "Contractor running bill".to_string(),
            lines: vec![
                VoucherLine::debit(SystemRole::AccountsPayable, amount("120000")?, "Bill 7"),
                VoucherLine::credit("G01101", amount("120000")?, "Cheque issued")
                    .with_instrument("CHQ100046"),
            ],
        },
        VoucherSubmission {
            date: date(28),
            voucher_type: VoucherType::Payment,
            fiscal_period: PERIOD.to_string(),
            organization: ORG.to_string(),
            description: "Electricity arrears".to_string(),
            lines: vec![
                VoucherLine::debit("A03303", amount("200000")?, "Arrears"),
                VoucherLine::credit("G01101", amount("200000")?, "Cheque issued")
                    .with_instrument("CHQ100047"),
            ],
        },
    ];

    for submission in submissions {
        let description = submission.description.clone();
        let outcome = ledger.submit_voucher(submission, &checker).await?;
        match outcome.status {
            SubmissionStatus::Posted => {
                println!("  ✓ {} {}", outcome.voucher_no, description)
            }
            SubmissionStatus::Rejected => {
                println!("  ✗ {} {}", outcome.voucher_no, description);
                for reason in &outcome.reasons {
                    println!("      {}", reason);
                }
            }
        }
    }

    // 4. Bank statement
    println!("\n🏦 Ingesting July statement...");
    let statement = ledger
        .create_statement(
            "nbp-main",
            7,
            PERIOD,
            amount("1000000")?,
            amount("1095275.50")?,
        )
        .await?;
    let report = ledger.ingest_statement_csv(statement.id, STATEMENT).await?;
    println!("  Lines created: {}", report.lines_created);
    for error in &report.row_errors {
        println!("  ⚠️  row {}: {}", error.row, error.message);
    }
    for divergence in &report.balance_divergences {
        println!(
            "  ⚠️  row {}: bank says {}, recomputed {}",
            divergence.row, divergence.reported, divergence.computed
        );
    }

    // 5. Reconciliation
    println!("\n🔗 Auto-reconciling...");
    let result = ledger.auto_reconcile(statement.id, date(31)).await?;
    println!("  Matched:                   {}", result.matched_count);
    println!("  Unmatched statement lines: {}", result.unmatched_statement_lines);
    println!("  Unmatched ledger entries:  {}", result.unmatched_ledger_entries);

    let brs = ledger.brs(statement.id).await?;
    println!("\n📋 Bank Reconciliation Statement");
    println!("  Balance as per cash book:   Rs {}", brs.cash_book_balance);
    println!("  Add: unpresented cheques:   Rs {}", brs.unpresented_total);
    for item in &brs.unpresented_list {
        println!(
            "      {} {} Rs {}",
            item.voucher_no,
            item.instrument_ref.as_deref().unwrap_or("-"),
            item.amount
        );
    }
    println!("  Less: uncredited deposits:  Rs {}", brs.uncredited_total);
    println!("  Calculated bank balance:    Rs {}", brs.calculated_bank_balance);
    println!("  Balance as per statement:   Rs {}", brs.actual_bank_balance);
    println!("  Difference:                 Rs {}", brs.difference);
    for line in &brs.unmatched_bank_list {
        println!(
            "  Not in books: {} {} Dr {} Cr {}",
            line.date, line.description, line.debit, line.credit
        );
    }
    println!(
        "\n  Fully reconciled: {}",
        if brs.is_fully_reconciled() { "✅" } else { "❌" }
    );

    // 6. Integrity
    println!("\n🔍 Validating Ledger Integrity...");
    let integrity = ledger.validate_integrity(ORG, PERIOD).await?;
    println!(
        "  {} vouchers posted, trial balance Dr {} / Cr {}",
        integrity.posted_vouchers,
        integrity.trial_balance_total_debits,
        integrity.trial_balance_total_credits
    );
    if integrity.is_valid {
        println!("  ✅ Ledger is valid");
    } else {
        for issue in &integrity.issues {
            println!("  ❌ {}", issue);
        }
    }

    Ok(())
}
