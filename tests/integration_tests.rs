//! Integration tests for the ledger and reconciliation engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use gl_engine::utils::MemoryStorage;
use gl_engine::*;
use std::str::FromStr;

const ORG: &str = "tma-peshawar";
const PERIOD: &str = "2024-25";

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
}

fn amount(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

fn checker() -> Actor {
    Actor::checker("accounts-officer")
}

async fn setup() -> Ledger<MemoryStorage> {
    setup_on(MemoryStorage::new()).await
}

async fn setup_on(storage: MemoryStorage) -> Ledger<MemoryStorage> {
    init_tracing();
    let mut ledger = Ledger::open(storage, EngineConfig::default())
        .await
        .unwrap();
    ledger.setup_standard_chart_of_accounts().await.unwrap();
    ledger
        .register_bank_account(BankAccount {
            id: "nbp-main".to_string(),
            organization: ORG.to_string(),
            gl_account_id: "G01101".to_string(),
            title: "TMA Peshawar Main Account".to_string(),
            account_number: "4010-0011223344".to_string(),
        })
        .await
        .unwrap();
    ledger
}

async fn bank_balance(ledger: &Ledger<MemoryStorage>) -> BigDecimal {
    ledger
        .get_account_balance(ORG, PERIOD, "G01101")
        .await
        .unwrap()
        .balance
}

fn submission(
    voucher_type: VoucherType,
    description: &str,
    lines: Vec<VoucherLine>,
) -> VoucherSubmission {
    VoucherSubmission {
        date: day(1),
        voucher_type,
        fiscal_period: PERIOD.to_string(),
        organization: ORG.to_string(),
        description: description.to_string(),
        lines,
    }
}

async fn post(ledger: &mut Ledger<MemoryStorage>, submission: VoucherSubmission) -> Voucher {
    let outcome = ledger.submit_voucher(submission, &checker()).await.unwrap();
    assert_eq!(
        outcome.status,
        SubmissionStatus::Posted,
        "rejected: {:?}",
        outcome.reasons
    );
    ledger.get_voucher(outcome.voucher_id).await.unwrap().unwrap()
}

/// Settle a payable by cheque: debit payables, credit bank
async fn pay(ledger: &mut Ledger<MemoryStorage>, value: &str, reference: Option<&str>) -> Voucher {
    let mut bank_line = VoucherLine::credit("G01101", amount(value), "Cheque issued");
    if let Some(reference) = reference {
        bank_line = bank_line.with_instrument(reference);
    }
    post(
        ledger,
        submission(
            VoucherType::Payment,
            "Contractor payment",
            vec![
                VoucherLine::debit(SystemRole::AccountsPayable, amount(value), "Bill settled"),
                bank_line,
            ],
        ),
    )
    .await
}

/// Bank a collection: debit bank, credit revenue
async fn receive(
    ledger: &mut Ledger<MemoryStorage>,
    value: &str,
    reference: Option<&str>,
) -> Voucher {
    let mut bank_line = VoucherLine::debit("G01101", amount(value), "Deposited");
    if let Some(reference) = reference {
        bank_line = bank_line.with_instrument(reference);
    }
    post(
        ledger,
        submission(
            VoucherType::Receipt,
            "Property tax collection",
            vec![
                bank_line,
                VoucherLine::credit("C01101", amount(value), "UIPT"),
            ],
        ),
    )
    .await
}

fn bank_entry(voucher: &Voucher) -> EntryId {
    voucher
        .entries
        .iter()
        .find(|e| e.account_id == "G01101")
        .map(|e| e.id)
        .unwrap()
}

fn row(
    n: usize,
    d: u32,
    description: &str,
    debit: &str,
    credit: &str,
    reference: &str,
) -> RawStatementRow {
    RawStatementRow {
        row: n,
        date: format!("2024-07-{:02}", d),
        description: description.to_string(),
        debit: debit.to_string(),
        credit: credit.to_string(),
        balance: String::new(),
        reference: reference.to_string(),
    }
}

async fn statement_with(
    ledger: &mut Ledger<MemoryStorage>,
    closing: &str,
    rows: Vec<RawStatementRow>,
) -> StatementId {
    let statement = ledger
        .create_statement("nbp-main", 7, PERIOD, amount("0"), amount(closing))
        .await
        .unwrap();
    let report = ledger.ingest_statement_rows(statement.id, rows).await.unwrap();
    assert!(report.row_errors.is_empty(), "{:?}", report.row_errors);
    statement.id
}

#[tokio::test]
async fn posted_vouchers_balance_exactly() {
    let mut ledger = setup().await;
    ledger
        .allocate_budget(ORG, PERIOD, "A03303", amount("100000"), amount("100000"))
        .await
        .unwrap();

    receive(&mut ledger, "12500.75", None).await;
    pay(&mut ledger, "3000.10", Some("CHQ1")).await;
    post(
        &mut ledger,
        submission(
            VoucherType::Journal,
            "Electricity bill with withholding",
            vec![
                VoucherLine::debit("A03303", amount("1000.00"), "PESCO"),
                VoucherLine::credit(SystemRole::IncomeTaxWithheld, amount("45.00"), "WHT"),
                VoucherLine::credit(SystemRole::AccountsPayable, amount("955.00"), "Net payable"),
            ],
        ),
    )
    .await;

    let vouchers = ledger.posting().list_vouchers(ORG, PERIOD).await.unwrap();
    assert_eq!(vouchers.len(), 3);
    for voucher in &vouchers {
        assert_eq!(voucher.total_debits(), voucher.total_credits());
    }

    let trial_balance = ledger.trial_balance(ORG, PERIOD).await.unwrap();
    assert!(trial_balance.is_balanced);
    assert!(ledger.validate_integrity(ORG, PERIOD).await.unwrap().is_valid);

    assert_eq!(bank_balance(&ledger).await, amount("9500.65"));
}

#[tokio::test]
async fn second_post_is_rejected_and_state_unchanged() {
    let mut ledger = setup().await;
    let voucher = receive(&mut ledger, "500", None).await;

    let err = ledger.post_voucher(voucher.id, &checker()).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyPosted(id) if id == voucher.id));

    let after = ledger.get_voucher(voucher.id).await.unwrap().unwrap();
    assert_eq!(after, voucher);
    assert_eq!(bank_balance(&ledger).await, amount("500"));
}

#[tokio::test]
async fn reversal_nets_to_zero_per_account() {
    let mut ledger = setup().await;
    ledger
        .allocate_budget(ORG, PERIOD, "A03303", amount("1000"), amount("1000"))
        .await
        .unwrap();
    let original = post(
        &mut ledger,
        submission(
            VoucherType::Payment,
            "Electricity",
            vec![
                VoucherLine::debit("A03303", amount("400"), "PESCO June"),
                VoucherLine::credit("G01101", amount("400"), "Cheque").with_instrument("CHQ77"),
            ],
        ),
    )
    .await;
    assert_eq!(
        ledger.get_available_budget(ORG, PERIOD, "A03303").await.unwrap(),
        amount("600")
    );

    let reversal_id = ledger
        .reverse_voucher(original.id, &checker(), "Posted against the wrong month")
        .await
        .unwrap();
    let reversal = ledger.get_voucher(reversal_id).await.unwrap().unwrap();
    let original = ledger.get_voucher(original.id).await.unwrap().unwrap();

    let net = net_by_account([&original, &reversal]);
    assert!(net.values().all(|v| *v == BigDecimal::from(0)));

    // the original lines are untouched
    assert_eq!(original.entries[0].debit, amount("400"));
    assert_eq!(original.status, VoucherStatus::Reversed);
    assert_eq!(
        ledger.get_available_budget(ORG, PERIOD, "A03303").await.unwrap(),
        amount("1000")
    );
    assert_eq!(bank_balance(&ledger).await, BigDecimal::from(0));
}

#[tokio::test]
async fn balances_are_scoped_by_organization_and_period() {
    let mut ledger = setup().await;
    receive(&mut ledger, "1000", None).await;

    let mut other_org = submission(
        VoucherType::Receipt,
        "Mardan collection",
        vec![
            VoucherLine::debit("G01101", amount("250"), "Deposited"),
            VoucherLine::credit("C01101", amount("250"), "UIPT"),
        ],
    );
    other_org.organization = "tma-mardan".to_string();
    post(&mut ledger, other_org).await;

    let mut prior_period = submission(
        VoucherType::Receipt,
        "Late collection",
        vec![
            VoucherLine::debit("G01101", amount("40"), "Deposited"),
            VoucherLine::credit("C01101", amount("40"), "UIPT"),
        ],
    );
    prior_period.fiscal_period = "2023-24".to_string();
    post(&mut ledger, prior_period).await;

    assert_eq!(bank_balance(&ledger).await, amount("1000"));
    let mardan = ledger
        .get_account_balance("tma-mardan", PERIOD, "G01101")
        .await
        .unwrap();
    assert_eq!(mardan.balance, amount("250"));
    let prior = ledger
        .get_account_balance(ORG, "2023-24", "G01101")
        .await
        .unwrap();
    assert_eq!(prior.balance, amount("40"));
    let revenue = ledger
        .get_account_balance(ORG, "2023-24", "C01101")
        .await
        .unwrap();
    assert_eq!(revenue.balance, amount("40"));
}

#[tokio::test]
async fn deactivation_keeps_the_posted_balance() {
    let mut ledger = setup().await;
    receive(&mut ledger, "700", None).await;

    let account = ledger.set_account_active("C01101", false).await.unwrap();
    assert!(!account.is_active);
    let revenue = ledger
        .get_account_balance(ORG, PERIOD, "C01101")
        .await
        .unwrap();
    assert_eq!(revenue.balance, amount("700"));

    let outcome = ledger
        .submit_voucher(
            submission(
                VoucherType::Receipt,
                "Collection to a closed head",
                vec![
                    VoucherLine::debit("G01101", amount("50"), "Deposited"),
                    VoucherLine::credit("C01101", amount("50"), "UIPT"),
                ],
            ),
            &checker(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, SubmissionStatus::Rejected);
    assert!(outcome
        .reasons
        .iter()
        .any(|r| matches!(r, Rejection::AccountNotPostable { line: 2, .. })));

    ledger.set_account_active("C01101", true).await.unwrap();
    receive(&mut ledger, "300", None).await;
    let revenue = ledger
        .get_account_balance(ORG, PERIOD, "C01101")
        .await
        .unwrap();
    assert_eq!(revenue.balance, amount("1000"));
    assert_eq!(bank_balance(&ledger).await, amount("1000"));
}

#[tokio::test]
async fn budget_ceiling_is_enforced() {
    let mut ledger = setup().await;
    ledger
        .allocate_budget(ORG, PERIOD, "A03303", amount("1000"), amount("1000"))
        .await
        .unwrap();
    ledger
        .budget_mut()
        .reserve_spend(ORG, PERIOD, "A03303", amount("900"))
        .await
        .unwrap();

    let bill = |value: &str| {
        submission(
            VoucherType::Journal,
            "Electricity bill",
            vec![
                VoucherLine::debit("A03303", amount(value), "PESCO"),
                VoucherLine::credit(SystemRole::AccountsPayable, amount(value), "Payable"),
            ],
        )
    };

    let refused = ledger.submit_voucher(bill("150"), &checker()).await.unwrap();
    assert_eq!(refused.status, SubmissionStatus::Rejected);
    assert_eq!(
        refused.reasons,
        vec![Rejection::InsufficientBudget {
            account_id: "A03303".to_string(),
            required: amount("150"),
            available: amount("100"),
        }]
    );
    let allocation = ledger
        .budget()
        .get_allocation(ORG, PERIOD, "A03303")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(allocation.spent_amount, amount("900"));

    let accepted = ledger.submit_voucher(bill("100"), &checker()).await.unwrap();
    assert_eq!(accepted.status, SubmissionStatus::Posted);
    let allocation = ledger
        .budget()
        .get_allocation(ORG, PERIOD, "A03303")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(allocation.spent_amount, amount("1000"));
    assert_eq!(allocation.utilization_percent(), amount("100"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_postings_never_overspend() {
    let storage = MemoryStorage::new();
    let config = EngineConfig {
        max_conflict_retries: 10,
        ..EngineConfig::default()
    };
    {
        let mut ledger = Ledger::open(storage.clone(), config.clone()).await.unwrap();
        ledger.setup_standard_chart_of_accounts().await.unwrap();
        ledger
            .allocate_budget(ORG, PERIOD, "A09601", amount("100"), amount("100"))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..8 {
        let storage = storage.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let mut engine = PostingEngine::open(storage, config).await?;
            engine
                .submit(
                    submission(
                        VoucherType::Journal,
                        &format!("Equipment order {}", n),
                        vec![
                            VoucherLine::debit("A09601", amount("20"), "Generator parts"),
                            VoucherLine::credit(SystemRole::AccountsPayable, amount("20"), "Payable"),
                        ],
                    ),
                    &Actor::checker(format!("checker-{}", n)),
                )
                .await
        }));
    }

    let mut posted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap().status {
            SubmissionStatus::Posted => posted += 1,
            SubmissionStatus::Rejected => rejected += 1,
        }
    }
    assert_eq!(posted, 5);
    assert_eq!(rejected, 3);

    let tracker = BudgetTracker::new(storage, config);
    let allocation = tracker
        .get_allocation(ORG, PERIOD, "A09601")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(allocation.spent_amount, amount("100"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postings_without_retries_fail_transiently_under_contention() {
    let storage = MemoryStorage::new();
    let config = EngineConfig {
        max_conflict_retries: 0,
        ..EngineConfig::default()
    };
    {
        let mut ledger = Ledger::open(storage.clone(), config.clone()).await.unwrap();
        ledger.setup_standard_chart_of_accounts().await.unwrap();
        ledger
            .allocate_budget(ORG, PERIOD, "A09601", amount("1000"), amount("1000"))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..16 {
        let storage = storage.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let mut engine = PostingEngine::open(storage, config).await?;
            engine
                .submit(
                    submission(
                        VoucherType::Journal,
                        &format!("Equipment order {}", n),
                        vec![
                            VoucherLine::debit("A09601", amount("20"), "Generator parts"),
                            VoucherLine::credit(SystemRole::AccountsPayable, amount("20"), "Payable"),
                        ],
                    ),
                    &Actor::checker(format!("checker-{}", n)),
                )
                .await
        }));
    }

    let mut posted = 0i64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.status, SubmissionStatus::Posted);
                posted += 1;
            }
            Err(e) => assert!(e.is_transient(), "unexpected error {:?}", e),
        }
    }
    assert!(posted >= 1);

    let tracker = BudgetTracker::new(storage, config);
    let allocation = tracker
        .get_allocation(ORG, PERIOD, "A09601")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(allocation.spent_amount, BigDecimal::from(20 * posted));
}

#[tokio::test]
async fn storage_refuses_to_reconcile_an_item_twice() {
    let storage = MemoryStorage::new();
    let mut ledger = setup_on(storage.clone()).await;
    let first = pay(&mut ledger, "500", Some("CHQ1")).await;
    let second = pay(&mut ledger, "500", None).await;
    let statement_id = statement_with(
        &mut ledger,
        "-1000",
        vec![
            row(2, 3, "Cheque paid", "500", "", "CHQ1"),
            row(3, 4, "Cheque paid", "500", "", ""),
        ],
    )
    .await;
    ledger.auto_reconcile(statement_id, day(5)).await.unwrap();
    let lines = ledger.statement_lines(statement_id).await.unwrap();

    let mut raw = storage.clone();
    let reconciled_line = raw
        .mark_reconciled(ReconciliationMark {
            statement_id,
            line_ids: vec![lines[0].id],
            entry_ids: vec![bank_entry(&second)],
            reconciled_on: day(6),
            group: uuid::Uuid::new_v4(),
        })
        .await;
    assert!(matches!(reconciled_line, Err(LedgerError::Conflict(_))));

    let reconciled_entry = raw
        .mark_reconciled(ReconciliationMark {
            statement_id,
            line_ids: vec![lines[1].id],
            entry_ids: vec![bank_entry(&first)],
            reconciled_on: day(6),
            group: uuid::Uuid::new_v4(),
        })
        .await;
    assert!(matches!(reconciled_entry, Err(LedgerError::Conflict(_))));

    // neither refusal touched the free items
    let lines_after = ledger.statement_lines(statement_id).await.unwrap();
    assert!(!lines_after[1].is_reconciled);
    let voucher = ledger.get_voucher(second.id).await.unwrap().unwrap();
    assert!(!voucher.has_reconciled_entries());

    let again = ledger
        .manual_match(statement_id, &[lines[0].id], &[bank_entry(&second)], day(6))
        .await;
    assert!(matches!(again, Err(LedgerError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_auto_reconciles_match_each_pair_once() {
    let storage = MemoryStorage::new();
    let mut ledger = setup_on(storage.clone()).await;
    let mut rows = Vec::new();
    for n in 0..12u32 {
        let reference = format!("CHQ{}", 500 + n);
        pay(&mut ledger, "100", Some(&reference)).await;
        rows.push(row(n as usize + 2, 3 + n % 20, "Cheque paid", "100", "", &reference));
    }
    let statement_id = statement_with(&mut ledger, "-1200", rows).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            ReconciliationEngine::new(storage)
                .auto_reconcile(statement_id, day(25))
                .await
        }));
    }
    let mut matched = 0;
    for handle in handles {
        matched += handle.await.unwrap().unwrap().matched_count;
    }
    assert_eq!(matched, 12);

    let lines = ledger.statement_lines(statement_id).await.unwrap();
    let mut groups = std::collections::HashSet::new();
    for line in &lines {
        assert!(line.is_reconciled);
        assert!(groups.insert(line.match_group.unwrap()));
    }
    let report = ledger.brs(statement_id).await.unwrap();
    assert!(report.unpresented_list.is_empty());
    assert!(report.unmatched_bank_list.is_empty());
}

#[tokio::test]
async fn auto_reconcile_matches_references_case_insensitively_and_is_idempotent() {
    let mut ledger = setup().await;
    let payment = pay(&mut ledger, "5000", Some("CHQ100045")).await;
    let entry_id = bank_entry(&payment);

    let statement_id = statement_with(
        &mut ledger,
        "-5150",
        vec![
            row(2, 3, "Cheque paid", "5,000.00", "", "chq100045"),
            row(3, 4, "Bank charges", "150", "", ""),
        ],
    )
    .await;

    let first = ledger.auto_reconcile(statement_id, day(10)).await.unwrap();
    assert_eq!(first.matched_count, 1);
    assert_eq!(first.pairs[0].ledger_entry_id, entry_id);
    assert_eq!(first.unmatched_statement_lines, 1);
    assert_eq!(first.unmatched_ledger_entries, 0);

    let lines = ledger.statement_lines(statement_id).await.unwrap();
    let matched = lines.iter().find(|l| l.reference == "chq100045").unwrap();
    assert!(matched.is_reconciled);
    assert_eq!(matched.reconciled_date, Some(day(10)));
    assert_eq!(matched.matched_entry, Some(entry_id));

    let voucher = ledger.get_voucher(payment.id).await.unwrap().unwrap();
    let entry = voucher.entries.iter().find(|e| e.id == entry_id).unwrap();
    assert!(entry.is_reconciled);
    assert_eq!(entry.match_group, matched.match_group);

    let second = ledger.auto_reconcile(statement_id, day(11)).await.unwrap();
    assert_eq!(second.matched_count, 0);
    assert!(second.pairs.is_empty());

    let lines_after = ledger.statement_lines(statement_id).await.unwrap();
    assert_eq!(lines, lines_after);
}

#[tokio::test]
async fn polarity_must_mirror_for_a_match() {
    let mut ledger = setup().await;
    // a deposit with the same reference and amount is not a cheque payment
    receive(&mut ledger, "5000", Some("REF9")).await;
    let statement_id = statement_with(
        &mut ledger,
        "-5000",
        vec![row(2, 3, "Cheque paid", "5000", "", "REF9")],
    )
    .await;

    let result = ledger.auto_reconcile(statement_id, day(10)).await.unwrap();
    assert_eq!(result.matched_count, 0);
    assert_eq!(result.unmatched_statement_lines, 1);
    assert_eq!(result.unmatched_ledger_entries, 1);
}

#[tokio::test]
async fn brs_reports_an_exact_negative_difference() {
    let mut ledger = setup().await;
    receive(&mut ledger, "500000.00", Some("DEP001")).await;
    receive(&mut ledger, "15250.00", Some("DEP002")).await;
    pay(&mut ledger, "15250.00", Some("CHQ200")).await;

    let statement_id = statement_with(
        &mut ledger,
        "485250.00",
        vec![
            row(2, 2, "Deposit", "", "500000.00", "DEP001"),
            row(3, 5, "Cheque paid", "15250.00", "", "CHQ200"),
        ],
    )
    .await;
    ledger.auto_reconcile(statement_id, day(31)).await.unwrap();

    let report = ledger.brs(statement_id).await.unwrap();
    assert_eq!(report.cash_book_balance, amount("500000.00"));
    assert_eq!(report.unpresented_total, amount("0"));
    assert_eq!(report.uncredited_total, amount("15250.00"));
    assert_eq!(report.calculated_bank_balance, amount("484750.00"));
    assert_eq!(report.actual_bank_balance, amount("485250.00"));
    assert_eq!(report.difference, amount("-500.00"));
    assert_eq!(report.uncredited_list[0].instrument_ref.as_deref(), Some("DEP002"));
    assert!(report.unmatched_bank_list.is_empty());
    assert!(!ledger.is_fully_reconciled(statement_id).await.unwrap());

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("unpresented_list").is_some());
}

#[tokio::test]
async fn manual_group_match_requires_mirrored_totals() {
    let mut ledger = setup().await;
    let first = pay(&mut ledger, "1000", None).await;
    let second = pay(&mut ledger, "1000", None).await;

    let statement_id = statement_with(
        &mut ledger,
        "-2000",
        vec![
            row(2, 3, "Clearing 1", "600", "", ""),
            row(3, 3, "Clearing 2", "400", "", ""),
            row(4, 4, "Clearing 3", "600", "", ""),
            row(5, 4, "Clearing 4", "500", "", ""),
        ],
    )
    .await;
    let lines = ledger.statement_lines(statement_id).await.unwrap();
    let ids: Vec<StatementLineId> = lines.iter().map(|l| l.id).collect();

    let mismatch = ledger
        .manual_match(statement_id, &[ids[2], ids[3]], &[bank_entry(&second)], day(9))
        .await
        .unwrap_err();
    match mismatch {
        LedgerError::ReconciliationMismatch {
            statement_debit,
            ledger_credit,
            ..
        } => {
            assert_eq!(statement_debit, amount("1100"));
            assert_eq!(ledger_credit, amount("1000"));
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
    let untouched = ledger.statement_lines(statement_id).await.unwrap();
    assert!(untouched.iter().all(|l| !l.is_reconciled));

    let result = ledger
        .manual_match(statement_id, &[ids[0], ids[1]], &[bank_entry(&first)], day(9))
        .await
        .unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.lines_matched, 2);
    assert_eq!(result.entries_matched, 1);

    let lines = ledger.statement_lines(statement_id).await.unwrap();
    for line in &lines[..2] {
        assert!(line.is_reconciled);
        assert_eq!(line.match_group, Some(result.match_group));
        assert_eq!(line.matched_entry, None);
    }

    let again = ledger
        .manual_match(statement_id, &[ids[0]], &[bank_entry(&second)], day(9))
        .await;
    assert!(matches!(again, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn unmatch_releases_the_whole_group() {
    let mut ledger = setup().await;
    let payment = pay(&mut ledger, "1000", None).await;
    let statement_id = statement_with(
        &mut ledger,
        "-1000",
        vec![
            row(2, 3, "Part 1", "700", "", ""),
            row(3, 3, "Part 2", "300", "", ""),
        ],
    )
    .await;
    let ids: Vec<StatementLineId> = ledger
        .statement_lines(statement_id)
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    ledger
        .manual_match(statement_id, &ids, &[bank_entry(&payment)], day(5))
        .await
        .unwrap();

    let released = ledger.unmatch(statement_id, ids[1]).await.unwrap();
    assert_eq!(released, 2);
    let lines = ledger.statement_lines(statement_id).await.unwrap();
    assert!(lines.iter().all(|l| !l.is_reconciled && l.match_group.is_none()));
    let voucher = ledger.get_voucher(payment.id).await.unwrap().unwrap();
    assert!(!voucher.has_reconciled_entries());
}

#[tokio::test]
async fn reconciled_lines_freeze_the_voucher() {
    let mut ledger = setup().await;
    let payment = pay(&mut ledger, "250", Some("CHQ5")).await;
    let statement_id = statement_with(
        &mut ledger,
        "-250",
        vec![row(2, 3, "Cheque", "250", "", "CHQ5")],
    )
    .await;
    ledger.auto_reconcile(statement_id, day(4)).await.unwrap();

    let err = ledger
        .unpost_voucher(payment.id, &Actor::administrator("admin"), "wrong payee")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReconciledLinesFrozen(_)));
}

#[tokio::test]
async fn finalized_statement_is_closed() {
    let mut ledger = setup().await;
    receive(&mut ledger, "1000", Some("DEP1")).await;
    let statement = ledger
        .create_statement("nbp-main", 7, PERIOD, amount("0"), amount("1000"))
        .await
        .unwrap();
    let report = ledger
        .ingest_statement_csv(
            statement.id,
            "Date,Description,Debit,Credit,Balance,Reference\n\
             02/07/2024,Cash deposit,,\"1,000.00\",\"1,000.00\",dep1\n",
        )
        .await
        .unwrap();
    assert_eq!(report.lines_created, 1);
    assert!(report.balance_divergences.is_empty());

    let result = ledger.auto_reconcile(statement.id, day(3)).await.unwrap();
    assert_eq!(result.matched_count, 1);
    assert!(ledger.is_fully_reconciled(statement.id).await.unwrap());

    let closed = ledger.finalize_statement(statement.id).await.unwrap();
    assert_eq!(closed.status, StatementStatus::Reconciled);

    let line_id = ledger.statement_lines(statement.id).await.unwrap()[0].id;
    assert!(matches!(
        ledger.unmatch(statement.id, line_id).await,
        Err(LedgerError::StatementClosed(_))
    ));
    assert!(matches!(
        ledger
            .ingest_statement_rows(statement.id, vec![row(2, 9, "Late", "1", "", "")])
            .await,
        Err(LedgerError::StatementClosed(_))
    ));
}

#[tokio::test]
async fn finalize_refuses_an_unbalanced_statement() {
    let mut ledger = setup().await;
    pay(&mut ledger, "300", Some("CHQ9")).await;
    let statement_id = statement_with(&mut ledger, "0", vec![]).await;

    assert!(matches!(
        ledger.finalize_statement(statement_id).await,
        Err(LedgerError::Validation(_))
    ));
    let summary = ledger.statement_summary(statement_id).await.unwrap();
    assert_eq!(summary.line_count, 0);
}
