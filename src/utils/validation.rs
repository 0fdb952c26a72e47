//! Validation utilities

use bigdecimal::BigDecimal;

use crate::types::*;

/// Largest number of integer digits an amount may carry
pub const MAX_INTEGER_DIGITS: i64 = 13;

/// Whether an amount has no more than `scale` fractional digits.
///
/// Reads the exponent only; never rescales the digits.
pub fn fits_scale(amount: &BigDecimal, scale: i64) -> bool {
    let (_, exponent) = amount.as_bigint_and_exponent();
    exponent <= scale || amount.normalized().as_bigint_and_exponent().1 <= scale
}

/// Whether an amount has at most [`MAX_INTEGER_DIGITS`] integer digits
pub fn within_magnitude(amount: &BigDecimal) -> bool {
    let (_, exponent) = amount.as_bigint_and_exponent();
    (amount.digits() as i64).saturating_sub(exponent) <= MAX_INTEGER_DIGITS
}

/// Validate that an amount is non-negative and within the configured precision
pub fn validate_amount(amount: &BigDecimal, scale: i64) -> LedgerResult<()> {
    if *amount < BigDecimal::from(0) {
        return Err(LedgerError::Validation(format!(
            "Amount cannot be negative: {}",
            amount
        )));
    }
    if !within_magnitude(amount) {
        return Err(LedgerError::Validation(format!(
            "Amount exceeds {} integer digits",
            MAX_INTEGER_DIGITS
        )));
    }
    if !fits_scale(amount, scale) {
        return Err(LedgerError::Validation(format!(
            "Amount {} has more than {} fractional digits",
            amount, scale
        )));
    }
    Ok(())
}

/// Validate that an account ID is valid
pub fn validate_account_id(account_id: &str) -> LedgerResult<()> {
    if account_id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account ID cannot be empty".to_string(),
        ));
    }

    if account_id.len() > 50 {
        return Err(LedgerError::Validation(
            "Account ID cannot exceed 50 characters".to_string(),
        ));
    }

    if !account_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(LedgerError::Validation(
            "Account ID can only contain alphanumeric characters, dots, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 200 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 200 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate the scoping fields every voucher submission carries
pub fn validate_scope(organization: &str, fiscal_period: &str) -> LedgerResult<()> {
    if organization.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Organization cannot be empty".to_string(),
        ));
    }
    if fiscal_period.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Fiscal period cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Problems with a single journal line: exactly one side must carry a
/// positive amount of acceptable precision.
pub fn line_rejections(entry: &JournalEntry, scale: i64) -> Vec<Rejection> {
    let zero = BigDecimal::from(0);
    let line = entry.line_no;
    let mut rejections = Vec::new();

    if entry.debit < zero || entry.credit < zero {
        rejections.push(Rejection::NegativeAmount { line });
        return rejections;
    }

    match (entry.debit > zero, entry.credit > zero) {
        (false, false) => rejections.push(Rejection::EmptyLine { line }),
        (true, true) => rejections.push(Rejection::BothSides { line }),
        _ => {}
    }

    if !within_magnitude(&entry.debit) || !within_magnitude(&entry.credit) {
        rejections.push(Rejection::AmountTooLarge { line });
    } else if !fits_scale(&entry.debit, scale) || !fits_scale(&entry.credit, scale) {
        rejections.push(Rejection::ExcessPrecision { line, scale });
    }

    rejections
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn entry(debit: &str, credit: &str) -> JournalEntry {
        JournalEntry {
            id: 1,
            voucher_id: 1,
            line_no: 3,
            account_id: "A01101".to_string(),
            description: String::new(),
            debit: BigDecimal::from_str(debit).unwrap(),
            credit: BigDecimal::from_str(credit).unwrap(),
            instrument_ref: None,
            is_reconciled: false,
            reconciled_date: None,
            match_group: None,
        }
    }

    #[test]
    fn single_sided_line_passes() {
        assert!(line_rejections(&entry("150.25", "0"), 2).is_empty());
        assert!(line_rejections(&entry("0", "99"), 2).is_empty());
    }

    #[test]
    fn line_with_both_or_neither_side_is_rejected() {
        assert_eq!(
            line_rejections(&entry("10", "10"), 2),
            vec![Rejection::BothSides { line: 3 }]
        );
        assert_eq!(
            line_rejections(&entry("0", "0"), 2),
            vec![Rejection::EmptyLine { line: 3 }]
        );
        assert_eq!(
            line_rejections(&entry("-5", "0"), 2),
            vec![Rejection::NegativeAmount { line: 3 }]
        );
    }

    #[test]
    fn precision_is_limited_to_scale() {
        assert_eq!(
            line_rejections(&entry("10.005", "0"), 2),
            vec![Rejection::ExcessPrecision { line: 3, scale: 2 }]
        );
        assert!(fits_scale(&BigDecimal::from_str("10.50").unwrap(), 2));
        assert!(validate_amount(&BigDecimal::from_str("1.001").unwrap(), 2).is_err());
        assert!(fits_scale(&BigDecimal::from_str("1.000000").unwrap(), 2));
        assert!(!fits_scale(&BigDecimal::from_str("1e-400000000").unwrap(), 2));
    }

    #[test]
    fn huge_exponents_are_out_of_range() {
        let huge = BigDecimal::from_str("1e400000000").unwrap();
        assert!(!within_magnitude(&huge));
        assert!(validate_amount(&huge, 2).is_err());
        assert_eq!(
            line_rejections(&entry("1e400000000", "0"), 2),
            vec![Rejection::AmountTooLarge { line: 3 }]
        );
        assert!(within_magnitude(&BigDecimal::from_str("9999999999999.99").unwrap()));
        assert!(!within_magnitude(&BigDecimal::from_str("10000000000000").unwrap()));
        assert!(within_magnitude(&BigDecimal::from_str("0.05").unwrap()));
    }

    #[test]
    fn account_id_rules() {
        assert!(validate_account_id("A01101").is_ok());
        assert!(validate_account_id("G01204.01").is_ok());
        assert!(validate_account_id(" ").is_err());
        assert!(validate_account_id("bad id").is_err());
    }
}
