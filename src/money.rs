//! Prices and balances are kept as integer cents.

use crate::error::MarketError;

/// Highest accepted price: 1,000,000.00.
pub const MAX_PRICE_CENTS: i64 = 100_000_000;

/// Parses a decimal amount such as `"4.99"`, `"10"` or `"0.5"` into cents.
/// Negative amounts, more than two decimal places and prices above
/// [`MAX_PRICE_CENTS`] are rejected.
pub fn parse_cents(input: &str) -> Result<i64, MarketError> {
    let invalid = || MarketError::Validation("Invalid price format, enter a number".to_string());

    let input = input.trim().replace(',', ".");
    if input.starts_with('-') {
        return Err(MarketError::Validation(
            "Price cannot be negative".to_string(),
        ));
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input.as_str(), ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    if fraction.len() > 2 {
        return Err(MarketError::Validation(
            "Price can have at most two decimal places".to_string(),
        ));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };

    let cents = whole
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(fraction))
        .ok_or_else(invalid)?;
    if cents > MAX_PRICE_CENTS {
        return Err(MarketError::Validation(format!(
            "Price cannot exceed {}",
            format_cents(MAX_PRICE_CENTS)
        )));
    }
    Ok(cents)
}

/// Adds up amounts, refusing totals that do not fit in an `i64`.
pub fn sum_cents<I>(amounts: I) -> Result<i64, MarketError>
where
    I: IntoIterator<Item = i64>,
{
    amounts
        .into_iter()
        .try_fold(0i64, |total, cents| total.checked_add(cents))
        .ok_or_else(|| MarketError::Validation("Order total is too large".to_string()))
}

pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_price_shapes() {
        assert_eq!(parse_cents("4.99").unwrap(), 499);
        assert_eq!(parse_cents("10").unwrap(), 1000);
        assert_eq!(parse_cents("0.5").unwrap(), 50);
        assert_eq!(parse_cents(" 3,20 ").unwrap(), 320);
        assert_eq!(parse_cents(".75").unwrap(), 75);
        assert_eq!(parse_cents("0").unwrap(), 0);
    }

    #[test]
    fn rejects_bad_prices() {
        assert!(parse_cents("").is_err());
        assert!(parse_cents(".").is_err());
        assert!(parse_cents("-1").is_err());
        assert!(parse_cents("1.999").is_err());
        assert!(parse_cents("abc").is_err());
        assert!(parse_cents("1e3").is_err());
        assert!(parse_cents("99999999999999999999").is_err());
    }

    #[test]
    fn prices_are_capped() {
        assert_eq!(parse_cents("1000000").unwrap(), MAX_PRICE_CENTS);
        assert!(parse_cents("1000000.01").is_err());
        assert!(matches!(
            parse_cents("46116860184273879.04"),
            Err(MarketError::Validation(msg)) if msg == "Price cannot exceed 1000000.00"
        ));
    }

    #[test]
    fn sums_refuse_to_overflow() {
        assert_eq!(sum_cents(vec![499, 1, 500]).unwrap(), 1000);
        assert_eq!(sum_cents(Vec::new()).unwrap(), 0);

        let huge = 4_611_686_018_427_387_904;
        assert!(sum_cents(vec![huge, huge]).is_err());
        assert!(sum_cents(vec![i64::MAX, 1]).is_err());
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
