//! Provider adapters behind the `PaymentGateway` contract.
//!
//! Every adapter turns provider failures into the canonical
//! `PaymentErrorCode` set through a static lookup table; anything a table
//! does not list becomes `UNKNOWN_ERROR`, which stays retryable.

pub mod mock;
pub mod paypal;
pub mod square;

use tessera_core::payment::{GatewayType, PaymentError, PaymentErrorCode};

/// Native provider code to canonical code.
pub(crate) type ErrorTable = &'static [(&'static str, PaymentErrorCode)];

pub(crate) fn lookup_error(table: ErrorTable, provider_code: &str) -> PaymentErrorCode {
    table
        .iter()
        .find(|(native, _)| native.eq_ignore_ascii_case(provider_code))
        .map(|(_, code)| *code)
        .unwrap_or(PaymentErrorCode::UnknownError)
}

/// Classify a failure that never produced an HTTP response.
pub(crate) fn transport_error(gateway: GatewayType, err: reqwest::Error) -> PaymentError {
    let code = if err.is_timeout() {
        PaymentErrorCode::GatewayTimeout
    } else if err.is_connect() || err.is_request() {
        PaymentErrorCode::NetworkError
    } else {
        PaymentErrorCode::GatewayError
    };
    PaymentError::new(code, format!("{} request failed: {}", gateway, err)).with_gateway(gateway)
}

/// A 2xx response whose body did not match the expected shape.
pub(crate) fn malformed_response(gateway: GatewayType, err: impl std::fmt::Display) -> PaymentError {
    PaymentError::from_provider(
        gateway,
        PaymentErrorCode::GatewayError,
        "INVALID_RESPONSE",
        format!("unexpected {} response: {}", gateway, err),
    )
}

/// Currencies both providers treat as having no minor unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["HUF", "JPY", "KRW", "TWD"];

/// Render minor units as the decimal string providers expect ("25.00").
pub(crate) fn format_amount(amount: i64, currency: &str) -> String {
    if ZERO_DECIMAL_CURRENCIES.iter().any(|c| c.eq_ignore_ascii_case(currency)) {
        return amount.to_string();
    }
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a provider decimal amount back into minor units.
pub(crate) fn parse_amount(value: &str, currency: &str) -> Option<i64> {
    if ZERO_DECIMAL_CURRENCIES.iter().any(|c| c.eq_ignore_ascii_case(currency)) {
        return value.parse().ok();
    }
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "0"));
    if whole.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.get(..2)?.parse().ok()?,
    };
    let minor = whole.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -minor } else { minor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2500, "USD"), "25.00");
        assert_eq!(format_amount(5, "EUR"), "0.05");
        assert_eq!(format_amount(2500, "JPY"), "2500");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("25.00", "USD"), Some(2500));
        assert_eq!(parse_amount("25.5", "USD"), Some(2550));
        assert_eq!(parse_amount("7", "USD"), Some(700));
        assert_eq!(parse_amount("1200", "JPY"), Some(1200));
        assert_eq!(parse_amount("abc", "USD"), None);
    }

    #[test]
    fn test_parse_negative_amount_keeps_sign_on_cents() {
        assert_eq!(parse_amount("-1.50", "USD"), Some(-150));
        assert_eq!(parse_amount("-0.05", "USD"), Some(-5));
        assert_eq!(parse_amount("-12", "USD"), Some(-1200));
        assert_eq!(parse_amount("--1.00", "USD"), None);
        assert_eq!(parse_amount("1.-5", "USD"), None);
        assert_eq!(parse_amount(&format_amount(-150, "USD"), "USD"), Some(-150));
    }

    #[test]
    fn test_unlisted_provider_code_is_unknown_and_retryable() {
        const TABLE: ErrorTable = &[("CARD_DECLINED", PaymentErrorCode::CardDeclined)];
        assert_eq!(lookup_error(TABLE, "card_declined"), PaymentErrorCode::CardDeclined);
        let code = lookup_error(TABLE, "SOMETHING_NEW");
        assert_eq!(code, PaymentErrorCode::UnknownError);
        assert!(code.retryable());
    }
}
