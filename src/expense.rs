//! Expense drafts derived from OCR-extracted bill fields.
//!
//! The extractor on the backend is an LLM prompt, so key spelling and value
//! formatting vary from bill to bill. Keys are matched ignoring case and
//! punctuation; amounts tolerate currency symbols and digit grouping; dates
//! accept the common Indian and ISO layouts and are normalized to ISO.

#[cfg(test)]
#[path = "expense_test.rs"]
mod expense_test;

use serde::Serialize;
use serde_json::Value;
use time::Date;
use time::macros::format_description;

use crate::message::ExtractedFields;

const VENDOR_KEYS: &[&str] = &["vendor", "vendorname", "merchant", "store", "item"];
const AMOUNT_KEYS: &[&str] = &["totalamount", "amount", "total", "grandtotal"];
const DATE_KEYS: &[&str] = &["date", "billdate", "invoicedate"];
const UNKNOWN_VENDOR: &str = "Unknown vendor";

/// Local checks that short-circuit before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the bill has no total amount")]
    MissingAmount,
    #[error("the amount `{0}` is not a number")]
    InvalidAmount(String),
    #[error("the date `{0}` is not a recognised date")]
    InvalidDate(String),
}

/// Body of `POST /expenses/confirm_ocr`, `POST /users/{owner}/expenses/` and
/// `PUT /expenses/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseDraft {
    pub item: String,
    pub amount: f64,
    pub date: String,
}

impl ExpenseDraft {
    /// Build a draft from extracted fields; a missing date means `today`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the amount is missing or unparsable,
    /// or a date is present but unrecognised.
    pub fn from_extracted(fields: &ExtractedFields, today: Date) -> Result<Self, ValidationError> {
        let item = field(fields, VENDOR_KEYS)
            .map(crate::message::display_value)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN_VENDOR.to_owned());

        let amount = match field(fields, AMOUNT_KEYS) {
            None | Some(Value::Null) => return Err(ValidationError::MissingAmount),
            Some(value) => parse_amount(value)?,
        };

        let date = match field(fields, DATE_KEYS).map(crate::message::display_value) {
            Some(raw) if !raw.trim().is_empty() => normalize_date(&raw)?,
            _ => format_date(today),
        };

        Ok(Self { item, amount, date })
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// First field whose normalized key matches one of `aliases`, in alias order.
fn field<'a>(fields: &'a ExtractedFields, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| fields.iter().find(|(key, _)| normalize_key(key) == *alias).map(|(_, v)| v))
}

/// Parse a JSON number or a human-formatted amount such as `"₹1,250.00"`.
///
/// # Errors
///
/// Returns `InvalidAmount` for anything without a finite, non-negative number.
pub fn parse_amount(value: &Value) -> Result<f64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(raw) => parse_amount_text(raw),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| ValidationError::InvalidAmount(crate::message::display_value(value)))
}

fn parse_amount_text(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let mut head = &raw[..start];
    let mut number = String::new();
    // ".50" and "₹.50" are fractions; "Rs.50" is an abbreviation followed by a number.
    if let Some(rest) = head.strip_suffix('.') {
        if !rest.ends_with(char::is_alphabetic) {
            number.push('.');
            head = rest;
        }
    }
    number.extend(
        raw[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .filter(|c| *c != ','),
    );
    let value = number.trim_end_matches('.').parse::<f64>().ok()?;
    Some(if head.contains('-') { -value } else { value })
}

/// Normalize a bill date to `YYYY-MM-DD`.
///
/// # Errors
///
/// Returns `InvalidDate` when no supported layout matches.
pub fn normalize_date(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    parse_date(trimmed)
        .or_else(|| {
            // ISO date-times and "2024-03-01 10:15" style stamps.
            let head = trimmed.split(['T', ' ']).next()?;
            if head.len() < trimmed.len() { parse_date(head) } else { None }
        })
        .map(format_date)
        .ok_or_else(|| ValidationError::InvalidDate(raw.to_owned()))
}

fn parse_date(raw: &str) -> Option<Date> {
    let iso = format_description!("[year]-[month padding:none]-[day padding:none]");
    let iso_slash = format_description!("[year]/[month padding:none]/[day padding:none]");
    let dmy_slash = format_description!("[day padding:none]/[month padding:none]/[year]");
    let dmy_dash = format_description!("[day padding:none]-[month padding:none]-[year]");
    let dmy_dot = format_description!("[day padding:none].[month padding:none].[year]");
    let dmy_short = format_description!("[day padding:none] [month repr:short case_sensitive:false] [year]");
    let dmy_long = format_description!("[day padding:none] [month repr:long case_sensitive:false] [year]");

    Date::parse(raw, &iso)
        .or_else(|_| Date::parse(raw, &iso_slash))
        .or_else(|_| Date::parse(raw, &dmy_slash))
        .or_else(|_| Date::parse(raw, &dmy_dash))
        .or_else(|_| Date::parse(raw, &dmy_dot))
        .or_else(|_| Date::parse(raw, &dmy_short))
        .or_else(|_| Date::parse(raw, &dmy_long))
        .ok()
}

#[must_use]
pub fn format_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Today's date in the local timezone, falling back to UTC.
#[must_use]
pub fn today() -> Date {
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .date()
}
