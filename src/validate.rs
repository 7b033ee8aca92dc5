//! Input validation for sync requests.
//!
//! Table names are checked against the tables the ERP exposes for fetch,
//! dates against the `yyyymmdd` form the remote expects.

use crate::error::{Error, Result};
use crate::remote::Period;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Tables the remote fetch endpoint accepts.
pub const ALLOWED_TABLES: &[&str] = &[
    "SA1", "SA2", "SA3", "SA4", "SB1", "DA1", "SE4", "SC5", "SF2",
];

/// Sales order header table.
pub const ORDERS_TABLE: &str = "SC5";

/// Invoice header table.
pub const INVOICES_TABLE: &str = "SF2";

static TABLE_SET: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ALLOWED_TABLES.iter().copied().collect());

/// Trim, upper-case and check a table name.
///
/// # Errors
///
/// Returns `Validation` if the table is not in [`ALLOWED_TABLES`].
pub fn ensure_table(input: &str) -> Result<String> {
    let table = input.trim().to_uppercase();
    if TABLE_SET.contains(table.as_str()) {
        Ok(table)
    } else {
        Err(Error::Validation(format!("invalid table '{}'", input.trim())))
    }
}

/// Check that a date is a real calendar day written as `yyyymmdd`.
///
/// # Errors
///
/// Returns `Validation` on any other shape.
pub fn yyyymmdd(input: &str) -> Result<String> {
    let date = input.trim();
    let well_formed = date.len() == 8
        && date.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok();

    if well_formed {
        Ok(date.to_string())
    } else {
        Err(Error::Validation(format!("date '{date}' is not a valid yyyymmdd date")))
    }
}

/// Validate both ends of a period and their order.
///
/// # Errors
///
/// Returns `Validation` if either date is malformed or `from > to`.
pub fn validate_period(from: &str, to: &str) -> Result<Period> {
    let from = yyyymmdd(from)?;
    let to = yyyymmdd(to)?;
    // Same width, all digits: lexical order is calendar order
    if from > to {
        return Err(Error::Validation(format!("period start {from} is after end {to}")));
    }
    Ok(Period { from, to })
}

/// Trim a required text field.
///
/// # Errors
///
/// Returns `Validation` if the value is empty after trimming.
pub fn required(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{name} must not be empty")));
    }
    Ok(value.to_string())
}
