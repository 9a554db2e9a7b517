//! Numeric totals over nested ledger entries.
//!
//! # Invariants
//! - Values that are missing, null, blank, non-numeric or non-finite count
//!   as `0`.
//! - Sums are never rounded; only `net_payable` is.

use crate::model::sub_record::fields;
use crate::model::FieldMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static LEADING_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid number regex")
});

/// Coerces a stored value to a finite number.
///
/// Strings are read up to the first non-numeric character, so `"12 kg"` is
/// `12` and `"kg"` is `0`.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let number = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => LEADING_NUMBER_RE
            .find(text.trim())
            .and_then(|found| found.as_str().parse::<f64>().ok()),
        _ => None,
    };
    number.filter(|value| value.is_finite()).unwrap_or(0.0)
}

/// Sums `field` across `collection`.
pub fn sum<'a, I>(collection: I, field: &str) -> f64
where
    I: IntoIterator<Item = &'a FieldMap>,
{
    collection
        .into_iter()
        .map(|entry| coerce_number(entry.get(field)))
        .sum()
}

/// Rounds half-up toward positive infinity (`-2.5` -> `-2`).
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Payroll view over worker entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollSummary {
    /// Sum of `workingDays × baseSalary`.
    pub total_earned: f64,
    pub total_advances: f64,
    pub net_payable: i64,
}

pub fn payroll<'a, I>(workers: I) -> PayrollSummary
where
    I: IntoIterator<Item = &'a FieldMap>,
{
    let (total_earned, total_advances) =
        workers
            .into_iter()
            .fold((0.0, 0.0), |(earned, advances), worker| {
                let days = coerce_number(worker.get(fields::WORKING_DAYS));
                let rate = coerce_number(worker.get(fields::BASE_SALARY));
                (
                    earned + days * rate,
                    advances + coerce_number(worker.get(fields::ADVANCE)),
                )
            });
    PayrollSummary {
        total_earned,
        total_advances,
        net_payable: round_half_up(total_earned - total_advances),
    }
}

/// Per-record financial summary shown next to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub commission_total: f64,
    pub paid_total: f64,
    pub payroll: PayrollSummary,
}

pub fn financial_summary<'a, P, W>(payments: P, workers: W) -> FinancialSummary
where
    P: IntoIterator<Item = &'a FieldMap>,
    P::IntoIter: Clone,
    W: IntoIterator<Item = &'a FieldMap>,
{
    let payments = payments.into_iter();
    FinancialSummary {
        commission_total: sum(payments.clone(), fields::COMMISSION),
        paid_total: sum(payments, fields::PAID_AMOUNT),
        payroll: payroll(workers),
    }
}
