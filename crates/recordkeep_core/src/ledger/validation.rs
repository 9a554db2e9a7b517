//! Required-field checks run on submission.

use crate::ledger::ValidationErrors;
use crate::model::sub_record::{fields, SubKind};
use crate::model::FieldMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static CONTACT_NO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{10}$").expect("valid contact number regex"));

/// Validates kind-specific required fields.
///
/// - payment: `paymentMode` and `commission`
/// - worker: `name` and `designation`
/// - agent: `name`, `category` and a 10-digit `contactNo`
pub fn validate_for_submit(kind: SubKind, entry: &FieldMap) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    match kind {
        SubKind::Payment => {
            require_text(entry, fields::PAYMENT_MODE, "payment mode", &mut errors);
            if is_blank(entry.get(fields::COMMISSION)) {
                errors.insert(fields::COMMISSION, "commission amount is required");
            }
        }
        SubKind::Worker => {
            require_text(entry, fields::NAME, "name", &mut errors);
            require_text(entry, fields::DESIGNATION, "designation", &mut errors);
        }
        SubKind::Agent => {
            require_text(entry, fields::NAME, "name", &mut errors);
            require_text(entry, fields::CATEGORY, "category", &mut errors);
            if !is_valid_contact_no(entry.get(fields::CONTACT_NO)) {
                errors.insert(
                    fields::CONTACT_NO,
                    "contact number must be exactly 10 digits",
                );
            }
        }
    }
    errors.into_result()
}

/// Whether `value` is a 10-digit contact number (string or integer).
pub fn is_valid_contact_no(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(text)) => CONTACT_NO_RE.is_match(text.trim()),
        Some(Value::Number(number)) => number
            .as_u64()
            .is_some_and(|digits| CONTACT_NO_RE.is_match(&digits.to_string())),
        _ => false,
    }
}

fn require_text(entry: &FieldMap, field: &str, label: &str, errors: &mut ValidationErrors) {
    let present = entry
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|text| !text.trim().is_empty());
    if !present {
        errors.insert(field, format!("{label} is required"));
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}
