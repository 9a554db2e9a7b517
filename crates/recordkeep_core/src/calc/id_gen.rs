//! Sequential identifier generation (`AW1`, `AW2`, ...).
//!
//! The next id is derived from the largest numeric suffix seen rather than
//! the number of records, so deleting records never causes a collision.
//! When no existing id matches the prefix pattern the record count is used
//! instead.

use crate::model::FieldMap;
use std::cmp::Ordering;

/// Returns the next identifier for `prefix` given the existing ids.
///
/// Ids match when they are `prefix` (ASCII case-insensitive) followed by one
/// or more ASCII digits and nothing else.
pub fn next_id<'a, I>(existing_ids: I, prefix: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut count: u64 = 0;
    let mut max: Option<u64> = None;
    for id in existing_ids {
        count += 1;
        if let Some(number) = numeric_suffix(id, prefix) {
            max = Some(max.map_or(number, |current| current.max(number)));
        }
    }

    let next = match max {
        Some(max) => max.saturating_add(1),
        None => count + 1,
    };
    format!("{prefix}{next}")
}

/// Like [`next_id`], reading each record's id from `id_field`.
///
/// Records without a string id still count toward the fallback total.
pub fn next_id_in(records: &[FieldMap], id_field: &str, prefix: &str) -> String {
    next_id(
        records.iter().map(|record| {
            record
                .get(id_field)
                .and_then(|value| value.as_str())
                .unwrap_or("")
        }),
        prefix,
    )
}

fn numeric_suffix(id: &str, prefix: &str) -> Option<u64> {
    let head = id.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let digits = &id[prefix.len()..];
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Orders ids by their text prefix, then by numeric suffix as a number.
///
/// `AW9` sorts before `AW10`; ids without a numeric suffix compare as text.
pub fn compare_ids_natural(left: &str, right: &str) -> Ordering {
    let (left_head, left_digits) = split_numeric_tail(left);
    let (right_head, right_digits) = split_numeric_tail(right);
    left_head
        .cmp(right_head)
        .then_with(|| compare_digit_runs(left_digits, right_digits))
        .then_with(|| left.cmp(right))
}

fn split_numeric_tail(id: &str) -> (&str, &str) {
    let split_at = id
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map_or(id.len(), |(index, _)| index);
    id.split_at(split_at)
}

fn compare_digit_runs(left: &str, right: &str) -> Ordering {
    let left = left.trim_start_matches('0');
    let right = right.trim_start_matches('0');
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}
