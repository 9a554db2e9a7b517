//! Follow-up reminder urgency classification.
//!
//! # Invariants
//! - Classification compares calendar days at local midnight, never hours.
//! - Absent or unparseable dates classify as `Urgency::None`.
//! - Display order: severity, then date ascending, then record id descending.

use crate::calc::id_gen::compare_ids_natural;
use crate::model::record::RecordType;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Urgency bucket, declared from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Overdue,
    DueToday,
    DueTomorrow,
    Upcoming,
    /// Absent, unparseable, or more than two days away.
    None,
}

/// Call-site policy for what counts as a pending reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NearPolicy {
    pub include_upcoming: bool,
}

impl Urgency {
    pub fn is_near(self, policy: NearPolicy) -> bool {
        match self {
            Self::Overdue | Self::DueToday | Self::DueTomorrow => true,
            Self::Upcoming => policy.include_upcoming,
            Self::None => false,
        }
    }
}

/// Classifies a calendar date against `today`.
pub fn classify_date(date: Option<NaiveDate>, today: NaiveDate) -> Urgency {
    let Some(date) = date else {
        return Urgency::None;
    };
    match date.signed_duration_since(today).num_days() {
        days if days < 0 => Urgency::Overdue,
        0 => Urgency::DueToday,
        1 => Urgency::DueTomorrow,
        2 => Urgency::Upcoming,
        _ => Urgency::None,
    }
}

/// Classifies a textual date; see [`parse_date`] for accepted forms.
pub fn classify(date: Option<&str>, today: NaiveDate) -> Urgency {
    classify_date(date.and_then(parse_date), today)
}

/// Classifies a stored field value (date string or epoch milliseconds).
pub fn classify_value(value: Option<&Value>, today: NaiveDate) -> Urgency {
    classify_date(value.and_then(date_from_value), today)
}

pub fn is_near(value: Option<&Value>, today: NaiveDate, policy: NearPolicy) -> bool {
    classify_value(value, today).is_near(policy)
}

/// Counts values that are near under `policy`.
pub fn pending_count<'a, I>(values: I, today: NaiveDate, policy: NearPolicy) -> usize
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    values
        .into_iter()
        .filter(|value| is_near(*value, today, policy))
        .count()
}

/// Parses `YYYY-MM-DD`, local date-times, or RFC 3339 into a local date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Local).date_naive());
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|datetime| datetime.date())
}

/// Extracts a local date from a JSON string or epoch-millisecond integer.
pub fn date_from_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(text) => parse_date(text),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Local.timestamp_millis_opt(millis).single())
            .map(|datetime| datetime.date_naive()),
        _ => None,
    }
}

/// One follow-up reminder attached to a record's nested entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub record_type: RecordType,
    pub record_id: String,
    pub entry_id: String,
    pub date: Option<NaiveDate>,
    pub urgency: Urgency,
}

impl Reminder {
    pub fn new(
        record_type: RecordType,
        record_id: impl Into<String>,
        entry_id: impl Into<String>,
        date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
            entry_id: entry_id.into(),
            date,
            urgency: classify_date(date, today),
        }
    }
}

/// Display order for reminders.
pub fn compare_reminders(left: &Reminder, right: &Reminder) -> Ordering {
    left.urgency
        .cmp(&right.urgency)
        .then_with(|| compare_dates_missing_last(left.date, right.date))
        .then_with(|| compare_ids_natural(&right.record_id, &left.record_id))
        .then_with(|| compare_ids_natural(&right.entry_id, &left.entry_id))
}

pub fn sort_reminders(reminders: &mut [Reminder]) {
    reminders.sort_by(compare_reminders);
}

fn compare_dates_missing_last(left: Option<NaiveDate>, right: Option<NaiveDate>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        classify, classify_value, pending_count, sort_reminders, NearPolicy, Reminder, Urgency,
    };
    use crate::model::record::RecordType;
    use chrono::{Duration, Local, NaiveDate, TimeZone};
    use serde_json::{json, Value};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn day(offset: i64) -> String {
        (today() + Duration::days(offset)).format("%Y-%m-%d").to_string()
    }

    #[test]
    fn buckets_follow_day_offsets() {
        assert_eq!(classify(Some(&day(-3)), today()), Urgency::Overdue);
        assert_eq!(classify(Some(&day(-1)), today()), Urgency::Overdue);
        assert_eq!(classify(Some(&day(0)), today()), Urgency::DueToday);
        assert_eq!(classify(Some(&day(1)), today()), Urgency::DueTomorrow);
        assert_eq!(classify(Some(&day(2)), today()), Urgency::Upcoming);
        assert_eq!(classify(Some(&day(3)), today()), Urgency::None);
    }

    #[test]
    fn missing_or_garbage_dates_are_not_urgent() {
        assert_eq!(classify(None, today()), Urgency::None);
        assert_eq!(classify(Some(""), today()), Urgency::None);
        assert_eq!(classify(Some("next tuesday"), today()), Urgency::None);
        assert_eq!(classify_value(Some(&Value::Null), today()), Urgency::None);
    }

    #[test]
    fn time_of_day_is_ignored() {
        assert_eq!(classify(Some("2025-03-10T23:59"), today()), Urgency::DueToday);
        assert_eq!(classify(Some("2025-03-09 00:01:00"), today()), Urgency::Overdue);
    }

    #[test]
    fn epoch_millis_are_read_in_local_time() {
        let noon = Local
            .with_ymd_and_hms(2025, 3, 11, 12, 0, 0)
            .single()
            .unwrap()
            .timestamp_millis();
        assert_eq!(classify_value(Some(&json!(noon)), today()), Urgency::DueTomorrow);
    }

    #[test]
    fn upcoming_counts_only_when_policy_includes_it() {
        let values = [json!(day(-1)), json!(day(2)), json!(day(5)), Value::Null];
        let strict = NearPolicy::default();
        let relaxed = NearPolicy {
            include_upcoming: true,
        };
        assert_eq!(pending_count(values.iter().map(Some), today(), strict), 1);
        assert_eq!(pending_count(values.iter().map(Some), today(), relaxed), 2);
        assert_eq!(pending_count([None], today(), relaxed), 0);
    }

    #[test]
    fn reminders_sort_by_severity_then_date_then_id_descending() {
        let at = |offset: i64| Some(today() + Duration::days(offset));
        let mut reminders = vec![
            Reminder::new(RecordType::Client, "CL1", "PAY1", at(1), today()),
            Reminder::new(RecordType::Client, "CL9", "PAY1", at(-1), today()),
            Reminder::new(RecordType::Client, "CL10", "PAY1", at(-1), today()),
            Reminder::new(RecordType::Client, "CL2", "PAY1", at(-4), today()),
            Reminder::new(RecordType::Client, "CL3", "PAY1", None, today()),
            Reminder::new(RecordType::Client, "CL4", "PAY1", at(0), today()),
        ];
        sort_reminders(&mut reminders);
        let ids: Vec<_> = reminders.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["CL2", "CL10", "CL9", "CL4", "CL1", "CL3"]);
    }
}
