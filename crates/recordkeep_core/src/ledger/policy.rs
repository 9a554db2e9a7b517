//! Declarative lock-override table.
//!
//! `(SubKind, field) -> editable when locked`. Everything not listed is
//! frozen once an entry is submitted.

use crate::model::sub_record::{fields, SubKind, SubRecord};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    overrides: BTreeSet<(SubKind, String)>,
}

impl Default for LockPolicy {
    /// Reminder rescheduling on payments, pay-rate corrections on people.
    fn default() -> Self {
        Self::empty()
            .allow(SubKind::Payment, fields::REMINDER_DATE)
            .allow(SubKind::Worker, fields::BASE_SALARY)
            .allow(SubKind::Agent, fields::BASE_SALARY)
    }
}

impl LockPolicy {
    /// A policy where locked entries accept no field edits at all.
    pub fn empty() -> Self {
        Self {
            overrides: BTreeSet::new(),
        }
    }

    pub fn allow(mut self, kind: SubKind, field: &str) -> Self {
        self.overrides.insert((kind, field.to_string()));
        self
    }

    /// Adds deployment-configured overrides on top of this policy.
    pub fn with_extra_overrides(mut self, extra: &BTreeMap<SubKind, Vec<String>>) -> Self {
        for (kind, names) in extra {
            for name in names {
                let name = name.trim();
                if !name.is_empty() {
                    self.overrides.insert((*kind, name.to_string()));
                }
            }
        }
        self
    }

    pub fn editable_when_locked(&self, kind: SubKind, field: &str) -> bool {
        self.overrides.contains(&(kind, field.to_string()))
    }

    /// Whether `field` of `entry` may be written right now.
    pub fn can_edit(&self, entry: &SubRecord, field: &str) -> bool {
        !entry.locked || self.editable_when_locked(entry.kind, field)
    }

    pub fn overrides_for(&self, kind: SubKind) -> impl Iterator<Item = &str> {
        self.overrides
            .iter()
            .filter(move |(entry_kind, _)| *entry_kind == kind)
            .map(|(_, field)| field.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::LockPolicy;
    use crate::model::sub_record::SubKind;
    use std::collections::BTreeMap;

    #[test]
    fn default_table_exempts_reminder_and_base_salary_only() {
        let policy = LockPolicy::default();
        assert!(policy.editable_when_locked(SubKind::Payment, "reminderDate"));
        assert!(!policy.editable_when_locked(SubKind::Payment, "commission"));
        assert!(policy.editable_when_locked(SubKind::Worker, "baseSalary"));
        assert!(policy.editable_when_locked(SubKind::Agent, "baseSalary"));
        assert!(!policy.editable_when_locked(SubKind::Worker, "reminderDate"));
        assert_eq!(
            policy.overrides_for(SubKind::Payment).collect::<Vec<_>>(),
            vec!["reminderDate"]
        );
    }

    #[test]
    fn configured_extras_extend_the_table() {
        let mut extra = BTreeMap::new();
        extra.insert(SubKind::Payment, vec!["remarks".to_string(), "  ".to_string()]);
        let policy = LockPolicy::default().with_extra_overrides(&extra);
        assert!(policy.editable_when_locked(SubKind::Payment, "remarks"));
        assert_eq!(policy.overrides_for(SubKind::Payment).count(), 2);
    }
}
