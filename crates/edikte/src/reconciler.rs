use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use serde::Serialize;

use crate::record::{ExistingRecord, FieldMap, FieldValue, IdentityKey, RecordField};
use crate::types::{AppraisalFacts, Notice};
use crate::utils::normalize_address;

/// A parsed notice together with the appraisal facts found for it this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub notice: Notice,
    pub appraisal: Option<AppraisalFacts>,
}

impl Observation {
    pub fn new(notice: Notice) -> Self {
        Self {
            notice,
            appraisal: None,
        }
    }

    pub fn with_appraisal(mut self, facts: AppraisalFacts) -> Self {
        self.appraisal = Some(facts);
        self
    }

    /// Everything this observation knows, as store fields.
    pub fn fields(&self) -> FieldMap {
        let mut fields = self.notice.to_fields();
        if let Some(url) = self.notice.appraisal_url.as_deref() {
            fields.insert(RecordField::AppraisalUrl, FieldValue::Text(url.to_string()));
        }
        if let Some(facts) = &self.appraisal {
            fields.extend(facts.to_fields());
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create {
        key: IdentityKey,
        notice: Notice,
        fields: FieldMap,
    },
    UpdateFields {
        key: IdentityKey,
        record_id: String,
        notice: Notice,
        changes: FieldMap,
    },
    NoOp {
        key: IdentityKey,
        record_id: String,
    },
    /// Matched a record that must not be overwritten automatically.
    Review {
        key: IdentityKey,
        record_id: String,
        notice: Notice,
        reason: String,
    },
}

impl Action {
    pub fn key(&self) -> &IdentityKey {
        match self {
            Action::Create { key, .. }
            | Action::UpdateFields { key, .. }
            | Action::NoOp { key, .. }
            | Action::Review { key, .. } => key,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp { .. })
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create { notice, .. } => write!(f, "create  {}", notice.label()),
            Action::UpdateFields {
                notice, changes, ..
            } => {
                let names: Vec<&str> = changes.keys().map(RecordField::name).collect();
                write!(f, "update  {} [{}]", notice.label(), names.join(", "))
            }
            Action::NoOp { key, record_id } => write!(f, "no-op   {} ({})", key, record_id),
            Action::Review { notice, reason, .. } => {
                write!(f, "review  {}: {}", notice.label(), reason)
            }
        }
    }
}

/// Actions sorted by identity key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
}

impl ActionPlan {
    pub fn creates(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Create { .. }))
    }

    pub fn updates(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::UpdateFields { .. }))
    }

    pub fn reviews(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Review { .. }))
    }

    pub fn noop_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_noop()).count()
    }

    /// True when applying the plan would not touch the store.
    pub fn is_settled(&self) -> bool {
        self.actions
            .iter()
            .all(|a| matches!(a, Action::NoOp { .. } | Action::Review { .. }))
    }
}

fn equivalent(field: RecordField, new: &FieldValue, old: &FieldValue) -> bool {
    match (field, new.as_text(), old.as_text()) {
        (RecordField::Address, Some(a), Some(b)) => normalize_address(a) == normalize_address(b),
        _ => new.same_as(old),
    }
}

/// Fields of `new` that are set and differ from `old`. Unset values in
/// `new` never count as a change, and an address spelled differently but
/// normalizing the same is not a change either.
pub fn diff_fields(new: &FieldMap, old: &FieldMap) -> FieldMap {
    new.iter()
        .filter(|&(field, value)| {
            old.get(field)
                .is_none_or(|current| !equivalent(*field, value, current))
        })
        .map(|(field, value)| (*field, value.clone()))
        .collect()
}

fn conflicting_address(notice: &Notice, record: &ExistingRecord) -> Option<String> {
    let new = normalize_address(notice.address.as_deref()?);
    let stored = record.text(RecordField::Address)?;
    let old = normalize_address(stored);
    if new.is_empty() || old.is_empty() || old == new {
        return None;
    }
    Some(format!(
        "case id reused for a different address (stored '{}', now '{}')",
        stored,
        notice.address.as_deref().unwrap_or_default()
    ))
}

/// Diffs the observations against the stored records.
///
/// Notices are looked up by case id and region first, then by address and
/// auction date among records that never had a case id. The result depends
/// only on the two inputs.
pub fn reconcile(observations: &[Observation], records: &[ExistingRecord]) -> ActionPlan {
    reconcile_with(observations, records, |_| true)
}

/// [`reconcile`] for a store that only keeps the fields `keeps` accepts.
/// Other fields still go into creates but are never compared or updated.
pub fn reconcile_with<F>(
    observations: &[Observation],
    records: &[ExistingRecord],
    keeps: F,
) -> ActionPlan
where
    F: Fn(RecordField) -> bool,
{
    let kept_fields = |observation: &Observation| {
        let mut fields = observation.fields();
        fields.retain(|field, _| keeps(*field));
        fields
    };

    let mut by_case: HashMap<IdentityKey, usize> = HashMap::new();
    let mut by_address: HashMap<IdentityKey, usize> = HashMap::new();

    for (idx, record) in records.iter().enumerate() {
        let Some(key) = record.identity_key() else {
            if record.has_case_id() {
                log::warn!("Record {} has a case id but no known region, skipping", record);
            }
            continue;
        };
        let index = match key {
            IdentityKey::Case { .. } => &mut by_case,
            IdentityKey::Address { .. } => &mut by_address,
        };
        if let Some(&first) = index.get(&key) {
            log::warn!(
                "Records {} and {} share key {}; using the first",
                records[first].id,
                record.id,
                key
            );
            continue;
        }
        index.insert(key, idx);
    }

    let mut seen: HashSet<IdentityKey> = HashSet::new();
    let mut claimed: HashMap<usize, IdentityKey> = HashMap::new();
    let mut actions = Vec::new();

    for observation in observations {
        let notice = &observation.notice;
        let key = notice.identity_key();
        if !seen.insert(key.clone()) {
            log::warn!("Duplicate notice {} in this run, keeping the first", key);
            continue;
        }

        let matched = by_case.get(&key).copied().or_else(|| {
            notice
                .fallback_key()
                .and_then(|fallback| by_address.get(&fallback).copied())
        });

        let Some(idx) = matched else {
            actions.push(Action::Create {
                key,
                notice: notice.clone(),
                fields: observation.fields(),
            });
            continue;
        };
        let record = &records[idx];

        if let Some(other) = claimed.get(&idx) {
            actions.push(Action::Review {
                key,
                record_id: record.id.clone(),
                notice: notice.clone(),
                reason: format!("record already matched by {}", other),
            });
            continue;
        }
        claimed.insert(idx, key.clone());

        if let Some(reason) = conflicting_address(notice, record) {
            actions.push(Action::Review {
                key,
                record_id: record.id.clone(),
                notice: notice.clone(),
                reason,
            });
            continue;
        }

        let changes = diff_fields(&kept_fields(observation), &record.fields);
        if changes.is_empty() {
            actions.push(Action::NoOp {
                key,
                record_id: record.id.clone(),
            });
        } else {
            actions.push(Action::UpdateFields {
                key,
                record_id: record.id.clone(),
                notice: notice.clone(),
                changes,
            });
        }
    }

    actions.sort_by(|a, b| a.key().cmp(b.key()));
    ActionPlan { actions }
}
