//! Field-level merge of all records that describe one product.
//!
//! Every merged field records the source that supplied it. Fields without an
//! explicit rule take the non-empty value of the highest-scoring contributor.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Contribution, MergedField};

/// Pseudo-field carrying each record's display name through the merge.
pub const DISPLAY_NAME_FIELD: &str = "display_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// The reference source first, then the rest by source priority.
    ReferenceWins,
    /// Longest non-empty value; equal lengths fall back to source priority.
    Richest,
    /// Listed sources in order, then the rest by source priority.
    Sources(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrecedenceTable {
    pub reference: String,
    /// Tie-break order across sources. Unlisted sources sort last.
    pub source_priority: Vec<String>,
    pub rules: BTreeMap<String, FieldRule>,
}

impl PrecedenceTable {
    pub fn new(reference: &str, source_priority: &[&str]) -> Self {
        Self {
            reference: reference.into(),
            source_priority: source_priority.iter().map(|s| s.to_string()).collect(),
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, field: &str, rule: FieldRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    fn priority(&self, source_id: &str) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source_id)
            .unwrap_or(self.source_priority.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub fields: BTreeMap<String, MergedField>,
    /// Fields resolved by the default rule because the table had no entry.
    pub unruled: BTreeSet<String>,
}

struct Offer<'a> {
    position: usize,
    contribution: &'a Contribution,
    value: &'a str,
}

fn value_of<'a>(contribution: &'a Contribution, field: &str) -> Option<&'a str> {
    if field == DISPLAY_NAME_FIELD {
        Some(contribution.record.display_name.as_str()).filter(|v| !v.trim().is_empty())
    } else {
        contribution.record.attr(field)
    }
}

/// Merge contributing records under `table`. Deterministic for a given
/// contribution order and table.
pub fn merge(contributions: &[Contribution], table: &PrecedenceTable) -> MergeOutcome {
    let mut field_names: BTreeSet<&str> = BTreeSet::new();
    field_names.insert(DISPLAY_NAME_FIELD);
    for c in contributions {
        field_names.extend(c.record.attributes.keys().map(|k| k.as_str()));
    }

    let mut outcome = MergeOutcome::default();

    for field in field_names {
        let mut offers: Vec<Offer<'_>> = contributions
            .iter()
            .enumerate()
            .filter_map(|(position, contribution)| {
                value_of(contribution, field).map(|value| Offer {
                    position,
                    contribution,
                    value,
                })
            })
            .collect();
        if offers.is_empty() {
            continue;
        }

        let by_priority = |a: &Offer<'_>, b: &Offer<'_>| {
            table
                .priority(&a.contribution.source_id)
                .cmp(&table.priority(&b.contribution.source_id))
                .then(a.position.cmp(&b.position))
        };

        match table.rules.get(field) {
            Some(FieldRule::ReferenceWins) => offers.sort_by(|a, b| {
                let a_ref = a.contribution.source_id != table.reference;
                let b_ref = b.contribution.source_id != table.reference;
                a_ref.cmp(&b_ref).then_with(|| by_priority(a, b))
            }),
            Some(FieldRule::Richest) => offers.sort_by(|a, b| {
                b.value
                    .trim()
                    .chars()
                    .count()
                    .cmp(&a.value.trim().chars().count())
                    .then_with(|| by_priority(a, b))
            }),
            Some(FieldRule::Sources(order)) => {
                let rank = |o: &Offer<'_>| {
                    order
                        .iter()
                        .position(|s| *s == o.contribution.source_id)
                        .unwrap_or(order.len())
                };
                offers.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| by_priority(a, b)));
            }
            None => {
                if field != DISPLAY_NAME_FIELD {
                    outcome.unruled.insert(field.to_string());
                }
                offers.sort_by(|a, b| {
                    b.contribution
                        .score
                        .partial_cmp(&a.contribution.score)
                        .unwrap_or(Ordering::Equal)
                        .then(a.position.cmp(&b.position))
                });
            }
        }

        let winner = &offers[0];
        outcome.fields.insert(
            field.to_string(),
            MergedField {
                value: winner.value.to_string(),
                source_id: winner.contribution.source_id.clone(),
            },
        );
    }

    outcome
}
