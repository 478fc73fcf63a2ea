use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::catalog::TAXONOMY_ANNOTATIONS;
use crate::domain::OrganismId;
use crate::record::{AnnotationRecord, DomainMatchRecord, TaxonomyRecord};

/// Distinct real values kept per taxonomy field before the rest fold into
/// [`OTHER`].
pub const MAX_CATEGORIES: usize = 9;
pub const OTHER: &str = "other";

/// Joins per-source results onto the primary records.
pub struct AnnotationMerger;

impl AnnotationMerger {
    pub fn merge(
        primary: Vec<AnnotationRecord>,
        taxonomy: &HashMap<OrganismId, TaxonomyRecord>,
        domain: Option<&[DomainMatchRecord]>,
    ) -> Vec<AnnotationRecord> {
        let joined = Self::join(primary, taxonomy, domain);
        Self::cap_categories(joined)
    }

    /// Attaches taxonomy fields through `organism_id` and domain fields
    /// through the identifier. Records whose join key is missing or
    /// malformed are passed through untouched.
    pub fn join(
        primary: Vec<AnnotationRecord>,
        taxonomy: &HashMap<OrganismId, TaxonomyRecord>,
        domain: Option<&[DomainMatchRecord]>,
    ) -> Vec<AnnotationRecord> {
        let domain_by_id: HashMap<&str, &DomainMatchRecord> = domain
            .unwrap_or_default()
            .iter()
            .map(|record| (record.identifier.as_str(), record))
            .collect();

        primary
            .into_iter()
            .map(|record| {
                let record = match record.organism_id().and_then(|id| taxonomy.get(&id)) {
                    Some(lineage) => record.with_annotations(&lineage.annotations),
                    None => record,
                };
                match domain_by_id.get(record.identifier.as_str()) {
                    Some(matches) => record.with_annotations(&matches.annotations),
                    None => record,
                }
            })
            .collect()
    }

    /// Keeps the most frequent non-empty values of every taxonomy field and
    /// replaces the rest with [`OTHER`]. Ties keep first-seen order.
    pub fn cap_categories(records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
        let mut kept: HashMap<&str, Vec<String>> = HashMap::new();
        for &field in TAXONOMY_ANNOTATIONS {
            let mut counts: IndexMap<&str, usize> = IndexMap::new();
            for record in &records {
                match record.get(field) {
                    Some(value) if !value.is_empty() && value != OTHER => {
                        *counts.entry(value).or_default() += 1;
                    }
                    _ => {}
                }
            }
            if counts.len() <= MAX_CATEGORIES {
                continue;
            }
            let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            debug!(field, distinct = ranked.len(), "capping taxonomy categories");
            kept.insert(
                field,
                ranked
                    .into_iter()
                    .take(MAX_CATEGORIES)
                    .map(|(value, _)| value.to_string())
                    .collect(),
            );
        }
        if kept.is_empty() {
            return records;
        }

        records
            .into_iter()
            .map(|mut record| {
                for (field, values) in &kept {
                    if let Some(value) = record.annotations.get_mut(*field) {
                        if !value.is_empty() && !values.contains(value) {
                            *value = OTHER.to_string();
                        }
                    }
                }
                record
            })
            .collect()
    }
}
