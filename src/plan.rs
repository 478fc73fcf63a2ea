use std::collections::BTreeSet;

use tracing::info;

use crate::domain::Source;
use crate::record::{FetchPlan, SourceRequirement};

/// Decides which sources a run has to query given what the cache covers.
pub struct CacheProbe;

impl CacheProbe {
    pub fn plan(
        cached_columns: &BTreeSet<String>,
        required: &SourceRequirement,
        force_refetch: bool,
    ) -> FetchPlan {
        if force_refetch {
            info!("force refetch requested, querying every source");
            return FetchPlan::everything();
        }

        let is_missing = |name: &String| name != "accession" && !cached_columns.contains(name);
        let needs = |source: Source| required.for_source(source).iter().any(is_missing);

        let mut plan = FetchPlan {
            uniprot: needs(Source::Uniprot),
            taxonomy: needs(Source::Taxonomy),
            interpro: needs(Source::Interpro),
        };

        if plan.taxonomy && !cached_columns.contains("organism_id") {
            plan.uniprot = true;
        }
        if plan.interpro && !cached_columns.contains("sequence") {
            plan.uniprot = true;
        }

        info!(
            uniprot = plan.uniprot,
            taxonomy = plan.taxonomy,
            interpro = plan.interpro,
            cached = cached_columns.len(),
            "fetch plan"
        );
        plan
    }
}
