use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AnnotationRequest, Settings};
use crate::configuration::AnnotationConfiguration;
use crate::domain::{Accession, OrganismId, Source};
use crate::error::KiraError;
use crate::interpro::{InterproClient, InterproRetriever};
use crate::merge::AnnotationMerger;
use crate::plan::CacheProbe;
use crate::reference::ReferenceNames;
use crate::record::{
    AnnotationRecord, Annotations, DomainMatchRecord, FetchPlan, TaxonomyRecord,
    overlay_annotations,
};
use crate::store::Store;
use crate::table::AnnotationTable;
use crate::taxonomy::{TaxonomyLookup, TaxonomyRetriever};
use crate::transform::{AnnotationTransformer, has_unnamed_ec};
use crate::uniprot::{UniprotClient, UniprotRetriever};

/// Annotated table for the requested identifiers.
#[derive(Debug, Clone)]
pub struct AnnotateResult {
    /// `None` when the annotations came from a precomputed table.
    pub plan: Option<FetchPlan>,
    pub table: AnnotationTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<U: UniprotClient, T: TaxonomyLookup, I: InterproClient, R: ReferenceNames> {
    store: Store,
    uniprot: U,
    taxonomy: T,
    interpro: I,
    names: R,
    settings: Settings,
}

impl<U, T, I, R> App<U, T, I, R>
where
    U: UniprotClient,
    T: TaxonomyLookup,
    I: InterproClient,
    R: ReferenceNames,
{
    pub fn new(
        store: Store,
        uniprot: U,
        taxonomy: T,
        interpro: I,
        names: R,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            uniprot,
            taxonomy,
            interpro,
            names,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Annotates `identifiers` with the requested names, fetching only what
    /// the cached table does not already hold.
    ///
    /// Output rows follow the first occurrence of each identifier and an
    /// empty identifier list yields an empty table. Source failures leave
    /// empty cells; the only pipeline error is an unknown annotation name.
    pub fn annotate(
        &self,
        identifiers: &[String],
        request: &AnnotationRequest,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateResult, KiraError> {
        let started = Instant::now();
        let identifiers = dedup_identifiers(identifiers);

        let names = match request {
            AnnotationRequest::Table(path) => return self.annotate_from_table(path, &identifiers, sink),
            AnnotationRequest::Names(names) => names,
        };
        let configuration = AnnotationConfiguration::configure(Some(names))?;
        let requirement = configuration.requirement();
        if identifiers.is_empty() {
            debug!("no identifiers to annotate");
            return Ok(AnnotateResult {
                plan: Some(FetchPlan::default()),
                table: AnnotationTable::new().select(&identifiers, configuration.user_annotations()),
            });
        }

        let mut cache = self.load_cache();
        let covered = if self.settings.force_refetch {
            BTreeSet::new()
        } else {
            cache.covered_columns(&identifiers)
        };
        let plan = CacheProbe::plan(&covered, requirement, self.settings.force_refetch);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Plan; {} proteins, sources: {}",
                identifiers.len(),
                describe_sources(&plan)
            ),
            elapsed: None,
        });

        let mut records = if self.settings.force_refetch {
            identifiers
                .iter()
                .map(|id| AnnotationRecord::new(id.as_str(), Annotations::new()))
                .collect()
        } else {
            cache.records_for(&identifiers)
        };

        if plan.uniprot {
            sink.event(ProgressEvent {
                message: "phase=Fetch; UniProt".to_string(),
                elapsed: Some(started.elapsed()),
            });
            records = self.fetch_uniprot(records);
        }

        let fetch_taxonomy = plan.taxonomy && configuration.wants(Source::Taxonomy);
        let fetch_interpro = plan.interpro && configuration.wants(Source::Interpro);
        if fetch_taxonomy {
            if let Err(err) = self.taxonomy.refresh(self.settings.taxonomy_max_age) {
                warn!(error = %err, "taxonomy database unavailable");
            }
        }
        if fetch_taxonomy || fetch_interpro {
            sink.event(ProgressEvent {
                message: "phase=Fetch; taxonomy and InterPro".to_string(),
                elapsed: Some(started.elapsed()),
            });
        }
        let (taxonomy, domain) = rayon::join(
            || {
                if fetch_taxonomy {
                    self.fetch_taxonomy(&records)
                } else {
                    HashMap::new()
                }
            },
            || fetch_interpro.then(|| self.fetch_interpro(&records, &requirement.interpro)),
        );

        sink.event(ProgressEvent {
            message: "phase=Merge; joining sources".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let joined = AnnotationMerger::join(records, &taxonomy, domain.as_deref());
        let mut transformed = AnnotationTransformer::transform(joined);
        if configuration.user_annotations().contains("ec") {
            transformed = self.name_enzymes(transformed);
        }

        if self.settings.keep_intermediate && !plan.is_empty() {
            cache.upsert(transformed.iter().cloned());
            self.save_cache(&cache);
        }

        let capped = AnnotationMerger::cap_categories(transformed);
        let output = if self.settings.no_scores {
            AnnotationTransformer::strip_scores(capped)
        } else {
            capped
        };
        let table = AnnotationTable::from_records(output)
            .select(&identifiers, configuration.user_annotations());

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} rows", table.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(AnnotateResult {
            plan: Some(plan),
            table,
        })
    }

    pub fn clear_cache(&self, sink: &dyn ProgressSink) -> Result<ClearResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=Store; clearing annotation cache".to_string(),
            elapsed: None,
        });
        let cleared = self.store.has_annotations_cache();
        self.store.clear_annotations_cache()?;
        Ok(ClearResult { cleared })
    }

    fn annotate_from_table(
        &self,
        path: &Path,
        identifiers: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateResult, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", path.display()),
            elapsed: None,
        });
        let table = AnnotationTable::read_delimited(path)?;
        let columns: IndexSet<String> = table.columns().map(str::to_string).collect();
        let missing = identifiers
            .iter()
            .filter(|id| !table.contains(id))
            .count();
        if missing > 0 {
            warn!(missing, path = %path.display(), "identifiers absent from annotation table");
        }
        Ok(AnnotateResult {
            plan: None,
            table: table.select(identifiers, &columns),
        })
    }

    fn load_cache(&self) -> AnnotationTable {
        if !self.settings.keep_intermediate || !self.store.has_annotations_cache() {
            return AnnotationTable::new();
        }
        let path = self.store.annotations_cache_path();
        match AnnotationTable::read_json(&path) {
            Ok(table) => {
                debug!(rows = table.len(), path = %path, "loaded annotation cache");
                table
            }
            Err(err) => {
                warn!(error = %err, "ignoring unreadable annotation cache");
                AnnotationTable::new()
            }
        }
    }

    fn save_cache(&self, cache: &AnnotationTable) {
        let path = self.store.annotations_cache_path();
        match cache.write_json(&path) {
            Ok(()) => debug!(rows = cache.len(), path = %path, "saved annotation cache"),
            Err(err) => warn!(error = %err, "failed to save annotation cache"),
        }
    }

    fn fetch_uniprot(&self, records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
        let accessions: Vec<Accession> = records
            .iter()
            .map(|record| Accession::normalize(&record.identifier))
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        info!(accessions = accessions.len(), "fetching UniProt entries");
        let retriever =
            UniprotRetriever::new(&self.uniprot, self.settings.batch_size, self.settings.workers);
        let fetched: IndexMap<Accession, Annotations> = retriever.retrieve(&accessions);

        records
            .into_iter()
            .map(|mut record| {
                let accession = Accession::normalize(&record.identifier);
                if let Some(annotations) = fetched.get(&accession) {
                    overlay_annotations(&mut record.annotations, annotations);
                }
                record
            })
            .collect()
    }

    /// Names EC numbers when some cell still lacks a name. A missing name
    /// table leaves the numbers bare.
    fn name_enzymes(&self, records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
        let unnamed = records
            .iter()
            .filter_map(|record| record.get("ec"))
            .any(has_unnamed_ec);
        if !unnamed {
            return records;
        }
        match self.names.enzyme_names() {
            Ok(names) => AnnotationTransformer::name_enzymes(records, &names),
            Err(err) => {
                warn!(error = %err, "enzyme names unavailable");
                records
            }
        }
    }

    fn fetch_taxonomy(&self, records: &[AnnotationRecord]) -> HashMap<OrganismId, TaxonomyRecord> {
        let organism_ids: Vec<OrganismId> = records
            .iter()
            .filter_map(AnnotationRecord::organism_id)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        info!(organisms = organism_ids.len(), "resolving taxonomy");
        TaxonomyRetriever::new(&self.taxonomy, self.settings.batch_size, self.settings.workers)
            .retrieve(&organism_ids)
    }

    fn fetch_interpro(
        &self,
        records: &[AnnotationRecord],
        annotations: &IndexSet<String>,
    ) -> Vec<DomainMatchRecord> {
        let sequences: Vec<(String, String)> = records
            .iter()
            .map(|record| {
                (
                    record.identifier.clone(),
                    record.get("sequence").unwrap_or_default().to_string(),
                )
            })
            .collect();
        info!(proteins = sequences.len(), "fetching InterPro matches");
        InterproRetriever::new(
            &self.interpro,
            &self.names,
            self.settings.batch_size,
            self.settings.workers,
        )
        .retrieve(&sequences, annotations)
    }
}

/// Trims, drops blanks and keeps the first occurrence of each identifier.
pub fn dedup_identifiers(identifiers: &[String]) -> Vec<String> {
    identifiers
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

fn describe_sources(plan: &FetchPlan) -> String {
    let sources = plan.sources();
    if sources.is_empty() {
        return "none (cached)".to_string();
    }
    sources
        .iter()
        .map(|source| source.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
