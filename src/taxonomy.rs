use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::batch::BatchDispatcher;
use crate::catalog::TAXONOMY_ANNOTATIONS;
use crate::domain::{OrganismId, Source};
use crate::error::KiraError;
use crate::fs_util::extract_zip;
use crate::http::{handle_status, send_with_retries};
use crate::record::{TaxonomyRecord, empty_annotations};
use crate::store::Store;

pub const TAXDUMP_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdmp.zip";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const DUMP_FILES: &[&str] = &["nodes.dmp", "names.dmp", "merged.dmp"];
const TIMESTAMP_FILE: &str = ".download_timestamp";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Rank name to scientific name along one lineage.
pub type RankMap = BTreeMap<String, String>;

/// Source of lineage data for organism ids.
pub trait TaxonomyLookup: Send + Sync {
    /// Ranks on the lineage of `organism_id`, `None` when the id is unknown.
    fn ranks(&self, organism_id: OrganismId) -> Result<Option<RankMap>, KiraError>;

    /// Brings the underlying data up to date when it is older than `max_age`.
    fn refresh(&self, max_age: Duration) -> Result<(), KiraError>;
}

/// In-memory NCBI taxonomy tree.
#[derive(Debug, Default)]
pub struct TaxonomyDb {
    nodes: HashMap<u32, (u32, String)>,
    names: HashMap<u32, String>,
    merged: HashMap<u32, u32>,
}

impl TaxonomyDb {
    pub fn load(dir: &Utf8Path) -> Result<Self, KiraError> {
        let nodes = read_dump(&dir.join("nodes.dmp"), |parts| {
            let taxid = parts.first()?.parse::<u32>().ok()?;
            let parent = parts.get(1)?.parse::<u32>().ok()?;
            let rank = parts.get(2)?.to_string();
            Some((taxid, (parent, rank)))
        })?;
        let names = read_dump(&dir.join("names.dmp"), |parts| {
            if parts.get(3).copied() != Some("scientific name") {
                return None;
            }
            let taxid = parts.first()?.parse::<u32>().ok()?;
            Some((taxid, parts.get(1)?.to_string()))
        })?;
        let merged_path = dir.join("merged.dmp");
        let merged = if merged_path.as_std_path().exists() {
            read_dump(&merged_path, |parts| {
                let old = parts.first()?.parse::<u32>().ok()?;
                let new = parts.get(1)?.parse::<u32>().ok()?;
                Some((old, new))
            })?
        } else {
            HashMap::new()
        };
        debug!(nodes = nodes.len(), names = names.len(), merged = merged.len(), "loaded taxonomy dump");
        Ok(Self {
            nodes,
            names,
            merged,
        })
    }

    pub fn insert(&mut self, taxid: u32, parent: u32, rank: &str, name: &str) {
        self.nodes.insert(taxid, (parent, rank.to_string()));
        self.names.insert(taxid, name.to_string());
    }

    pub fn insert_merged(&mut self, old: u32, new: u32) {
        self.merged.insert(old, new);
    }

    /// Walks from `organism_id` to the root, collecting ranked ancestors.
    pub fn lineage_ranks(&self, organism_id: OrganismId) -> Option<RankMap> {
        let start = organism_id.get();
        let mut current = self.merged.get(&start).copied().unwrap_or(start);
        if !self.nodes.contains_key(&current) {
            return None;
        }

        let mut ranks = RankMap::new();
        let mut steps = 0usize;
        while let Some((parent, rank)) = self.nodes.get(&current) {
            if rank != "no rank" && rank != "clade" {
                if let Some(name) = self.names.get(&current) {
                    ranks.entry(rank.clone()).or_insert_with(|| name.clone());
                }
            }
            steps += 1;
            if *parent == current || steps > self.nodes.len() {
                break;
            }
            current = *parent;
        }
        Some(ranks)
    }
}

impl TaxonomyLookup for TaxonomyDb {
    fn ranks(&self, organism_id: OrganismId) -> Result<Option<RankMap>, KiraError> {
        Ok(self.lineage_ranks(organism_id))
    }

    fn refresh(&self, _max_age: Duration) -> Result<(), KiraError> {
        Ok(())
    }
}

fn read_dump<K, V, F>(path: &Utf8Path, parse: F) -> Result<HashMap<K, V>, KiraError>
where
    K: std::hash::Hash + Eq,
    F: Fn(&[&str]) -> Option<(K, V)>,
{
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| KiraError::TaxonomyDatabase(format!("open {path}: {err}")))?;
    let mut out = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| KiraError::TaxonomyDatabase(err.to_string()))?;
        let parts: Vec<&str> = line
            .trim_end_matches("\t|")
            .split("\t|\t")
            .map(str::trim)
            .collect();
        if let Some((key, value)) = parse(&parts) {
            out.insert(key, value);
        }
    }
    Ok(out)
}

/// Maps lineage ranks onto the taxonomy annotation columns.
pub fn annotations_from_ranks(ranks: &RankMap) -> BTreeMap<String, String> {
    let pick = |candidates: &[&str]| -> String {
        candidates
            .iter()
            .find_map(|rank| ranks.get(*rank).filter(|name| !name.is_empty()))
            .cloned()
            .unwrap_or_default()
    };
    TAXONOMY_ANNOTATIONS
        .iter()
        .map(|name| {
            let value = match *name {
                "root" => pick(&["cellular root", "acellular root"]),
                "domain" => pick(&["domain", "realm", "superkingdom"]),
                other => pick(&[other]),
            };
            (name.to_string(), value)
        })
        .collect()
}

/// NCBI taxdump kept under the cache root and refreshed on demand.
pub struct TaxdumpLookup {
    dir: Utf8PathBuf,
    client: Client,
    url: String,
    db: RwLock<Option<Arc<TaxonomyDb>>>,
}

impl TaxdumpLookup {
    pub fn new(store: &Store, client: Client) -> Self {
        Self {
            dir: store.taxonomy_dir(),
            client,
            url: TAXDUMP_URL.to_string(),
            db: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn timestamp_path(&self) -> Utf8PathBuf {
        self.dir.join(TIMESTAMP_FILE)
    }

    fn has_dump(&self) -> bool {
        ["nodes.dmp", "names.dmp"]
            .iter()
            .all(|name| self.dir.join(name).as_std_path().exists())
    }

    pub fn downloaded_at(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(self.timestamp_path().as_std_path()).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|stamp| stamp.with_timezone(&Utc))
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        if !self.has_dump() {
            return false;
        }
        let Some(stamp) = self.downloaded_at() else {
            return false;
        };
        let age = Utc::now().signed_duration_since(stamp);
        age.to_std().map(|age| age < max_age).unwrap_or(true)
    }

    fn download(&self) -> Result<(), KiraError> {
        info!(url = %self.url, "downloading taxonomy dump");
        let scratch = tempfile::Builder::new()
            .prefix("kira-annot-taxdump")
            .tempdir()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let zip_path = scratch.path().join("taxdmp.zip");

        let response = send_with_retries(
            || self.client.get(&self.url).timeout(DOWNLOAD_TIMEOUT),
            KiraError::TaxonomyHttp,
        )?;
        let mut response = handle_status(response, |status, message| KiraError::TaxonomyStatus {
            status,
            message,
        })?;
        let mut file = fs::File::create(&zip_path)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        response
            .copy_to(&mut file)
            .map_err(|err| KiraError::TaxonomyHttp(err.to_string()))?;
        drop(file);

        let extracted = scratch.path().join("extracted");
        extract_zip(&zip_path, &extracted)?;
        self.install(&extracted)?;

        let stamp = Utc::now().to_rfc3339();
        Store::write_bytes_atomic(&self.timestamp_path(), stamp.as_bytes())?;
        Ok(())
    }

    fn install(&self, extracted: &Path) -> Result<(), KiraError> {
        for name in DUMP_FILES {
            let source = extracted.join(name);
            if !source.exists() {
                if *name == "merged.dmp" {
                    continue;
                }
                return Err(KiraError::TaxonomyDatabase(format!("{name} missing from dump")));
            }
            let source = Utf8PathBuf::from_path_buf(source)
                .map_err(|_| KiraError::Filesystem("invalid taxonomy path".to_string()))?;
            Store::copy_file_atomic(&source, &self.dir.join(name))?;
        }
        Ok(())
    }

    fn database(&self) -> Result<Arc<TaxonomyDb>, KiraError> {
        if let Ok(guard) = self.db.read() {
            if let Some(db) = guard.as_ref() {
                return Ok(Arc::clone(db));
            }
        }
        if !self.has_dump() {
            return Err(KiraError::TaxonomyDatabase(format!(
                "no taxonomy dump under {}",
                self.dir
            )));
        }
        let db = Arc::new(TaxonomyDb::load(&self.dir)?);
        if let Ok(mut guard) = self.db.write() {
            *guard = Some(Arc::clone(&db));
        }
        Ok(db)
    }
}

impl TaxonomyLookup for TaxdumpLookup {
    fn ranks(&self, organism_id: OrganismId) -> Result<Option<RankMap>, KiraError> {
        Ok(self.database()?.lineage_ranks(organism_id))
    }

    fn refresh(&self, max_age: Duration) -> Result<(), KiraError> {
        if self.is_fresh(max_age) {
            debug!(dir = %self.dir, "taxonomy dump is fresh");
            return Ok(());
        }
        match self.download() {
            Ok(()) => {
                if let Ok(mut guard) = self.db.write() {
                    *guard = None;
                }
                Ok(())
            }
            Err(err) if self.has_dump() => {
                warn!(error = %err, "taxonomy refresh failed, using the existing dump");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Lineage annotations for each distinct organism id.
pub struct TaxonomyRetriever<'a> {
    lookup: &'a dyn TaxonomyLookup,
    dispatcher: BatchDispatcher,
}

impl<'a> TaxonomyRetriever<'a> {
    pub fn new(lookup: &'a dyn TaxonomyLookup, batch_size: usize, workers: usize) -> Self {
        Self {
            lookup,
            dispatcher: BatchDispatcher::new(Source::Taxonomy, batch_size, workers),
        }
    }

    pub fn retrieve(&self, organism_ids: &[OrganismId]) -> HashMap<OrganismId, TaxonomyRecord> {
        let outcomes = self.dispatcher.run(organism_ids, |batch| {
            batch
                .iter()
                .map(|id| Ok((*id, self.lookup.ranks(*id)?)))
                .collect::<Result<Vec<_>, KiraError>>()
        });

        let mut records = HashMap::with_capacity(organism_ids.len());
        for outcome in outcomes {
            let found: HashMap<OrganismId, Option<RankMap>> =
                outcome.result.map(|rows| rows.into_iter().collect()).unwrap_or_default();
            for id in outcome.keys {
                let annotations = match found.get(&id) {
                    Some(Some(ranks)) => annotations_from_ranks(ranks),
                    Some(None) => {
                        debug!(organism_id = %id, "organism not in taxonomy");
                        empty_annotations(TAXONOMY_ANNOTATIONS.iter().copied())
                    }
                    None => empty_annotations(TAXONOMY_ANNOTATIONS.iter().copied()),
                };
                records.insert(
                    id,
                    TaxonomyRecord {
                        organism_id: id,
                        annotations,
                    },
                );
            }
        }
        records
    }
}
