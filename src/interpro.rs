use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::BatchDispatcher;
use crate::catalog;
use crate::domain::{SequenceChecksum, Source};
use crate::error::KiraError;
use crate::http::{build_client, handle_status, send_with_retries};
use crate::record::{Annotations, DomainMatchRecord, empty_annotations};
use crate::reference::{EntryNames, NameMap, ReferenceNames, member_database};

const MATCHES_URL: &str = "https://www.ebi.ac.uk/interpro/matches/api/matches";

/// Per-checksum lookup result of the matches API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchResult {
    pub md5: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub matches: Vec<SignatureMatch>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignatureMatch {
    pub signature: Signature,
    #[serde(default)]
    pub score: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signature {
    #[serde(default)]
    pub accession: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "signatureLibraryRelease", default)]
    pub library_release: Option<LibraryRelease>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryRelease {
    #[serde(default)]
    pub library: String,
    #[serde(default)]
    pub version: Option<String>,
}

pub trait InterproClient: Send + Sync {
    fn matches(&self, checksums: &[SequenceChecksum]) -> Result<Vec<MatchResult>, KiraError>;
}

#[derive(Clone)]
pub struct InterproHttpClient {
    client: Client,
}

#[derive(Serialize)]
struct MatchesRequest<'a> {
    md5: Vec<&'a str>,
}

#[derive(Deserialize)]
struct MatchesResponse {
    #[serde(default)]
    results: Vec<MatchResult>,
}

impl InterproHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl InterproClient for InterproHttpClient {
    fn matches(&self, checksums: &[SequenceChecksum]) -> Result<Vec<MatchResult>, KiraError> {
        let body = MatchesRequest {
            md5: checksums.iter().map(SequenceChecksum::as_str).collect(),
        };
        let response = send_with_retries(
            || {
                self.client
                    .post(MATCHES_URL)
                    .header(ACCEPT, "application/json")
                    .json(&body)
            },
            KiraError::InterproHttp,
        )?;
        let response = handle_status(response, |status, message| KiraError::InterproStatus {
            status,
            message,
        })?;
        let parsed: MatchesResponse = response
            .json()
            .map_err(|err| KiraError::InterproHttp(err.to_string()))?;
        Ok(parsed.results)
    }
}

/// Signature hits for one annotation, keyed by signature accession.
#[derive(Debug, Default)]
struct SignatureHits {
    by_accession: BTreeMap<String, (String, Vec<String>)>,
}

impl SignatureHits {
    fn add(&mut self, accession: &str, name: Option<&str>, score: Option<String>) {
        let (known_name, scores) = self
            .by_accession
            .entry(accession.to_string())
            .or_insert_with(|| (String::new(), Vec::new()));
        if known_name.is_empty() {
            if let Some(name) = name.filter(|name| !name.is_empty()) {
                *known_name = name.to_string();
            }
        }
        if let Some(score) = score.filter(|score| !score.is_empty()) {
            scores.push(score);
        }
    }

    /// `ACC (name)|s1,s2;ACC2|s1`, sorted by accession. Names missing from
    /// the matches fall back to `entry_names`.
    fn encode(&self, entry_names: Option<&NameMap>) -> String {
        self.by_accession
            .iter()
            .map(|(accession, (name, scores))| {
                let name = if name.is_empty() {
                    entry_names
                        .and_then(|names| names.get(accession))
                        .map(String::as_str)
                        .unwrap_or_default()
                } else {
                    name.as_str()
                };
                let mut entry = if name.is_empty() {
                    accession.clone()
                } else {
                    format!("{accession} ({name})")
                };
                if !scores.is_empty() {
                    entry.push('|');
                    entry.push_str(&scores.join(","));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn score_text(score: &Value) -> Option<String> {
    match score {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn library_of(hit: &SignatureMatch) -> String {
    hit.signature
        .library_release
        .as_ref()
        .map(|release| release.library.to_lowercase())
        .unwrap_or_default()
}

/// Requested annotation fed by the library of `hit`.
fn annotation_for<'s>(hit: &SignatureMatch, annotations: &'s IndexSet<String>) -> Option<&'s str> {
    let library = library_of(hit);
    annotations
        .iter()
        .find(|name| catalog::interpro_library(name) == Some(library.as_str()))
        .map(String::as_str)
}

/// Encodes the matches of one checksum into the requested annotations.
pub fn encode_matches(
    result: &MatchResult,
    annotations: &IndexSet<String>,
    entry_names: &EntryNames,
) -> Annotations {
    let mut hits: HashMap<&str, SignatureHits> = HashMap::new();
    if result.found {
        for hit in &result.matches {
            let Some(annotation) = annotation_for(hit, annotations) else {
                continue;
            };
            if hit.signature.accession.is_empty() {
                continue;
            }
            hits.entry(annotation).or_default().add(
                &hit.signature.accession,
                hit.signature.name.as_deref(),
                hit.score.as_ref().and_then(score_text),
            );
        }
    }
    annotations
        .iter()
        .map(|name| {
            let names = member_database(name).and_then(|db| entry_names.get(db));
            let value = hits
                .get(name.as_str())
                .map(|hits| hits.encode(names))
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

/// Domain-match annotations for proteins, addressed by sequence checksum.
pub struct InterproRetriever<'a> {
    client: &'a dyn InterproClient,
    names: &'a dyn ReferenceNames,
    dispatcher: BatchDispatcher,
}

impl<'a> InterproRetriever<'a> {
    pub fn new(
        client: &'a dyn InterproClient,
        names: &'a dyn ReferenceNames,
        batch_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            client,
            names,
            dispatcher: BatchDispatcher::new(Source::Interpro, batch_size, workers),
        }
    }

    /// Entry names, loaded only when a requested named database has a
    /// match without a name. Lookup failures leave accessions unnamed.
    fn entry_names<'r>(
        &self,
        results: impl IntoIterator<Item = &'r MatchResult>,
        annotations: &IndexSet<String>,
    ) -> EntryNames {
        let needed = results.into_iter().flat_map(|result| &result.matches).any(|hit| {
            let unnamed = hit.signature.name.as_deref().unwrap_or_default().is_empty();
            unnamed && annotation_for(hit, annotations).and_then(member_database).is_some()
        });
        if !needed {
            return EntryNames::new();
        }
        match self.names.entry_names() {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "InterPro entry names unavailable");
                EntryNames::new()
            }
        }
    }

    /// One record per `(identifier, sequence)` pair. Identical sequences share
    /// a checksum and receive identical annotations; missing sequences yield
    /// empty annotations.
    pub fn retrieve(
        &self,
        sequences: &[(String, String)],
        annotations: &IndexSet<String>,
    ) -> Vec<DomainMatchRecord> {
        let mut by_checksum: IndexMap<SequenceChecksum, Vec<&str>> = IndexMap::new();
        let mut missing = 0usize;
        let checksums: Vec<Option<SequenceChecksum>> = sequences
            .iter()
            .map(|(identifier, sequence)| {
                if sequence.trim().is_empty() {
                    missing += 1;
                    return None;
                }
                let checksum = SequenceChecksum::from_sequence(sequence.trim());
                by_checksum
                    .entry(checksum.clone())
                    .or_default()
                    .push(identifier.as_str());
                Some(checksum)
            })
            .collect();
        if missing > 0 {
            info!(missing, "proteins without sequence skipped for InterPro");
        }

        let keys: Vec<SequenceChecksum> = by_checksum.keys().cloned().collect();
        debug!(
            proteins = sequences.len(),
            checksums = keys.len(),
            "querying InterPro"
        );
        let outcomes = self.dispatcher.run(&keys, |batch| self.client.matches(batch));

        let mut raw: HashMap<SequenceChecksum, MatchResult> = HashMap::new();
        for outcome in outcomes {
            let Ok(results) = outcome.result else {
                continue;
            };
            for result in results {
                let checksum = SequenceChecksum::from_hex(&result.md5);
                if outcome.keys.contains(&checksum) {
                    raw.insert(checksum, result);
                }
            }
        }
        let entry_names = self.entry_names(raw.values(), annotations);
        let encoded: HashMap<SequenceChecksum, Annotations> = raw
            .iter()
            .map(|(checksum, result)| {
                (
                    checksum.clone(),
                    encode_matches(result, annotations, &entry_names),
                )
            })
            .collect();

        let empty = empty_annotations(annotations.iter().map(String::as_str));
        sequences
            .iter()
            .zip(checksums)
            .map(|((identifier, _), checksum)| {
                let annotations = checksum
                    .as_ref()
                    .and_then(|checksum| encoded.get(checksum))
                    .cloned()
                    .unwrap_or_else(|| empty.clone());
                DomainMatchRecord {
                    identifier: identifier.clone(),
                    checksum,
                    annotations,
                }
            })
            .collect()
    }
}
