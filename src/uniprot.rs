use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::BatchDispatcher;
use crate::catalog::UNIPROT_ANNOTATIONS;
use crate::domain::{Accession, Source};
use crate::error::KiraError;
use crate::http::{build_client, handle_status, send_with_retries};
use crate::record::{Annotations, empty_annotations};

const BASE_URL: &str = "https://rest.uniprot.org/uniprotkb";

/// ECO evidence codes with their GO-style abbreviation, strongest first.
const EVIDENCE_CODES: &[(&str, &str)] = &[
    ("ECO:0000269", "EXP"),
    ("ECO:0000314", "IDA"),
    ("ECO:0000353", "IPI"),
    ("ECO:0000315", "IMP"),
    ("ECO:0000316", "IGI"),
    ("ECO:0000270", "IEP"),
    ("ECO:0000303", "TAS"),
    ("ECO:0000305", "IC"),
    ("ECO:0000250", "ISS"),
    ("ECO:0000266", "ISO"),
    ("ECO:0000247", "ISA"),
    ("ECO:0000255", "ISM"),
    ("ECO:0000245", "RCA"),
    ("ECO:0000312", "IBA"),
    ("ECO:0000501", "IEA"),
    ("ECO:0007669", "IEA"),
];

pub trait UniprotClient: Send + Sync {
    /// Bulk lookup. Entries the service cannot resolve are silently absent.
    fn fetch_many(&self, accessions: &[Accession]) -> Result<Vec<Value>, KiraError>;

    /// Search for a single accession, including secondary accessions.
    fn search(&self, accession: &Accession) -> Result<Option<Value>, KiraError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
}

#[derive(Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<Value>,
}

impl UniprotHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn get_results(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<Value>, KiraError> {
        let response = send_with_retries(
            || self.client.get(url).query(query),
            KiraError::UniprotHttp,
        )?;
        let response = handle_status(response, |status, message| KiraError::UniprotStatus {
            status,
            message,
        })?;
        let page: ResultsPage = response
            .json()
            .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
        Ok(page.results)
    }
}

impl UniprotClient for UniprotHttpClient {
    fn fetch_many(&self, accessions: &[Accession]) -> Result<Vec<Value>, KiraError> {
        if accessions.is_empty() {
            return Ok(Vec::new());
        }
        let joined = accessions
            .iter()
            .map(Accession::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.get_results(
            &format!("{BASE_URL}/accessions"),
            &[("accessions", joined), ("format", "json".to_string())],
        )
    }

    fn search(&self, accession: &Accession) -> Result<Option<Value>, KiraError> {
        let results = self.get_results(
            &format!("{BASE_URL}/search"),
            &[
                ("query", format!("accession:{}", accession.as_str())),
                ("format", "json".to_string()),
                ("size", "1".to_string()),
            ],
        )?;
        Ok(results.into_iter().next())
    }
}

/// Fetches UniProt annotations for a list of accessions, one batch at a time.
pub struct UniprotRetriever<'a> {
    client: &'a dyn UniprotClient,
    dispatcher: BatchDispatcher,
}

impl<'a> UniprotRetriever<'a> {
    pub fn new(client: &'a dyn UniprotClient, batch_size: usize, workers: usize) -> Self {
        Self {
            client,
            dispatcher: BatchDispatcher::new(Source::Uniprot, batch_size, workers),
        }
    }

    /// Every requested accession is present in the result; keys that could not
    /// be resolved carry empty annotations.
    pub fn retrieve(&self, accessions: &[Accession]) -> IndexMap<Accession, Annotations> {
        let outcomes = self
            .dispatcher
            .run(accessions, |batch| self.fetch_batch(batch));

        let mut resolved = IndexMap::with_capacity(accessions.len());
        for outcome in outcomes {
            match outcome.result {
                Ok(found) => {
                    for key in outcome.keys {
                        let annotations = found
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| empty_annotations(UNIPROT_ANNOTATIONS.iter().copied()));
                        resolved.insert(key, annotations);
                    }
                }
                Err(_) => {
                    for key in outcome.keys {
                        resolved.insert(key, empty_annotations(UNIPROT_ANNOTATIONS.iter().copied()));
                    }
                }
            }
        }
        resolved
    }

    fn fetch_batch(&self, batch: &[Accession]) -> Result<HashMap<Accession, Annotations>, KiraError> {
        let entries = self.client.fetch_many(batch)?;
        let mut found = HashMap::new();
        for key in batch {
            if let Some(entry) = entries.iter().find(|entry| entry_matches(entry, key)) {
                found.insert(key.clone(), extract_annotations(entry));
            }
        }

        let unresolved: Vec<&Accession> = batch.iter().filter(|key| !found.contains_key(*key)).collect();
        for key in unresolved {
            match self.client.search(key) {
                Ok(Some(entry)) => {
                    debug!(accession = %key, "resolved through search");
                    found.insert(key.clone(), extract_annotations(&entry));
                }
                Ok(None) => debug!(accession = %key, "no UniProt entry"),
                Err(err) => warn!(accession = %key, error = %err, "UniProt search failed"),
            }
        }
        Ok(found)
    }
}

fn entry_matches(entry: &Value, key: &Accession) -> bool {
    let primary = entry.get("primaryAccession").and_then(Value::as_str);
    if primary == Some(key.as_str()) {
        return true;
    }
    entry
        .get("secondaryAccessions")
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(key.as_str())))
}

/// Flattens a UniProtKB JSON entry into string annotations. List values are
/// joined with `;`; entries with evidence carry a `|CODE` suffix.
pub fn extract_annotations(raw: &Value) -> Annotations {
    let mut annotations = empty_annotations(UNIPROT_ANNOTATIONS.iter().copied());
    let mut set = |name: &str, value: String| {
        annotations.insert(name.to_string(), value);
    };

    set("accession", str_at(raw, &["primaryAccession"]).unwrap_or_default());
    set(
        "annotation_score",
        raw.get("annotationScore")
            .and_then(Value::as_f64)
            .map(|score| format!("{score:.1}"))
            .unwrap_or_default(),
    );
    set("cc_subcellular_location", subcellular_locations(raw).join(";"));
    set("ec", ec_numbers(raw).join(";"));
    set("fragment", fragment_flag(raw));
    set("gene_name", gene_name(raw).unwrap_or_default());

    let (go_bp, go_mf, go_cc) = go_terms(raw);
    set("go_bp", go_bp.join(";"));
    set("go_mf", go_mf.join(";"));
    set("go_cc", go_cc.join(";"));

    set("keyword", keywords(raw).join(";"));
    set(
        "length",
        raw.get("sequence")
            .and_then(|v| v.get("length"))
            .and_then(Value::as_u64)
            .map(|len| len.to_string())
            .unwrap_or_default(),
    );
    set(
        "organism_id",
        raw.get("organism")
            .and_then(|v| v.get("taxonId"))
            .and_then(Value::as_u64)
            .map(|id| id.to_string())
            .unwrap_or_default(),
    );
    set("protein_existence", protein_existence(raw));
    set("protein_families", protein_families(raw));
    set("protein_name", protein_name(raw).unwrap_or_default());
    set(
        "reviewed",
        match raw.get("entryType").and_then(Value::as_str) {
            Some(kind) if kind.contains("unreviewed") => "False".to_string(),
            Some(kind) if kind.contains("reviewed") => "True".to_string(),
            _ => String::new(),
        },
    );
    set("sequence", str_at(raw, &["sequence", "value"]).unwrap_or_default());
    set("uniprot_kb_id", str_at(raw, &["uniProtkbId"]).unwrap_or_default());
    set("xref_pdb", cross_reference_ids(raw, "PDB").join(";"));

    annotations
}

fn str_at(raw: &Value, path: &[&str]) -> Option<String> {
    let mut current = raw;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

/// Strongest evidence among `evidences`, unknown codes kept verbatim.
fn best_evidence(evidences: Option<&Value>) -> Option<String> {
    let codes: Vec<&str> = evidences
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|item| item.get("evidenceCode").and_then(Value::as_str))
        .collect();
    if codes.is_empty() {
        return None;
    }
    EVIDENCE_CODES
        .iter()
        .find(|(eco, _)| codes.contains(eco))
        .map(|(_, short)| short.to_string())
        .or_else(|| codes.first().map(|code| code.to_string()))
}

fn with_evidence(value: &str, evidence: Option<String>) -> String {
    match evidence {
        Some(code) if !code.is_empty() => format!("{value}|{code}"),
        _ => value.to_string(),
    }
}

fn comments<'v>(raw: &'v Value, kind: &'v str) -> impl Iterator<Item = &'v Value> + 'v {
    raw.get("comments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |comment| comment.get("commentType").and_then(Value::as_str) == Some(kind))
}

fn subcellular_locations(raw: &Value) -> Vec<String> {
    comments(raw, "SUBCELLULAR LOCATION")
        .filter_map(|comment| comment.get("subcellularLocations").and_then(Value::as_array))
        .flatten()
        .filter_map(|item| item.get("location"))
        .filter_map(|location| {
            let value = location.get("value").and_then(Value::as_str)?;
            Some(with_evidence(value, best_evidence(location.get("evidences"))))
        })
        .collect()
}

fn ec_numbers(raw: &Value) -> Vec<String> {
    let Some(description) = raw.get("proteinDescription") else {
        return Vec::new();
    };
    let alternatives = description
        .get("alternativeNames")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    let mut out: Vec<String> = Vec::new();
    for name in description.get("recommendedName").into_iter().chain(alternatives) {
        for ec in name
            .get("ecNumbers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(value) = ec.get("value").and_then(Value::as_str) {
                let entry = with_evidence(value, best_evidence(ec.get("evidences")));
                if !out.contains(&entry) {
                    out.push(entry);
                }
            }
        }
    }
    out
}

fn fragment_flag(raw: &Value) -> String {
    match str_at(raw, &["proteinDescription", "flag"]) {
        Some(flag) if flag.to_lowercase().contains("fragment") => "fragment".to_string(),
        _ => String::new(),
    }
}

fn gene_name(raw: &Value) -> Option<String> {
    raw.get("genes")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|gene| {
            gene.get("geneName")
                .and_then(|v| v.get("value"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

fn protein_name(raw: &Value) -> Option<String> {
    str_at(raw, &["proteinDescription", "recommendedName", "fullName", "value"]).or_else(|| {
        raw.get("proteinDescription")
            .and_then(|v| v.get("submissionNames"))
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(|v| str_at(v, &["fullName", "value"]))
    })
}

fn protein_existence(raw: &Value) -> String {
    let Some(value) = raw.get("proteinExistence").and_then(Value::as_str) else {
        return String::new();
    };
    match value.split_once(':') {
        Some((level, text)) if level.trim().chars().all(|c| c.is_ascii_digit()) => {
            text.trim().to_string()
        }
        _ => value.to_string(),
    }
}

fn protein_families(raw: &Value) -> String {
    let mut families = Vec::new();
    let mut evidence = None;
    for text in comments(raw, "SIMILARITY")
        .filter_map(|comment| comment.get("texts").and_then(Value::as_array))
        .flatten()
    {
        let Some(value) = text.get("value").and_then(Value::as_str) else {
            continue;
        };
        let family = value
            .trim()
            .trim_start_matches("Belongs to the ")
            .trim_end_matches('.')
            .to_string();
        if evidence.is_none() {
            evidence = best_evidence(text.get("evidences"));
        }
        families.push(family);
    }
    if families.is_empty() {
        return String::new();
    }
    with_evidence(&families.join(", "), evidence)
}

fn keywords(raw: &Value) -> Vec<String> {
    raw.get("keywords")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|keyword| {
            let id = keyword.get("id").and_then(Value::as_str)?;
            Some(match keyword.get("name").and_then(Value::as_str) {
                Some(name) => format!("{id} ({name})"),
                None => id.to_string(),
            })
        })
        .collect()
}

/// GO terms split by aspect into (biological process, molecular function,
/// cellular component), each as `X:term|CODE`.
fn go_terms(raw: &Value) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut bp = Vec::new();
    let mut mf = Vec::new();
    let mut cc = Vec::new();
    for xref in cross_references(raw, "GO") {
        let Some(term) = property(xref, "GoTerm") else {
            continue;
        };
        let evidence = property(xref, "GoEvidenceType")
            .and_then(|value| value.split(':').next().map(str::to_string))
            .filter(|code| !code.is_empty());
        let entry = with_evidence(&term, evidence);
        match term.split_once(':').map(|(aspect, _)| aspect) {
            Some("P") => bp.push(entry),
            Some("F") => mf.push(entry),
            Some("C") => cc.push(entry),
            _ => {}
        }
    }
    (bp, mf, cc)
}

fn cross_references<'v>(raw: &'v Value, database: &'v str) -> impl Iterator<Item = &'v Value> + 'v {
    raw.get("uniProtKBCrossReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |xref| xref.get("database").and_then(Value::as_str) == Some(database))
}

fn cross_reference_ids(raw: &Value, database: &str) -> Vec<String> {
    cross_references(raw, database)
        .filter_map(|xref| xref.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn property(xref: &Value, key: &str) -> Option<String> {
    xref.get("properties")
        .and_then(Value::as_array)?
        .iter()
        .find(|prop| prop.get("key").and_then(Value::as_str) == Some(key))
        .and_then(|prop| prop.get("value").and_then(Value::as_str))
        .map(str::to_string)
}
