//! Reference name tables: ExPASy enzyme names for EC numbers and InterPro
//! entry names for member-database signatures.
//!
//! Both tables are downloaded once, kept as JSON under the cache root and
//! refreshed when older than the configured age. A failed refresh falls back
//! to the stale copy.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::blocking::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::KiraError;
use crate::http::{handle_status, send_with_retries};
use crate::store::Store;

pub const ENZYME_URL: &str = "https://ftp.expasy.org/databases/enzyme/enzyme.dat";
pub const INTERPRO_XML_URL: &str =
    "https://ftp.ebi.ac.uk/pub/databases/interpro/current_release/interpro.xml.gz";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const ENZYME_TABLE: &str = "enzyme_names";
const ENTRY_TABLE: &str = "member_db_names";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Accession or number to human-readable name.
pub type NameMap = BTreeMap<String, String>;

/// Entry names per member database, keyed by the InterPro XML `db` value.
pub type EntryNames = BTreeMap<String, NameMap>;

/// Annotations whose signature names the matches API leaves empty, with the
/// member database that names them.
const NAMED_DATABASES: &[(&str, &str)] = &[
    ("cath", "CATHGENE3D"),
    ("superfamily", "SSF"),
    ("panther", "PANTHER"),
];

pub fn member_database(annotation: &str) -> Option<&'static str> {
    NAMED_DATABASES
        .iter()
        .find(|(name, _)| *name == annotation)
        .map(|(_, db)| *db)
}

/// Source of reference names.
pub trait ReferenceNames: Send + Sync {
    /// EC number to accepted enzyme name.
    fn enzyme_names(&self) -> Result<NameMap, KiraError>;

    /// Signature accession to entry name for every database in
    /// [`member_database`].
    fn entry_names(&self) -> Result<EntryNames, KiraError>;
}

/// Name tables downloaded on demand and kept under the cache root.
pub struct ReferenceCache {
    dir: Utf8PathBuf,
    client: Client,
    max_age: Duration,
    enzyme_url: String,
    interpro_url: String,
}

impl ReferenceCache {
    pub fn new(store: &Store, client: Client, max_age: Duration) -> Self {
        Self {
            dir: store.reference_dir(),
            client,
            max_age,
            enzyme_url: ENZYME_URL.to_string(),
            interpro_url: INTERPRO_XML_URL.to_string(),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> Utf8PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    fn timestamp_path(&self, table: &str) -> Utf8PathBuf {
        self.dir.join(format!("{table}.timestamp"))
    }

    pub fn downloaded_at(&self, table: &str) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(self.timestamp_path(table).as_std_path()).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|stamp| stamp.with_timezone(&Utc))
    }

    pub fn is_fresh(&self, table: &str) -> bool {
        if !self.table_path(table).as_std_path().exists() {
            return false;
        }
        let Some(stamp) = self.downloaded_at(table) else {
            return false;
        };
        let age = Utc::now().signed_duration_since(stamp);
        age.to_std().map(|age| age < self.max_age).unwrap_or(true)
    }

    fn read_table<T: DeserializeOwned>(&self, table: &str) -> Result<T, KiraError> {
        let path = self.table_path(table);
        let content = fs::read(path.as_std_path())
            .map_err(|err| KiraError::ReferenceData(format!("{path}: {err}")))?;
        serde_json::from_slice(&content)
            .map_err(|err| KiraError::ReferenceData(format!("{path}: {err}")))
    }

    fn write_table<T: Serialize>(&self, table: &str, value: &T) -> Result<(), KiraError> {
        let content = serde_json::to_vec(value)
            .map_err(|err| KiraError::ReferenceData(err.to_string()))?;
        Store::write_bytes_atomic(&self.table_path(table), &content)?;
        let stamp = Utc::now().to_rfc3339();
        Store::write_bytes_atomic(&self.timestamp_path(table), stamp.as_bytes())
    }

    /// Fresh cached table, else a new download, else the stale copy.
    fn cached<T, F>(&self, table: &str, download: F) -> Result<T, KiraError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, KiraError>,
    {
        if self.is_fresh(table) {
            match self.read_table(table) {
                Ok(value) => {
                    debug!(table, "reference table is fresh");
                    return Ok(value);
                }
                Err(err) => warn!(error = %err, table, "unreadable reference table, downloading"),
            }
        }
        match download() {
            Ok(value) => {
                if let Err(err) = self.write_table(table, &value) {
                    warn!(error = %err, table, "failed to cache reference table");
                }
                Ok(value)
            }
            Err(err) => match self.read_table(table) {
                Ok(value) => {
                    warn!(error = %err, table, "reference download failed, using the stale copy");
                    Ok(value)
                }
                Err(_) => Err(err),
            },
        }
    }

    fn download_enzymes(&self) -> Result<NameMap, KiraError> {
        info!(url = %self.enzyme_url, "downloading enzyme names");
        let response = send_with_retries(
            || self.client.get(&self.enzyme_url).timeout(DOWNLOAD_TIMEOUT),
            KiraError::ReferenceHttp,
        )?;
        let response = handle_status(response, |status, message| KiraError::ReferenceStatus {
            status,
            message,
        })?;
        let text = response
            .text()
            .map_err(|err| KiraError::ReferenceHttp(err.to_string()))?;
        let names = parse_enzyme_dat(&text);
        info!(entries = names.len(), "parsed enzyme names");
        Ok(names)
    }

    fn download_entries(&self) -> Result<EntryNames, KiraError> {
        info!(url = %self.interpro_url, "downloading InterPro entry names");
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut scratch = tempfile::Builder::new()
            .prefix("kira-annot-interpro")
            .suffix(".xml.gz")
            .tempfile_in(self.dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let response = send_with_retries(
            || self.client.get(&self.interpro_url).timeout(DOWNLOAD_TIMEOUT),
            KiraError::ReferenceHttp,
        )?;
        let mut response = handle_status(response, |status, message| KiraError::ReferenceStatus {
            status,
            message,
        })?;
        response
            .copy_to(scratch.as_file_mut())
            .map_err(|err| KiraError::ReferenceHttp(err.to_string()))?;

        let file = fs::File::open(scratch.path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let names = parse_interpro_xml(BufReader::new(MultiGzDecoder::new(file)))?;
        info!(
            entries = names.values().map(NameMap::len).sum::<usize>(),
            "parsed InterPro entry names"
        );
        Ok(names)
    }
}

impl ReferenceNames for ReferenceCache {
    fn enzyme_names(&self) -> Result<NameMap, KiraError> {
        self.cached(ENZYME_TABLE, || self.download_enzymes())
    }

    fn entry_names(&self) -> Result<EntryNames, KiraError> {
        self.cached(ENTRY_TABLE, || self.download_entries())
    }
}

/// `ID`/`DE` pairs of the ExPASy ENZYME flat file. Continued `DE` lines are
/// joined and the trailing period dropped.
pub fn parse_enzyme_dat(text: &str) -> NameMap {
    let mut names = NameMap::new();
    let mut current: Option<String> = None;
    let mut description: Vec<&str> = Vec::new();
    for line in text.lines() {
        if let Some(id) = line.strip_prefix("ID   ") {
            current = Some(id.trim().to_string());
            description.clear();
        } else if let Some(part) = line.strip_prefix("DE   ") {
            description.push(part.trim());
        } else if line.starts_with("//") {
            if let Some(id) = current.take() {
                if !description.is_empty() {
                    let joined = description.join(" ");
                    let name = joined.strip_suffix('.').unwrap_or(&joined);
                    names.insert(id, name.to_string());
                }
            }
            description.clear();
        }
    }
    names
}

/// Member-database names from `interpro.xml`. A `db_xref` keeps its own
/// `name` attribute when present, otherwise the enclosing entry name.
pub fn parse_interpro_xml<R: BufRead>(input: R) -> Result<EntryNames, KiraError> {
    let mut names: EntryNames = NAMED_DATABASES
        .iter()
        .map(|(_, db)| (db.to_string(), NameMap::new()))
        .collect();

    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut entry_depth: Option<usize> = None;
    let mut in_entry_name = false;
    let mut entry_name = String::new();
    let mut xrefs: Vec<(String, String, String)> = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| KiraError::ReferenceData(err.to_string()))?;
        match event {
            Event::Start(element) => {
                depth += 1;
                match element.name().as_ref() {
                    b"interpro" => {
                        entry_depth = Some(depth);
                        entry_name.clear();
                        xrefs.clear();
                    }
                    b"name" if entry_depth == Some(depth - 1) => in_entry_name = true,
                    b"db_xref" if entry_depth.is_some() => {
                        if let Some(xref) = member_xref(&element)? {
                            xrefs.push(xref);
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(element) => {
                if entry_depth.is_some() && element.name().as_ref() == b"db_xref" {
                    if let Some(xref) = member_xref(&element)? {
                        xrefs.push(xref);
                    }
                }
            }
            Event::Text(text) if in_entry_name => {
                let text = text
                    .unescape()
                    .map_err(|err| KiraError::ReferenceData(err.to_string()))?;
                entry_name.push_str(&text);
            }
            Event::End(element) => {
                match element.name().as_ref() {
                    b"name" => in_entry_name = false,
                    b"interpro" if entry_depth == Some(depth) => {
                        let fallback = entry_name.trim();
                        for (db, key, own) in xrefs.drain(..) {
                            let name = if own.is_empty() { fallback } else { own.as_str() };
                            if !name.is_empty() {
                                names.entry(db).or_default().insert(key, name.to_string());
                            }
                        }
                        entry_depth = None;
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// `(db, dbkey, name)` of a cross reference into one of the named databases.
fn member_xref(element: &BytesStart) -> Result<Option<(String, String, String)>, KiraError> {
    let mut db = String::new();
    let mut key = String::new();
    let mut name = String::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|err| KiraError::ReferenceData(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| KiraError::ReferenceData(err.to_string()))?;
        match attr.key.as_ref() {
            b"db" => db = value.into_owned(),
            b"dbkey" => key = value.into_owned(),
            b"name" => name = value.trim().to_string(),
            _ => {}
        }
    }
    let wanted = NAMED_DATABASES.iter().any(|(_, named)| *named == db);
    if !wanted || key.is_empty() {
        return Ok(None);
    }
    Ok(Some((db, key, name)))
}
