use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9](?:[A-Z][A-Z0-9]{2}[0-9]){1,2})(?:-[0-9]+)?$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Uniprot,
    Taxonomy,
    Interpro,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Uniprot, Source::Taxonomy, Source::Interpro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Uniprot => "uniprot",
            Source::Taxonomy => "taxonomy",
            Source::Interpro => "interpro",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookup key for the UniProt and InterPro services.
///
/// Built from a raw identifier by [`Accession::normalize`]; identifiers that
/// are not in a recognised composite form are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn normalize(raw: &str) -> Self {
        Self(normalize_identifier(raw).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reduces `db|accession|name` headers to the bare accession.
///
/// `sp|`/`tr|` prefixes always select the second field; other piped forms do
/// so only when the second field looks like a UniProt accession.
pub fn normalize_identifier(raw: &str) -> &str {
    let trimmed = raw.trim();
    let mut parts = trimmed.split('|');
    let (Some(db), Some(accession)) = (parts.next(), parts.next()) else {
        return trimmed;
    };
    let db = db.to_ascii_lowercase();
    if (db == "sp" || db == "tr" || is_uniprot_accession(accession)) && !accession.is_empty() {
        return accession;
    }
    trimmed
}

pub fn is_uniprot_accession(value: &str) -> bool {
    ACCESSION_RE.is_match(value)
}

/// NCBI taxonomy id, the join key between UniProt records and lineage data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganismId(u32);

impl OrganismId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for OrganismId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrganismId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        trimmed
            .parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or_else(|| KiraError::InvalidOrganismId(value.to_string()))
    }
}

/// Upper-case hex MD5 of a protein sequence, as addressed by InterPro.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceChecksum(String);

impl SequenceChecksum {
    pub fn from_sequence(sequence: &str) -> Self {
        let digest = md5::compute(sequence.as_bytes());
        Self(format!("{digest:x}").to_uppercase())
    }

    pub fn from_hex(value: &str) -> Self {
        Self(value.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
