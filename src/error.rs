use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Source;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("annotation {name} is not a valid annotation. Valid annotations are: {}", valid.join(", "))]
    #[diagnostic(help("use a group name (default, all, uniprot, interpro, taxonomy) or one of the listed names"))]
    InvalidAnnotation { name: String, valid: Vec<String> },

    #[error("invalid organism id: {0}")]
    InvalidOrganismId(String),

    #[error("{service} unavailable: {message}")]
    SourceUnavailable { service: Source, message: String },

    #[error("missing config file kira-annot.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no protein identifiers given")]
    #[diagnostic(help("pass identifiers as arguments, with --ids-file, or in kira-annot.json"))]
    NoIdentifiers,

    #[error("failed to read identifier file {path}: {message}")]
    IdentifierFile { path: PathBuf, message: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("InterPro request failed: {0}")]
    InterproHttp(String),

    #[error("InterPro returned status {status}: {message}")]
    InterproStatus { status: u16, message: String },

    #[error("taxonomy download failed: {0}")]
    TaxonomyHttp(String),

    #[error("taxonomy download returned status {status}: {message}")]
    TaxonomyStatus { status: u16, message: String },

    #[error("taxonomy database unavailable: {0}")]
    TaxonomyDatabase(String),

    #[error("reference download failed: {0}")]
    ReferenceHttp(String),

    #[error("reference download returned status {status}: {message}")]
    ReferenceStatus { status: u16, message: String },

    #[error("invalid reference data: {0}")]
    ReferenceData(String),

    #[error("failed to read annotation table {path}: {message}")]
    TableRead { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
