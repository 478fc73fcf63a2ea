use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use crate::error::KiraError;
use crate::http::DEFAULT_TIMEOUT;
use crate::reference;
use crate::taxonomy;

pub const CONFIG_FILE: &str = "kira-annot.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub annotations: Option<AnnotationsEntry>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub taxonomy_max_age_days: Option<u64>,
    #[serde(default)]
    pub reference_max_age_days: Option<u64>,
    #[serde(default)]
    pub keep_intermediate: Option<bool>,
    #[serde(default)]
    pub force_refetch: Option<bool>,
    #[serde(default)]
    pub no_scores: Option<bool>,
}

/// Either a list of names or a single comma-separated string, which may also
/// be the path of a precomputed table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnnotationsEntry {
    List(Vec<String>),
    Single(String),
}

impl AnnotationsEntry {
    pub fn into_request(self) -> AnnotationRequest {
        match self {
            AnnotationsEntry::List(names) => AnnotationRequest::Names(names),
            AnnotationsEntry::Single(value) => AnnotationRequest::parse(&value),
        }
    }
}

/// What the caller asked to annotate with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationRequest {
    Names(Vec<String>),
    Table(PathBuf),
}

impl AnnotationRequest {
    /// An existing `.csv`/`.tsv` path selects a table, anything else is a
    /// comma-separated name list.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        let path = PathBuf::from(trimmed);
        let is_table = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "csv" | "tsv"));
        if is_table && path.is_file() {
            return AnnotationRequest::Table(path);
        }
        AnnotationRequest::Names(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub identifiers: Vec<String>,
    pub annotations: Option<AnnotationRequest>,
    pub settings: Settings,
}

/// Run-time knobs shared by the CLI and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub batch_size: usize,
    pub workers: usize,
    pub timeout: Duration,
    pub taxonomy_max_age: Duration,
    pub reference_max_age: Duration,
    pub keep_intermediate: bool,
    pub force_refetch: bool,
    pub no_scores: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            taxonomy_max_age: taxonomy::DEFAULT_MAX_AGE,
            reference_max_age: reference::DEFAULT_MAX_AGE,
            keep_intermediate: true,
            force_refetch: false,
            no_scores: false,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `kira-annot.json` from the working directory, or `path` when
    /// given. A missing default file yields [`KiraError::MissingConfig`].
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let defaults = Settings::default();
        let settings = Settings {
            batch_size: positive(config.batch_size, "batch_size")?.unwrap_or(defaults.batch_size),
            workers: positive(config.workers, "workers")?.unwrap_or(defaults.workers),
            timeout: positive(config.timeout_secs, "timeout_secs")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            taxonomy_max_age: config
                .taxonomy_max_age_days
                .map(days)
                .unwrap_or(defaults.taxonomy_max_age),
            reference_max_age: config
                .reference_max_age_days
                .map(days)
                .unwrap_or(defaults.reference_max_age),
            keep_intermediate: config.keep_intermediate.unwrap_or(defaults.keep_intermediate),
            force_refetch: config.force_refetch.unwrap_or(defaults.force_refetch),
            no_scores: config.no_scores.unwrap_or(defaults.no_scores),
        };

        let identifiers = config
            .identifiers
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        Ok(ResolvedConfig {
            schema_version,
            identifiers,
            annotations: config.annotations.map(AnnotationsEntry::into_request),
            settings,
        })
    }
}

/// Identifiers from a plain list (one per line, `#` comments) or from the
/// headers of a FASTA file, where the first word after `>` is the identifier.
pub fn read_identifier_file(path: &Path) -> Result<Vec<String>, KiraError> {
    let content = fs::read_to_string(path).map_err(|err| KiraError::IdentifierFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let is_fasta = content.trim_start().starts_with('>');
    let identifiers = content
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            if is_fasta {
                line.strip_prefix('>')?.split_whitespace().next()
            } else if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some(line)
            }
        })
        .map(str::to_string)
        .collect();
    Ok(identifiers)
}

fn positive<T>(value: Option<T>, field: &str) -> Result<Option<T>, KiraError>
where
    T: PartialEq + From<u8>,
{
    match value {
        Some(value) if value == T::from(0) => {
            Err(KiraError::ConfigParse(format!("{field} must be at least 1")))
        }
        other => Ok(other),
    }
}

fn days(days: u64) -> Duration {
    Duration::from_secs(days * 24 * 60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert!(resolved.identifiers.is_empty());
        assert!(resolved.annotations.is_none());
        assert_eq!(resolved.settings, Settings::default());
    }

    #[test]
    fn fasta_headers_give_identifiers() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("proteins.fasta");
        fs::write(
            &path,
            ">sp|P69905|HBA_HUMAN Hemoglobin subunit alpha\nMVLSPADKTN\n>P68871\nMVHLTPEEK\n",
        )
        .unwrap();
        assert_eq!(
            read_identifier_file(&path).unwrap(),
            vec!["sp|P69905|HBA_HUMAN", "P68871"]
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            timeout_secs: Some(0),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert!(matches!(err, KiraError::ConfigParse(ref message) if message.contains("timeout_secs")));
    }

    #[test]
    fn single_string_splits_on_commas() {
        assert_eq!(
            AnnotationRequest::parse("reviewed, kingdom,,pfam"),
            AnnotationRequest::Names(vec![
                "reviewed".to_string(),
                "kingdom".to_string(),
                "pfam".to_string()
            ])
        );
    }
}
