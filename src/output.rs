use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::app::{AnnotateResult, ClearResult, ProgressEvent, ProgressSink};
use crate::error::KiraError;
use crate::record::{AnnotationRecord, FetchPlan};
use crate::table::{AnnotationTable, Delimiter, IDENTIFIER_COLUMN};

#[derive(Serialize)]
struct AnnotationsJson<'a> {
    plan: Option<&'a FetchPlan>,
    columns: Vec<&'a str>,
    rows: Vec<AnnotationRecord>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_annotations(result: &AnnotateResult) -> io::Result<()> {
        let columns = std::iter::once(IDENTIFIER_COLUMN)
            .chain(result.table.columns())
            .collect();
        Self::print_json(&AnnotationsJson {
            plan: result.plan.as_ref(),
            columns,
            rows: result.table.to_records(),
        })
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

/// Writes `table` to `path`, tab-separated for `.tsv`/`.tab`, comma otherwise.
pub fn write_table(table: &AnnotationTable, path: &Path) -> Result<(), KiraError> {
    let delimiter = Delimiter::for_path(path).unwrap_or(Delimiter::Comma);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    let file = fs::File::create(path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    table.write_delimited(io::BufWriter::new(file), delimiter)
}
