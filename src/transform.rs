//! Presentation rules applied to merged annotations.
//!
//! Every rule is idempotent so rows read back from the cache can be run
//! through the transformer again.

use tracing::debug;

use crate::catalog;
use crate::record::AnnotationRecord;
use crate::reference::NameMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// `"5.0"` becomes `"5"`.
    IntegerScore,
    /// Keeps the first family of a `,` or `;` list and its evidence suffix.
    FirstFamily,
    /// `True`/`False` become `Swiss-Prot`/`TrEMBL`.
    ReviewStatus,
    /// Any non-empty value becomes `True`, empty becomes `False`.
    Presence,
    /// `fragment` becomes `yes`.
    Fragment,
    /// Drops `F:`, `P:` and `C:` aspect prefixes.
    GoAspect,
    /// Drops the `G3DSA:` prefix of CATH-Gene3D accessions and sorts them.
    CathPrefix,
    /// `True` only when Phobius reported a signal peptide.
    SignalPeptide,
}

const RULES: &[(&str, TransformKind)] = &[
    ("annotation_score", TransformKind::IntegerScore),
    ("protein_families", TransformKind::FirstFamily),
    ("reviewed", TransformKind::ReviewStatus),
    ("xref_pdb", TransformKind::Presence),
    ("fragment", TransformKind::Fragment),
    ("go_bp", TransformKind::GoAspect),
    ("go_mf", TransformKind::GoAspect),
    ("go_cc", TransformKind::GoAspect),
    ("cath", TransformKind::CathPrefix),
    ("signal_peptide", TransformKind::SignalPeptide),
];

/// Upper edges of the fixed length bins; the last bin is open.
const FIXED_LENGTH_EDGES: &[u64] = &[
    50, 100, 200, 400, 600, 800, 1000, 1200, 1400, 1600, 1800, 2000,
];
const QUANTILE_BINS: usize = 10;
pub const UNKNOWN_LENGTH: &str = "unknown";

pub fn rule_for(name: &str) -> Option<TransformKind> {
    RULES
        .iter()
        .find(|(annotation, _)| *annotation == name)
        .map(|(_, kind)| *kind)
}

impl TransformKind {
    pub fn apply(self, value: &str) -> String {
        match self {
            TransformKind::IntegerScore => {
                if value.is_empty() {
                    return String::new();
                }
                match value.trim().parse::<f64>() {
                    Ok(score) if score.is_finite() => format!("{}", score.trunc() as i64),
                    _ => value.to_string(),
                }
            }
            TransformKind::FirstFamily => first_family(value),
            TransformKind::ReviewStatus => match value {
                "True" => "Swiss-Prot".to_string(),
                "False" => "TrEMBL".to_string(),
                other => other.to_string(),
            },
            TransformKind::Presence => match value.trim() {
                "True" | "False" => value.trim().to_string(),
                "" => "False".to_string(),
                _ => "True".to_string(),
            },
            TransformKind::Fragment => {
                if value.trim().eq_ignore_ascii_case("fragment") {
                    "yes".to_string()
                } else {
                    value.to_string()
                }
            }
            TransformKind::GoAspect => map_entries(value, |term| {
                ["F:", "P:", "C:"]
                    .iter()
                    .find_map(|prefix| term.strip_prefix(prefix))
                    .unwrap_or(term)
                    .to_string()
            }),
            TransformKind::CathPrefix => {
                let mut entries: Vec<&str> = value
                    .split(';')
                    .map(|entry| entry.trim())
                    .filter(|entry| !entry.is_empty())
                    .map(|entry| entry.strip_prefix("G3DSA:").unwrap_or(entry))
                    .collect();
                entries.sort_unstable();
                entries.join(";")
            }
            TransformKind::SignalPeptide => match value.trim() {
                "True" => "True".to_string(),
                other if other.contains("SIGNAL_PEPTIDE") => "True".to_string(),
                _ => "False".to_string(),
            },
        }
    }
}

fn map_entries<F>(value: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    if value.is_empty() {
        return String::new();
    }
    value
        .split(';')
        .map(|entry| f(entry.trim()))
        .collect::<Vec<_>>()
        .join(";")
}

fn first_family(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let (main, evidence) = match value.rsplit_once('|') {
        Some((main, evidence)) => (main, evidence),
        None => (value, ""),
    };
    let first = main
        .split([',', ';'])
        .next()
        .unwrap_or(main)
        .trim();
    if evidence.is_empty() {
        first.to_string()
    } else {
        format!("{first}|{evidence}")
    }
}

/// Appends enzyme names to EC numbers, keeping evidence suffixes:
/// `2.7.11.1|EXP` becomes `2.7.11.1 (Name)|EXP`. Named entries and numbers
/// missing from `names` are left as they are.
pub fn name_ec_numbers(value: &str, names: &NameMap) -> String {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (number, evidence) = match entry.rsplit_once('|') {
                Some((number, evidence)) => (number, Some(evidence)),
                None => (entry, None),
            };
            let mut named = match names.get(number) {
                Some(name) if !name.is_empty() => format!("{number} ({name})"),
                _ => number.to_string(),
            };
            if let Some(evidence) = evidence.filter(|evidence| !evidence.is_empty()) {
                named.push('|');
                named.push_str(evidence);
            }
            named
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// True when some EC entry of the cell carries no name yet.
pub fn has_unnamed_ec(value: &str) -> bool {
    value
        .split(';')
        .map(|entry| entry.split('|').next().unwrap_or(entry).trim())
        .any(|number| !number.is_empty() && !number.contains(" ("))
}

/// Removes `|evidence` and `|score` suffixes from every entry of a cell.
pub fn strip_cell_scores(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    value
        .split(';')
        .map(|entry| entry.split('|').next().unwrap_or(entry))
        .collect::<Vec<_>>()
        .join(";")
}

pub struct AnnotationTransformer;

impl AnnotationTransformer {
    /// Adds length bins when `length` is present, then applies the rule
    /// table to every known annotation. Unknown names pass through.
    pub fn transform(records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
        let records = if records.iter().any(|r| r.annotations.contains_key("length")) {
            add_length_bins(records)
        } else {
            records
        };
        records
            .into_iter()
            .map(|mut record| {
                for (name, value) in record.annotations.iter_mut() {
                    if let Some(kind) = rule_for(name) {
                        *value = kind.apply(value);
                    }
                }
                record
            })
            .collect()
    }

    /// Names every EC number found in `names`.
    pub fn name_enzymes(records: Vec<AnnotationRecord>, names: &NameMap) -> Vec<AnnotationRecord> {
        records
            .into_iter()
            .map(|mut record| {
                if let Some(value) = record.annotations.get_mut("ec") {
                    *value = name_ec_numbers(value, names);
                }
                record
            })
            .collect()
    }

    /// Score stripping for output; the cache keeps full values.
    pub fn strip_scores(records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
        records
            .into_iter()
            .map(|mut record| {
                for (name, value) in record.annotations.iter_mut() {
                    if catalog::is_score_bearing(name) {
                        *value = strip_cell_scores(value);
                    }
                }
                record
            })
            .collect()
    }
}

fn parse_length(record: &AnnotationRecord) -> Option<u64> {
    let raw = record.get("length")?.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

pub fn fixed_length_bin(length: u64) -> String {
    let mut lower = 0u64;
    for edge in FIXED_LENGTH_EDGES {
        if length < *edge {
            return if lower == 0 {
                format!("<{edge}")
            } else {
                format!("{lower}-{edge}")
            };
        }
        lower = *edge;
    }
    format!("{lower}+")
}

/// Linear-interpolated percentile of sorted values, `q` in `0..=100`.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let position = q * last as f64 / 100.0;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let base = sorted[lo] as f64;
    base + (sorted[hi] as f64 - base) * (position - lo as f64)
}

/// Bin boundaries at every `100 / bins` percentile, consecutive duplicates
/// removed.
pub fn quantile_edges(lengths: &[u64], bins: usize) -> Vec<f64> {
    if lengths.is_empty() || bins == 0 {
        return Vec::new();
    }
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let mut edges: Vec<f64> = (0..=bins)
        .map(|step| percentile(&sorted, step as f64 * 100.0 / bins as f64))
        .collect();
    edges.dedup();
    edges
}

/// Label of the bin holding `length`. Bins exclude their upper edge
/// (`start-(end-1)`) except the last one; a single boundary labels every
/// protein with that length.
pub fn quantile_label(edges: &[f64], length: u64) -> String {
    match edges {
        [] => UNKNOWN_LENGTH.to_string(),
        [only] => format!("{}", *only as i64),
        _ => {
            let last_bin = edges.len() - 2;
            let above = edges[1..]
                .iter()
                .filter(|edge| **edge <= length as f64)
                .count();
            let index = above.min(last_bin);
            let start = edges[index] as i64;
            let end = edges[index + 1] as i64;
            if index == last_bin {
                format!("{start}-{end}")
            } else {
                format!("{start}-{}", end - 1)
            }
        }
    }
}

fn add_length_bins(records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
    let lengths: Vec<u64> = records.iter().filter_map(parse_length).collect();
    let edges = quantile_edges(&lengths, QUANTILE_BINS);
    debug!(proteins = lengths.len(), edges = edges.len(), "binning lengths");
    records
        .into_iter()
        .map(|mut record| {
            let (fixed, quantile) = match parse_length(&record) {
                Some(length) => (fixed_length_bin(length), quantile_label(&edges, length)),
                None => (UNKNOWN_LENGTH.to_string(), UNKNOWN_LENGTH.to_string()),
            };
            record.annotations.insert("length_fixed".to_string(), fixed);
            record.annotations.insert("length_quantile".to_string(), quantile);
            record
        })
        .collect()
}
