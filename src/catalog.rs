//! Registry of every annotation the pipeline knows, grouped by the source
//! that produces it.

use indexmap::IndexSet;

use crate::domain::Source;

/// Fields extracted from every UniProtKB entry, whatever was requested.
pub const UNIPROT_ANNOTATIONS: &[&str] = &[
    "accession",
    "annotation_score",
    "cc_subcellular_location",
    "ec",
    "fragment",
    "gene_name",
    "go_bp",
    "go_cc",
    "go_mf",
    "keyword",
    "length",
    "organism_id",
    "protein_existence",
    "protein_families",
    "protein_name",
    "reviewed",
    "sequence",
    "uniprot_kb_id",
    "xref_pdb",
];

pub const TAXONOMY_ANNOTATIONS: &[&str] = &[
    "root", "domain", "kingdom", "phylum", "class", "order", "family", "genus", "species",
];

/// InterPro annotation names with the member database label used by the
/// matches API.
pub const INTERPRO_LIBRARIES: &[(&str, &str)] = &[
    ("pfam", "pfam"),
    ("superfamily", "superfamily"),
    ("cath", "cath-gene3d"),
    ("signal_peptide", "phobius"),
    ("smart", "smart"),
    ("cdd", "cdd"),
    ("panther", "panther"),
    ("prosite", "prosite patterns"),
    ("prints", "prints"),
];

/// Derived from `length` after the merge.
pub const LENGTH_BINNING_ANNOTATIONS: &[&str] = &["length_fixed", "length_quantile"];

/// Appended to every request.
pub const ALWAYS_INCLUDED_ANNOTATIONS: &[&str] = &["gene_name", "protein_name", "uniprot_kb_id"];

/// Join keys placed at the head of every UniProt requirement.
pub const REQUIRED_UNIPROT_ANNOTATIONS: &[&str] = &["accession", "organism_id"];

/// Columns kept for joins and rebinning; only emitted when asked for by name.
pub const INTERNAL_ANNOTATIONS: &[&str] = &["accession", "organism_id", "sequence", "length"];

/// Columns whose entries may carry `|evidence` or `|score` suffixes.
pub const SCORE_BEARING_ANNOTATIONS: &[&str] = &[
    "ec",
    "cc_subcellular_location",
    "protein_families",
    "go_bp",
    "go_mf",
    "go_cc",
    "pfam",
    "superfamily",
    "cath",
    "signal_peptide",
    "smart",
    "cdd",
    "panther",
    "prosite",
    "prints",
];

const UNIPROT_USER_ANNOTATIONS: &[&str] = &[
    "annotation_score",
    "cc_subcellular_location",
    "ec",
    "fragment",
    "go_bp",
    "go_cc",
    "go_mf",
    "keyword",
    "protein_existence",
    "protein_families",
    "reviewed",
    "xref_pdb",
    "length_fixed",
    "length_quantile",
];

const DEFAULT_GROUP: &[&str] = &["ec", "keyword", "length_quantile", "protein_families", "reviewed"];

pub const GROUP_NAMES: &[&str] = &["default", "all", "uniprot", "interpro", "taxonomy"];

pub fn interpro_annotations() -> impl Iterator<Item = &'static str> {
    INTERPRO_LIBRARIES.iter().map(|(name, _)| *name)
}

pub fn interpro_library(name: &str) -> Option<&'static str> {
    INTERPRO_LIBRARIES
        .iter()
        .find(|(annotation, _)| *annotation == name)
        .map(|(_, library)| *library)
}

/// Members of a group, or `None` when `name` is not a group.
pub fn group_members(name: &str) -> Option<Vec<&'static str>> {
    let members = match name {
        "default" => DEFAULT_GROUP.to_vec(),
        "uniprot" => UNIPROT_USER_ANNOTATIONS.to_vec(),
        "interpro" => interpro_annotations().collect(),
        "taxonomy" => TAXONOMY_ANNOTATIONS.to_vec(),
        "all" => UNIPROT_USER_ANNOTATIONS
            .iter()
            .copied()
            .chain(TAXONOMY_ANNOTATIONS.iter().copied())
            .chain(interpro_annotations())
            .collect(),
        _ => return None,
    };
    Some(members)
}

/// Replaces group names by their members, dropping repeats.
pub fn expand_groups<I, S>(names: I) -> IndexSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut expanded = IndexSet::new();
    for name in names {
        let name = name.as_ref().trim();
        match group_members(name) {
            Some(members) => {
                expanded.extend(members.into_iter().map(str::to_string));
            }
            None => {
                expanded.insert(name.to_string());
            }
        }
    }
    expanded
}

pub fn source_of(name: &str) -> Option<Source> {
    if UNIPROT_ANNOTATIONS.contains(&name) {
        Some(Source::Uniprot)
    } else if TAXONOMY_ANNOTATIONS.contains(&name) {
        Some(Source::Taxonomy)
    } else if interpro_library(name).is_some() {
        Some(Source::Interpro)
    } else {
        None
    }
}

pub fn is_known(name: &str) -> bool {
    source_of(name).is_some() || LENGTH_BINNING_ANNOTATIONS.contains(&name)
}

pub fn is_internal(name: &str) -> bool {
    INTERNAL_ANNOTATIONS.contains(&name)
}

pub fn is_score_bearing(name: &str) -> bool {
    SCORE_BEARING_ANNOTATIONS.contains(&name)
}

/// Every accepted annotation name, in catalog order.
pub fn valid_annotations() -> Vec<String> {
    UNIPROT_ANNOTATIONS
        .iter()
        .copied()
        .chain(TAXONOMY_ANNOTATIONS.iter().copied())
        .chain(interpro_annotations())
        .chain(LENGTH_BINNING_ANNOTATIONS.iter().copied())
        .map(str::to_string)
        .collect()
}
