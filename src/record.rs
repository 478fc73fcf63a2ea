use std::collections::BTreeMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::domain::{OrganismId, SequenceChecksum, Source};

pub type Annotations = BTreeMap<String, String>;

/// Annotations for one requested protein. All values are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub identifier: String,
    pub annotations: Annotations,
}

impl AnnotationRecord {
    pub fn new(identifier: impl Into<String>, annotations: Annotations) -> Self {
        Self {
            identifier: identifier.into(),
            annotations,
        }
    }

    /// Record with every name in `names` set to the empty string.
    pub fn empty<'a>(identifier: impl Into<String>, names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(identifier, empty_annotations(names))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.annotations.get(name).map(String::as_str)
    }

    /// New record with `extra` laid over the current annotations, see
    /// [`overlay_annotations`].
    pub fn with_annotations<'a>(
        &self,
        extra: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut annotations = self.annotations.clone();
        overlay_annotations(&mut annotations, extra);
        Self::new(self.identifier.clone(), annotations)
    }

    pub fn organism_id(&self) -> Option<OrganismId> {
        self.get("organism_id").and_then(|value| value.parse().ok())
    }
}

/// Lineage annotations for one organism, shared by every protein from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    pub organism_id: OrganismId,
    pub annotations: Annotations,
}

/// InterPro matches re-attached to a protein through its sequence checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMatchRecord {
    pub identifier: String,
    pub checksum: Option<SequenceChecksum>,
    pub annotations: Annotations,
}

/// Annotation names each source has to produce after dependency expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRequirement {
    pub uniprot: IndexSet<String>,
    pub taxonomy: IndexSet<String>,
    pub interpro: IndexSet<String>,
}

impl SourceRequirement {
    pub fn for_source(&self, source: Source) -> &IndexSet<String> {
        match source {
            Source::Uniprot => &self.uniprot,
            Source::Taxonomy => &self.taxonomy,
            Source::Interpro => &self.interpro,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.uniprot
            .iter()
            .chain(self.taxonomy.iter())
            .chain(self.interpro.iter())
    }
}

/// Which sources must be queried in this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchPlan {
    pub uniprot: bool,
    pub taxonomy: bool,
    pub interpro: bool,
}

impl FetchPlan {
    pub fn everything() -> Self {
        Self {
            uniprot: true,
            taxonomy: true,
            interpro: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.uniprot || self.taxonomy || self.interpro)
    }

    pub fn includes(&self, source: Source) -> bool {
        match source {
            Source::Uniprot => self.uniprot,
            Source::Taxonomy => self.taxonomy,
            Source::Interpro => self.interpro,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|source| self.includes(*source))
            .collect()
    }
}

/// Fresh values win, but an empty fresh value never erases a known cell.
pub fn overlay_annotations<'a>(
    target: &mut Annotations,
    fresh: impl IntoIterator<Item = (&'a String, &'a String)>,
) {
    for (name, value) in fresh {
        let known = target.get(name).is_some_and(|current| !current.is_empty());
        if !value.is_empty() || !known {
            target.insert(name.clone(), value.clone());
        }
    }
}

pub fn empty_annotations<'a>(names: impl IntoIterator<Item = &'a str>) -> Annotations {
    names
        .into_iter()
        .map(|name| (name.to_string(), String::new()))
        .collect()
}
