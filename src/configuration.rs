use indexmap::IndexSet;
use tracing::debug;

use crate::catalog;
use crate::domain::Source;
use crate::error::KiraError;
use crate::record::SourceRequirement;

/// Validated annotation request: the columns the caller will see and the
/// fields each source has to deliver for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationConfiguration {
    user_annotations: IndexSet<String>,
    requirement: SourceRequirement,
}

impl AnnotationConfiguration {
    /// `None` selects the `default` group.
    pub fn configure<I, S>(requested: Option<I>) -> Result<Self, KiraError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expanded = requested
            .map(catalog::expand_groups)
            .unwrap_or_default();
        expanded.retain(|name| !name.is_empty());
        if expanded.is_empty() {
            expanded = catalog::expand_groups(["default"]);
        }

        for name in &expanded {
            if !catalog::is_known(name) {
                return Err(KiraError::InvalidAnnotation {
                    name: name.clone(),
                    valid: catalog::valid_annotations(),
                });
            }
        }

        let requirement = split_by_source(&expanded);

        let mut user_annotations = expanded;
        user_annotations.extend(
            catalog::ALWAYS_INCLUDED_ANNOTATIONS
                .iter()
                .map(|name| name.to_string()),
        );

        debug!(
            annotations = user_annotations.len(),
            uniprot = requirement.uniprot.len(),
            taxonomy = requirement.taxonomy.len(),
            interpro = requirement.interpro.len(),
            "configured annotation request"
        );

        Ok(Self {
            user_annotations,
            requirement,
        })
    }

    /// Output columns in request order, always-included names last.
    pub fn user_annotations(&self) -> &IndexSet<String> {
        &self.user_annotations
    }

    pub fn requirement(&self) -> &SourceRequirement {
        &self.requirement
    }

    pub fn wants(&self, source: Source) -> bool {
        !self.requirement.for_source(source).is_empty()
    }
}

fn split_by_source(expanded: &IndexSet<String>) -> SourceRequirement {
    let pick = |source: Source| -> IndexSet<String> {
        expanded
            .iter()
            .filter(|name| catalog::source_of(name) == Some(source))
            .cloned()
            .collect()
    };

    let taxonomy = pick(Source::Taxonomy);
    let interpro = pick(Source::Interpro);

    let mut uniprot: IndexSet<String> = catalog::REQUIRED_UNIPROT_ANNOTATIONS
        .iter()
        .map(|name| name.to_string())
        .collect();
    uniprot.extend(pick(Source::Uniprot));

    let wants_length = expanded
        .iter()
        .any(|name| catalog::LENGTH_BINNING_ANNOTATIONS.contains(&name.as_str()));
    if wants_length {
        uniprot.insert("length".to_string());
    }
    if !interpro.is_empty() {
        uniprot.insert("sequence".to_string());
    }

    SourceRequirement {
        uniprot,
        taxonomy,
        interpro,
    }
}
