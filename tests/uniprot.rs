use std::fs;
use std::sync::Mutex;

use serde_json::{Value, json};

use kira_annotations::domain::Accession;
use kira_annotations::error::KiraError;
use kira_annotations::uniprot::{UniprotClient, UniprotRetriever, extract_annotations};

fn fixture() -> Value {
    let raw = fs::read_to_string("tests/fixtures/uniprot_P69905.json").unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn extract_hemoglobin_alpha() {
    let annotations = extract_annotations(&fixture());

    assert_eq!(annotations["accession"], "P69905");
    assert_eq!(annotations["uniprot_kb_id"], "HBA_HUMAN");
    assert_eq!(annotations["annotation_score"], "5.0");
    assert_eq!(annotations["reviewed"], "True");
    assert_eq!(annotations["organism_id"], "9606");
    assert_eq!(annotations["length"], "142");
    assert!(annotations["sequence"].starts_with("MVLSPADKTN"));
    assert_eq!(annotations["protein_name"], "Hemoglobin subunit alpha");
    assert_eq!(annotations["gene_name"], "HBA1");
    assert_eq!(annotations["protein_existence"], "Evidence at protein level");
    assert_eq!(annotations["protein_families"], "globin family|ISM");
    assert_eq!(annotations["cc_subcellular_location"], "Cytoplasm|IC");
    assert_eq!(
        annotations["keyword"],
        "KW-0002 (3D-structure);KW-0349 (Heme);KW-0561 (Oxygen transport)"
    );
    assert_eq!(annotations["go_cc"], "C:blood microparticle|HDA");
    assert_eq!(annotations["go_mf"], "F:oxygen binding|IDA");
    assert_eq!(annotations["go_bp"], "P:oxygen transport|IDA");
    assert_eq!(annotations["xref_pdb"], "1A00;1A3N");
    assert_eq!(annotations["fragment"], "");
    assert_eq!(annotations["ec"], "");
}

struct SecondaryOnly {
    entry: Value,
    searched: Mutex<Vec<String>>,
}

impl UniprotClient for SecondaryOnly {
    fn fetch_many(&self, _accessions: &[Accession]) -> Result<Vec<Value>, KiraError> {
        Ok(Vec::new())
    }

    fn search(&self, accession: &Accession) -> Result<Option<Value>, KiraError> {
        self.searched.lock().unwrap().push(accession.to_string());
        if accession.as_str() == "P01922" {
            return Ok(Some(self.entry.clone()));
        }
        Ok(None)
    }
}

#[test]
fn keys_dropped_by_bulk_lookup_are_searched() {
    let client = SecondaryOnly {
        entry: fixture(),
        searched: Mutex::new(Vec::new()),
    };
    let retriever = UniprotRetriever::new(&client, 10, 1);
    let keys = vec![Accession::normalize("P01922"), Accession::normalize("A0A000")];

    let resolved = retriever.retrieve(&keys);
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[&keys[0]]["accession"], "P69905");
    assert_eq!(resolved[&keys[1]]["accession"], "");
    assert_eq!(client.searched.lock().unwrap().len(), 2);
}

struct FailingSecondBatch;

impl UniprotClient for FailingSecondBatch {
    fn fetch_many(&self, accessions: &[Accession]) -> Result<Vec<Value>, KiraError> {
        if accessions.iter().any(|acc| acc.as_str() == "P68871") {
            return Err(KiraError::UniprotStatus {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(accessions
            .iter()
            .map(|acc| json!({"primaryAccession": acc.as_str(), "organism": {"taxonId": 9606}}))
            .collect())
    }

    fn search(&self, _accession: &Accession) -> Result<Option<Value>, KiraError> {
        Ok(None)
    }
}

#[test]
fn failed_batch_only_blanks_its_own_keys() {
    let keys: Vec<Accession> = ["P69905", "P01942", "P68871", "P02100"]
        .iter()
        .map(|id| Accession::normalize(id))
        .collect();
    let retriever = UniprotRetriever::new(&FailingSecondBatch, 2, 2);

    let resolved = retriever.retrieve(&keys);
    assert_eq!(resolved.len(), 4);
    assert_eq!(resolved[&keys[0]]["organism_id"], "9606");
    assert_eq!(resolved[&keys[1]]["organism_id"], "9606");
    assert_eq!(resolved[&keys[2]]["organism_id"], "");
    assert_eq!(resolved[&keys[3]]["organism_id"], "");
}
