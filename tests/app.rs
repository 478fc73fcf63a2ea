use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use kira_annotations::app::{AnnotateResult, App};
use kira_annotations::config::{AnnotationRequest, Settings};
use kira_annotations::domain::{Accession, OrganismId, SequenceChecksum};
use kira_annotations::error::KiraError;
use kira_annotations::interpro::{InterproClient, MatchResult};
use kira_annotations::output::JsonOutput;
use kira_annotations::record::FetchPlan;
use kira_annotations::reference::{EntryNames, NameMap, ReferenceNames};
use kira_annotations::store::Store;
use kira_annotations::taxonomy::{RankMap, TaxonomyLookup};
use kira_annotations::uniprot::UniprotClient;

const HBA: &str = "MVLSPADKTNVKAAWGKVGAHAGEYGAEALERMFLSFPTTKTYFPHFDLSHGSAQVKGHGKKVADALTNAVAHV";
const HBB: &str = "MVHLTPEEKSAVTALWGKVNVDEVGGEALGRLLVVYPWTQRFFESFGDLSTPDAVMGNPKVKAHGKKVLGAFSDGL";

#[derive(Clone, Default)]
struct MockUniprot {
    entries: HashMap<String, Value>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl UniprotClient for MockUniprot {
    fn fetch_many(&self, accessions: &[Accession]) -> Result<Vec<Value>, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KiraError::UniprotHttp("connection refused".to_string()));
        }
        Ok(accessions
            .iter()
            .filter_map(|acc| self.entries.get(acc.as_str()).cloned())
            .collect())
    }

    fn search(&self, _accession: &Accession) -> Result<Option<Value>, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[derive(Clone, Default)]
struct MockTaxonomy {
    lineages: HashMap<u32, RankMap>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl TaxonomyLookup for MockTaxonomy {
    fn ranks(&self, organism_id: OrganismId) -> Result<Option<RankMap>, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KiraError::TaxonomyDatabase("dump missing".to_string()));
        }
        Ok(self.lineages.get(&organism_id.get()).cloned())
    }

    fn refresh(&self, _max_age: Duration) -> Result<(), KiraError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MockInterpro {
    results: HashMap<String, Value>,
    fail: bool,
    calls: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<String>>>,
}

impl InterproClient for MockInterpro {
    fn matches(&self, checksums: &[SequenceChecksum]) -> Result<Vec<MatchResult>, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .unwrap()
            .extend(checksums.iter().map(|c| c.as_str().to_string()));
        if self.fail {
            return Err(KiraError::InterproStatus {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(checksums
            .iter()
            .map(|checksum| {
                let value = self
                    .results
                    .get(checksum.as_str())
                    .cloned()
                    .unwrap_or_else(|| json!({"md5": checksum.as_str(), "found": false, "matches": []}));
                serde_json::from_value(value).unwrap()
            })
            .collect())
    }
}

#[derive(Clone, Default)]
struct MockReference {
    enzymes: NameMap,
    entries: EntryNames,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl ReferenceNames for MockReference {
    fn enzyme_names(&self) -> Result<NameMap, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KiraError::ReferenceHttp("offline".to_string()));
        }
        Ok(self.enzymes.clone())
    }

    fn entry_names(&self) -> Result<EntryNames, KiraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KiraError::ReferenceHttp("offline".to_string()));
        }
        Ok(self.entries.clone())
    }
}

fn entry(accession: &str, taxon: u32, sequence: &str) -> Value {
    json!({
        "primaryAccession": accession,
        "uniProtkbId": format!("{accession}_HUMAN"),
        "entryType": "UniProtKB reviewed (Swiss-Prot)",
        "annotationScore": 5.0,
        "organism": {"taxonId": taxon},
        "genes": [{"geneName": {"value": "HB"}}],
        "proteinDescription": {
            "recommendedName": {
                "fullName": {"value": "Hemoglobin"},
                "ecNumbers": [{"value": "1.14.12.17", "evidences": [{"evidenceCode": "ECO:0000269"}]}]
            }
        },
        "sequence": {"value": sequence, "length": sequence.len()}
    })
}

fn lineage(kingdom: &str, genus: &str) -> RankMap {
    [("kingdom", kingdom), ("genus", genus), ("species", "Homo sapiens")]
        .iter()
        .map(|(rank, name)| (rank.to_string(), name.to_string()))
        .collect()
}

fn pfam_match(sequence: &str) -> (String, Value) {
    let md5 = SequenceChecksum::from_sequence(sequence).as_str().to_string();
    let value = json!({
        "md5": md5,
        "found": true,
        "matches": [{
            "signature": {"accession": "PF00042", "name": "Globin",
                "signatureLibraryRelease": {"library": "PFAM", "version": "37.0"}},
            "score": 50.2
        }, {
            "signature": {"accession": "SSF46458", "name": null,
                "signatureLibraryRelease": {"library": "SUPERFAMILY"}},
            "score": 3.5
        }]
    });
    (md5, value)
}

struct Fixture {
    _temp: tempfile::TempDir,
    store: Store,
    uniprot: MockUniprot,
    taxonomy: MockTaxonomy,
    interpro: MockInterpro,
    names: MockReference,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let project_root = Utf8PathBuf::from_path_buf(temp.path().join("project")).unwrap();
        let cache_root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
        let store = Store::new_with_paths(project_root, cache_root);

        let uniprot = MockUniprot {
            entries: [
                ("P69905".to_string(), entry("P69905", 9606, HBA)),
                ("P68871".to_string(), entry("P68871", 9606, HBB)),
                ("P01942".to_string(), entry("P01942", 10090, HBA)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let taxonomy = MockTaxonomy {
            lineages: [
                (9606, lineage("Metazoa", "Homo")),
                (10090, lineage("Metazoa", "Mus")),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let interpro = MockInterpro {
            results: [pfam_match(HBA), pfam_match(HBB)].into_iter().collect(),
            ..Default::default()
        };
        let mut entries = EntryNames::new();
        entries.insert(
            "SSF".to_string(),
            [("SSF46458".to_string(), "Globin-like".to_string())].into_iter().collect(),
        );
        let names = MockReference {
            enzymes: [("1.14.12.17".to_string(), "Nitric oxide dioxygenase".to_string())]
                .into_iter()
                .collect(),
            entries,
            ..Default::default()
        };
        Self {
            _temp: temp,
            store,
            uniprot,
            taxonomy,
            interpro,
            names,
        }
    }

    fn app(
        &self,
        settings: Settings,
    ) -> App<MockUniprot, MockTaxonomy, MockInterpro, MockReference> {
        App::new(
            self.store.clone(),
            self.uniprot.clone(),
            self.taxonomy.clone(),
            self.interpro.clone(),
            self.names.clone(),
            settings,
        )
    }

    fn run(&self, settings: Settings, ids: &[&str], names: &[&str]) -> AnnotateResult {
        self.app(settings)
            .annotate(&strings(ids), &request(names), &JsonOutput)
            .unwrap()
    }

    fn calls(&self) -> (usize, usize, usize) {
        (
            self.uniprot.calls.load(Ordering::SeqCst),
            self.taxonomy.calls.load(Ordering::SeqCst),
            self.interpro.calls.load(Ordering::SeqCst),
        )
    }

    fn reset_calls(&self) {
        self.uniprot.calls.store(0, Ordering::SeqCst);
        self.taxonomy.calls.store(0, Ordering::SeqCst);
        self.interpro.calls.store(0, Ordering::SeqCst);
        self.names.calls.store(0, Ordering::SeqCst);
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn request(names: &[&str]) -> AnnotationRequest {
    AnnotationRequest::Names(strings(names))
}

#[test]
fn second_identical_run_makes_no_calls() {
    let fixture = Fixture::new();
    let ids = ["P69905", "P68871"];
    let names = ["reviewed", "kingdom", "pfam"];

    let first = fixture.run(Settings::default(), &ids, &names);
    assert_eq!(first.plan, Some(FetchPlan::everything()));
    let (uniprot, taxonomy, interpro) = fixture.calls();
    assert!(uniprot > 0 && taxonomy > 0 && interpro > 0);
    assert!(fixture.store.has_annotations_cache());

    fixture.reset_calls();
    let second = fixture.run(Settings::default(), &ids, &names);
    assert_eq!(fixture.calls(), (0, 0, 0));
    assert_eq!(second.plan, Some(FetchPlan::default()));
    assert_eq!(first.table, second.table);
}

#[test]
fn cached_primary_fields_serve_later_sources() {
    let fixture = Fixture::new();
    let ids = ["P69905", "P68871"];
    fixture.run(Settings::default(), &ids, &["reviewed"]);

    fixture.reset_calls();
    let result = fixture.run(Settings::default(), &ids, &["kingdom"]);
    assert_eq!(
        result.plan,
        Some(FetchPlan {
            uniprot: false,
            taxonomy: true,
            interpro: false
        })
    );
    assert_eq!(fixture.uniprot.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.table.cell("P69905", "kingdom"), Some("Metazoa"));

    fixture.reset_calls();
    let result = fixture.run(Settings::default(), &ids, &["pfam"]);
    assert_eq!(
        result.plan,
        Some(FetchPlan {
            uniprot: false,
            taxonomy: false,
            interpro: true
        })
    );
    assert_eq!(result.table.cell("P68871", "pfam"), Some("PF00042 (Globin)|50.2"));
}

#[test]
fn all_sources_failing_keeps_every_identifier() {
    let mut fixture = Fixture::new();
    fixture.uniprot.fail = true;
    fixture.taxonomy.fail = true;
    fixture.interpro.fail = true;

    let ids = ["sp|P69905|HBA_HUMAN", "P68871", "P99999"];
    let result = fixture.run(Settings::default(), &ids, &["reviewed", "kingdom", "pfam"]);

    assert_eq!(result.table.identifiers().collect::<Vec<_>>(), ids.to_vec());
    for id in ids {
        for column in result.table.columns() {
            assert_eq!(result.table.cell(id, column), Some(""), "{id} {column}");
        }
    }
}

#[test]
fn taxonomy_failure_leaves_other_sources_intact() {
    let mut fixture = Fixture::new();
    fixture.taxonomy.fail = true;

    let result = fixture.run(Settings::default(), &["P69905"], &["reviewed", "kingdom", "pfam"]);
    assert_eq!(result.table.cell("P69905", "reviewed"), Some("Swiss-Prot"));
    assert_eq!(result.table.cell("P69905", "kingdom"), Some(""));
    assert_eq!(result.table.cell("P69905", "pfam"), Some("PF00042 (Globin)|50.2"));
}

#[test]
fn identical_sequences_share_one_lookup() {
    let fixture = Fixture::new();
    let result = fixture.run(Settings::default(), &["P69905", "P01942"], &["pfam"]);

    let submitted = fixture.interpro.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        result.table.cell("P69905", "pfam"),
        result.table.cell("P01942", "pfam")
    );
    assert_eq!(result.table.cell("P01942", "pfam"), Some("PF00042 (Globin)|50.2"));
}

#[test]
fn output_follows_input_order_without_duplicates() {
    let fixture = Fixture::new();
    let result = fixture.run(
        Settings::default(),
        &["P68871", "P69905", "P68871"],
        &["reviewed"],
    );
    assert_eq!(
        result.table.identifiers().collect::<Vec<_>>(),
        vec!["P68871", "P69905"]
    );
    assert!(result.table.columns().any(|column| column == "reviewed"));
    assert_eq!(result.table.cell("P69905", "uniprot_kb_id"), Some("P69905_HUMAN"));
}

#[test]
fn force_refetch_queries_every_requested_source() {
    let fixture = Fixture::new();
    let ids = ["P69905"];
    fixture.run(Settings::default(), &ids, &["reviewed", "kingdom"]);

    fixture.reset_calls();
    let settings = Settings {
        force_refetch: true,
        ..Settings::default()
    };
    let result = fixture.run(settings, &ids, &["reviewed", "kingdom"]);
    let (uniprot, taxonomy, interpro) = fixture.calls();
    assert!(uniprot > 0);
    assert!(taxonomy > 0);
    assert_eq!(interpro, 0);
    assert_eq!(result.table.cell("P69905", "kingdom"), Some("Metazoa"));
}

#[test]
fn no_cache_run_leaves_no_files() {
    let fixture = Fixture::new();
    let settings = Settings {
        keep_intermediate: false,
        ..Settings::default()
    };
    fixture.run(settings.clone(), &["P69905"], &["reviewed"]);
    assert!(!fixture.store.has_annotations_cache());

    fixture.reset_calls();
    fixture.run(settings, &["P69905"], &["reviewed"]);
    assert!(fixture.uniprot.calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn no_scores_strips_output_but_not_cache() {
    let fixture = Fixture::new();
    let settings = Settings {
        no_scores: true,
        ..Settings::default()
    };
    let result = fixture.run(settings, &["P69905"], &["pfam"]);
    assert_eq!(result.table.cell("P69905", "pfam"), Some("PF00042 (Globin)"));

    let cached = fs::read_to_string(fixture.store.annotations_cache_path().as_std_path()).unwrap();
    assert!(cached.contains("PF00042 (Globin)|50.2"));
}

#[test]
fn unknown_annotation_is_rejected() {
    let fixture = Fixture::new();
    let err = fixture
        .app(Settings::default())
        .annotate(&strings(&["P69905"]), &request(&["reviewd"]), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidAnnotation { ref name, .. } if name == "reviewd");
    assert_eq!(fixture.calls(), (0, 0, 0));
}

#[test]
fn empty_identifier_list_gives_empty_table() {
    let fixture = Fixture::new();
    let result = fixture.run(Settings::default(), &["", "  "], &["reviewed"]);
    assert!(result.table.is_empty());
    assert!(result.table.columns().any(|column| column == "reviewed"));
    assert_eq!(fixture.calls(), (0, 0, 0));
    assert!(!fixture.store.has_annotations_cache());

    let err = fixture
        .app(Settings::default())
        .annotate(&strings(&[]), &request(&["reviewd"]), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidAnnotation { .. });
}

#[test]
fn failed_refetch_keeps_cached_taxonomy() {
    let mut fixture = Fixture::new();
    let first = fixture.run(Settings::default(), &["P69905"], &["kingdom"]);
    assert_eq!(first.table.cell("P69905", "kingdom"), Some("Metazoa"));

    fixture.taxonomy.fail = true;
    let result = fixture.run(Settings::default(), &["P69905", "P68871"], &["kingdom"]);
    assert!(result.plan.unwrap().taxonomy);
    assert_eq!(result.table.cell("P69905", "kingdom"), Some("Metazoa"));
    assert_eq!(result.table.cell("P68871", "kingdom"), Some(""));

    fixture.taxonomy.fail = false;
    fixture.reset_calls();
    let cached = fixture.run(Settings::default(), &["P69905"], &["kingdom"]);
    assert_eq!(fixture.calls(), (0, 0, 0));
    assert_eq!(cached.table.cell("P69905", "kingdom"), Some("Metazoa"));
}

#[test]
fn failed_refetch_keeps_cached_domains() {
    let mut fixture = Fixture::new();
    fixture.run(Settings::default(), &["P69905"], &["pfam"]);

    fixture.interpro.fail = true;
    let result = fixture.run(Settings::default(), &["P69905", "P68871"], &["pfam"]);
    assert_eq!(result.table.cell("P69905", "pfam"), Some("PF00042 (Globin)|50.2"));
    assert_eq!(result.table.cell("P68871", "pfam"), Some(""));

    let cached = fs::read_to_string(fixture.store.annotations_cache_path().as_std_path()).unwrap();
    assert!(cached.contains("PF00042 (Globin)|50.2"));
}

#[test]
fn ec_numbers_are_named_with_evidence() {
    let fixture = Fixture::new();
    let result = fixture.run(Settings::default(), &["P69905"], &["ec"]);
    assert_eq!(
        result.table.cell("P69905", "ec"),
        Some("1.14.12.17 (Nitric oxide dioxygenase)|EXP")
    );
    assert_eq!(fixture.names.calls.load(Ordering::SeqCst), 1);

    fixture.reset_calls();
    fixture.run(Settings::default(), &["P69905"], &["ec"]);
    assert_eq!(fixture.names.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_enzyme_names_leave_numbers_bare() {
    let mut fixture = Fixture::new();
    fixture.names.fail = true;
    let result = fixture.run(Settings::default(), &["P69905"], &["ec", "reviewed"]);
    assert_eq!(result.table.cell("P69905", "ec"), Some("1.14.12.17|EXP"));
    assert_eq!(result.table.cell("P69905", "reviewed"), Some("Swiss-Prot"));
}

#[test]
fn unnamed_superfamily_matches_take_entry_names() {
    let fixture = Fixture::new();
    let result = fixture.run(Settings::default(), &["P69905"], &["superfamily", "pfam"]);
    assert_eq!(
        result.table.cell("P69905", "superfamily"),
        Some("SSF46458 (Globin-like)|3.5")
    );
    assert_eq!(result.table.cell("P69905", "pfam"), Some("PF00042 (Globin)|50.2"));
    assert_eq!(fixture.names.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn table_request_bypasses_sources() {
    let fixture = Fixture::new();
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("clusters.csv");
    fs::write(&path, "protein,cluster\nP69905,globins\nP68871,globins\n").unwrap();

    let result = fixture
        .app(Settings::default())
        .annotate(
            &strings(&["P68871", "P00000"]),
            &AnnotationRequest::Table(path),
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(result.plan, None);
    assert_eq!(result.table.cell("P68871", "cluster"), Some("globins"));
    assert_eq!(result.table.cell("P00000", "cluster"), Some(""));
    assert_eq!(fixture.calls(), (0, 0, 0));
}

#[test]
fn clear_cache_removes_table() {
    let fixture = Fixture::new();
    fixture.run(Settings::default(), &["P69905"], &["reviewed"]);
    let app = fixture.app(Settings::default());
    assert!(app.clear_cache(&JsonOutput).unwrap().cleared);
    assert!(!fixture.store.has_annotations_cache());
}
