use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_annotations::app::{App, ProgressSink, dedup_identifiers};
use kira_annotations::catalog;
use kira_annotations::config::{
    AnnotationRequest, ConfigLoader, ResolvedConfig, Settings, read_identifier_file,
};
use kira_annotations::error::KiraError;
use kira_annotations::http::build_client;
use kira_annotations::interpro::InterproHttpClient;
use kira_annotations::output::{JsonOutput, StderrProgress, write_table};
use kira_annotations::reference::{EntryNames, NameMap, ReferenceCache, ReferenceNames};
use kira_annotations::store::Store;
use kira_annotations::taxonomy::TaxdumpLookup;
use kira_annotations::uniprot::UniprotHttpClient;

#[derive(Parser)]
#[command(name = "kira-annot")]
#[command(about = "Annotate proteins from UniProt, NCBI taxonomy and InterPro with a local cache")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Annotate protein identifiers (default command)")]
    Annotate(AnnotateArgs),
    #[command(about = "List annotation names and groups")]
    Annotations,
    #[command(about = "Delete the project annotation cache")]
    Clear,
}

#[derive(Args, Clone, Default)]
struct AnnotateArgs {
    /// UniProt accessions or `db|accession|name` identifiers.
    identifiers: Vec<String>,

    /// File with one identifier per line, or a FASTA file.
    #[arg(long)]
    ids_file: Option<PathBuf>,

    /// Comma-separated annotation names or groups, or a CSV/TSV table.
    #[arg(long, short = 'a')]
    annotations: Option<String>,

    #[arg(long)]
    config: Option<String>,

    /// Skip reading and writing the annotation cache.
    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    force_refetch: bool,

    /// Drop evidence codes and match scores from the output.
    #[arg(long)]
    no_scores: bool,

    /// Write the table as CSV (or TSV for `.tsv`) instead of JSON on stdout.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidAnnotation { .. }
        | KiraError::InvalidOrganismId(_)
        | KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::NoIdentifiers
        | KiraError::IdentifierFile { .. }
        | KiraError::TableRead { .. } => 2,
        KiraError::SourceUnavailable { .. }
        | KiraError::HttpClient(_)
        | KiraError::UniprotHttp(_)
        | KiraError::UniprotStatus { .. }
        | KiraError::InterproHttp(_)
        | KiraError::InterproStatus { .. }
        | KiraError::TaxonomyHttp(_)
        | KiraError::TaxonomyStatus { .. }
        | KiraError::TaxonomyDatabase(_)
        | KiraError::ReferenceHttp(_)
        | KiraError::ReferenceStatus { .. }
        | KiraError::ReferenceData(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink: &dyn ProgressSink = if cli.non_interactive {
        &JsonOutput
    } else {
        &StderrProgress
    };

    let store = Store::new()?;

    match cli.command.unwrap_or(Commands::Annotate(AnnotateArgs::default())) {
        Commands::Annotate(args) => run_annotate(args, store, sink),
        Commands::Annotations => {
            print_annotation_names();
            Ok(())
        }
        Commands::Clear => {
            let app = App::new(
                store,
                NopUniprot,
                NopTaxonomy,
                NopInterpro,
                NopReference,
                Settings::default(),
            );
            let result = app.clear_cache(sink)?;
            JsonOutput::print_clear(&result).into_diagnostic()?;
            Ok(())
        }
    }
}

fn run_annotate(args: AnnotateArgs, store: Store, sink: &dyn ProgressSink) -> miette::Result<()> {
    let resolved = load_config(args.config.as_deref())?;

    let mut identifiers = args.identifiers.clone();
    if let Some(path) = &args.ids_file {
        identifiers.extend(read_identifier_file(path)?);
    }
    let mut settings = Settings::default();
    let mut request = None;
    if let Some(resolved) = resolved {
        if identifiers.is_empty() {
            identifiers = resolved.identifiers;
        }
        settings = resolved.settings;
        request = resolved.annotations;
    }
    if dedup_identifiers(&identifiers).is_empty() {
        return Err(KiraError::NoIdentifiers.into());
    }
    apply_overrides(&mut settings, &args)?;
    let request = match &args.annotations {
        Some(value) => AnnotationRequest::parse(value),
        None => request.unwrap_or(AnnotationRequest::Names(Vec::new())),
    };

    let http = build_client(settings.timeout)?;
    let uniprot = UniprotHttpClient::with_client(http.clone());
    let interpro = InterproHttpClient::with_client(http.clone());
    let taxonomy = TaxdumpLookup::new(&store, http.clone());
    let names = ReferenceCache::new(&store, http, settings.reference_max_age);
    let app = App::new(store, uniprot, taxonomy, interpro, names, settings);

    let result = app.annotate(&identifiers, &request, sink)?;
    match &args.output {
        Some(path) => {
            write_table(&result.table, path)?;
            eprintln!("wrote {} rows to {}", result.table.len(), path.display());
        }
        None => JsonOutput::print_annotations(&result).into_diagnostic()?,
    }
    Ok(())
}

/// An explicit `--config` must load; the default file is optional.
fn load_config(path: Option<&str>) -> miette::Result<Option<ResolvedConfig>> {
    match ConfigLoader::resolve(path) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(KiraError::MissingConfig) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn apply_overrides(settings: &mut Settings, args: &AnnotateArgs) -> miette::Result<()> {
    if let Some(workers) = args.workers {
        settings.workers = at_least_one(workers, "workers")?;
    }
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = at_least_one(batch_size, "batch-size")?;
    }
    if let Some(timeout) = args.timeout_secs {
        settings.timeout = Duration::from_secs(at_least_one(timeout, "timeout-secs")?);
    }
    if args.no_cache {
        settings.keep_intermediate = false;
    }
    settings.force_refetch |= args.force_refetch;
    settings.no_scores |= args.no_scores;
    Ok(())
}

fn at_least_one<T>(value: T, flag: &str) -> miette::Result<T>
where
    T: PartialEq + From<u8>,
{
    if value == T::from(0) {
        return Err(KiraError::ConfigParse(format!("--{flag} must be at least 1")).into());
    }
    Ok(value)
}

fn print_annotation_names() {
    for group in catalog::GROUP_NAMES {
        let members = catalog::group_members(group).unwrap_or_default();
        println!("{group}: {}", members.join(", "));
    }
}

struct NopUniprot;
struct NopTaxonomy;
struct NopInterpro;
struct NopReference;

impl kira_annotations::uniprot::UniprotClient for NopUniprot {
    fn fetch_many(
        &self,
        _accessions: &[kira_annotations::domain::Accession],
    ) -> Result<Vec<serde_json::Value>, KiraError> {
        Ok(Vec::new())
    }

    fn search(
        &self,
        _accession: &kira_annotations::domain::Accession,
    ) -> Result<Option<serde_json::Value>, KiraError> {
        Ok(None)
    }
}

impl kira_annotations::taxonomy::TaxonomyLookup for NopTaxonomy {
    fn ranks(
        &self,
        _organism_id: kira_annotations::domain::OrganismId,
    ) -> Result<Option<kira_annotations::taxonomy::RankMap>, KiraError> {
        Ok(None)
    }

    fn refresh(&self, _max_age: Duration) -> Result<(), KiraError> {
        Ok(())
    }
}

impl kira_annotations::interpro::InterproClient for NopInterpro {
    fn matches(
        &self,
        _checksums: &[kira_annotations::domain::SequenceChecksum],
    ) -> Result<Vec<kira_annotations::interpro::MatchResult>, KiraError> {
        Ok(Vec::new())
    }
}

impl ReferenceNames for NopReference {
    fn enzyme_names(&self) -> Result<NameMap, KiraError> {
        Ok(NameMap::new())
    }

    fn entry_names(&self) -> Result<EntryNames, KiraError> {
        Ok(EntryNames::new())
    }
}
