use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vodflow_core::{
    load_pipeline_config, ArtifactClassifier, CommandPublisher, ConsoleLinks, HttpEncoderClient,
    JobLifecycle, JobOutputs, JobRecord, JobSettingsBuilder, JobStore, JobTemplate,
    LedgerBackend, LifecycleOutcome, LocalObjectStore, LogPublisher, ManifestLedger,
    NotificationPublisher, Notifier, ObjectLocation, PipelineConfig, SqliteJobStore,
    SubmissionTrigger, Submitter,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodflow_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ledger error: {0}")]
    Ledger(#[from] vodflow_core::LedgerError),
    #[error("encoder error: {0}")]
    Encoder(#[from] vodflow_core::EncoderError),
    #[error("job settings error: {0}")]
    Settings(#[from] vodflow_core::SettingsError),
    #[error("{0}")]
    Lifecycle(#[from] vodflow_core::LifecycleError),
    #[error("{0}")]
    Submission(#[from] vodflow_core::SubmissionError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vodflow transcoding pipeline control", long_about = None)]
pub struct Cli {
    /// Path to vodflow.toml
    #[arg(long, default_value = "configs/vodflow.toml")]
    pub config: PathBuf,
    /// Overrides storage.root_dir
    #[arg(long)]
    pub root_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Enables debug logging
    #[arg(long, short)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submits an uploaded source object for encoding
    Submit(SubmitArgs),
    /// Handles one encoder state-change event
    Event(EventArgs),
    /// Job ledger queries
    #[command(subcommand)]
    Jobs(JobsCommands),
    /// Job settings templates
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Source bucket (defaults to storage.source_bucket)
    #[arg(long, conflicts_with = "queue_body")]
    pub bucket: Option<String>,
    /// Source object key
    #[arg(long, required_unless_present = "queue_body")]
    pub key: Option<String>,
    /// Queue message body holding an object-created notification
    #[arg(long)]
    pub queue_body: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EventArgs {
    /// Event JSON file, or `-` for stdin
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommands {
    /// Lists ledger entries
    List(JobsListArgs),
    /// Shows one ledger entry
    Show(JobsShowArgs),
}

#[derive(Args, Debug)]
pub struct JobsListArgs {
    /// Only jobs in this status (SUBMITTED, INPUT_KNOWN, COMPLETE)
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum number of rows
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct JobsShowArgs {
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Resolves a template without submitting it
    Render(SettingsRenderArgs),
}

#[derive(Args, Debug)]
pub struct SettingsRenderArgs {
    /// Template file
    #[arg(long)]
    pub template: PathBuf,
    /// Input object URI
    #[arg(long)]
    pub input: String,
    /// Output base URI
    #[arg(long)]
    pub output: String,
    /// Encoder role (defaults to encoder.role)
    #[arg(long)]
    pub role: Option<String>,
}

pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(cli))
}

async fn run_async(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Submit(args) => {
            let report = context.submit(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Event(args) => {
            let report = context.handle_event(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Jobs(JobsCommands::List(args)) => {
            let list = context.jobs_list(args).await?;
            render(&list, cli.format)?;
        }
        Commands::Jobs(JobsCommands::Show(args)) => {
            let job = context.jobs_show(args).await?;
            render(&job, cli.format)?;
        }
        Commands::Settings(SettingsCommands::Render(args)) => {
            let rendered = context.settings_render(args)?;
            render(&rendered, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: PipelineConfig,
    objects: Arc<LocalObjectStore>,
    ledger: Arc<dyn JobStore>,
    notifier: Notifier,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        debug!(config = %cli.config.display(), "loading pipeline config");
        let mut config = load_pipeline_config(&cli.config)?;
        if let Some(root) = &cli.root_dir {
            config.storage.root_dir = root.to_string_lossy().into_owned();
        }

        let objects = Arc::new(LocalObjectStore::new(&config.storage.root_dir));
        let ledger: Arc<dyn JobStore> = match config.ledger.backend {
            LedgerBackend::Manifest => Arc::new(
                ManifestLedger::builder()
                    .store(objects.clone())
                    .location(ObjectLocation::new(
                        &config.storage.source_bucket,
                        &config.storage.manifest_key,
                    ))
                    .create_if_missing(config.ledger.create_if_missing)
                    .build()?,
            ),
            LedgerBackend::Sqlite => {
                let path = config.ledger.sqlite_path.as_deref().ok_or_else(|| {
                    AppError::MissingResource("ledger.sqlite_path".to_string())
                })?;
                let path = config.resolve_path(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let store = SqliteJobStore::builder()
                    .path(&path)
                    .create_if_missing(config.ledger.create_if_missing)
                    .build()?;
                store.initialize()?;
                Arc::new(store)
            }
        };

        let notifications = &config.notifications;
        let publisher: Arc<dyn NotificationPublisher> =
            match (&notifications.command, notifications.dry_run) {
                (Some(command), false) => {
                    Arc::new(
                        CommandPublisher::new(command, notifications.args.clone())
                            .with_timeout(notifications.timeout()),
                    )
                }
                _ => Arc::new(LogPublisher),
            };
        let links = ConsoleLinks::new(&notifications.region)
            .with_log_group(notifications.log_group.clone());
        let notifier = Notifier::new(publisher, &notifications.topic, links)
            .with_stack_name(&notifications.stack_name);

        Ok(Self {
            config,
            objects,
            ledger,
            notifier,
        })
    }

    fn encoder(&self) -> Result<Arc<HttpEncoderClient>> {
        let encoder = &self.config.encoder;
        Ok(Arc::new(HttpEncoderClient::new(
            &encoder.endpoint,
            encoder.user_agent.as_deref(),
            encoder.timeout(),
        )?))
    }

    async fn submit(&self, args: &SubmitArgs) -> Result<SubmitReport> {
        let trigger = match (&args.queue_body, &args.key) {
            (Some(path), _) => SubmissionTrigger::from_queue_body(&fs::read_to_string(path)?)?,
            (None, Some(key)) => SubmissionTrigger::new(
                args.bucket
                    .clone()
                    .unwrap_or_else(|| self.config.storage.source_bucket.clone()),
                key.clone(),
            ),
            (None, None) => {
                return Err(AppError::MissingResource(
                    "either --key or --queue-body".to_string(),
                ))
            }
        };

        let submitter = Submitter::new(
            self.objects.clone(),
            self.encoder()?,
            self.notifier.clone(),
            &self.config.encoder.settings_file,
            &self.config.storage.destination_bucket,
            &self.config.encoder.role,
        );
        let submission = submitter.submit(&trigger).await?;
        Ok(SubmitReport {
            job_id: submission.job_id,
            guid: submission.guid,
            input: trigger.input_uri(),
            destinations: submission
                .request
                .destinations()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    async fn handle_event(&self, args: &EventArgs) -> Result<EventReport> {
        let event: Value = serde_json::from_str(&read_input(&args.file)?)?;
        let lifecycle = JobLifecycle::new(
            self.ledger.clone(),
            self.encoder()?,
            self.notifier.clone(),
            ArtifactClassifier::new(&self.config.distribution.public_base_url),
        );
        let outcome = lifecycle.handle(&event).await?;
        Ok(EventReport::from(outcome))
    }

    async fn jobs_list(&self, args: &JobsListArgs) -> Result<JobList> {
        let wanted = args.status.as_deref().map(str::to_ascii_uppercase);
        let rows = self
            .ledger
            .list()
            .await?
            .iter()
            .map(JobRow::from)
            .filter(|row| wanted.as_deref().map_or(true, |status| row.status == status))
            .take(args.limit)
            .collect();
        Ok(JobList { rows })
    }

    async fn jobs_show(&self, args: &JobsShowArgs) -> Result<JobDetail> {
        self.ledger
            .get(&args.id)
            .await?
            .map(JobDetail)
            .ok_or_else(|| AppError::MissingResource(format!("job {}", args.id)))
    }

    fn settings_render(&self, args: &SettingsRenderArgs) -> Result<RenderedSettings> {
        let template = JobTemplate::from_slice(&fs::read(&args.template)?)?;
        let role = args
            .role
            .clone()
            .unwrap_or_else(|| self.config.encoder.role.clone());
        let request = JobSettingsBuilder::new(&args.input, &args.output, role).build(&template)?;
        Ok(RenderedSettings(request.into_value()))
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

#[derive(Debug, Serialize)]
struct SubmitReport {
    job_id: String,
    guid: String,
    input: String,
    destinations: Vec<String>,
}

impl DisplayFallback for SubmitReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("job {} submitted (guid {})", self.job_id, self.guid),
            format!("input: {}", self.input),
        ];
        for destination in &self.destinations {
            lines.push(format!("output: {destination}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct EventReport {
    job_id: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<JobOutputs>,
}

impl From<LifecycleOutcome> for EventReport {
    fn from(outcome: LifecycleOutcome) -> Self {
        match outcome {
            LifecycleOutcome::InputRecorded(record) => Self {
                job_id: record.id,
                outcome: "input recorded",
                outputs: None,
            },
            LifecycleOutcome::Completed(record) => Self {
                job_id: record.id,
                outcome: "complete",
                outputs: record.outputs,
            },
            LifecycleOutcome::Canceled { job_id } => Self {
                job_id,
                outcome: "canceled",
                outputs: None,
            },
            LifecycleOutcome::Failed { job_id } => Self {
                job_id,
                outcome: "error reported",
                outputs: None,
            },
        }
    }
}

impl DisplayFallback for EventReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} | {}", self.job_id, self.outcome)];
        if let Some(outputs) = &self.outputs {
            for kind in outputs.kinds() {
                for url in outputs.get(kind).unwrap_or_default() {
                    lines.push(format!("  {kind}: {url}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct JobList {
    rows: Vec<JobRow>,
}

#[derive(Debug, Serialize)]
struct JobRow {
    id: String,
    status: &'static str,
    input_file: Option<String>,
    outputs: usize,
}

impl From<&JobRecord> for JobRow {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status().as_str(),
            input_file: record.input_file.clone(),
            outputs: record.outputs.as_ref().map_or(0, JobOutputs::url_count),
        }
    }
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No jobs recorded".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{} | status={} | input={} | outputs={}",
                    row.id,
                    row.status,
                    row.input_file.as_deref().unwrap_or("-"),
                    row.outputs
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct JobDetail(JobRecord);

impl DisplayFallback for JobDetail {
    fn display(&self) -> String {
        let record = &self.0;
        let mut lines = vec![
            format!("id: {}", record.id),
            format!("status: {}", record.status()),
            format!("input: {}", record.input_file.as_deref().unwrap_or("-")),
        ];
        if let Some(outputs) = &record.outputs {
            for kind in outputs.kinds() {
                for url in outputs.get(kind).unwrap_or_default() {
                    lines.push(format!("{kind}: {url}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct RenderedSettings(Value);

impl DisplayFallback for RenderedSettings {
    fn display(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}
