use clap::Parser;
use merchantflow::application::workflow::{MerchantWorkflow, RequestContext};
use merchantflow::config::{ConcurrencyMode, WorkflowConfig, keys};
use merchantflow::domain::merchant::Actor;
use merchantflow::domain::ports::Stores;
use merchantflow::infrastructure::in_memory::InMemoryStore;
use merchantflow::infrastructure::notify::{InMemoryMailer, InMemoryServices, InMemoryTemplates};
#[cfg(feature = "storage-rocksdb")]
use merchantflow::infrastructure::rocksdb::RocksDBStore;
use merchantflow::interfaces::csv::merchant_writer::MerchantWriter;
use merchantflow::interfaces::jsonl::command_reader::CommandReader;
use merchantflow::interfaces::script::ScriptRunner;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands, one JSON object per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Concurrent workers per document batch
    #[arg(long)]
    workers: Option<usize>,
}

/// Template bodies used when no template service is configured.
const BUILTIN_TEMPLATES: [(&str, &str, &str); 6] = [
    (
        keys::TEMPLATE_MERCHANT_ACTIVATED,
        "merchant-activated",
        "Hi {{fullName}}, {{merchantName}} is now active. Open your dashboard at {{url}}. {{year}}",
    ),
    (
        keys::TEMPLATE_UPGRADE_APPROVED,
        "merchant-upgrade-approved",
        "Hi {{fullName}}, {{merchantName}} is now {{upgradeStatus}}. Approved by {{adminName}}. {{year}}",
    ),
    (
        keys::TEMPLATE_UPGRADE_REQUESTED,
        "merchant-upgrade-requested",
        "Hi {{fullName}}, we received the upgrade request for {{merchantName}} ({{upgradeStatus}}). {{year}}",
    ),
    (
        keys::TEMPLATE_UPGRADE_REJECTED,
        "merchant-upgrade-rejected",
        "Hi {{fullName}}, the upgrade of {{merchantName}} was rejected: {{reason}}. {{year}}",
    ),
    (
        keys::TEMPLATE_REGISTRATION_REJECTED,
        "merchant-registration-rejected",
        "Hi {{fullName}}, the registration of {{merchantName}} was rejected: {{reason}}. {{year}}",
    ),
    (
        keys::TEMPLATE_EMPLOYEE_INVITED,
        "merchant-employee-invited",
        "You were invited by {{adminName}} to join {{merchantName}}. Sign in at {{url}}. {{year}}",
    ),
];

fn with_builtin_templates(mut config: WorkflowConfig) -> (WorkflowConfig, InMemoryTemplates) {
    let mut templates = InMemoryTemplates::new();
    for (key, default_id, content) in BUILTIN_TEMPLATES {
        let id = config.get(key).unwrap_or(default_id).to_string();
        config = config.with(key, id.as_str());
        templates = templates.with(&id, content);
    }
    (config, templates)
}

fn in_memory_stores(mode: ConcurrencyMode) -> Stores {
    Stores::from_backend(Arc::new(InMemoryStore::in_memory().with_concurrency(mode)))
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(cli: &Cli, mode: ConcurrencyMode) -> Result<Stores> {
    match &cli.db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path)
                .into_diagnostic()?
                .with_concurrency(mode);
            Ok(Stores::from_backend(Arc::new(store)))
        }
        None => Ok(in_memory_stores(mode)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(_cli: &Cli, mode: ConcurrencyMode) -> Result<Stores> {
    Ok(in_memory_stores(mode))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = WorkflowConfig::from_env();
    if let Some(workers) = cli.workers {
        config = config.with_document_workers(workers);
    }
    let (config, templates) = with_builtin_templates(config);
    let stores = open_stores(&cli, config.concurrency)?;
    let services = InMemoryServices::new(InMemoryMailer::new(), templates);
    let workflow = MerchantWorkflow::new(stores, services.services(), config);

    // Deliver whatever a previous run committed but never dispatched
    workflow
        .dispatcher()
        .drain_pending()
        .await
        .into_diagnostic()?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let ctx = RequestContext::new(Actor::new("cli", "merchantflow", "127.0.0.1"));
    let runner = ScriptRunner::new(&workflow, ctx);
    for command in CommandReader::new(BufReader::new(file)).commands() {
        match command {
            Ok(command) => {
                let name = command.name();
                if let Err(e) = runner.run(command).await {
                    eprintln!("Error running {}: {}", name, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    workflow.dispatcher().shutdown().await;

    let merchants = workflow.list_merchants().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = MerchantWriter::new(stdout.lock());
    writer.write_merchants(&merchants).into_diagnostic()?;

    Ok(())
}
