use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cascade_artifact::FsStore;
use cascade_engine::{EngineConfig, ExecutionEngine, NoopNotifier};
use cascade_registry::NodeRegistry;
use cascade_service::Service;
use cascade_store::{BudgetConfig, SqliteStore};

/// Cascade - a local workflow engine for media and AI pipelines
#[derive(Parser)]
#[command(name = "cascade")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cascade)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List workflows
  List,

  /// Export a workflow as JSON
  Export {
    /// The workflow id to export
    workflow_id: String,

    /// Write to a file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Import a workflow from an export file
  Import {
    /// Path to the export JSON
    file: PathBuf,
  },

  /// Show or update the budget limits
  Budget {
    /// New per-execution limit
    #[arg(long)]
    per_execution: Option<f64>,

    /// New daily limit
    #[arg(long)]
    daily: Option<f64>,
  },

  /// Show disk usage of stored artifacts
  DiskUsage,

  /// Delete a workflow and its local files
  Delete {
    /// The workflow id to delete
    workflow_id: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".cascade")
  });

  match cli.command {
    Some(command) => {
      let (service, store) = open_service(&data_dir).await?;
      run_command(command, &service).await?;
      store.persist_now().await.context("failed to flush database")?;
    }
    None => {
      println!("cascade - use --help to see available commands");
    }
  }

  Ok(())
}

/// Open the store and wire up the service. The CLI registers no node
/// handlers; execution requests belong to the desktop shell.
async fn open_service(
  data_dir: &Path,
) -> Result<(Service<NoopNotifier>, Arc<SqliteStore>)> {
  std::fs::create_dir_all(data_dir)
    .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

  let store = Arc::new(
    SqliteStore::open(data_dir.join("cascade.db"))
      .await
      .context("failed to open database")?,
  );
  let registry = Arc::new(NodeRegistry::new());
  let artifacts = Arc::new(FsStore::new(data_dir.join("artifacts")));
  let engine = Arc::new(ExecutionEngine::new(
    Arc::clone(&store),
    Arc::clone(&registry),
    Arc::clone(&artifacts),
    EngineConfig::default(),
  ));

  let service = Service::new(Arc::clone(&store), registry, artifacts, engine);
  Ok((service, store))
}

async fn run_command(command: Commands, service: &Service<NoopNotifier>) -> Result<()> {
  match command {
    Commands::List => {
      let workflows = service.list_workflows().await?;
      if workflows.is_empty() {
        println!("no workflows");
        return Ok(());
      }
      for workflow in workflows {
        println!(
          "{}  {}  [{}]  updated {}",
          workflow.id,
          workflow.name,
          serde_json::to_string(&workflow.status)?.trim_matches('"'),
          workflow.updated_at.format("%Y-%m-%d %H:%M"),
        );
      }
    }

    Commands::Export { workflow_id, out } => {
      let export = service.export_workflow(&workflow_id).await?;
      let json = serde_json::to_string_pretty(&export)?;
      match out {
        Some(path) => {
          std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
          println!("exported '{}' to {}", export.name, path.display());
        }
        None => println!("{}", json),
      }
    }

    Commands::Import { file } => {
      let data = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
      let payload: serde_json::Value = serde_json::from_str(&data)?;
      let record = service.import_workflow(&payload).await?;
      println!("imported as '{}' ({})", record.name, record.id);
    }

    Commands::Budget {
      per_execution,
      daily,
    } => {
      if per_execution.is_some() || daily.is_some() {
        let current = service.get_budget().await?;
        service
          .set_budget(BudgetConfig {
            per_execution_limit: per_execution.unwrap_or(current.per_execution_limit),
            daily_limit: daily.unwrap_or(current.daily_limit),
          })
          .await?;
      }
      let budget = service.get_budget().await?;
      let spent = service.daily_spend().await?;
      println!(
        "per-execution limit: {:.4}\ndaily limit: {:.4}\nspent today: {:.4}",
        budget.per_execution_limit, budget.daily_limit, spent
      );
    }

    Commands::DiskUsage => {
      let bytes = service.disk_usage().await?;
      println!("{:.1} MiB in stored artifacts", bytes as f64 / (1024.0 * 1024.0));
    }

    Commands::Delete { workflow_id } => {
      service.delete_workflow(&workflow_id).await?;
      println!("deleted {}", workflow_id);
    }
  }

  Ok(())
}
