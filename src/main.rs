use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use spoolview::core::Fields;
use spoolview::printer::{self, Printer};
use spoolview::{
    FileStore, LiveListView, MemoryBackend, PreferencesStore, RecordId, Sorter, Value,
    ViewPreferences, ViewSnapshot,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "spoolview")]
#[command(about = "Inspect persisted list preferences and run the live printer list")]
struct Cli {
    /// Preferences file
    #[arg(long, env = "SPOOLVIEW_STORE", default_value = "spoolview-prefs.json", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    Flag {
        #[command(subcommand)]
        action: FlagAction,
    },
    /// Mount the printer list against an in-process backend and stream changes
    Demo {
        #[arg(long, default_value_t = 4)]
        printers: i64,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// List stored namespaces and flags
    List,
    /// Print the preferences a namespace would load
    Show { namespace: String },
    /// Forget a namespace so it loads its defaults
    Reset { namespace: String },
    /// Set the page size, returning to the first page
    PageSize { namespace: String, size: u32 },
    /// Replace the sort order with a single field
    Sort {
        namespace: String,
        field: String,
        #[arg(long)]
        desc: bool,
    },
}

#[derive(Subcommand)]
enum FlagAction {
    Get {
        key: String,
        #[arg(long)]
        default: bool,
    },
    Set {
        key: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spoolview=info")),
        )
        .init();

    let cli = Cli::parse();
    let preferences = PreferencesStore::new(Arc::new(FileStore::new(&cli.store)));

    let outcome = match cli.command {
        Command::Prefs { action } => run_prefs(&preferences, action).await,
        Command::Flag { action } => run_flag(&preferences, action).await,
        Command::Demo { printers } => run_demo(preferences.clone(), printers).await,
    };

    preferences.flush().await;
    outcome
}

fn defaults_for(namespace: &str) -> ViewPreferences {
    if namespace == printer::LIST_NAMESPACE {
        printer::list_config().default_preferences()
    } else {
        ViewPreferences::default()
    }
}

async fn run_prefs(preferences: &PreferencesStore, action: PrefsAction) -> Result<()> {
    match action {
        PrefsAction::List => {
            let keys = preferences
                .keys()
                .await
                .context("Failed to list stored preferences")?;
            for key in keys {
                println!("{}", key);
            }
        }
        PrefsAction::Show { namespace } => {
            let loaded = preferences.load_or(&namespace, defaults_for(&namespace)).await;
            println!("{}", serde_json::to_string_pretty(&loaded)?);
        }
        PrefsAction::Reset { namespace } => {
            preferences.clear(&namespace);
            println!("Reset '{}' to defaults", namespace);
        }
        PrefsAction::PageSize { namespace, size } => {
            if size == 0 {
                return Err(anyhow!("page size must be positive"));
            }
            let mut loaded = preferences.load_or(&namespace, defaults_for(&namespace)).await;
            loaded.pagination.page_size = size;
            loaded.pagination.page_index = 0;
            preferences.save(&namespace, &loaded);
        }
        PrefsAction::Sort {
            namespace,
            field,
            desc,
        } => {
            let mut loaded = preferences.load_or(&namespace, defaults_for(&namespace)).await;
            loaded.sorters = vec![if desc {
                Sorter::desc(field)
            } else {
                Sorter::asc(field)
            }];
            preferences.save(&namespace, &loaded);
        }
    }
    Ok(())
}

async fn run_flag(preferences: &PreferencesStore, action: FlagAction) -> Result<()> {
    match action {
        FlagAction::Get { key, default } => {
            println!("{}", preferences.load_flag(&key, default).await);
        }
        FlagAction::Set { key, value } => preferences.save_flag(&key, value),
    }
    Ok(())
}

async fn run_demo(preferences: PreferencesStore, count: i64) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let records = (1..=count.max(1))
        .map(|id| {
            Printer {
                id,
                printer_id: format!("X1P{:012}", id),
                printer_ip: format!("192.168.0.{}", 10 + id),
                status: "idle".to_string(),
                ams_unit_count: Some(1 + id % 4),
                ams_active_spools_count: None,
                last_mqtt_message: Some(chrono::Utc::now()),
                last_mqtt_ams_message: None,
            }
            .to_record()
        })
        .collect::<spoolview::Result<Vec<_>>>()?;
    backend.seed(printer::RESOURCE, records)?;

    let show_archived = preferences.load_flag(printer::SHOW_ARCHIVED_KEY, false).await;
    tracing::info!(show_archived, "restored archive toggle");

    let view = LiveListView::mount(
        printer::list_config(),
        backend.clone(),
        backend.as_ref(),
        preferences,
    )
    .await
    .context("Failed to mount printer list")?;
    view.settled().await;
    print_table(&view, &view.snapshot());

    let mut changed = Fields::new();
    changed.insert("status".to_string(), Value::from("printing"));
    backend.update(printer::RESOURCE, &RecordId::Int(1), changed)?;
    wait_for_change(&view).await;
    println!("\nprinter 1 started printing:");
    print_table(&view, &view.snapshot());

    backend.delete(printer::RESOURCE, &RecordId::Int(count.max(1)))?;
    wait_for_change(&view).await;
    view.settled().await;
    println!("\nlast printer removed:");
    print_table(&view, &view.snapshot());

    view.unmount();
    Ok(())
}

async fn wait_for_change(view: &LiveListView) {
    let mut changes = view.changes();
    // the loopback delivers promptly; give up quietly rather than hang
    let _ = tokio::time::timeout(Duration::from_secs(1), changes.changed()).await;
}

fn print_table(view: &LiveListView, snapshot: &ViewSnapshot) {
    let columns = view.visible_columns_in_order();
    println!("{}", columns.join("\t"));
    for row in &snapshot.rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| row.get(column).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        println!("{}", cells.join("\t"));
    }
    println!(
        "-- {} of {} (page {}){}",
        snapshot.rows.len(),
        snapshot.total,
        snapshot.query_params.page_index() + 1,
        if snapshot.is_stale { " [stale]" } else { "" }
    );
}
