use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use companion_lib::{
    commands_step8::{
        self, EntryAddRequest, EntryDeleteRequest, EntryUpdateRequest, StatusRequest,
    },
    config::{AppConfig, ConfigOverrides},
    db, logging, migrate,
    model_step8::validate_user_id,
    AppError, AppResult, EntryFilter, EntryPatch, ErrorKind, InventoryStatus, NewAmendsEntry,
    Priority, SqliteInventoryRepository, WillingnessStatus,
};

const CONFIG_INVALID: &str = "CONFIG/INVALID";

#[derive(Debug, Parser)]
#[command(name = "companion", about = "Step 8 amends inventory", version)]
struct Cli {
    /// Path to the SQLite database. Overrides COMPANION_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// User whose inventory is read or changed.
    #[arg(long, global = true)]
    user: Option<String>,
    /// Log filter directive. Overrides COMPANION_LOG.
    #[arg(long, global = true)]
    log: Option<String>,
    /// Directory for the rotating log file. Overrides COMPANION_LOG_DIR.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the active inventory, creating it if needed.
    Show,
    /// Append an entry to the inventory.
    Add(AddArgs),
    /// Change fields of an existing entry.
    Update(UpdateArgs),
    /// Remove an entry.
    Delete {
        #[arg(long)]
        entry: String,
        #[arg(long)]
        inventory: Option<String>,
    },
    /// List entries, highest priority first.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_parser = parse_value::<WillingnessStatus>)]
        status: Option<WillingnessStatus>,
        #[arg(long, value_parser = parse_value::<Priority>)]
        priority: Option<Priority>,
    },
    /// Summary counts and percentages for the active inventory.
    Stats,
    /// Set the status of an inventory.
    Status {
        #[arg(value_parser = parse_value::<InventoryStatus>)]
        status: InventoryStatus,
        #[arg(long)]
        inventory: Option<String>,
    },
    /// Archive the active inventory and open an empty one.
    StartFresh,
    /// Entries ready to carry into Step 9.
    Handoff,
    /// Recount the stored progress counters from the entries.
    Recompute {
        #[arg(long)]
        inventory: Option<String>,
    },
    /// Apply pending schema migrations and list what is applied.
    Migrate,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    person: String,
    #[arg(long)]
    harm: String,
    #[arg(long, value_parser = parse_value::<WillingnessStatus>)]
    status: Option<WillingnessStatus>,
    #[arg(long, value_parser = parse_value::<Priority>)]
    priority: Option<Priority>,
    #[arg(long)]
    plan: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    inventory: Option<String>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    entry: String,
    #[arg(long)]
    person: Option<String>,
    #[arg(long)]
    harm: Option<String>,
    #[arg(long, value_parser = parse_value::<WillingnessStatus>)]
    status: Option<WillingnessStatus>,
    #[arg(long, value_parser = parse_value::<Priority>)]
    priority: Option<Priority>,
    /// Pass an empty value to clear the plan.
    #[arg(long)]
    plan: Option<String>,
    /// Pass an empty value to clear the notes.
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    inventory: Option<String>,
}

fn parse_value<T>(value: &str) -> Result<T, String>
where
    T: FromStr<Err = AppError>,
{
    value.parse::<T>().map_err(|err| err.message().to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            let rendered = serde_json::to_string_pretty(&json!({ "error": err }))
                .unwrap_or_else(|_| err.to_string());
            eprintln!("{rendered}");
            exit_code(&err)
        }
    };
    logging::flush_file_logs();
    process::exit(code);
}

fn exit_code(err: &AppError) -> i32 {
    match err.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Store | ErrorKind::Other => 1,
    }
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = AppConfig::resolve(ConfigOverrides {
        db_path: cli.db,
        log_filter: cli.log,
        log_dir: cli.log_dir,
    })
    .map_err(|err| AppError::new(CONFIG_INVALID, err.to_string()))?;
    logging::init(&config.log)?;
    tracing::debug!(target: "companion", event = "cli_start", db = %config.db_path.display());

    let pool = db::open_sqlite_pool(&config.db_path).await?;
    migrate::apply_migrations(&pool).await?;

    if let Command::Migrate = cli.command {
        let applied = migrate::applied_migrations(&pool).await?;
        pool.close().await;
        return print_json(&json!({ "applied": applied }));
    }

    let user = cli.user.unwrap_or_default();
    validate_user_id(&user)?;
    let repo = SqliteInventoryRepository::new(pool.clone());
    let result = dispatch(&repo, &user, cli.command).await;
    pool.close().await;
    result
}

async fn dispatch(repo: &SqliteInventoryRepository, user: &str, command: Command) -> AppResult<()> {
    match command {
        Command::Show => print_json(&commands_step8::step8_get(repo, user).await?),
        Command::Add(args) => {
            let request = EntryAddRequest {
                inventory_id: args.inventory,
                entry: NewAmendsEntry {
                    person: args.person,
                    harm_done: args.harm,
                    willingness_status: args.status,
                    plan_for_amends: args.plan,
                    priority: args.priority,
                    notes: args.notes,
                },
            };
            print_json(&commands_step8::step8_entry_add(repo, user, request).await?)
        }
        Command::Update(args) => {
            let request = EntryUpdateRequest {
                inventory_id: args.inventory,
                entry_id: args.entry,
                patch: EntryPatch {
                    person: args.person,
                    harm_done: args.harm,
                    willingness_status: args.status,
                    plan_for_amends: args.plan,
                    priority: args.priority,
                    notes: args.notes,
                },
            };
            print_json(&commands_step8::step8_entry_update(repo, user, request).await?)
        }
        Command::Delete { entry, inventory } => {
            let request = EntryDeleteRequest {
                inventory_id: inventory,
                entry_id: entry,
            };
            print_json(&commands_step8::step8_entry_delete(repo, user, request).await?)
        }
        Command::List {
            search,
            status,
            priority,
        } => {
            let filter = EntryFilter {
                search,
                status,
                priority,
            };
            print_json(&commands_step8::step8_entries_list(repo, user, filter).await?)
        }
        Command::Stats => print_json(&commands_step8::step8_stats(repo, user).await?),
        Command::Status { status, inventory } => {
            let request = StatusRequest {
                inventory_id: inventory,
                status,
            };
            print_json(&commands_step8::step8_set_status(repo, user, request).await?)
        }
        Command::StartFresh => print_json(&commands_step8::step8_start_fresh(repo, user).await?),
        Command::Handoff => print_json(&commands_step8::step8_handoff(repo, user).await?),
        Command::Recompute { inventory } => {
            print_json(&commands_step8::step8_recompute(repo, user, inventory).await?)
        }
        Command::Migrate => Ok(()),
    }
}
