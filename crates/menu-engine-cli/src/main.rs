use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use menu_engine_api::{
    load_route_table, AddEntryRequest, AddMenuRequest, MenuEngineApi, ResolveRequest,
};
use menu_engine_core::{MenuEntryId, RouteTable};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "menu")]
#[command(about = "Navigation menu engine CLI")]
struct Cli {
    #[arg(long, default_value = "./menus.sqlite3")]
    db: PathBuf,

    /// YAML route table (`routes: {name: pattern}`); defaults to the built-in site routes.
    #[arg(long)]
    routes: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Menu {
        #[command(subcommand)]
        command: MenuCommand,
    },
    Entry {
        #[command(subcommand)]
        command: EntryCommand,
    },
    Routes {
        #[command(subcommand)]
        command: RoutesCommand,
    },
    /// Create the default site menus; menus that already have entries are skipped.
    Seed,
    /// Resolve one menu for a request path and print the annotated tree.
    Draw(DrawArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum MenuCommand {
    Add(MenuAddArgs),
    List,
    Delete(MenuDeleteArgs),
}

#[derive(Debug, Args)]
struct MenuAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Debug, Args)]
struct MenuDeleteArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Subcommand)]
enum EntryCommand {
    Add(EntryAddArgs),
    List(EntryListArgs),
    Delete(EntryDeleteArgs),
}

#[derive(Debug, Args)]
struct EntryAddArgs {
    #[arg(long)]
    menu: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    route: Option<String>,
    #[arg(long)]
    parent: Option<i64>,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    order: i32,
}

#[derive(Debug, Args)]
struct EntryListArgs {
    #[arg(long)]
    menu: String,
}

#[derive(Debug, Args)]
struct EntryDeleteArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Subcommand)]
enum RoutesCommand {
    List,
}

#[derive(Debug, Args)]
struct DrawArgs {
    #[arg(long)]
    menu: String,
    #[arg(long)]
    path: String,
    /// Fail on store errors instead of printing an empty menu.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T: Serialize>(what: &str, value: &T) -> Result<()> {
    emit_json(serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let routes = match &cli.routes {
        Some(path) => load_route_table(path)?,
        None => RouteTable::site_defaults(),
    };
    debug!(db = %cli.db.display(), routes = routes.len(), "starting menu cli");
    let api = MenuEngineApi::new(cli.db, routes);

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Menu { command } => run_menu(command, &api),
        Command::Entry { command } => run_entry(command, &api),
        Command::Routes { command } => run_routes(&command, &api),
        Command::Seed => emit("seed summary", &api.seed_defaults()?),
        Command::Draw(args) => run_draw(args, &api),
    }
}

fn run_db(command: DbCommand, api: &MenuEngineApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit("migration result", &api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => emit("integrity report", &api.integrity_check()?),
    }
}

fn run_menu(command: MenuCommand, api: &MenuEngineApi) -> Result<()> {
    match command {
        MenuCommand::Add(args) => {
            let menu =
                api.add_menu(AddMenuRequest { name: args.name, description: args.description })?;
            emit("menu", &menu)
        }
        MenuCommand::List => {
            let menus = api.list_menus()?;
            emit_json(serde_json::json!({ "menus": menus }))
        }
        MenuCommand::Delete(args) => emit("delete result", &api.delete_menu(&args.name)?),
    }
}

fn run_entry(command: EntryCommand, api: &MenuEngineApi) -> Result<()> {
    match command {
        EntryCommand::Add(args) => {
            let entry = api.add_entry(AddEntryRequest {
                menu_name: args.menu,
                title: args.title,
                parent_id: args.parent.map(MenuEntryId),
                url: args.url,
                route_name: args.route,
                order: args.order,
            })?;
            emit("menu entry", &entry)
        }
        EntryCommand::List(args) => {
            let entries = api.list_entries(&args.menu)?;
            emit_json(serde_json::json!({ "menu_name": args.menu, "entries": entries }))
        }
        EntryCommand::Delete(args) => {
            emit("delete result", &api.delete_entry(MenuEntryId(args.id))?)
        }
    }
}

fn run_routes(command: &RoutesCommand, api: &MenuEngineApi) -> Result<()> {
    match command {
        RoutesCommand::List => emit("route table", api.routes()),
    }
}

fn run_draw(args: DrawArgs, api: &MenuEngineApi) -> Result<()> {
    let request = ResolveRequest { menu_name: args.menu, current_path: args.path };
    let resolution = if args.strict { api.resolve(&request)? } else { api.draw(&request) };
    emit("menu resolution", &resolution)
}
