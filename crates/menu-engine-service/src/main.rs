use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use menu_engine_api::{
    load_route_table, AddEntryRequest, AddMenuRequest, DeleteResult, MenuEngineApi,
    MenuResolution, MigrateResult, ResolveRequest, SchemaStatus, SeedSummary,
    API_CONTRACT_VERSION,
};
use menu_engine_core::{Menu, MenuEntry, MenuEntryId, RouteTable};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: MenuEngineApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AddEntryBody {
    title: String,
    #[serde(default)]
    parent_id: Option<MenuEntryId>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    route_name: Option<String>,
    #[serde(default)]
    order: i32,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "menu-engine-service")]
#[command(about = "Local HTTP service for the navigation menu engine")]
struct Args {
    #[arg(long, default_value = "./menus.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML route table; defaults to the built-in site routes.
    #[arg(long)]
    routes: Option<PathBuf>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: format!("{err:#}"),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn respond<T: Serialize>(result: anyhow::Result<T>) -> ServiceResult<T> {
    result.map(|data| Json(envelope(data))).map_err(|err| ServiceState::error(&err))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/seed", post(seed_defaults))
        .route("/v1/routes", get(routes_list))
        .route("/v1/menus", get(menus_list).post(menus_add))
        .route("/v1/menus/:menu_name", delete(menus_delete))
        .route("/v1/menus/:menu_name/entries", get(entries_list).post(entries_add))
        .route("/v1/menus/:menu_name/draw", get(menu_draw))
        .route("/v1/menus/:menu_name/resolve", get(menu_resolve))
        .route("/v1/entries/:entry_id", delete(entries_delete))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let routes = match &args.routes {
        Some(path) => load_route_table(path)?,
        None => RouteTable::site_defaults(),
    };
    let state = ServiceState { api: MenuEngineApi::new(args.db, routes) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "menu engine service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> ServiceResult<SchemaStatus> {
    respond(state.api.schema_status())
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    respond(state.api.migrate(request.dry_run))
}

async fn seed_defaults(
    State(state): State<ServiceState>,
) -> ServiceResult<SeedSummary> {
    respond(state.api.seed_defaults())
}

async fn routes_list(State(state): State<ServiceState>) -> Json<ServiceEnvelope<RouteTable>> {
    Json(envelope(state.api.routes().clone()))
}

async fn menus_list(State(state): State<ServiceState>) -> ServiceResult<Vec<Menu>> {
    respond(state.api.list_menus())
}

async fn menus_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddMenuRequest>,
) -> ServiceResult<Menu> {
    respond(state.api.add_menu(request))
}

async fn menus_delete(
    State(state): State<ServiceState>,
    Path(menu_name): Path<String>,
) -> ServiceResult<DeleteResult> {
    respond(state.api.delete_menu(&menu_name))
}

async fn entries_list(
    State(state): State<ServiceState>,
    Path(menu_name): Path<String>,
) -> ServiceResult<Vec<MenuEntry>> {
    respond(state.api.list_entries(&menu_name))
}

async fn entries_add(
    State(state): State<ServiceState>,
    Path(menu_name): Path<String>,
    Json(body): Json<AddEntryBody>,
) -> ServiceResult<MenuEntry> {
    respond(state.api.add_entry(AddEntryRequest {
        menu_name,
        title: body.title,
        parent_id: body.parent_id,
        url: body.url,
        route_name: body.route_name,
        order: body.order,
    }))
}

async fn entries_delete(
    State(state): State<ServiceState>,
    Path(entry_id): Path<i64>,
) -> ServiceResult<DeleteResult> {
    respond(state.api.delete_entry(MenuEntryId(entry_id)))
}

async fn menu_draw(
    State(state): State<ServiceState>,
    Path(menu_name): Path<String>,
    Query(query): Query<PathQuery>,
) -> Json<ServiceEnvelope<MenuResolution>> {
    let request = ResolveRequest { menu_name, current_path: query.path };
    Json(envelope(state.api.draw(&request)))
}

async fn menu_resolve(
    State(state): State<ServiceState>,
    Path(menu_name): Path<String>,
    Query(query): Query<PathQuery>,
) -> ServiceResult<MenuResolution> {
    let request = ResolveRequest { menu_name, current_path: query.path };
    respond(state.api.resolve(&request))
}
