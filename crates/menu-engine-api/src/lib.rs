use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use menu_engine_core::{
    draw_menu, resolve_menu, AnnotatedForest, Menu, MenuEntry, MenuEntryId, NewMenu,
    NewMenuEntry, RouteTable,
};
use menu_engine_store_sqlite::SqliteMenuStore;
pub use menu_engine_store_sqlite::{IntegrityReport, SchemaStatus, SeedSummary};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddMenuRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddEntryRequest {
    pub menu_name: String,
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<MenuEntryId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub route_name: Option<String>,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub target: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveRequest {
    pub menu_name: String,
    pub current_path: String,
}

/// One annotated menu plus a summary of the resolution.
#[derive(Debug, Clone, Serialize)]
pub struct MenuResolution {
    pub menu_name: String,
    pub current_path: String,
    pub node_count: usize,
    pub active_ids: Vec<MenuEntryId>,
    pub items: AnnotatedForest,
}

impl MenuResolution {
    fn from_forest(request: &ResolveRequest, items: AnnotatedForest) -> Self {
        Self {
            menu_name: request.menu_name.clone(),
            current_path: request.current_path.clone(),
            node_count: items.len(),
            active_ids: items.active_ids(),
            items,
        }
    }
}

/// Load a YAML route table of the form `routes: {name: pattern}`.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, or a route is malformed.
pub fn load_route_table(path: &Path) -> Result<RouteTable> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read route table {}", path.display()))?;
    let routes: RouteTable = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse route table {}", path.display()))?;
    routes
        .validate()
        .map_err(|err| anyhow!("invalid route table {}: {err}", path.display()))?;
    Ok(routes)
}

#[derive(Debug, Clone)]
pub struct MenuEngineApi {
    db_path: PathBuf,
    routes: RouteTable,
}

impl MenuEngineApi {
    #[must_use]
    pub fn new(db_path: PathBuf, routes: RouteTable) -> Self {
        Self { db_path, routes }
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn open_store(&self) -> Result<SqliteMenuStore> {
        SqliteMenuStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteMenuStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Open a database that already exists at the current schema version. Reads never
    /// create the file or apply migrations.
    fn open_read_store(&self) -> Result<SqliteMenuStore> {
        let store = SqliteMenuStore::open_existing(&self.db_path)?;
        store.ensure_current_schema()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run `SQLite` quick-check and foreign-key checks.
    ///
    /// # Errors
    /// Returns an error when the checks cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// # Errors
    /// Returns an error when validation fails, the name is taken, or persistence fails.
    pub fn add_menu(&self, input: AddMenuRequest) -> Result<Menu> {
        let mut store = self.open_migrated_store()?;
        store.add_menu(&NewMenu { name: input.name, description: input.description })
    }

    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_menus(&self) -> Result<Vec<Menu>> {
        let store = self.open_migrated_store()?;
        store.list_menus()
    }

    /// Delete a menu together with all of its entries.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or written.
    pub fn delete_menu(&self, menu_name: &str) -> Result<DeleteResult> {
        let mut store = self.open_migrated_store()?;
        let deleted = store.delete_menu(menu_name)?;
        Ok(DeleteResult { target: menu_name.to_string(), deleted })
    }

    /// # Errors
    /// Returns an error when validation fails, the menu or parent is missing, or
    /// persistence fails.
    pub fn add_entry(&self, input: AddEntryRequest) -> Result<MenuEntry> {
        let mut store = self.open_migrated_store()?;
        store.add_entry(NewMenuEntry {
            menu_name: input.menu_name,
            parent_id: input.parent_id,
            title: input.title,
            static_url: input.url,
            route_name: input.route_name,
            order: input.order,
        })
    }

    /// Entries of one menu in store order (`order`, then `id`).
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_entries(&self, menu_name: &str) -> Result<Vec<MenuEntry>> {
        let store = self.open_migrated_store()?;
        store.fetch_entries(menu_name)
    }

    /// Delete one entry together with its subtree.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or written.
    pub fn delete_entry(&self, id: MenuEntryId) -> Result<DeleteResult> {
        let mut store = self.open_migrated_store()?;
        let deleted = store.delete_entry(id)?;
        Ok(DeleteResult { target: id.to_string(), deleted })
    }

    /// # Errors
    /// Returns an error when seeding fails; no partial seed is committed.
    pub fn seed_defaults(&self) -> Result<SeedSummary> {
        let mut store = self.open_migrated_store()?;
        store.seed_default_menus()
    }

    /// Resolve one menu, surfacing store failures.
    ///
    /// # Errors
    /// Returns an error when the database is missing, not migrated, or cannot be queried.
    pub fn resolve(&self, request: &ResolveRequest) -> Result<MenuResolution> {
        let store = self.open_read_store()?;
        let forest =
            resolve_menu(&store, &self.routes, &request.menu_name, &request.current_path)
                .with_context(|| format!("failed to resolve menu {}", request.menu_name))?;
        Ok(MenuResolution::from_forest(request, forest))
    }

    /// Resolve one menu for rendering. Any failure yields an empty menu.
    #[must_use]
    pub fn draw(&self, request: &ResolveRequest) -> MenuResolution {
        let forest = match self.open_read_store() {
            Ok(store) => {
                draw_menu(&store, &self.routes, &request.menu_name, &request.current_path)
            }
            Err(err) => {
                warn!(
                    menu_name = %request.menu_name,
                    error = %format!("{err:#}"),
                    "menu store unavailable; rendering empty menu"
                );
                AnnotatedForest::empty()
            }
        };
        MenuResolution::from_forest(request, forest)
    }
}
