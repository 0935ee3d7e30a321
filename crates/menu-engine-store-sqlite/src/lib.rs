use std::cell::Cell;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use menu_engine_core::{
    Menu, MenuEntry, MenuEntryId, MenuError, MenuStore, NewMenu, NewMenuEntry, MAX_MENU_DEPTH,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS menus (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE CHECK (length(name) BETWEEN 1 AND 100),
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS menu_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  menu_id INTEGER NOT NULL,
  parent_id INTEGER,
  title TEXT NOT NULL CHECK (length(title) BETWEEN 1 AND 100),
  url TEXT NOT NULL DEFAULT '' CHECK (length(url) <= 200),
  named_url TEXT NOT NULL DEFAULT '' CHECK (length(named_url) <= 100),
  ord INTEGER NOT NULL DEFAULT 0,
  FOREIGN KEY (menu_id) REFERENCES menus(id) ON DELETE CASCADE,
  FOREIGN KEY (parent_id) REFERENCES menu_entries(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_menu_entries_menu_order ON menu_entries(menu_id, ord, id);
CREATE INDEX IF NOT EXISTS idx_menu_entries_parent ON menu_entries(parent_id);
";

/// All entries of one menu, joined to the menu name, in store order.
const FETCH_MENU_ENTRIES_SQL: &str = r"
SELECT e.id, m.name, e.parent_id, e.title, e.url, e.named_url, e.ord
FROM menu_entries e
JOIN menus m ON m.id = e.menu_id
WHERE m.name = ?1
ORDER BY e.ord ASC, e.id ASC
";

/// Depth of entry ?1 counting itself as 1, walking at most ?2 ancestors.
const ENTRY_DEPTH_SQL: &str = r"
WITH RECURSIVE chain(id, parent_id, depth) AS (
  SELECT id, parent_id, 1 FROM menu_entries WHERE id = ?1
  UNION ALL
  SELECT e.id, e.parent_id, chain.depth + 1
  FROM menu_entries e
  JOIN chain ON e.id = chain.parent_id
  WHERE chain.depth <= ?2
)
SELECT COALESCE(MAX(depth), 0) FROM chain
";

struct SeedItem {
    title: &'static str,
    route_name: &'static str,
    children: &'static [SeedItem],
}

const fn leaf(title: &'static str, route_name: &'static str) -> SeedItem {
    SeedItem { title, route_name, children: &[] }
}

const MAIN_MENU_SEED: &[SeedItem] = &[
    leaf("Home", "dogs:home"),
    SeedItem {
        title: "Dogs",
        route_name: "dogs:dog_list",
        children: &[
            leaf("Register a dog", "dogs:register"),
            leaf("Find a match", "dogs:dog_list"),
            leaf("All breeds", "dogs:breeds"),
        ],
    },
    SeedItem {
        title: "Information",
        route_name: "dogs:about",
        children: &[
            leaf("About the service", "dogs:about"),
            leaf("Events", "dogs:events"),
            leaf("Tips", "dogs:tips"),
        ],
    },
];

const FOOTER_MENU_SEED: &[SeedItem] =
    &[leaf("Contacts", "dogs:contacts"), leaf("Privacy policy", "dogs:privacy")];

const DEFAULT_MENUS: &[(&str, &str, &[SeedItem])] = &[
    ("main_menu", "Main site navigation", MAIN_MENU_SEED),
    ("footer_menu", "Footer links", FOOTER_MENU_SEED),
];

pub struct SqliteMenuStore {
    conn: Connection,
    fetch_queries: Cell<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedSummary {
    pub seeded_menus: Vec<String>,
    pub skipped_menus: Vec<String>,
    pub created_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteMenuStore {
    /// Open a SQLite-backed menu store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn, fetch_queries: Cell::new(0) })
    }

    /// Open a database that must already exist. Neither the file nor any table is
    /// created, so reads through this handle leave a missing database missing.
    ///
    /// # Errors
    /// Returns an error when the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(path, flags).with_context(|| {
            format!("failed to open existing sqlite database at {}", path.display())
        })?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn, fetch_queries: Cell::new(0) })
    }

    /// Recorded schema version, or 0 when the database was never migrated. Issues no
    /// writes.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn schema_version(&self) -> Result<i64> {
        let has_migrations = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name = 'schema_migrations'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to inspect sqlite schema")?;
        if has_migrations == 0 {
            return Ok(0);
        }
        current_schema_version(&self.conn)
    }

    /// Fail unless the schema is exactly the version this build reads.
    ///
    /// # Errors
    /// Returns an error when the database is unmigrated, outdated, or newer than this
    /// build understands.
    pub fn ensure_current_schema(&self) -> Result<()> {
        let version = self.schema_version()?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "database is not migrated (schema version {version}, expected \
                 {LATEST_SCHEMA_VERSION}); run `db migrate`"
            ));
        }
        Ok(())
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than
    /// this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            info!(version = 1, "applied menu schema migration");
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Create one menu.
    ///
    /// # Errors
    /// Returns an error when validation fails, the name is taken, or the insert fails.
    pub fn add_menu(&mut self, menu: &NewMenu) -> Result<Menu> {
        menu.validate().map_err(|err| anyhow!("menu validation failed: {err}"))?;

        if menu_id_by_name(&self.conn, &menu.name)?.is_some() {
            return Err(anyhow!("menu already exists: {}", menu.name));
        }

        self.conn
            .execute(
                "INSERT INTO menus(name, description) VALUES (?1, ?2)",
                params![menu.name, menu.description],
            )
            .with_context(|| format!("failed to insert menu {}", menu.name))?;

        Ok(Menu { name: menu.name.clone(), description: menu.description.clone() })
    }

    /// List every menu by name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_menus(&self) -> Result<Vec<Menu>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, description FROM menus ORDER BY name ASC")
            .context("failed to prepare menu listing")?;
        let menus = stmt
            .query_map([], |row| Ok(Menu { name: row.get(0)?, description: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read menus")?;
        Ok(menus)
    }

    /// Delete a menu and, by cascade, all of its entries.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_menu(&mut self, menu_name: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM menus WHERE name = ?1", params![menu_name])
            .with_context(|| format!("failed to delete menu {menu_name}"))?;
        Ok(deleted > 0)
    }

    /// Persist one entry. Empty targets are stored as the no-op URL, and a parent must
    /// already exist in the same menu with room below it for one more level.
    ///
    /// # Errors
    /// Returns an error when validation fails, the menu or parent is missing, the parent
    /// belongs to another menu, the entry would nest deeper than [`MAX_MENU_DEPTH`], or
    /// the insert fails.
    pub fn add_entry(&mut self, entry: NewMenuEntry) -> Result<MenuEntry> {
        entry.validate().map_err(|err| anyhow!("entry validation failed: {err}"))?;
        let entry = entry.normalized();

        let tx = self.conn.transaction().context("failed to start transaction")?;

        let Some(menu_id) = menu_id_by_name(&tx, &entry.menu_name)? else {
            return Err(anyhow!("menu does not exist: {}", entry.menu_name));
        };

        if let Some(parent_id) = entry.parent_id {
            let parent_menu_id = tx
                .query_row(
                    "SELECT menu_id FROM menu_entries WHERE id = ?1",
                    params![parent_id.0],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .with_context(|| format!("failed to look up parent entry {parent_id}"))?;
            match parent_menu_id {
                None => return Err(anyhow!("parent entry does not exist: {parent_id}")),
                Some(parent_menu_id) if parent_menu_id != menu_id => {
                    return Err(anyhow!(
                        "parent entry {parent_id} belongs to a different menu than {}",
                        entry.menu_name
                    ));
                }
                Some(_) => {}
            }

            let max_depth = i64::try_from(MAX_MENU_DEPTH).context("menu depth limit overflow")?;
            let parent_depth = tx
                .query_row(ENTRY_DEPTH_SQL, params![parent_id.0, max_depth], |row| {
                    row.get::<_, i64>(0)
                })
                .with_context(|| format!("failed to measure depth of entry {parent_id}"))?;
            if parent_depth >= max_depth {
                return Err(anyhow!(
                    "entry under parent {parent_id} exceeds menu depth; depth MUST be at most \
                     {MAX_MENU_DEPTH}"
                ));
            }
        }

        let id = insert_entry_row(
            &tx,
            menu_id,
            entry.parent_id,
            &entry.title,
            entry.static_url.as_deref().unwrap_or(""),
            entry.route_name.as_deref().unwrap_or(""),
            entry.order,
        )?;

        tx.commit().context("failed to commit entry insert")?;

        Ok(MenuEntry {
            id,
            menu_name: entry.menu_name,
            parent_id: entry.parent_id,
            title: entry.title,
            static_url: entry.static_url,
            route_name: entry.route_name,
            order: entry.order,
        })
    }

    /// Delete one entry and, by cascade, its whole subtree.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_entry(&mut self, id: MenuEntryId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM menu_entries WHERE id = ?1", params![id.0])
            .with_context(|| format!("failed to delete menu entry {id}"))?;
        Ok(deleted > 0)
    }

    /// Load every entry of `menu_name` with one query, ordered by `order` then `id`.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row cannot be decoded.
    pub fn fetch_entries(&self, menu_name: &str) -> Result<Vec<MenuEntry>> {
        self.fetch_queries.set(self.fetch_queries.get() + 1);

        let mut stmt = self
            .conn
            .prepare_cached(FETCH_MENU_ENTRIES_SQL)
            .context("failed to prepare menu entry fetch")?;
        let entries = stmt
            .query_map(params![menu_name], |row| {
                let url: String = row.get(4)?;
                let named_url: String = row.get(5)?;
                Ok(MenuEntry {
                    id: MenuEntryId(row.get(0)?),
                    menu_name: row.get(1)?,
                    parent_id: row.get::<_, Option<i64>>(2)?.map(MenuEntryId),
                    title: row.get(3)?,
                    static_url: Some(url).filter(|value| !value.is_empty()),
                    route_name: Some(named_url).filter(|value| !value.is_empty()),
                    order: row.get(6)?,
                })
            })
            .with_context(|| format!("failed to query entries for menu {menu_name}"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to decode entries for menu {menu_name}"))?;

        debug!(menu_name, entries = entries.len(), "fetched menu entries");
        Ok(entries)
    }

    /// Number of entry-fetch queries issued through this handle.
    #[must_use]
    pub fn fetch_query_count(&self) -> usize {
        self.fetch_queries.get()
    }

    /// Create the site's default menus. A menu that already has entries is left as is.
    ///
    /// # Errors
    /// Returns an error when any write in the seeding transaction fails.
    pub fn seed_default_menus(&mut self) -> Result<SeedSummary> {
        let tx = self.conn.transaction().context("failed to start seed transaction")?;
        let mut summary = SeedSummary {
            seeded_menus: Vec::new(),
            skipped_menus: Vec::new(),
            created_entries: 0,
        };

        for (menu_name, description, items) in DEFAULT_MENUS {
            tx.execute(
                "INSERT OR IGNORE INTO menus(name, description) VALUES (?1, ?2)",
                params![menu_name, description],
            )
            .with_context(|| format!("failed to ensure menu {menu_name}"))?;
            let Some(menu_id) = menu_id_by_name(&tx, menu_name)? else {
                return Err(anyhow!("seeded menu missing after insert: {menu_name}"));
            };

            let existing = tx
                .query_row(
                    "SELECT COUNT(*) FROM menu_entries WHERE menu_id = ?1",
                    params![menu_id],
                    |row| row.get::<_, i64>(0),
                )
                .with_context(|| format!("failed to count entries of menu {menu_name}"))?;
            if existing > 0 {
                summary.skipped_menus.push((*menu_name).to_string());
                continue;
            }

            summary.created_entries += insert_seed_items(&tx, menu_id, None, items)?;
            summary.seeded_menus.push((*menu_name).to_string());
        }

        tx.commit().context("failed to commit seed transaction")?;
        info!(
            seeded = summary.seeded_menus.len(),
            skipped = summary.skipped_menus.len(),
            entries = summary.created_entries,
            "seeded default menus"
        );
        Ok(summary)
    }

    /// Run `SQLite` quick-check and foreign-key checks.
    ///
    /// # Errors
    /// Returns an error when the checks cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt =
            self.conn.prepare("PRAGMA foreign_key_check").context("failed to prepare fk check")?;
        let foreign_key_violations = stmt
            .query_map([], |row| {
                Ok(ForeignKeyViolation {
                    table: row.get(0)?,
                    rowid: row.get::<_, Option<i64>>(1)?.unwrap_or(-1),
                    parent: row.get(2)?,
                    fk_index: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read foreign key violations")?;

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status: self.schema_status()?,
        })
    }
}

impl MenuStore for SqliteMenuStore {
    fn fetch(&self, menu_name: &str) -> Result<Vec<MenuEntry>, MenuError> {
        self.fetch_entries(menu_name).map_err(|err| MenuError::Store(format!("{err:#}")))
    }
}

fn insert_seed_items(
    conn: &Connection,
    menu_id: i64,
    parent_id: Option<MenuEntryId>,
    items: &[SeedItem],
) -> Result<usize> {
    let mut created = 0;
    for (position, item) in items.iter().enumerate() {
        let order = i32::try_from(position + 1).context("seed menu is too long")?;
        let id =
            insert_entry_row(conn, menu_id, parent_id, item.title, "", item.route_name, order)?;
        created += 1 + insert_seed_items(conn, menu_id, Some(id), item.children)?;
    }
    Ok(created)
}

fn insert_entry_row(
    conn: &Connection,
    menu_id: i64,
    parent_id: Option<MenuEntryId>,
    title: &str,
    url: &str,
    named_url: &str,
    order: i32,
) -> Result<MenuEntryId> {
    conn.execute(
        "INSERT INTO menu_entries(menu_id, parent_id, title, url, named_url, ord)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![menu_id, parent_id.map(|id| id.0), title, url, named_url, order],
    )
    .with_context(|| format!("failed to insert menu entry {title}"))?;
    Ok(MenuEntryId(conn.last_insert_rowid()))
}

fn menu_id_by_name(conn: &Connection, menu_name: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM menus WHERE name = ?1", params![menu_name], |row| row.get(0))
        .optional()
        .with_context(|| format!("failed to look up menu {menu_name}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use menu_engine_core::{draw_menu, resolve_menu, RouteTable, NO_OP_URL};
    use ulid::Ulid;

    fn migrated_store() -> Result<SqliteMenuStore> {
        let mut store = SqliteMenuStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn new_menu(name: &str) -> NewMenu {
        NewMenu { name: name.to_string(), description: String::new() }
    }

    fn new_entry(menu_name: &str, title: &str, url: &str, order: i32) -> NewMenuEntry {
        NewMenuEntry {
            menu_name: menu_name.to_string(),
            parent_id: None,
            title: title.to_string(),
            static_url: Some(url.to_string()),
            route_name: None,
            order,
        }
    }

    fn child(parent: &MenuEntry, title: &str, url: &str, order: i32) -> NewMenuEntry {
        NewMenuEntry {
            parent_id: Some(parent.id),
            ..new_entry(&parent.menu_name, title, url, order)
        }
    }

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("menu-engine-store-{}.sqlite3", Ulid::new()))
    }

    fn remove_db_files(path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let candidate = PathBuf::from(format!("{}{suffix}", path.display()));
            if candidate.exists() {
                fs::remove_file(&candidate).with_context(|| {
                    format!("failed to cleanup sqlite file {}", candidate.display())
                })?;
            }
        }
        Ok(())
    }

    #[test]
    fn fresh_database_reports_pending_migration() -> Result<()> {
        let store = SqliteMenuStore::open(Path::new(":memory:"))?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.target_version, 1);
        assert_eq!(status.pending_versions, vec![1]);
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut store = migrated_store()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn migrate_rejects_newer_schema_version() -> Result<()> {
        let mut store = migrated_store()?;
        record_schema_version(&store.conn, 7)?;
        let Err(err) = store.migrate() else {
            return Err(anyhow!("expected migrate to reject schema version 7"));
        };
        assert!(err.to_string().contains("unsupported schema version 7"));
        Ok(())
    }

    #[test]
    fn fetch_orders_by_order_then_id() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        let later = store.add_entry(new_entry("main_menu", "Later", "/later/", 5))?;
        let earlier = store.add_entry(new_entry("main_menu", "Earlier", "/earlier/", 3))?;
        let tied = store.add_entry(new_entry("main_menu", "Tied", "/tied/", 3))?;

        let ids = store.fetch_entries("main_menu")?.into_iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![earlier.id, tied.id, later.id]);
        Ok(())
    }

    #[test]
    fn fetch_unknown_menu_returns_empty() -> Result<()> {
        let store = migrated_store()?;
        assert!(store.fetch_entries("missing_menu")?.is_empty());
        assert_eq!(store.fetch_query_count(), 1);
        Ok(())
    }

    #[test]
    fn fetch_round_trips_targets() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        let routed = store.add_entry(NewMenuEntry {
            route_name: Some("dogs:tips".to_string()),
            static_url: None,
            ..new_entry("main_menu", "Tips", "", 1)
        })?;
        let bare = store.add_entry(NewMenuEntry {
            static_url: Some(String::new()),
            ..new_entry("main_menu", "Placeholder", "", 2)
        })?;

        let entries = store.fetch_entries("main_menu")?;
        assert_eq!(entries, vec![routed.clone(), bare.clone()]);
        assert_eq!(routed.static_url, None);
        assert_eq!(routed.route_name.as_deref(), Some("dogs:tips"));
        assert_eq!(bare.static_url.as_deref(), Some(NO_OP_URL));
        Ok(())
    }

    #[test]
    fn duplicate_menu_name_is_rejected() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        let Err(err) = store.add_menu(&new_menu("main_menu")) else {
            return Err(anyhow!("expected duplicate menu to be rejected"));
        };
        assert!(err.to_string().contains("menu already exists: main_menu"));
        Ok(())
    }

    #[test]
    fn entry_for_missing_menu_is_rejected() -> Result<()> {
        let mut store = migrated_store()?;
        let Err(err) = store.add_entry(new_entry("ghost_menu", "Home", "/", 1)) else {
            return Err(anyhow!("expected entry for missing menu to be rejected"));
        };
        assert!(err.to_string().contains("menu does not exist: ghost_menu"));
        Ok(())
    }

    #[test]
    fn parent_must_exist_in_the_same_menu() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        store.add_menu(&new_menu("footer_menu"))?;
        let footer_root = store.add_entry(new_entry("footer_menu", "Contacts", "/contacts/", 1))?;

        let Err(err) = store.add_entry(NewMenuEntry {
            parent_id: Some(footer_root.id),
            ..new_entry("main_menu", "Stray", "/stray/", 1)
        }) else {
            return Err(anyhow!("expected cross-menu parent to be rejected"));
        };
        assert!(err.to_string().contains("belongs to a different menu"));

        let Err(err) = store.add_entry(NewMenuEntry {
            parent_id: Some(MenuEntryId(4242)),
            ..new_entry("main_menu", "Orphan", "/orphan/", 1)
        }) else {
            return Err(anyhow!("expected missing parent to be rejected"));
        };
        assert!(err.to_string().contains("parent entry does not exist: 4242"));
        Ok(())
    }

    #[test]
    fn invalid_entry_is_rejected_before_writing() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        let Err(err) = store.add_entry(new_entry("main_menu", "", "/", 1)) else {
            return Err(anyhow!("expected untitled entry to be rejected"));
        };
        assert!(err.to_string().contains("entry title MUST be non-empty"));
        assert!(store.fetch_entries("main_menu")?.is_empty());
        Ok(())
    }

    #[test]
    fn deleting_entry_removes_its_subtree() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        let dogs = store.add_entry(new_entry("main_menu", "Dogs", "/dogs/", 1))?;
        let breeds = store.add_entry(child(&dogs, "Breeds", "/breeds/", 1))?;
        store.add_entry(child(&breeds, "Terriers", "/breeds/terriers/", 1))?;
        let about = store.add_entry(new_entry("main_menu", "About", "/about/", 2))?;

        assert!(store.delete_entry(dogs.id)?);
        let ids = store.fetch_entries("main_menu")?.into_iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![about.id]);
        assert!(!store.delete_entry(dogs.id)?);
        Ok(())
    }

    #[test]
    fn deleting_menu_removes_its_entries() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("main_menu"))?;
        store.add_entry(new_entry("main_menu", "Home", "/", 1))?;

        assert!(store.delete_menu("main_menu")?);
        assert!(store.list_menus()?.is_empty());
        let remaining = store
            .conn
            .query_row("SELECT COUNT(*) FROM menu_entries", [], |row| row.get::<_, i64>(0))?;
        assert_eq!(remaining, 0);
        Ok(())
    }

    #[test]
    fn sqlite_constraints_enforce_foreign_keys() -> Result<()> {
        let store = migrated_store()?;
        let result = store.conn.execute(
            "INSERT INTO menu_entries(menu_id, title, url, named_url, ord)
             VALUES (999, 'x', '', '', 0)",
            [],
        );
        assert!(result.is_err());

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, 1);
        Ok(())
    }

    #[test]
    fn seeding_creates_default_menus_once() -> Result<()> {
        let mut store = migrated_store()?;
        let first = store.seed_default_menus()?;
        assert_eq!(first.seeded_menus, vec!["main_menu".to_string(), "footer_menu".to_string()]);
        assert!(first.skipped_menus.is_empty());
        assert_eq!(first.created_entries, 11);

        let second = store.seed_default_menus()?;
        assert!(second.seeded_menus.is_empty());
        assert_eq!(second.skipped_menus.len(), 2);
        assert_eq!(second.created_entries, 0);
        assert_eq!(store.fetch_entries("main_menu")?.len(), 9);
        Ok(())
    }

    #[test]
    fn seeded_main_menu_resolves_about_page() -> Result<()> {
        let mut store = migrated_store()?;
        store.seed_default_menus()?;

        let forest = resolve_menu(&store, &RouteTable::site_defaults(), "main_menu", "/about/")?;
        let roots = forest.roots().collect::<Vec<_>>();
        let titles = roots.iter().map(|node| node.title()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Home", "Dogs", "Information"]);

        // dogs:dog_list is not a registered route and the seed has no static URL.
        assert_eq!(roots[1].resolved_url(), NO_OP_URL);
        assert!(!roots[1].is_expanded());

        let information = roots[2];
        assert_eq!(information.resolved_url(), "/about/");
        assert!(information.is_active());
        assert!(information.is_expanded());
        let children = information.children().collect::<Vec<_>>();
        assert!(children[0].is_active());
        assert!(!children[1].is_active());
        assert!(!children[2].is_active());
        assert_eq!(store.fetch_query_count(), 1);
        Ok(())
    }

    #[test]
    fn fifty_entry_menu_resolves_with_one_query() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("wide_menu"))?;
        let mut parents: Vec<MenuEntry> = Vec::new();
        for index in 0..50 {
            let parent = if index % 5 == 0 { None } else { parents.last().cloned() };
            let title = format!("Item {index}");
            let url = format!("/items/{index}/");
            let request = NewMenuEntry {
                parent_id: parent.map(|entry| entry.id),
                ..new_entry("wide_menu", &title, &url, index)
            };
            parents.push(store.add_entry(request)?);
        }

        let forest = draw_menu(&store, &RouteTable::new(), "wide_menu", "/items/49/");
        assert_eq!(forest.len(), 50);
        assert_eq!(forest.roots().len(), 10);
        assert_eq!(forest.active_ids().len(), 5);
        assert_eq!(store.fetch_query_count(), 1);
        Ok(())
    }

    #[test]
    fn store_failure_surfaces_as_store_error() -> Result<()> {
        // Unmigrated: the menus table does not exist yet.
        let store = SqliteMenuStore::open(Path::new(":memory:"))?;
        let Err(MenuError::Store(message)) = store.fetch("main_menu") else {
            return Err(anyhow!("expected fetch on unmigrated store to fail"));
        };
        assert!(message.contains("failed to prepare menu entry fetch"));
        assert!(draw_menu(&store, &RouteTable::new(), "main_menu", "/").is_empty());
        Ok(())
    }

    #[test]
    fn entries_nest_up_to_max_depth_and_no_deeper() -> Result<()> {
        let mut store = migrated_store()?;
        store.add_menu(&new_menu("deep_menu"))?;
        let mut deepest = store.add_entry(new_entry("deep_menu", "Level 1", "/1/", 0))?;
        for level in 2..=MAX_MENU_DEPTH {
            let url = format!("/{level}/");
            deepest = store.add_entry(child(&deepest, &format!("Level {level}"), &url, 0))?;
        }

        let Err(err) = store.add_entry(child(&deepest, "Too deep", "/too-deep/", 0)) else {
            return Err(anyhow!("expected entry past the depth limit to be rejected"));
        };
        assert!(format!("{err:#}").contains("depth MUST be at most"));
        assert_eq!(store.fetch_entries("deep_menu")?.len(), MAX_MENU_DEPTH);

        let path = format!("/{MAX_MENU_DEPTH}/");
        let forest = draw_menu(&store, &RouteTable::new(), "deep_menu", &path);
        assert_eq!(forest.roots().len(), 1);
        assert_eq!(forest.active_ids().len(), MAX_MENU_DEPTH);
        Ok(())
    }

    #[test]
    fn open_existing_does_not_create_missing_database() -> Result<()> {
        let db_path = temp_db_path();
        assert!(SqliteMenuStore::open_existing(&db_path).is_err());
        assert!(!db_path.exists());
        Ok(())
    }

    #[test]
    fn schema_version_reads_without_writing() -> Result<()> {
        let db_path = temp_db_path();
        drop(SqliteMenuStore::open(&db_path)?);

        let store = SqliteMenuStore::open_existing(&db_path)?;
        assert_eq!(store.schema_version()?, 0);
        let Err(err) = store.ensure_current_schema() else {
            return Err(anyhow!("expected unmigrated database to be refused"));
        };
        assert!(format!("{err:#}").contains("run `db migrate`"));
        let tables = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get::<_, i64>(0),
        )?;
        assert_eq!(tables, 0);
        drop(store);

        let mut store = SqliteMenuStore::open(&db_path)?;
        store.migrate()?;
        drop(store);
        let store = SqliteMenuStore::open_existing(&db_path)?;
        assert_eq!(store.schema_version()?, LATEST_SCHEMA_VERSION);
        store.ensure_current_schema()?;
        assert!(store.fetch_entries("main_menu")?.is_empty());
        drop(store);

        remove_db_files(&db_path)
    }

    #[test]
    fn file_backed_store_survives_reopen() -> Result<()> {
        let db_path = temp_db_path();
        {
            let mut store = SqliteMenuStore::open(&db_path)?;
            store.migrate()?;
            store.seed_default_menus()?;
        }

        let store = SqliteMenuStore::open(&db_path)?;
        let menus = store.list_menus()?.into_iter().map(|menu| menu.name).collect::<Vec<_>>();
        assert_eq!(menus, vec!["footer_menu".to_string(), "main_menu".to_string()]);
        assert_eq!(store.fetch_entries("footer_menu")?.len(), 2);
        drop(store);

        remove_db_files(&db_path)
    }
}
