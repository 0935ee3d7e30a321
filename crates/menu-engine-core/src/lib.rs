use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Effective URL of an entry that has no usable target.
pub const NO_OP_URL: &str = "#";

pub const MAX_MENU_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_STATIC_URL_LEN: usize = 200;
pub const MAX_ROUTE_NAME_LEN: usize = 100;
/// Deepest nesting a menu may have; roots sit at depth 1.
pub const MAX_MENU_DEPTH: usize = 64;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MenuError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ResolutionError {
    #[error("unknown route name: {0}")]
    UnknownRoute(String),
    #[error("route {route_name} requires parameters [{}]", .parameters.join(", "))]
    MissingParameters { route_name: String, parameters: Vec<String> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MenuEntryId(pub i64);

impl Display for MenuEntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Menu {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MenuEntry {
    pub id: MenuEntryId,
    pub menu_name: String,
    pub parent_id: Option<MenuEntryId>,
    pub title: String,
    pub static_url: Option<String>,
    pub route_name: Option<String>,
    pub order: i32,
}

impl MenuEntry {
    /// Literal URL, ignoring empty values.
    #[must_use]
    pub fn literal_url(&self) -> Option<&str> {
        non_empty(self.static_url.as_deref())
    }

    /// Symbolic route name, ignoring empty values.
    #[must_use]
    pub fn named_route(&self) -> Option<&str> {
        non_empty(self.route_name.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Sort entries the way every [`MenuStore`] must return them: `order` asc, then `id` asc.
pub fn sort_entries(entries: &mut [MenuEntry]) {
    entries.sort_by(|lhs, rhs| lhs.order.cmp(&rhs.order).then_with(|| lhs.id.cmp(&rhs.id)));
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewMenu {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewMenu {
    /// Validate a menu before it is created.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the name is empty or too long.
    pub fn validate(&self) -> Result<(), MenuError> {
        validate_menu_name(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewMenuEntry {
    pub menu_name: String,
    #[serde(default)]
    pub parent_id: Option<MenuEntryId>,
    pub title: String,
    #[serde(default)]
    pub static_url: Option<String>,
    #[serde(default)]
    pub route_name: Option<String>,
    #[serde(default)]
    pub order: i32,
}

impl NewMenuEntry {
    /// Validate an entry before it is persisted.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the menu name or title is missing, or when
    /// any field exceeds its column width.
    pub fn validate(&self) -> Result<(), MenuError> {
        validate_menu_name(&self.menu_name)?;

        if self.title.trim().is_empty() {
            return Err(MenuError::Validation("entry title MUST be non-empty".to_string()));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(MenuError::Validation(format!(
                "entry title MUST be at most {MAX_TITLE_LEN} characters"
            )));
        }
        if let Some(static_url) = &self.static_url {
            if static_url.chars().count() > MAX_STATIC_URL_LEN {
                return Err(MenuError::Validation(format!(
                    "static_url MUST be at most {MAX_STATIC_URL_LEN} characters"
                )));
            }
        }
        if let Some(route_name) = &self.route_name {
            if route_name.chars().count() > MAX_ROUTE_NAME_LEN {
                return Err(MenuError::Validation(format!(
                    "route_name MUST be at most {MAX_ROUTE_NAME_LEN} characters"
                )));
            }
        }

        Ok(())
    }

    /// Collapse empty targets to `None`; an entry with neither target gets the no-op URL.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.static_url = self.static_url.filter(|value| !value.is_empty());
        self.route_name = self.route_name.filter(|value| !value.is_empty());
        if self.static_url.is_none() && self.route_name.is_none() {
            self.static_url = Some(NO_OP_URL.to_string());
        }
        self
    }
}

fn validate_menu_name(name: &str) -> Result<(), MenuError> {
    if name.trim().is_empty() {
        return Err(MenuError::Validation("menu name MUST be non-empty".to_string()));
    }
    if name.chars().count() > MAX_MENU_NAME_LEN {
        return Err(MenuError::Validation(format!(
            "menu name MUST be at most {MAX_MENU_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Read-only source of persisted menu entries.
pub trait MenuStore {
    /// Return every entry of `menu_name` ordered by `order`, then `id`.
    ///
    /// Implementations MUST answer with a single backing-store query and return an empty
    /// vector for unknown or empty menus.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the backing store cannot be read.
    fn fetch(&self, menu_name: &str) -> Result<Vec<MenuEntry>, MenuError>;
}

/// In-memory [`MenuStore`] for fixtures and embedding callers that already hold entries.
#[derive(Debug, Default)]
pub struct StaticMenuStore {
    entries: Vec<MenuEntry>,
    fetches: AtomicUsize,
}

impl StaticMenuStore {
    #[must_use]
    pub fn new(entries: Vec<MenuEntry>) -> Self {
        Self { entries, fetches: AtomicUsize::new(0) }
    }

    /// Number of `fetch` calls served so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl MenuStore for StaticMenuStore {
    fn fetch(&self, menu_name: &str) -> Result<Vec<MenuEntry>, MenuError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut entries = self
            .entries
            .iter()
            .filter(|entry| entry.menu_name == menu_name)
            .cloned()
            .collect::<Vec<_>>();
        sort_entries(&mut entries);
        Ok(entries)
    }
}

/// Reverses a symbolic route name into a concrete path.
pub trait RouteResolver {
    /// # Errors
    /// Returns [`ResolutionError`] when the name is unknown or cannot be reversed
    /// without arguments.
    fn reverse(&self, route_name: &str) -> Result<String, ResolutionError>;
}

/// Named-route registry, `name -> path pattern`.
///
/// Patterns may carry `<name>` or `<converter:name>` placeholders. Menu entries never
/// supply arguments, so reversing a parameterized route always fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RouteTable {
    #[serde(default)]
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes served by the dog-matching site.
    #[must_use]
    pub fn site_defaults() -> Self {
        Self::new()
            .with_route("dogs:home", "/")
            .with_route("dogs:register", "/register/")
            .with_route("dogs:profile", "/profile/<int:dog_id>/")
            .with_route("dogs:matches", "/matches/")
            .with_route("dogs:about", "/about/")
            .with_route("dogs:breeds", "/breeds/")
            .with_route("dogs:events", "/events/")
            .with_route("dogs:tips", "/tips/")
    }

    #[must_use]
    pub fn with_route(mut self, route_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.insert(route_name, pattern);
        self
    }

    /// Register or replace a route, returning the previous pattern.
    pub fn insert(
        &mut self,
        route_name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Option<String> {
        self.routes.insert(route_name.into(), pattern.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Check every pattern is an absolute path with well-formed placeholders.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] naming the first offending route.
    pub fn validate(&self) -> Result<(), MenuError> {
        for (route_name, pattern) in &self.routes {
            if route_name.trim().is_empty() {
                return Err(MenuError::Validation("route name MUST be non-empty".to_string()));
            }
            if !pattern.starts_with('/') {
                return Err(MenuError::Validation(format!(
                    "route {route_name} pattern MUST start with '/': {pattern}"
                )));
            }
            if pattern.matches('<').count() != pattern.matches('>').count() {
                return Err(MenuError::Validation(format!(
                    "route {route_name} pattern has unbalanced placeholders: {pattern}"
                )));
            }
            if pattern_parameters(pattern).iter().any(String::is_empty) {
                return Err(MenuError::Validation(format!(
                    "route {route_name} pattern has an unnamed placeholder: {pattern}"
                )));
            }
        }
        Ok(())
    }
}

impl RouteResolver for RouteTable {
    fn reverse(&self, route_name: &str) -> Result<String, ResolutionError> {
        let Some(pattern) = self.routes.get(route_name) else {
            return Err(ResolutionError::UnknownRoute(route_name.to_string()));
        };

        let parameters = pattern_parameters(pattern);
        if !parameters.is_empty() {
            return Err(ResolutionError::MissingParameters {
                route_name: route_name.to_string(),
                parameters,
            });
        }

        Ok(pattern.clone())
    }
}

fn pattern_parameters(pattern: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let mut rest = pattern;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let inner = &after[..end];
        let name = inner.rsplit_once(':').map_or(inner, |(_, name)| name);
        parameters.push(name.trim().to_string());
        rest = &after[end + 1..];
    }
    parameters
}

/// An entry paired with its effective URL.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolvedEntry {
    pub entry: MenuEntry,
    pub url: String,
}

/// Applies the route -> static URL -> no-op fallback chain.
pub struct UrlResolver<'a, R: RouteResolver + ?Sized> {
    routes: &'a R,
}

impl<'a, R: RouteResolver + ?Sized> UrlResolver<'a, R> {
    #[must_use]
    pub fn new(routes: &'a R) -> Self {
        Self { routes }
    }

    /// Effective URL for one entry. Never fails.
    #[must_use]
    pub fn resolve(&self, entry: &MenuEntry) -> String {
        if let Some(route_name) = entry.named_route() {
            match self.routes.reverse(route_name) {
                Ok(path) => return path,
                Err(err) => debug!(
                    entry_id = %entry.id,
                    route_name,
                    error = %err,
                    "route reversal failed; falling back to static url"
                ),
            }
        }

        entry.literal_url().map_or_else(|| NO_OP_URL.to_string(), str::to_string)
    }

    #[must_use]
    pub fn resolve_all(&self, entries: Vec<MenuEntry>) -> Vec<ResolvedEntry> {
        entries
            .into_iter()
            .map(|entry| {
                let url = self.resolve(&entry);
                ResolvedEntry { entry, url }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct MenuNode {
    entry: MenuEntry,
    resolved_url: String,
    children: Vec<usize>,
    is_active: bool,
    is_expanded: bool,
}

/// Node storage shared by the unannotated and annotated forests. Children are arena
/// indices in sibling order; the builder guarantees the links are acyclic.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
struct Arena {
    nodes: Vec<MenuNode>,
    roots: Vec<usize>,
    index_by_id: HashMap<MenuEntryId, usize>,
}

impl Arena {
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = self.roots.iter().rev().copied().collect::<Vec<_>>();
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        order
    }

    fn position(&self, id: MenuEntryId) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }

    fn ids(&self, indices: &[usize]) -> Vec<MenuEntryId> {
        indices.iter().map(|&index| self.nodes[index].entry.id).collect()
    }
}

/// Linked but not yet annotated menu tree.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MenuForest(Arena);

impl MenuForest {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.nodes.is_empty()
    }

    #[must_use]
    pub fn root_ids(&self) -> Vec<MenuEntryId> {
        self.0.ids(&self.0.roots)
    }

    /// Children of `id` in sibling order, or `None` when `id` is not in the forest.
    #[must_use]
    pub fn children_ids(&self, id: MenuEntryId) -> Option<Vec<MenuEntryId>> {
        let index = self.0.position(id)?;
        Some(self.0.ids(&self.0.nodes[index].children))
    }

    /// Every node reachable from the roots, depth-first in sibling order.
    #[must_use]
    pub fn preorder_ids(&self) -> Vec<MenuEntryId> {
        self.0.ids(&self.0.preorder())
    }
}

/// Link resolved entries into a forest.
///
/// Entries whose parent is missing from the input are placed among the roots. Sibling
/// order follows input order. Duplicate ids keep their first occurrence, and a parent
/// chain that loops back on itself is cut so its last-visited member becomes a root.
#[must_use]
pub fn build_forest(resolved: Vec<ResolvedEntry>) -> MenuForest {
    let mut index_by_id: HashMap<MenuEntryId, usize> = HashMap::with_capacity(resolved.len());
    let mut nodes: Vec<MenuNode> = Vec::with_capacity(resolved.len());

    for ResolvedEntry { entry, url } in resolved {
        if index_by_id.contains_key(&entry.id) {
            warn!(entry_id = %entry.id, "duplicate menu entry id; keeping first occurrence");
            continue;
        }
        index_by_id.insert(entry.id, nodes.len());
        nodes.push(MenuNode {
            entry,
            resolved_url: url,
            children: Vec::new(),
            is_active: false,
            is_expanded: false,
        });
    }

    let mut parents = nodes
        .iter()
        .map(|node| {
            let parent_id = node.entry.parent_id?;
            let parent = index_by_id.get(&parent_id).copied();
            if parent.is_none() {
                debug!(
                    entry_id = %node.entry.id,
                    parent_id = %parent_id,
                    "parent entry not found; placing entry at root"
                );
            }
            parent
        })
        .collect::<Vec<_>>();
    break_parent_cycles(&nodes, &mut parents);
    cap_nesting_depth(&nodes, &mut parents);

    let mut roots = Vec::new();
    for (index, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => nodes[*parent].children.push(index),
            None => roots.push(index),
        }
    }

    MenuForest(Arena { nodes, roots, index_by_id })
}

fn break_parent_cycles(nodes: &[MenuNode], parents: &mut [Option<usize>]) {
    #[derive(Clone, Copy, Eq, PartialEq)]
    enum Visit {
        New,
        OnPath,
        Done,
    }

    let mut state = vec![Visit::New; parents.len()];
    let mut path = Vec::new();

    for start in 0..parents.len() {
        if state[start] != Visit::New {
            continue;
        }

        let mut current = start;
        loop {
            state[current] = Visit::OnPath;
            path.push(current);
            let Some(parent) = parents[current] else {
                break;
            };
            match state[parent] {
                Visit::New => current = parent,
                Visit::OnPath => {
                    warn!(
                        entry_id = %nodes[current].entry.id,
                        parent_id = %nodes[parent].entry.id,
                        "menu parent links form a cycle; placing entry at root"
                    );
                    parents[current] = None;
                    break;
                }
                Visit::Done => break,
            }
        }

        for index in path.drain(..) {
            state[index] = Visit::Done;
        }
    }
}

/// Cut any entry nested deeper than [`MAX_MENU_DEPTH`] to a root. `parents` must be
/// acyclic.
fn cap_nesting_depth(nodes: &[MenuNode], parents: &mut [Option<usize>]) {
    // 0 marks a depth not computed yet.
    let mut depth = vec![0_usize; parents.len()];
    let mut path = Vec::new();

    for start in 0..parents.len() {
        let mut current = start;
        let mut above = 0;
        loop {
            if depth[current] != 0 {
                above = depth[current];
                break;
            }
            path.push(current);
            match parents[current] {
                Some(parent) => current = parent,
                None => break,
            }
        }

        for &index in path.iter().rev() {
            let mut level = above + 1;
            if level > MAX_MENU_DEPTH {
                warn!(
                    entry_id = %nodes[index].entry.id,
                    max_depth = MAX_MENU_DEPTH,
                    "menu entry nested too deep; placing entry at root"
                );
                parents[index] = None;
                level = 1;
            }
            depth[index] = level;
            above = level;
        }
        path.clear();
    }
}

/// Mark the active path for `current_path`.
///
/// A node is active when its URL equals `current_path` exactly or any descendant is
/// active; expansion mirrors activity. Each node is visited once, children before
/// parents.
#[must_use]
pub fn annotate(forest: MenuForest, current_path: &str) -> AnnotatedForest {
    let MenuForest(mut arena) = forest;
    let order = arena.preorder();

    for &index in order.iter().rev() {
        let child_active =
            arena.nodes[index].children.iter().any(|&child| arena.nodes[child].is_active);
        let node = &mut arena.nodes[index];
        node.is_active = child_active || node.resolved_url == current_path;
        node.is_expanded = node.is_active;
    }

    AnnotatedForest(arena)
}

/// Render-ready menu: every node carries its URL, activity and expansion.
///
/// Only [`annotate`] produces a populated forest.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AnnotatedForest(Arena);

impl AnnotatedForest {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of nodes, at any depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.nodes.is_empty()
    }

    pub fn roots(&self) -> impl ExactSizeIterator<Item = RenderNode<'_>> + '_ {
        self.0.roots.iter().map(move |&index| RenderNode { forest: self, index })
    }

    #[must_use]
    pub fn get(&self, id: MenuEntryId) -> Option<RenderNode<'_>> {
        self.0.position(id).map(|index| RenderNode { forest: self, index })
    }

    /// Depth-first traversal of every node in sibling order.
    pub fn iter(&self) -> impl Iterator<Item = RenderNode<'_>> + '_ {
        self.0.preorder().into_iter().map(move |index| RenderNode { forest: self, index })
    }

    /// Ids of active nodes, depth-first.
    #[must_use]
    pub fn active_ids(&self) -> Vec<MenuEntryId> {
        self.iter().filter(|node| node.is_active()).map(RenderNode::id).collect()
    }
}

impl Serialize for AnnotatedForest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.roots())
    }
}

/// Borrowed view of one annotated node.
#[derive(Debug, Clone, Copy)]
pub struct RenderNode<'a> {
    forest: &'a AnnotatedForest,
    index: usize,
}

impl<'a> RenderNode<'a> {
    fn node(self) -> &'a MenuNode {
        &self.forest.0.nodes[self.index]
    }

    #[must_use]
    pub fn id(self) -> MenuEntryId {
        self.node().entry.id
    }

    #[must_use]
    pub fn entry(self) -> &'a MenuEntry {
        &self.node().entry
    }

    #[must_use]
    pub fn title(self) -> &'a str {
        &self.node().entry.title
    }

    #[must_use]
    pub fn resolved_url(self) -> &'a str {
        &self.node().resolved_url
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        self.node().is_active
    }

    #[must_use]
    pub fn is_expanded(self) -> bool {
        self.node().is_expanded
    }

    pub fn children(self) -> impl ExactSizeIterator<Item = RenderNode<'a>> + 'a {
        let forest = self.forest;
        self.node().children.iter().map(move |&index| RenderNode { forest, index })
    }
}

impl Serialize for RenderNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RenderNode", 6)?;
        state.serialize_field("id", &self.id())?;
        state.serialize_field("title", self.title())?;
        state.serialize_field("url", self.resolved_url())?;
        state.serialize_field("is_active", &self.is_active())?;
        state.serialize_field("is_expanded", &self.is_expanded())?;
        state.serialize_field("children", &RenderChildren(*self))?;
        state.end()
    }
}

struct RenderChildren<'a>(RenderNode<'a>);

impl Serialize for RenderChildren<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.children())
    }
}

/// Fetch, resolve, link and annotate one named menu for `current_path`.
///
/// `current_path` is compared verbatim; normalizing trailing slashes or query strings is
/// the caller's job.
///
/// # Errors
/// Returns [`MenuError::Store`] when the store fetch fails. Route and linkage problems
/// are absorbed and never returned.
pub fn resolve_menu<S, R>(
    store: &S,
    routes: &R,
    menu_name: &str,
    current_path: &str,
) -> Result<AnnotatedForest, MenuError>
where
    S: MenuStore + ?Sized,
    R: RouteResolver + ?Sized,
{
    let entries = store.fetch(menu_name)?;
    if entries.is_empty() {
        debug!(menu_name, "menu has no entries");
        return Ok(AnnotatedForest::empty());
    }

    let resolved = UrlResolver::new(routes).resolve_all(entries);
    let forest = annotate(build_forest(resolved), current_path);
    debug!(
        menu_name,
        current_path,
        nodes = forest.len(),
        active = forest.active_ids().len(),
        "resolved menu"
    );
    Ok(forest)
}

/// Render-boundary adapter around [`resolve_menu`]: a failing store yields an empty menu
/// so navigation can never take the page down.
#[must_use]
pub fn draw_menu<S, R>(
    store: &S,
    routes: &R,
    menu_name: &str,
    current_path: &str,
) -> AnnotatedForest
where
    S: MenuStore + ?Sized,
    R: RouteResolver + ?Sized,
{
    match resolve_menu(store, routes, menu_name, current_path) {
        Ok(forest) => forest,
        Err(err) => {
            warn!(menu_name, error = %err, "menu resolution failed; rendering empty menu");
            AnnotatedForest::empty()
        }
    }
}
