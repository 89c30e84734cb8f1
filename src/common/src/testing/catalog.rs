use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::{CatalogError, CatalogProvider, ExportCatalog};
use crate::error::RelayError;
use crate::model::{ExportDefinition, ResultSet, Route, TransferDestination};

#[derive(Debug, Clone)]
struct RouteRule {
    export_table_id: i64,
    destination_id: i64,
    priority: i32,
    is_active: bool,
}

#[derive(Debug, Default)]
struct State {
    definitions: Vec<ExportDefinition>,
    tables: HashMap<i64, ResultSet>,
    destinations: Vec<(TransferDestination, bool)>,
    rules: Vec<RouteRule>,
    failing_queries: HashSet<i64>,
    failing_updates: HashSet<i64>,
    unavailable: bool,
    closed: bool,
    exports_recorded: Vec<(i64, DateTime<Utc>, String)>,
}

/// Catalog kept in memory, with failure injection for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<State>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("catalog state poisoned")
    }

    /// Register a definition with the rows its query returns.
    pub fn add_definition(&self, definition: ExportDefinition, rows: ResultSet) {
        let mut state = self.state();
        state.tables.insert(definition.id, rows);
        state.definitions.push(definition);
    }

    pub fn add_destination(&self, destination: TransferDestination, is_active: bool) {
        self.state().destinations.push((destination, is_active));
    }

    pub fn add_route(
        &self,
        export_table_id: i64,
        destination_id: i64,
        priority: i32,
        is_active: bool,
    ) {
        self.state().rules.push(RouteRule {
            export_table_id,
            destination_id,
            priority,
            is_active,
        });
    }

    /// Make the export query of a definition fail.
    pub fn fail_query(&self, definition_id: i64) {
        self.state().failing_queries.insert(definition_id);
    }

    /// Make the bookkeeping update of a definition fail.
    pub fn fail_update(&self, definition_id: i64) {
        self.state().failing_updates.insert(definition_id);
    }

    /// Make every listing call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn definition(&self, id: i64) -> Option<ExportDefinition> {
        self.state().definitions.iter().find(|d| d.id == id).cloned()
    }

    pub fn recorded_exports(&self) -> Vec<(i64, DateTime<Utc>, String)> {
        self.state().exports_recorded.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl ExportCatalog for InMemoryCatalog {
    async fn active_definitions(&self) -> Result<Vec<ExportDefinition>, CatalogError> {
        let state = self.state();
        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog offline".to_string()));
        }
        Ok(state
            .definitions
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect())
    }

    async fn fetch_rows(&self, definition: &ExportDefinition) -> Result<ResultSet, CatalogError> {
        let state = self.state();
        if state.failing_queries.contains(&definition.id) {
            return Err(CatalogError::Unavailable(format!(
                "query for {} failed",
                definition.qualified_name()
            )));
        }
        state
            .tables
            .get(&definition.id)
            .cloned()
            .ok_or(CatalogError::DefinitionNotFound(definition.id))
    }

    async fn record_export(
        &self,
        definition_id: i64,
        exported_at: DateTime<Utc>,
        filename: &str,
    ) -> Result<(), CatalogError> {
        let mut state = self.state();
        if state.failing_updates.contains(&definition_id) {
            return Err(CatalogError::Unavailable("update rejected".to_string()));
        }
        let definition = state
            .definitions
            .iter_mut()
            .find(|d| d.id == definition_id)
            .ok_or(CatalogError::DefinitionNotFound(definition_id))?;
        definition.filename = Some(filename.to_string());
        definition.last_exported_at = Some(exported_at);
        state
            .exports_recorded
            .push((definition_id, exported_at, filename.to_string()));
        Ok(())
    }

    async fn eligible_routes(&self) -> Result<Vec<Route>, CatalogError> {
        let state = self.state();
        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog offline".to_string()));
        }

        let mut routes: Vec<Route> = state
            .rules
            .iter()
            .filter(|rule| rule.is_active)
            .filter_map(|rule| {
                let definition = state
                    .definitions
                    .iter()
                    .find(|d| d.id == rule.export_table_id && d.is_active)?;
                let filename = definition.filename.clone()?;
                let (destination, _) = state
                    .destinations
                    .iter()
                    .find(|(d, active)| d.id == rule.destination_id && *active)?;
                Some(Route {
                    export_table_id: definition.id,
                    filename,
                    priority: rule.priority,
                    destination: destination.clone(),
                })
            })
            .collect();
        routes.sort_by_key(|r| (r.priority, r.export_table_id, r.destination.id));
        Ok(routes)
    }

    async fn close(&self) {
        self.state().closed = true;
    }
}

/// Provider handing out the same catalog on every pass.
#[derive(Clone)]
pub struct StaticCatalogProvider {
    catalog: Arc<dyn ExportCatalog>,
}

impl StaticCatalogProvider {
    pub fn new(catalog: Arc<dyn ExportCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalogProvider {
    async fn open(&self) -> Result<Arc<dyn ExportCatalog>, RelayError> {
        Ok(self.catalog.clone())
    }
}

/// Provider that can never connect.
#[derive(Debug, Clone, Default)]
pub struct FailingCatalogProvider;

#[async_trait]
impl CatalogProvider for FailingCatalogProvider {
    async fn open(&self) -> Result<Arc<dyn ExportCatalog>, RelayError> {
        Err(RelayError::connection("catalog", "connection refused"))
    }
}
