//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::game::TableRegistry;
use crate::store::AnyStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: AnyStore,
    pub tables: Arc<TableRegistry>,
}

impl AppState {
    /// Pick the store backend and open the configured tables.
    /// Must run inside the runtime: every table is spawned as a task.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let store = AnyStore::from_config(&config);

        let tables = Arc::new(TableRegistry::new());
        for _ in 0..config.table_count.max(1) {
            let id = tables.open(config.sim.clone(), store.clone());
            info!(table_id = %id, "Table opened");
        }

        Self {
            config,
            store,
            tables,
        }
    }
}
