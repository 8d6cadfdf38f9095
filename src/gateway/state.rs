use std::sync::Arc;

use crate::storage::Repository;

/// Shared gateway state. The store is the only process-wide resource the
/// HTTP surface needs; everything else lives in the pipeline tasks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Repository>,
}

impl AppState {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }
}
