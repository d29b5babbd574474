//! HTTP API for storyloom

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::runtime::ProductionRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProductionRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ProductionRegistry>) -> Self {
        Self { registry }
    }
}
