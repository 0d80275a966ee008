use std::sync::Arc;

use crate::analytics::AnalyticsSink;
use crate::connection::ConnectionManager;
use crate::images::ImageStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<ConnectionManager>,
    pub images: Arc<dyn ImageStore>,
    pub analytics: Arc<dyn AnalyticsSink>,
}
