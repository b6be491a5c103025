use crate::config::Config;
use crate::llm_client::ExtractionClient;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm_client: Arc<ExtractionClient>,
    /// Bounds how many extractions are in flight at once.
    pub extraction_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Arc<Config>, http_client: Arc<reqwest::Client>) -> Self {
        let llm_client = Arc::new(ExtractionClient::new(http_client, config.clone()));
        let extraction_slots = Arc::new(Semaphore::new(config.max_concurrent_extractions));
        Self { config, llm_client, extraction_slots }
    }
}
