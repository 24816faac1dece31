use std::sync::Arc;

use crate::config::Settings;
use crate::postgres::PoolManager;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pools: Arc<PoolManager>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let pools = Arc::new(PoolManager::new(settings.database.clone()));

        Self {
            settings: Arc::new(settings),
            pools,
        }
    }
}
