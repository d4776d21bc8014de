use conveyor_core::{Broker, JobStore, Settings, StatusCache};

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub broker: Broker,
    pub cache: StatusCache,
    pub settings: Settings,
}

impl AppState {
    pub fn new(store: JobStore, broker: Broker, cache: StatusCache, settings: Settings) -> Self {
        Self {
            store,
            broker,
            cache,
            settings,
        }
    }
}
