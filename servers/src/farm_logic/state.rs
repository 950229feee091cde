use lib_smartfarm::core::{CommandDispatcher, IngestionStatus, SnapshotAccessor};

/// Everything the HTTP handlers can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub snapshots: SnapshotAccessor,
    pub dispatcher: CommandDispatcher,
    pub ingestion: IngestionStatus,
}

impl AppState {
    pub fn new(snapshots: SnapshotAccessor, dispatcher: CommandDispatcher, ingestion: IngestionStatus) -> Self {
        Self {
            snapshots,
            dispatcher,
            ingestion,
        }
    }
}
