use std::sync::Arc;

use tokio::sync::mpsc;

use crate::adapters::fleet::DriverFleet;
use crate::adapters::notify::BroadcastNotifier;
use crate::adapters::repository::{MemoryPoolRepository, RideBook};
use crate::adapters::routing::StraightLineRouter;
use crate::adapters::store::MemoryStore;
use crate::config::Config;
use crate::engine::dispatch::{DispatchCollaborators, DispatchEngine};
use crate::engine::pool::{PoolCollaborators, PoolEngine};
use crate::geo::cells::H3CellIndex;
use crate::models::ride::RideEvent;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub fleet: Arc<DriverFleet>,
    pub rides: Arc<RideBook>,
    pub pool_repository: Arc<MemoryPoolRepository>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<BroadcastNotifier>,
    pub dispatch: DispatchEngine,
    pub pool: PoolEngine,
    pub event_tx: mpsc::Sender<RideEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<RideEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.service.event_queue_size.max(1));
        let metrics = Metrics::new();

        let fleet = Arc::new(DriverFleet::new(&config.matching));
        let rides = Arc::new(RideBook::new());
        let pool_repository = Arc::new(MemoryPoolRepository::new());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(
            config.service.notification_buffer_size,
        ));

        let dispatch = DispatchEngine::new(
            config,
            DispatchCollaborators {
                locator: fleet.clone(),
                store: store.clone(),
                notifier: notifier.clone(),
                rides: rides.clone(),
            },
            metrics.clone(),
        );
        let pool = PoolEngine::new(
            config.pool.clone(),
            PoolCollaborators {
                repository: pool_repository.clone(),
                routing: Arc::new(StraightLineRouter::new(config.service.average_speed_kmh)),
                cells: Arc::new(H3CellIndex::new()),
                notifier: notifier.clone(),
            },
            metrics.clone(),
        );

        (
            Self {
                fleet,
                rides,
                pool_repository,
                store,
                notifier,
                dispatch,
                pool,
                event_tx,
                metrics,
            },
            event_rx,
        )
    }
}
