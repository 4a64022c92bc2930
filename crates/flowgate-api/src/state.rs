//! Application state wiring all services together.
//!
//! Services are generic over repository traits; AppState pins them to the
//! SQLite implementations in `flowgate-infra`.

use std::path::PathBuf;
use std::sync::Arc;

use flowgate_core::service::definition::DefinitionService;
use flowgate_core::service::request::RequestService;
use flowgate_infra::config::{load_engine_config, resolve_data_dir};
use flowgate_infra::sqlite::definition::SqliteDefinitionRepository;
use flowgate_infra::sqlite::directory::SqliteDirectoryRepository;
use flowgate_infra::sqlite::pool::{DatabasePool, database_url};
use flowgate_infra::sqlite::request::SqliteRequestRepository;
use flowgate_infra::sqlite::sla::SqliteSlaRepository;
use flowgate_types::config::EngineConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteRequestService = RequestService<
    SqliteRequestRepository,
    SqliteDefinitionRepository,
    SqliteDirectoryRepository,
    SqliteSlaRepository,
>;

pub type ConcreteDefinitionService = DefinitionService<SqliteDefinitionRepository>;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub request_service: Arc<ConcreteRequestService>,
    pub definition_service: Arc<ConcreteDefinitionService>,
    /// Direct access for directory maintenance commands.
    pub directory: SqliteDirectoryRepository,
    pub sla: SqliteSlaRepository,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let directory = SqliteDirectoryRepository::new(db_pool.clone());
        let sla = SqliteSlaRepository::new(db_pool.clone()).with_defaults(config.sla.clone());

        let definition_service = DefinitionService::new(
            SqliteDefinitionRepository::new(db_pool.clone()),
            config.max_subworkflow_depth,
        );

        let request_service = RequestService::new(
            SqliteRequestRepository::new(db_pool.clone()),
            SqliteDefinitionRepository::new(db_pool.clone()),
            directory.clone(),
            sla.clone(),
            config.clone(),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            request_service: Arc::new(request_service),
            definition_service: Arc::new(definition_service),
            directory,
            sla,
            config,
            data_dir,
        })
    }
}
