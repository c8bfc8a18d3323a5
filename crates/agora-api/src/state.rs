//! Application state wiring the per-world collaborators together.
//!
//! AppState owns the process-wide pieces (config, database pool, tool
//! executor, provider, approval policy) and a registry of lazily-created
//! worlds. Each world gets its own event bus, activity tracker, approval
//! coordinator, and turn runner; the registry hands out the same handle for
//! the same world id for the lifetime of the process.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use agora_core::agent::{ScriptedProvider, TurnRunner};
use agora_core::approval::{ApprovalCoordinator, ApprovalPolicy, RequireAll};
use agora_core::event::EventBus;
use agora_core::world::ActivityTracker;
use agora_infra::config::resolve_database_url;
use agora_infra::sqlite::memory::SqliteMemoryRepository;
use agora_infra::sqlite::pool::DatabasePool;
use agora_infra::tool::ProcessToolExecutor;
use agora_types::config::AgoraConfig;

/// Concrete type aliases for the core generics pinned to infra
/// implementations.
pub type WorldCoordinator = ApprovalCoordinator<ProcessToolExecutor, SqliteMemoryRepository>;

pub type WorldRunner = TurnRunner<ScriptedProvider, ProcessToolExecutor, SqliteMemoryRepository>;

/// One wired world: bus, tracker, coordinator, runner, and the background
/// worker that picks up post-approval resumes.
pub struct WorldHandle {
    pub bus: EventBus,
    pub tracker: Arc<ActivityTracker>,
    pub coordinator: Arc<WorldCoordinator>,
    pub runner: Arc<WorldRunner>,
    resume_worker: tokio::task::JoinHandle<()>,
}

impl Drop for WorldHandle {
    fn drop(&mut self) {
        self.resume_worker.abort();
    }
}

/// Shared application state holding the world registry.
#[derive(Clone)]
pub struct AppState {
    pub config: AgoraConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub executor: Arc<ProcessToolExecutor>,
    pub memory: Arc<SqliteMemoryRepository>,
    pub provider: Arc<ScriptedProvider>,
    pub policy: Arc<dyn ApprovalPolicy>,
    worlds: Arc<DashMap<String, Arc<WorldHandle>>>,
}

impl AppState {
    /// Initialize the application state: connect to the database, build the
    /// process-wide collaborators.
    pub async fn init(data_dir: PathBuf, config: AgoraConfig) -> anyhow::Result<Self> {
        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url).await?;

        let memory = Arc::new(SqliteMemoryRepository::new(db_pool.clone()));
        let executor = Arc::new(ProcessToolExecutor::new(data_dir.join("tools")));

        // Turn backend. Replays canned turns when scripted and degrades to
        // empty turns otherwise; network providers are wired by the host
        // application, not this binary.
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));

        Ok(Self {
            config,
            data_dir,
            db_pool,
            executor,
            memory,
            provider,
            policy: Arc::new(RequireAll),
            worlds: Arc::new(DashMap::new()),
        })
    }

    /// Handle for `world_id`, wiring the world on first touch.
    pub fn world(&self, world_id: &str) -> Arc<WorldHandle> {
        self.worlds
            .entry(world_id.to_string())
            .or_insert_with(|| Arc::new(self.build_world()))
            .clone()
    }

    /// Number of worlds wired so far.
    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    fn build_world(&self) -> WorldHandle {
        let bus = EventBus::new(self.config.history_capacity);
        let tracker = Arc::new(ActivityTracker::new(bus.clone()));

        let (resume_tx, resume_rx) = mpsc::channel(16);
        let coordinator = Arc::new(ApprovalCoordinator::new(
            bus.clone(),
            tracker.clone(),
            self.executor.clone(),
            self.memory.clone(),
            self.policy.clone(),
            resume_tx,
        ));
        let runner = Arc::new(TurnRunner::new(
            bus.clone(),
            tracker.clone(),
            self.provider.clone(),
            self.executor.clone(),
            self.memory.clone(),
            coordinator.clone(),
        ));
        let resume_worker = runner.clone().spawn_resume_worker(resume_rx);

        WorldHandle {
            bus,
            tracker,
            coordinator,
            runner,
            resume_worker,
        }
    }
}
