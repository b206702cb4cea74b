//! Explicitly constructed generation runtime.
//!
//! Owns the stores, queue, gateway and background tasks. Nothing here is a
//! process-wide singleton; tests build as many runtimes as they like.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use coursegen_ai::{ContentGenerator, ModelRoute};
use coursegen_core::{SharedClock, SystemClock};

use crate::config::RuntimeConfig;
use crate::content::{ContentStore, InMemoryContentStore, PostgresContentStore};
use crate::external::HttpGenerator;
use crate::jobs::{BackoffScheduler, InMemoryJobStore, JobQueue, JobStore, PostgresJobStore};
use crate::pipeline::{
    GenerationGateway, ModelRoutes, StageContext, WorkflowService, stage_handlers,
};
use crate::rate_limit::{
    EphemeralStore, EphemeralStoreError, InMemoryEphemeralStore, InMemoryRateLimitAuditStore,
    PostgresRateLimitAuditStore, RateLimitAuditStore, RateLimitStore,
};
use crate::workers::{
    Maintenance, MaintenanceHandle, WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerStats,
};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rate-limit store: {0}")]
    Ephemeral(#[from] EphemeralStoreError),

    #[error("REDIS_URL is set but this build has no redis support")]
    RedisDisabled,

    #[error("generator client: {0}")]
    Generator(String),
}

/// Storage backends and collaborators a runtime is built from.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub content: Arc<dyn ContentStore>,
    pub jobs: Arc<dyn JobStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub audit: Arc<dyn RateLimitAuditStore>,
    pub generator: Arc<dyn ContentGenerator>,
    pub clock: SharedClock,
}

impl RuntimeDeps {
    /// Everything in memory, driven by `clock`.
    pub fn in_memory(generator: Arc<dyn ContentGenerator>, clock: SharedClock) -> Self {
        Self {
            content: Arc::new(InMemoryContentStore::new().with_clock(clock.clone())),
            jobs: InMemoryJobStore::arc(),
            ephemeral: Arc::new(InMemoryEphemeralStore::new(clock.clone())),
            audit: InMemoryRateLimitAuditStore::arc(),
            generator,
            clock,
        }
    }

    /// Postgres and Redis where configured, in-memory otherwise.
    pub async fn connect(
        config: &RuntimeConfig,
        generator: Arc<dyn ContentGenerator>,
    ) -> Result<Self, RuntimeError> {
        let clock = SystemClock::shared();
        let mut deps = Self::in_memory(generator, clock.clone());

        if let Some(url) = &config.database_url {
            let pool = crate::db::connect(url).await?;
            deps.content = Arc::new(PostgresContentStore::new(pool.clone()).with_clock(clock));
            deps.jobs = Arc::new(PostgresJobStore::new(pool.clone()));
            deps.audit = Arc::new(PostgresRateLimitAuditStore::new(pool));
            info!("using postgres for content, jobs and rate-limit audit");
        }

        if let Some(url) = &config.redis_url {
            deps.ephemeral = redis_store(url)?;
            info!("using redis for rate-limit windows");
        }
        Ok(deps)
    }
}

#[cfg(feature = "redis")]
fn redis_store(url: &str) -> Result<Arc<dyn EphemeralStore>, RuntimeError> {
    Ok(Arc::new(crate::rate_limit::RedisEphemeralStore::new(url)?))
}

#[cfg(not(feature = "redis"))]
fn redis_store(_url: &str) -> Result<Arc<dyn EphemeralStore>, RuntimeError> {
    Err(RuntimeError::RedisDisabled)
}

/// The configured HTTP generator, if `GENERATOR_BASE_URL` is set.
pub fn http_generator(
    config: &RuntimeConfig,
) -> Result<Option<Arc<dyn ContentGenerator>>, RuntimeError> {
    let Some(base_url) = &config.generator.base_url else {
        return Ok(None);
    };
    let generator = HttpGenerator::new(
        base_url.clone(),
        config.generator.api_key.clone(),
        config.generation_timeout,
    )
    .map_err(|e| RuntimeError::Generator(e.to_string()))?;
    Ok(Some(Arc::new(generator)))
}

struct Running {
    workers: WorkerPoolHandle,
    maintenance: MaintenanceHandle,
}

pub struct GenerationRuntime {
    content: Arc<dyn ContentStore>,
    rate_limits: RateLimitStore,
    queue: JobQueue,
    stages: StageContext,
    workflows: WorkflowService,
    clock: SharedClock,
    pool_config: WorkerPoolConfig,
    maintenance_interval: std::time::Duration,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for GenerationRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRuntime")
            .field("pool_config", &self.pool_config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl GenerationRuntime {
    pub fn new(config: &RuntimeConfig, deps: RuntimeDeps) -> Self {
        let rate_limits = RateLimitStore::new(
            deps.ephemeral,
            deps.audit,
            deps.clock.clone(),
            config.rate_limit_default_timeout,
        )
        .with_max_window(config.rate_limit_max_window);
        let backoff = BackoffScheduler::new(
            config.retry_policy(),
            config.rate_limit_floor,
            rate_limits.clone(),
        );
        let queue = JobQueue::new(
            deps.jobs,
            backoff,
            deps.clock.clone(),
            config.job_max_attempts,
        )
        .with_retention(config.retention)
        .with_lease(config.job_lease);

        let routes = ModelRoutes::new(ModelRoute::new(
            config.generator.provider.clone(),
            config.generator.model.clone(),
        ));
        let gateway = GenerationGateway::new(
            deps.generator,
            rate_limits.clone(),
            routes,
            config.generation_timeout,
        );
        let stages = StageContext::new(deps.content.clone(), gateway, deps.clock.clone());
        let workflows = WorkflowService::new(deps.content.clone(), queue.clone());

        Self {
            content: deps.content,
            rate_limits,
            queue,
            stages,
            workflows,
            clock: deps.clock,
            pool_config: WorkerPoolConfig::default()
                .with_concurrency(config.worker_concurrency)
                .with_poll_interval(config.poll_interval),
            maintenance_interval: config.maintenance_interval,
            running: Mutex::new(None),
        }
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn rate_limits(&self) -> &RateLimitStore {
        &self.rate_limits
    }

    pub fn workflows(&self) -> &WorkflowService {
        &self.workflows
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// A pool with every stage handler registered. Not spawned.
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.queue.clone(), self.content.clone())
            .with_handlers(stage_handlers(&self.stages))
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.queue.clone(),
            self.rate_limits.clone(),
            self.content.clone(),
        )
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// Spawn the worker pool and the maintenance loop. No-op when running.
    ///
    /// The first maintenance pass runs immediately and takes back jobs left
    /// active by a previous process once their lease has run out.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            warn!("generation runtime already started");
            return;
        }
        *running = Some(Running {
            workers: self.worker_pool().spawn(self.pool_config.clone()),
            maintenance: self.maintenance().spawn(self.maintenance_interval),
        });
        info!(concurrency = self.pool_config.concurrency, "generation runtime started");
    }

    /// Stop background tasks, letting in-flight jobs finish.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().unwrap().take() else {
            return;
        };
        running.workers.shutdown().await;
        running.maintenance.shutdown().await;
        info!("generation runtime stopped");
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.workers.stats())
    }
}
