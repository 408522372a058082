use std::sync::Arc;

use rebook_agent::{build_extractor, AgentRuntime, FaqError, KnowledgeBase};
use rebook_core::audit::{AuditSink, TracingAuditSink};
use rebook_core::clock::{Clock, FixedClock, SystemClock};
use rebook_core::config::AppConfig;
use rebook_core::fees::BookingPolicy;
use rebook_db::{connect_with_settings, migrations, DbPool, ReservationEngine, SqlReservationStore};
use thiserror::Error;
use tracing::info;

pub type Runtime = AgentRuntime<SqlReservationStore>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<Runtime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("extractor setup failed: {0}")]
    Extractor(#[source] anyhow::Error),
    #[error("knowledge base setup failed: {0}")]
    KnowledgeBase(#[source] FaqError),
}

pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database migrations applied"
    );

    let clock: Arc<dyn Clock> = match config.booking.reference_time {
        Some(now) => Arc::new(FixedClock(now)),
        None => Arc::new(SystemClock),
    };
    let audit_sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let engine = ReservationEngine::new(
        SqlReservationStore::new(db_pool.clone()),
        BookingPolicy::from(&config.booking),
        clock.clone(),
    )
    .with_audit_sink(audit_sink.clone());
    let extractor = build_extractor(&config.llm, clock).map_err(BootstrapError::Extractor)?;
    let knowledge_base =
        KnowledgeBase::from_config(&config.faq).map_err(BootstrapError::KnowledgeBase)?;
    let knowledge_base_entries = knowledge_base.len();

    let runtime = AgentRuntime::new(Arc::new(engine), extractor, Arc::new(knowledge_base))
        .with_audit_sink(audit_sink);
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        extractor = ?config.llm.provider,
        knowledge_base_entries,
        "agent runtime initialized"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}
