//! Server startup: collaborator wiring, background loops and graceful
//! shutdown.

use std::sync::Arc;

use tracing::{error, info};

use tilecast_core::Config;
use tilecast_live::TemplateStore;

use crate::executor::PgQueryExecutor;
use crate::state::AppState;
use crate::store::PgTemplateStore;
use crate::{db, router};

/// Connect to PostgreSQL and build `AppState` around the real store and
/// executor. Background loops are not started.
pub async fn build_app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let pool = db::init_pg_pool(&config.postgres).await?;
    let query_pool = db::init_query_pool(&config.query, &config.postgres, &pool).await?;

    let store: Arc<dyn TemplateStore> = Arc::new(PgTemplateStore::new(pool));
    let executor = Arc::new(PgQueryExecutor::new(query_pool, config.query.max_rows));
    Ok(Arc::new(AppState::new(config, store, executor)))
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let port = config.server.port;

    let state = build_app_state(config).await?;
    state.start_background();

    let app = router::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://localhost:{}", port);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_ctrl_c().await;
            info!("shutdown requested");
            shutdown_state.shutdown().await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
