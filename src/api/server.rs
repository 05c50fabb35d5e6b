// API server implementation using actix-web

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

use crate::api::{middleware, routes};
use crate::config::ServerConfig;
use crate::store::ShowStore;
use crate::sync::SyncService;

pub struct ApiServer {
    config: ServerConfig,
    schedule: Option<Duration>,
}

impl ApiServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            schedule: None,
        }
    }

    /// Also run a full sync every `interval` while the server is up.
    pub fn with_schedule(mut self, interval: Option<Duration>) -> Self {
        self.schedule = interval;
        self
    }

    /// Start the HTTP server and block until it shuts down.
    pub async fn run(self, store: Arc<dyn ShowStore>, sync: Arc<SyncService>) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            backend = store.backend(),
            sync_auth = self.config.sync_token.is_some(),
            "starting showtime api server"
        );

        let store_data: web::Data<dyn ShowStore> = web::Data::from(store);
        let sync_data = web::Data::from(sync.clone());
        let allowed_origins = self.config.allowed_origins.clone();
        let sync_token = self.config.sync_token.clone();

        let server = HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let token = sync_token.clone();

            App::new()
                .app_data(store_data.clone())
                .app_data(sync_data.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .configure(move |cfg| routes::configure_routes(cfg, token))
        })
        .bind(&bind_addr)
        .with_context(|| format!("failed to bind to {bind_addr}"))?
        .run();

        let scheduler = self.schedule.map(|interval| {
            tracing::info!(interval_secs = interval.as_secs(), "scheduled sync enabled");
            tokio::spawn(sync.run_every(interval))
        });

        let result = server.await.context("http server error");

        if let Some(handle) = scheduler {
            handle.abort();
        }
        tracing::info!("api server stopped");
        result
    }
}
