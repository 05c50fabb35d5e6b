// API route configuration

use crate::api::{auth::Auth, handlers};
use actix_web::web;

/// Reads are open; `POST /sync` sits behind the bearer guard when `sync_token` is set.
pub fn configure_routes(cfg: &mut web::ServiceConfig, sync_token: Option<String>) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/shows", web::get().to(handlers::list_shows))
        .service(
            web::resource("/sync")
                .wrap(Auth::new(sync_token))
                .route(web::post().to(handlers::trigger_sync)),
        );
}
