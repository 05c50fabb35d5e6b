// HTTP request handlers for API endpoints

use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::Utc;

use crate::api::models::{ErrorResponse, HealthResponse, SyncResponse};
use crate::error::SyncError;
use crate::query::{self, ShowsParams};
use crate::store::ShowStore;
use crate::sync::SyncService;

/// Health check endpoint. Always 200; reports whether the store answers.
pub async fn health_check(store: web::Data<dyn ShowStore>) -> HttpResponse {
    let database = match store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, backend = store.backend(), "health check ping failed");
            "disconnected"
        }
    };
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        database,
    })
}

/// `GET /shows`: paginated upcoming shows, optionally filtered by title and time range.
pub async fn list_shows(
    store: web::Data<dyn ShowStore>,
    params: web::Query<ShowsParams>,
) -> HttpResponse {
    let query = match params.into_inner().validate(Utc::now()) {
        Ok(q) => q,
        Err(e) => {
            return ErrorResponse::new("invalid_query", e.to_string())
                .into_http(StatusCode::BAD_REQUEST)
        }
    };

    match query::list_shows(store.get_ref(), &query).await {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            tracing::error!(error = %e, "show query failed");
            ErrorResponse::new("storage_failure", "failed to query shows")
                .into_http(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `POST /sync`: stage the current snapshot and reconcile, synchronously.
pub async fn trigger_sync(service: web::Data<SyncService>) -> HttpResponse {
    tracing::info!("sync requested over http");
    match service.run().await {
        Ok(report) => HttpResponse::Ok().json(SyncResponse::from(report)),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "sync request failed");
            ErrorResponse::new(e.kind(), e.to_string()).into_http(sync_error_status(&e))
        }
    }
}

/// Failed runs are a 500 with the failure kind in the body; only an overlapping run differs.
pub fn sync_error_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::SourceUnavailable(_)
        | SyncError::MalformedRecord { .. }
        | SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SyncError::AlreadyRunning => StatusCode::CONFLICT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::configure_routes;
    use crate::chunk::BatchSize;
    use crate::error::StoreError;
    use crate::model::{ApiShow, Loose, ShowKey, ShowPayload, StagedShow};
    use crate::source::ShowSource;
    use crate::store::{CanonicalWrite, MemoryStore};
    use actix_web::{test as actix_test, App};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::Value;
    use std::sync::Arc;

    struct StaticSource(Result<Vec<ApiShow>, &'static str>);

    #[async_trait]
    impl ShowSource for StaticSource {
        fn describe(&self) -> String {
            "static".into()
        }
        async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
            match &self.0 {
                Ok(shows) => Ok(shows.clone()),
                Err(reason) => Err(SyncError::SourceUnavailable((*reason).to_string())),
            }
        }
    }

    fn staged(movie: &str, time: chrono::DateTime<Utc>, title: &str) -> StagedShow {
        StagedShow {
            key: ShowKey {
                movie_id: movie.into(),
                cinema_id: 1,
                screen_name: "Audi 1".into(),
                show_time: time,
            },
            payload: ShowPayload {
                title: title.into(),
                rating: None,
                length: Some(120),
                format: None,
                genre: None,
                is_active: None,
                image_url: None,
            },
        }
    }

    async fn seed(store: &MemoryStore, shows: Vec<StagedShow>) {
        let writes: Vec<CanonicalWrite> = shows.into_iter().map(CanonicalWrite::Insert).collect();
        store.apply_canonical(&writes).await.unwrap();
    }

    fn service(store: Arc<MemoryStore>, source: StaticSource) -> web::Data<SyncService> {
        web::Data::new(SyncService::new(store, Arc::new(source), BatchSize::default()))
    }

    macro_rules! app {
        ($store:expr, $service:expr, $token:expr) => {{
            let store: Arc<dyn ShowStore> = $store.clone();
            let token: Option<String> = $token;
            actix_test::init_service(
                App::new()
                    .app_data(web::Data::from(store))
                    .app_data($service.clone())
                    .configure(move |cfg| configure_routes(cfg, token.clone())),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn third_page_of_45_returns_last_5() {
        let store = Arc::new(MemoryStore::new());
        let base = Utc::now() + Duration::days(1);
        seed(
            &store,
            (0..45)
                .map(|i| staged("M1", base + Duration::minutes(i), "Film"))
                .collect(),
        )
        .await;
        let app = app!(store, service(store.clone(), StaticSource(Ok(vec![]))), None);

        let req = actix_test::TestRequest::get()
            .uri("/shows?page=3&limit=20")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["total"], 45);
        assert_eq!(body["page"], 3);
        assert_eq!(body["limit"], 20);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 5);
        assert!(data[0]["movieID"].is_string());
        assert!(data[0].get("movieId").is_none());
        assert!(data[0]["showTime"].is_string());
    }

    #[actix_web::test]
    async fn past_shows_hidden_unless_from_is_given() {
        let store = Arc::new(MemoryStore::new());
        let past = Utc.with_ymd_and_hms(2020, 3, 1, 18, 0, 0).unwrap();
        seed(
            &store,
            vec![
                staged("OLD", past, "Yesterday"),
                staged("NEW", Utc::now() + Duration::days(2), "Tomorrow"),
            ],
        )
        .await;
        let app = app!(store, service(store.clone(), StaticSource(Ok(vec![]))), None);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/shows").to_request()).await;
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["title"], "Tomorrow");

        let req = actix_test::TestRequest::get()
            .uri("/shows?from=2020-01-01")
            .to_request();
        let body: Value = actix_test::read_body_json(actix_test::call_service(&app, req).await).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["data"][0]["title"], "Yesterday");
    }

    #[actix_web::test]
    async fn invalid_page_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store, service(store.clone(), StaticSource(Ok(vec![]))), None);

        for uri in ["/shows?page=0", "/shows?limit=abc", "/shows?limit=500", "/shows?from=yesterday"] {
            let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body: Value = actix_test::read_body_json(resp).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["error"]["kind"], "invalid_query");
        }
    }

    #[actix_web::test]
    async fn sync_reports_counts() {
        let store = Arc::new(MemoryStore::new());
        let shows = vec![ApiShow {
            show_time: Some(Loose::Text("2030-05-01T19:30:00".into())),
            screen_name: Some(Loose::Text("Audi 2".into())),
            movie_id: Some(Loose::Text("M9".into())),
            title: Some(Loose::Text("Premiere".into())),
            cinema_id: Some(Loose::Text("12".into())),
            ..ApiShow::default()
        }];
        let app = app!(store, service(store.clone(), StaticSource(Ok(shows))), None);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::post().uri("/sync").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["staging"]["staged"], 1);
        assert_eq!(body["reconcile"]["inserted"], 1);
        assert_eq!(store.canonical_rows().len(), 1);
    }

    #[actix_web::test]
    async fn source_outage_is_server_error_with_kind() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store, service(store.clone(), StaticSource(Err("connection reset"))), None);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::post().uri("/sync").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["kind"], "source_unavailable");
    }

    #[actix_web::test]
    async fn malformed_snapshot_is_server_error_with_kind() {
        let store = Arc::new(MemoryStore::new());
        let shows = vec![ApiShow {
            title: Some(Loose::Text("No key".into())),
            ..ApiShow::default()
        }];
        let app = app!(store, service(store.clone(), StaticSource(Ok(shows))), None);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::post().uri("/sync").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "malformed_record");
        assert!(store.canonical_rows().is_empty());
    }

    #[actix_web::test]
    async fn to_in_the_past_without_from_is_an_empty_page() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            vec![staged("NEW", Utc::now() + Duration::days(2), "Tomorrow")],
        )
        .await;
        let app = app!(store, service(store.clone(), StaticSource(Ok(vec![]))), None);

        let req = actix_test::TestRequest::get()
            .uri("/shows?to=2020-01-01")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["total"], 0);
        assert!(body["data"].as_array().unwrap().is_empty());

        let req = actix_test::TestRequest::get()
            .uri("/shows?from=2020-01-02&to=2020-01-01")
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn sync_requires_token_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(
            store,
            service(store.clone(), StaticSource(Ok(vec![]))),
            Some("s3cret".to_string())
        );

        let resp = actix_test::call_service(&app, actix_test::TestRequest::post().uri("/sync").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::post()
            .uri("/sync")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::post()
            .uri("/sync")
            .insert_header(("Authorization", "Bearer s3cret "))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::post()
            .uri("/sync")
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/shows").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn health_reports_database_state() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store, service(store.clone(), StaticSource(Ok(vec![]))), None);

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "connected");
    }

    #[test]
    fn every_sync_error_kind_has_a_status() {
        let cases = [
            (SyncError::SourceUnavailable("x".into()), 500),
            (
                SyncError::MalformedRecord {
                    index: 0,
                    field: "movie_ID",
                    reason: "missing".into(),
                },
                500,
            ),
            (SyncError::Storage(StoreError::Conflict("dup".into())), 500),
            (SyncError::AlreadyRunning, 409),
        ];
        for (err, code) in cases {
            assert_eq!(sync_error_status(&err).as_u16(), code, "{}", err.kind());
        }
    }
}
