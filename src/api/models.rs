// API response models (DTOs)

use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::reconcile::ReconcileReport;
use crate::staging::StagingReport;
use crate::sync::SyncReport;

/// Body of every failed request: `{ status: "error", error: { kind, message } }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: ErrorDetail {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn into_http(self, status: StatusCode) -> HttpResponse {
        HttpResponse::build(status).json(self)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Successful `POST /sync`.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    pub staging: StagingReport,
    pub reconcile: ReconcileReport,
    pub elapsed_ms: u64,
}

impl From<SyncReport> for SyncResponse {
    fn from(report: SyncReport) -> Self {
        Self {
            status: "ok",
            staging: report.staging,
            reconcile: report.reconcile,
            elapsed_ms: report.elapsed_ms,
        }
    }
}
