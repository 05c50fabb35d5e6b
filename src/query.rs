//! Read path: parameter validation, filtering and pagination over canonical shows.

use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{QueryError, StoreError};
use crate::model::{parse_date, CanonicalShow};
use crate::store::ShowStore;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Raw query-string parameters of `GET /shows`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowsParams {
    pub title: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// Validated query. `from` is always set: it defaults to "now" so that shows
/// which already started are hidden unless the caller asks for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowQuery {
    pub title: Option<String>,
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowPage {
    pub total: i64,
    pub rows: Vec<CanonicalShow>,
}

/// Response body of `GET /shows`.
#[derive(Debug, Serialize)]
pub struct ShowsResponse {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub data: Vec<CanonicalShow>,
}

impl ShowsParams {
    /// Validate parameters; invalid values are rejected, never coerced.
    pub fn validate(self, now: DateTime<Utc>) -> Result<ShowQuery, QueryError> {
        let page = parse_positive("page", self.page.as_deref(), DEFAULT_PAGE)?;
        let limit = parse_positive("limit", self.limit.as_deref(), DEFAULT_LIMIT)?;
        if limit > MAX_LIMIT {
            return Err(QueryError::LimitTooLarge {
                max: MAX_LIMIT,
                value: limit,
            });
        }

        let explicit_from = non_empty(self.from.as_deref())
            .map(|raw| parse_bound("from", raw, Bound::Lower))
            .transpose()?;
        let to = non_empty(self.to.as_deref())
            .map(|raw| parse_bound("to", raw, Bound::Upper))
            .transpose()?;

        // The implicit `now` floor never turns a past `to` into an error; it just matches nothing.
        if let (Some(from), Some(to)) = (explicit_from, to) {
            if from > to {
                return Err(QueryError::InvertedRange {
                    from: from.to_rfc3339(),
                    to: to.to_rfc3339(),
                });
            }
        }

        Ok(ShowQuery {
            title: non_empty(self.title.as_deref()).map(str::to_string),
            from: explicit_from.unwrap_or(now),
            to,
            page,
            limit,
        })
    }
}

impl ShowQuery {
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }

    /// Whether a canonical row passes the filters (pagination aside).
    pub fn matches(&self, show: &CanonicalShow) -> bool {
        let t = show.key.show_time;
        if t < self.from {
            return false;
        }
        if self.to.is_some_and(|to| t > to) {
            return false;
        }
        match &self.title {
            Some(needle) => show
                .payload
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }

    /// `ILIKE` pattern for the title filter, with wildcards in the input escaped.
    pub fn title_pattern(&self) -> Option<String> {
        self.title.as_deref().map(like_pattern)
    }
}

/// Run a validated query against the canonical store.
#[instrument(skip(store))]
pub async fn list_shows(store: &dyn ShowStore, query: &ShowQuery) -> Result<ShowsResponse, StoreError> {
    let page = store.query_canonical(query).await?;
    Ok(ShowsResponse {
        page: query.page,
        limit: query.limit,
        total: page.total,
        data: page.rows,
    })
}

fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_positive(param: &'static str, raw: Option<&str>, default: u32) -> Result<u32, QueryError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(default);
    };
    match raw.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(QueryError::NotPositive {
            param,
            value: raw.to_string(),
        }),
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Lower,
    Upper,
}

/// RFC 3339 timestamps are taken as-is; a bare date covers the whole UTC day.
fn parse_bound(param: &'static str, raw: &str, bound: Bound) -> Result<DateTime<Utc>, QueryError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let invalid = || QueryError::InvalidDate {
        param,
        value: raw.to_string(),
    };
    let date = parse_date(raw).ok_or_else(invalid)?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    match bound {
        Bound::Lower => Ok(start),
        Bound::Upper => {
            let next = start.checked_add_days(Days::new(1)).ok_or_else(invalid)?;
            Ok(next - chrono::Duration::microseconds(1))
        }
    }
}
