//! Show records: the raw upstream shape, the staged row and the canonical row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Natural key identifying one show instance across syncs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowKey {
    #[serde(rename = "movieID")]
    pub movie_id: String,
    pub cinema_id: i64,
    pub screen_name: String,
    pub show_time: DateTime<Utc>,
}

/// Mutable attributes of a show. Derived equality is the change-detection rule:
/// a strict field-by-field comparison, key excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowPayload {
    pub title: String,
    pub rating: Option<String>,
    pub length: Option<i32>,
    pub format: Option<String>,
    pub genre: Option<String>,
    pub is_active: Option<String>,
    pub image_url: Option<String>,
}

/// Row of the staging store: the latest snapshot per natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedShow {
    pub key: ShowKey,
    pub payload: ShowPayload,
}

/// Row of the canonical store, addressed internally by its surrogate `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalShow {
    pub id: i64,
    #[serde(flatten)]
    pub key: ShowKey,
    #[serde(flatten)]
    pub payload: ShowPayload,
}

/// Loosely typed JSON scalar as sent by the upstream API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Loose {
    fn into_text(self) -> String {
        match self {
            Loose::Bool(b) => b.to_string(),
            Loose::Int(i) => i.to_string(),
            Loose::Float(f) => f.to_string(),
            Loose::Text(s) => s,
        }
    }
}

/// One element of `data.allShows` in the upstream payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiShow {
    #[serde(rename = "movie_showTime", default)]
    pub show_time: Option<Loose>,
    #[serde(rename = "screen_name", default)]
    pub screen_name: Option<Loose>,
    #[serde(rename = "is_active", default)]
    pub is_active: Option<Loose>,
    #[serde(rename = "movie_ID", default)]
    pub movie_id: Option<Loose>,
    #[serde(rename = "movie_title", default)]
    pub title: Option<Loose>,
    #[serde(rename = "movie_rating", default)]
    pub rating: Option<Loose>,
    #[serde(rename = "movie_length", default)]
    pub length: Option<Loose>,
    #[serde(rename = "movie_format", default)]
    pub format: Option<Loose>,
    #[serde(rename = "cinema_id", default)]
    pub cinema_id: Option<Loose>,
    #[serde(rename = "movie_genere", default)]
    pub genre: Option<Loose>,
    #[serde(rename = "movie_image_new", default)]
    pub image_url: Option<Loose>,
}

impl ApiShow {
    /// Coerce the loosely typed upstream record into a staged row.
    ///
    /// `index` is the record position in the snapshot and only used for error reporting.
    pub fn normalize(self, index: usize) -> Result<StagedShow, SyncError> {
        let malformed = |field: &'static str, reason: String| SyncError::MalformedRecord {
            index,
            field,
            reason,
        };

        let raw_time = required_text(self.show_time).ok_or_else(|| {
            malformed("movie_showTime", "is missing".into())
        })?;
        let show_time = parse_show_time(&raw_time).map_err(|r| malformed("movie_showTime", r))?;

        let cinema_id = match self.cinema_id {
            Some(v) => coerce_i64(v).map_err(|r| malformed("cinema_id", r))?,
            None => return Err(malformed("cinema_id", "is missing".into())),
        };
        let movie_id =
            required_text(self.movie_id).ok_or_else(|| malformed("movie_ID", "is missing".into()))?;
        let screen_name = required_text(self.screen_name)
            .ok_or_else(|| malformed("screen_name", "is missing".into()))?;
        let title = required_text(self.title)
            .ok_or_else(|| malformed("movie_title", "is missing".into()))?;

        let length = match self.length {
            Some(v) => coerce_length(v).map_err(|r| malformed("movie_length", r))?,
            None => None,
        };

        Ok(StagedShow {
            key: ShowKey {
                movie_id,
                cinema_id,
                screen_name,
                show_time,
            },
            payload: ShowPayload {
                title,
                rating: self.rating.map(Loose::into_text),
                length,
                format: self.format.map(Loose::into_text),
                genre: self.genre.map(Loose::into_text),
                is_active: self.is_active.map(Loose::into_text),
                image_url: self.image_url.map(Loose::into_text),
            },
        })
    }
}

fn required_text(v: Option<Loose>) -> Option<String> {
    v.map(Loose::into_text)
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an upstream show time. Timestamps without an offset are taken as UTC.
/// Precision is cut to microseconds, the resolution of the canonical store.
pub fn parse_show_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("is empty".into());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).trunc_subsecs(6));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc().trunc_subsecs(6));
        }
    }
    Err(format!("is not a timestamp: {raw:?}"))
}

/// Parse a calendar date (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn coerce_i64(v: Loose) -> Result<i64, String> {
    match v {
        Loose::Int(i) => Ok(i),
        Loose::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        Loose::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("is not an integer: {s:?}")),
        other => Err(format!("is not an integer: {other:?}")),
    }
}

fn coerce_length(v: Loose) -> Result<Option<i32>, String> {
    if let Loose::Text(s) = &v {
        if s.trim().is_empty() {
            return Ok(None);
        }
    }
    let n = coerce_i64(v)?;
    i32::try_from(n)
        .map(Some)
        .map_err(|_| format!("is out of range: {n}"))
}
