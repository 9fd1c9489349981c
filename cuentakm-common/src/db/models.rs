//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Largest odometer value accepted as a reading
pub const MAX_ODOMETER_KM: u32 = 9_999_999;

/// Field sales agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
}

/// The two reading kinds; a submission is exactly one of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadingKind {
    /// Start-of-week reading (normally Monday)
    #[serde(rename = "inicio_semana")]
    WeekStart,
    /// End-of-week reading (normally Friday)
    #[serde(rename = "fin_semana")]
    WeekEnd,
}

impl ReadingKind {
    /// Wire and storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingKind::WeekStart => "inicio_semana",
            ReadingKind::WeekEnd => "fin_semana",
        }
    }

    /// The other kind
    pub fn opposite(self) -> Self {
        match self {
            ReadingKind::WeekStart => ReadingKind::WeekEnd,
            ReadingKind::WeekEnd => ReadingKind::WeekStart,
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "inicio_semana" => Ok(ReadingKind::WeekStart),
            "fin_semana" => Ok(ReadingKind::WeekEnd),
            other => Err(Error::InvalidInput(format!(
                "Unknown reading kind '{}' (expected inicio_semana or fin_semana)",
                other
            ))),
        }
    }
}

/// One odometer reading event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub id: i64,
    pub agent_id: i64,
    pub kind: ReadingKind,
    /// ISO week number
    pub week: u32,
    /// ISO year
    pub year: i32,
    /// Absent only between record creation and extraction
    pub odometer_km: Option<u32>,
    /// Blob store reference; present only while the photo is retained
    pub photo_ref: Option<String>,
    /// WeekEnd submitted on a day other than the closing day
    pub late_close: bool,
    /// WeekStart disagreeing with the preceding WeekEnd
    pub continuity_mismatch: bool,
    pub created_at: DateTime<Utc>,
}

impl Reading {
    /// Map a `SELECT * FROM readings` row
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let kind: String = row.try_get("kind")?;
        let odometer_km: Option<i64> = row.try_get("odometer_km")?;
        let created_at: String = row.try_get("created_at")?;

        let odometer_km = odometer_km
            .map(|km| {
                u32::try_from(km)
                    .map_err(|_| Error::InvalidInput(format!("Stored odometer value out of range: {}", km)))
            })
            .transpose()?;

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            kind: kind.parse()?,
            week: row.try_get::<i64, _>("week")? as u32,
            year: row.try_get::<i64, _>("year")? as i32,
            odometer_km,
            photo_ref: row.try_get("photo_ref")?,
            late_close: row.try_get("late_close")?,
            continuity_mismatch: row.try_get("continuity_mismatch")?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_kind_wire_names() {
        assert_eq!(ReadingKind::WeekStart.as_str(), "inicio_semana");
        assert_eq!(ReadingKind::WeekEnd.to_string(), "fin_semana");
        assert_eq!(
            serde_json::to_string(&ReadingKind::WeekEnd).unwrap(),
            "\"fin_semana\""
        );
    }

    #[test]
    fn test_reading_kind_parse() {
        assert_eq!("inicio_semana".parse::<ReadingKind>().unwrap(), ReadingKind::WeekStart);
        assert_eq!(" fin_semana ".parse::<ReadingKind>().unwrap(), ReadingKind::WeekEnd);
        assert!("lunes".parse::<ReadingKind>().is_err());
    }

    #[test]
    fn test_opposite_alternates() {
        assert_eq!(ReadingKind::WeekStart.opposite(), ReadingKind::WeekEnd);
        assert_eq!(ReadingKind::WeekEnd.opposite(), ReadingKind::WeekStart);
    }

    #[test]
    fn test_agent_serializes_with_wire_names() {
        let agent = Agent {
            id: 3,
            name: "Lucía".to_string(),
        };
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["nombre"], "Lucía");
    }
}
