//! Reconciliation rules
//!
//! Pure decisions applied by the submission engine once a reading has its
//! value: continuity between weeks on `WeekStart`, distance and anomaly
//! warnings on `WeekEnd`. Storage and side effects live in
//! [`super::submission`].

use chrono::NaiveDate;
use cuentakm_common::db::Reading;
use cuentakm_common::time::is_closing_day;

pub const MISMATCH_WARNING: &str = "La lectura del lunes (inicio de semana) no coincide con el fin de semana anterior. \
     Se avisará a Administración.";

pub const NEGATIVE_DISTANCE_WARNING: &str = "Los kilómetros de fin de semana son menores que los de inicio. \
     Revisar posible error de lectura.";

pub const LATE_CLOSE_WARNING: &str = "La lectura de fin de semana se ha subido fuera de plazo (no es viernes). \
     Se notificará a Administración.";

pub const MISSING_START_ERROR: &str = "No tenemos la lectura de inicio de semana para esta semana. \
     No podemos calcular los km.";

/// A new start-of-week value disagrees with the last end-of-week value
///
/// No previous `WeekEnd` (first week ever) is never a mismatch.
pub fn is_continuity_mismatch(prior_end: Option<&Reading>, start_km: u32) -> bool {
    prior_end.is_some_and(|prior| prior.odometer_km != Some(start_km))
}

/// Kilometres driven in the week; negative when the readings are inconsistent
pub fn weekly_distance(start_km: u32, end_km: u32) -> i64 {
    i64::from(end_km) - i64::from(start_km)
}

/// Result of checking a week close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseAssessment {
    pub distance_km: i64,
    pub late_close: bool,
    /// Negative-distance first, late-close second
    pub warnings: Vec<&'static str>,
}

impl CloseAssessment {
    pub fn assess(start_km: u32, end_km: u32, submitted_on: NaiveDate) -> Self {
        let distance_km = weekly_distance(start_km, end_km);
        let late_close = !is_closing_day(submitted_on);

        let mut warnings = Vec::new();
        if distance_km < 0 {
            warnings.push(NEGATIVE_DISTANCE_WARNING);
        }
        if late_close {
            warnings.push(LATE_CLOSE_WARNING);
        }

        Self {
            distance_km,
            late_close,
            warnings,
        }
    }

    /// Warnings combined for the API response and the summary email
    pub fn warning_text(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(self.warnings.join(" | "))
        }
    }
}
