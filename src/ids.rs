//! Human-readable document ids allocated under an atomic counter.
//!
//! Format: `{prefix}/{district?}/{fiscal-year}/{4-digit sequence}`, for
//! example `SBM/117/2025-26/0042`. The sequence counter lives in sled and is
//! advanced with `update_and_fetch`, which serialises the read-modify-write
//! per `(prefix, district, fiscal year)` so parallel creations never collide.

use chrono::{DateTime, Datelike, Utc};
use sled::Db;

use crate::error::WorkflowError;

/// Fiscal years run April to March and format `YYYY-YY`.
pub fn fiscal_year(date: DateTime<Utc>) -> String {
    let start = if date.month() >= 4 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}-{:02}", start, (start + 1) % 100)
}

fn counter_key(prefix: &str, district: Option<&str>, fy: &str) -> Vec<u8> {
    format!("seq/{prefix}/{}/{fy}", district.unwrap_or("-")).into_bytes()
}

/// Allocate the next id for `(prefix, district, fiscal year)`.
pub fn allocate(
    db: &Db,
    prefix: &str,
    district: Option<&str>,
    fy: &str,
) -> Result<String, WorkflowError> {
    let ivec = db.update_and_fetch(counter_key(prefix, district, fy), |old| {
        let current = old
            .and_then(|b| b.try_into().ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0);
        Some(current.wrapping_add(1).to_be_bytes().to_vec())
    })?;

    let seq = ivec
        .and_then(|b| b.as_ref().try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| WorkflowError::Conflict("sequence allocation lost".to_string()))?;

    Ok(match district {
        Some(d) => format!("{prefix}/{d}/{fy}/{seq:04}"),
        None => format!("{prefix}/{fy}/{seq:04}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fiscal_year_starts_in_april() {
        let march = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        assert_eq!(fiscal_year(march), "2025-26");
        assert_eq!(fiscal_year(april), "2026-27");
    }

    #[test]
    fn sequence_is_zero_padded_and_contiguous() {
        let db = sled::Config::new().temporary(true).open().unwrap();

        let first = allocate(&db, "SBM", Some("117"), "2025-26").unwrap();
        let second = allocate(&db, "SBM", Some("117"), "2025-26").unwrap();

        assert_eq!(first, "SBM/117/2025-26/0001");
        assert_eq!(second, "SBM/117/2025-26/0002");
    }

    #[test]
    fn counters_are_scoped_per_prefix_and_district() {
        let db = sled::Config::new().temporary(true).open().unwrap();

        let a = allocate(&db, "SBM", Some("117"), "2025-26").unwrap();
        let b = allocate(&db, "SBM", Some("118"), "2025-26").unwrap();
        let c = allocate(&db, "IBPS", None, "2025-26").unwrap();

        assert_eq!(a, "SBM/117/2025-26/0001");
        assert_eq!(b, "SBM/118/2025-26/0001");
        assert_eq!(c, "IBPS/2025-26/0001");
    }
}
