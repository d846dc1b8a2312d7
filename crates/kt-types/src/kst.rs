//! Exchange-local (KST, UTC+9) time helpers.
//!
//! The platform keeps all timestamps as naive KST datetimes; these helpers
//! are the only place the offset is applied.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const KST_SECS: i32 = 9 * 3600;

pub fn kst_offset() -> FixedOffset {
    FixedOffset::east_opt(KST_SECS).expect("valid fixed offset")
}

/// Current wall-clock time in exchange-local terms (OS clock + 9 h).
pub fn now_kst() -> NaiveDateTime {
    Utc::now().with_timezone(&kst_offset()).naive_local()
}

pub fn today_kst() -> NaiveDate {
    now_kst().date()
}

/// Combine a date with a venue `HHMMSS` string; `None` on malformed input.
pub fn combine_hhmmss(date: NaiveDate, hhmmss: &str) -> Option<NaiveDateTime> {
    if hhmmss.len() != 6 || !hhmmss.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hhmmss[0..2].parse().ok()?;
    let minute: u32 = hhmmss[2..4].parse().ok()?;
    let second: u32 = hhmmss[4..6].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_hhmmss() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let ts = combine_hhmmss(date, "143025").unwrap();
        assert_eq!(ts.time(), NaiveTime::from_hms_opt(14, 30, 25).unwrap());
    }

    #[test]
    fn test_combine_hhmmss_rejects_garbage() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert!(combine_hhmmss(date, "14302").is_none());
        assert!(combine_hhmmss(date, "1430xx").is_none());
        assert!(combine_hhmmss(date, "250000").is_none());
    }
}
