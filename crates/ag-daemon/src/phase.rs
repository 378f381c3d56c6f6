//! Day/night arithmetic. Pure functions of the pulse window and an instant.

use ag_core::config::PulseConfig;
use ag_core::types::PulsePhase;
use chrono::{DateTime, NaiveDate, Utc};

/// `Day` iff the UTC time of day of `t` lies in `[day_start, day_end)`.
/// A window whose start is after its end wraps midnight.
pub fn phase_at(pulse: &PulseConfig, t: DateTime<Utc>) -> PulsePhase {
    let tod = t.time();
    let (start, end) = (pulse.day_start, pulse.day_end);
    let in_day = if start < end {
        tod >= start && tod < end
    } else {
        tod >= start || tod < end
    };
    if in_day {
        PulsePhase::Day
    } else {
        PulsePhase::Night
    }
}

/// The date on which the night containing `t` began.
///
/// An instant before `day_start` belongs to the previous date, so the small
/// hours share a key with the evening before. A forced night during the day
/// shares the key of that evening. When the day window wraps midnight the
/// night lies inside one date and `day_end` is the cut-over instead.
pub fn night_key(pulse: &PulseConfig, t: DateTime<Utc>) -> NaiveDate {
    let date = t.date_naive();
    let cut = if pulse.day_start < pulse.day_end {
        pulse.day_start
    } else {
        pulse.day_end
    };
    if t.time() >= cut {
        date
    } else {
        date.pred_opt().unwrap_or(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn window(start: u32, end: u32) -> PulseConfig {
        PulseConfig {
            day_start: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            day_end: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            ..PulseConfig::default()
        }
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    #[test]
    fn boundaries_are_half_open() {
        let w = window(8, 20);
        assert_eq!(phase_at(&w, at(1, 7, 59)), PulsePhase::Night);
        assert_eq!(phase_at(&w, at(1, 8, 0)), PulsePhase::Day);
        assert_eq!(phase_at(&w, at(1, 19, 59)), PulsePhase::Day);
        assert_eq!(phase_at(&w, at(1, 20, 0)), PulsePhase::Night);
    }

    #[test]
    fn wrapping_window() {
        let w = window(20, 8);
        assert_eq!(phase_at(&w, at(1, 23, 0)), PulsePhase::Day);
        assert_eq!(phase_at(&w, at(1, 3, 0)), PulsePhase::Day);
        assert_eq!(phase_at(&w, at(1, 12, 0)), PulsePhase::Night);
    }

    #[test]
    fn every_minute_has_exactly_one_phase() {
        let w = window(6, 22);
        let mut days = 0;
        for minute in 0..24 * 60 {
            let t = at(1, 0, 0) + chrono::Duration::minutes(minute);
            if phase_at(&w, t) == PulsePhase::Day {
                days += 1;
            }
            assert_eq!(phase_at(&w, t), phase_at(&w, t));
        }
        assert_eq!(days, 16 * 60);
    }

    #[test]
    fn night_key_spans_midnight() {
        let w = window(8, 20);
        let evening = night_key(&w, at(1, 21, 0));
        let small_hours = night_key(&w, at(2, 3, 0));
        assert_eq!(evening, small_hours);
        assert_eq!(evening, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_ne!(night_key(&w, at(2, 21, 0)), evening);
    }

    #[test]
    fn night_key_turns_over_at_day_start() {
        let w = window(8, 20);
        let march = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        assert_eq!(night_key(&w, at(2, 7, 59)), march(1));
        assert_eq!(night_key(&w, at(2, 8, 0)), march(2));
        assert_eq!(night_key(&w, at(2, 10, 0)), night_key(&w, at(2, 21, 0)));

        let wrapped = window(20, 8);
        assert_eq!(night_key(&wrapped, at(2, 12, 0)), march(2));
        assert_eq!(night_key(&wrapped, at(2, 3, 0)), march(1));
    }
}
