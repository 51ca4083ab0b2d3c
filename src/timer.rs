//! Period timers.
//!
//! A timer partitions time into a finite set of named periods and answers
//! two questions: which period is it now, and how long until the next one
//! begins. Both are pure functions of an instant, so every variant also
//! exposes `_at` forms taking an explicit clock value for testing.

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Utc, Weekday};

use crate::config::TimerConfig;
use crate::solar::{solar_events, Location};

/// Effectively-infinite duration returned by timers that never transition.
pub const FOREVER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Period label of a static timer with no explicit label configured.
const DEFAULT_STATIC_PERIOD: &str = "default";

/// A period calculator bound to one module.
#[derive(Debug, Clone, PartialEq)]
pub enum Timer {
    /// One constant period; never transitions.
    Static {
        /// The fixed period label.
        period: String,
    },
    /// Periods are the lowercase local weekday names.
    Weekday,
    /// Periods follow the sun at a fixed location.
    Solar {
        /// Observer position used for the solar computation.
        location: Location,
    },
}

impl Timer {
    /// Build a timer from its decoded configuration.
    #[must_use]
    pub fn from_config(config: &TimerConfig) -> Self {
        match config {
            TimerConfig::Static { period } => Self::Static {
                period: period
                    .clone()
                    .unwrap_or_else(|| DEFAULT_STATIC_PERIOD.to_string()),
            },
            TimerConfig::Weekday => Self::Weekday,
            TimerConfig::Solar {
                latitude,
                longitude,
                elevation,
            } => Self::Solar {
                location: Location {
                    latitude: *latitude,
                    longitude: *longitude,
                    elevation: *elevation,
                },
            },
        }
    }

    /// The current period label.
    #[must_use]
    pub fn period(&self) -> String {
        self.period_at(Utc::now())
    }

    /// The period label at an explicit instant.
    #[must_use]
    pub fn period_at(&self, now: DateTime<Utc>) -> String {
        match self {
            Self::Static { period } => period.clone(),
            Self::Weekday => weekday_label(now.with_timezone(&Local).weekday()).to_string(),
            Self::Solar { location } => solar_period(now, location).to_string(),
        }
    }

    /// Duration until the next period transition. Never negative.
    #[must_use]
    pub fn time_until_next_period(&self) -> Duration {
        self.time_until_next_period_at(Utc::now())
    }

    /// Duration until the next transition, measured from an explicit instant.
    #[must_use]
    pub fn time_until_next_period_at(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Self::Static { .. } => FOREVER,
            Self::Weekday => until_next_local_midnight(now),
            Self::Solar { location } => until_next_solar_boundary(now, location),
        }
    }

    /// Every period label this timer can produce.
    #[must_use]
    pub fn periods(&self) -> Vec<String> {
        match self {
            Self::Static { period } => vec![period.clone()],
            Self::Weekday => [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ]
            .iter()
            .map(|day| weekday_label(*day).to_string())
            .collect(),
            Self::Solar { .. } => ["night", "sunrise", "morning", "afternoon", "sunset"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Short name of the timer variant, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Weekday => "weekday",
            Self::Solar { .. } => "solar",
        }
    }
}

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn until_next_local_midnight(now: DateTime<Utc>) -> Duration {
    let local = now.with_timezone(&Local);
    let Some(tomorrow) = local.date_naive().succ_opt() else {
        return FOREVER;
    };
    let midnight = tomorrow.and_time(NaiveTime::MIN);
    let Some(next) = Local.from_local_datetime(&midnight).earliest() else {
        // A DST gap swallowed midnight; check again in an hour.
        return Duration::from_secs(3600);
    };
    (next.with_timezone(&Utc) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn solar_period(now: DateTime<Utc>, location: &Location) -> &'static str {
    let events = solar_events(now.date_naive(), location);
    if now < events.dawn {
        "night"
    } else if now < events.sunrise {
        "sunrise"
    } else if now < events.noon {
        "morning"
    } else if now < events.sunset {
        "afternoon"
    } else if now < events.dusk {
        "sunset"
    } else {
        "night"
    }
}

fn until_next_solar_boundary(now: DateTime<Utc>, location: &Location) -> Duration {
    let today = solar_events(now.date_naive(), location);
    let next = today.boundaries().into_iter().find(|bound| *bound > now);
    let next = match next {
        Some(bound) => bound,
        // All of today's boundaries have passed: the night lasts until
        // tomorrow's dawn.
        None => match now.date_naive().succ_opt() {
            Some(tomorrow) => solar_events(tomorrow, location).dawn,
            None => return FOREVER,
        },
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn equator() -> Location {
        Location {
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
        }
    }

    fn solar_timer() -> Timer {
        Timer::Solar {
            location: equator(),
        }
    }

    fn test_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 20).unwrap()
    }

    #[test]
    fn test_static_timer_defaults_to_default_label() {
        let timer = Timer::from_config(&TimerConfig::Static { period: None });
        assert_eq!(timer.period(), "default");
    }

    #[test]
    fn test_static_timer_honors_custom_label() {
        let timer = Timer::from_config(&TimerConfig::Static {
            period: Some("always".to_string()),
        });
        assert_eq!(timer.period(), "always");
        assert_eq!(timer.periods(), vec!["always"]);
    }

    #[test]
    fn test_static_timer_never_transitions() {
        let timer = Timer::Static {
            period: "default".to_string(),
        };
        assert_eq!(timer.time_until_next_period(), FOREVER);
    }

    #[test]
    fn test_weekday_labels_are_lowercase_names() {
        assert_eq!(weekday_label(Weekday::Mon), "monday");
        assert_eq!(weekday_label(Weekday::Sat), "saturday");
        assert_eq!(weekday_label(Weekday::Sun), "sunday");
    }

    #[test]
    fn test_weekday_period_matches_local_weekday() {
        let now = Utc::now();
        let expected = weekday_label(now.with_timezone(&Local).weekday());
        assert_eq!(Timer::Weekday.period_at(now), expected);
    }

    #[test]
    fn test_weekday_transition_is_within_a_day() {
        let remaining = Timer::Weekday.time_until_next_period();
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_weekday_timer_has_seven_periods() {
        assert_eq!(Timer::Weekday.periods().len(), 7);
    }

    #[test]
    fn test_solar_period_one_minute_before_noon_is_morning() {
        let events = solar_events(test_day(), &equator());
        let now = events.noon - chrono::Duration::seconds(60);
        assert_eq!(solar_timer().period_at(now), "morning");
    }

    #[test]
    fn test_solar_transition_one_minute_before_noon_is_exact() {
        let events = solar_events(test_day(), &equator());
        let now = events.noon - chrono::Duration::seconds(60);
        assert_eq!(
            solar_timer().time_until_next_period_at(now),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_solar_period_after_noon_is_afternoon() {
        let events = solar_events(test_day(), &equator());
        let now = events.noon + chrono::Duration::seconds(60);
        assert_eq!(solar_timer().period_at(now), "afternoon");
    }

    #[test]
    fn test_solar_night_wraps_to_tomorrows_dawn() {
        let events = solar_events(test_day(), &equator());
        let now = events.dusk + chrono::Duration::hours(1);
        assert_eq!(solar_timer().period_at(now), "night");

        let tomorrow = test_day().succ_opt().unwrap();
        let expected = (solar_events(tomorrow, &equator()).dawn - now)
            .to_std()
            .unwrap();
        assert_eq!(solar_timer().time_until_next_period_at(now), expected);
    }

    #[test]
    fn test_solar_period_before_dawn_is_night() {
        let events = solar_events(test_day(), &equator());
        let now = events.dawn - chrono::Duration::hours(1);
        assert_eq!(solar_timer().period_at(now), "night");
    }
}
