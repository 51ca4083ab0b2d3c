//! Solar event computation.
//!
//! Computes dawn, sunrise, solar noon, sunset, and dusk for a calendar day
//! at a given location, using the standard sunrise-equation formulation.
//! Accuracy is within a couple of minutes, which is plenty for scheduling
//! period transitions.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Julian date of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2_440_587.5;
/// Julian date of the J2000 epoch (2000-01-01 12:00 UTC).
const JD_J2000: f64 = 2_451_545.0;
/// Obliquity of the ecliptic, degrees.
const OBLIQUITY: f64 = 23.4397;
/// Sun altitude at sunrise/sunset, degrees (refraction + solar radius).
const SUNRISE_ALTITUDE: f64 = -0.833;
/// Sun altitude at civil dawn/dusk, degrees.
const TWILIGHT_ALTITUDE: f64 = -6.0;

/// An observer position on Earth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Degrees north of the equator.
    pub latitude: f64,
    /// Degrees east of the prime meridian.
    pub longitude: f64,
    /// Meters above sea level.
    pub elevation: f64,
}

/// The solar period boundaries of one calendar day, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarEvents {
    /// Start of civil twilight.
    pub dawn: DateTime<Utc>,
    /// Upper limb of the sun crosses the horizon.
    pub sunrise: DateTime<Utc>,
    /// Solar transit.
    pub noon: DateTime<Utc>,
    /// Upper limb of the sun drops below the horizon.
    pub sunset: DateTime<Utc>,
    /// End of civil twilight.
    pub dusk: DateTime<Utc>,
}

impl SolarEvents {
    /// The boundaries in chronological order.
    #[must_use]
    pub fn boundaries(&self) -> [DateTime<Utc>; 5] {
        [self.dawn, self.sunrise, self.noon, self.sunset, self.dusk]
    }
}

/// Compute the solar events of `date` as seen from `location`.
#[must_use]
pub fn solar_events(date: NaiveDate, location: &Location) -> SolarEvents {
    let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64;
    let jd_midnight = midnight / 86_400.0 + JD_UNIX_EPOCH;

    // Julian day number, corrected for the mean difference between
    // terrestrial and universal time.
    let n = (jd_midnight - JD_J2000 + 0.0008).ceil();
    // Mean solar time at the observer's longitude (east positive).
    let j_star = n - location.longitude / 360.0;

    let mean_anomaly = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let center = 1.9148 * sin_deg(mean_anomaly)
        + 0.0200 * sin_deg(2.0 * mean_anomaly)
        + 0.0003 * sin_deg(3.0 * mean_anomaly);
    let ecliptic_longitude = (mean_anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);

    let j_transit = JD_J2000 + j_star + 0.0053 * sin_deg(mean_anomaly)
        - 0.0069 * sin_deg(2.0 * ecliptic_longitude);

    let declination = (sin_deg(ecliptic_longitude) * sin_deg(OBLIQUITY)).asin();

    let sunrise_altitude = SUNRISE_ALTITUDE - 2.076 * location.elevation.max(0.0).sqrt() / 60.0;
    let horizon = hour_angle(location.latitude, declination, sunrise_altitude);
    let twilight = hour_angle(location.latitude, declination, TWILIGHT_ALTITUDE);

    SolarEvents {
        dawn: jd_to_datetime(j_transit - twilight / 360.0),
        sunrise: jd_to_datetime(j_transit - horizon / 360.0),
        noon: jd_to_datetime(j_transit),
        sunset: jd_to_datetime(j_transit + horizon / 360.0),
        dusk: jd_to_datetime(j_transit + twilight / 360.0),
    }
}

/// Hour angle in degrees at which the sun reaches `altitude` degrees.
///
/// The cosine is clamped so polar days and nights collapse toward the
/// transit instead of producing NaN; the returned boundaries stay ordered.
fn hour_angle(latitude: f64, declination: f64, altitude: f64) -> f64 {
    let lat = latitude.to_radians();
    let cos_angle = (sin_deg(altitude) - lat.sin() * declination.sin())
        / (lat.cos() * declination.cos());
    cos_angle.clamp(-1.0, 1.0).acos().to_degrees()
}

fn sin_deg(degrees: f64) -> f64 {
    degrees.to_radians().sin()
}

fn jd_to_datetime(jd: f64) -> DateTime<Utc> {
    let timestamp = ((jd - JD_UNIX_EPOCH) * 86_400.0).round() as i64;
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn equator() -> Location {
        Location {
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_events_are_chronologically_ordered() {
        let events = solar_events(date(2026, 3, 20), &equator());
        let bounds = events.boundaries();
        for pair in bounds.windows(2) {
            assert!(pair[0] < pair[1], "events out of order: {events:?}");
        }
    }

    #[test]
    fn test_equinox_sunrise_near_six_utc_at_equator() {
        let events = solar_events(date(2026, 3, 20), &equator());
        let sunrise_minutes = events.sunrise.hour() * 60 + events.sunrise.minute();
        // 06:00 UTC give or take the equation of time and refraction.
        assert!(
            (sunrise_minutes as i64 - 6 * 60).abs() < 20,
            "unexpected sunrise: {}",
            events.sunrise
        );
    }

    #[test]
    fn test_noon_shifts_west_with_eastern_longitude() {
        let shifted = Location {
            longitude: 90.0,
            ..equator()
        };
        let events = solar_events(date(2026, 3, 20), &shifted);
        // 90 degrees east puts solar noon six hours before Greenwich's.
        let noon_minutes = events.noon.hour() * 60 + events.noon.minute();
        assert!(
            (noon_minutes as i64 - 6 * 60).abs() < 25,
            "unexpected noon: {}",
            events.noon
        );
    }

    #[test]
    fn test_northern_summer_day_is_long() {
        let north = Location {
            latitude: 60.0,
            ..equator()
        };
        let events = solar_events(date(2026, 6, 21), &north);
        let daylight = events.sunset - events.sunrise;
        assert!(
            daylight > chrono::Duration::hours(17),
            "expected long midsummer day, got {daylight}"
        );
    }

    #[test]
    fn test_elevation_advances_sunrise() {
        let ground = solar_events(date(2026, 3, 20), &equator());
        let mountain = solar_events(
            date(2026, 3, 20),
            &Location {
                elevation: 2000.0,
                ..equator()
            },
        );
        assert!(mountain.sunrise < ground.sunrise);
        assert!(mountain.sunset > ground.sunset);
    }

    #[test]
    fn test_polar_night_collapses_without_panicking() {
        let arctic = Location {
            latitude: 80.0,
            longitude: 0.0,
            elevation: 0.0,
        };
        let events = solar_events(date(2026, 12, 21), &arctic);
        // No sunrise in midwinter: both collapse onto the transit.
        assert_eq!(events.sunrise, events.noon);
        assert_eq!(events.sunset, events.noon);
    }
}
