// Author: Quayside contributors
// License: MIT

//! Target-temperature scheduling (spec.md §4.6 "Scheduling"): the four-way
//! fallback chain from disabled through manual times, IP geolocation, and
//! explicit coordinates down to a flat low temperature.

use std::time::{SystemTime, UNIX_EPOCH};

use super::state::ColourConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Fetches the process's approximate location once via a public IP
/// geolocation API and caches the result for the process lifetime (spec.md
/// §4.6 "lazily fetch city coordinates (cached for the process lifetime)").
pub struct Geolocator {
    cached: tokio::sync::OnceCell<Option<Coordinates>>,
}

impl Geolocator {
    pub fn new() -> Self {
        Self {
            cached: tokio::sync::OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Option<Coordinates> {
        *self
            .cached
            .get_or_init(|| async { fetch_ip_location().await })
            .await
    }
}

async fn fetch_ip_location() -> Option<Coordinates> {
    #[derive(serde::Deserialize)]
    struct Response {
        latitude: f64,
        longitude: f64,
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .ok()?;

    match client.get("https://ipapi.co/json/").send().await {
        Ok(resp) => match resp.json::<Response>().await {
            Ok(body) => Some(Coordinates {
                lat: body.latitude,
                lon: body.longitude,
            }),
            Err(e) => {
                eventline::warn!("colour: failed to parse IP geolocation response: {e}");
                None
            }
        },
        Err(e) => {
            eventline::warn!("colour: IP geolocation request failed: {e}");
            None
        }
    }
}

/// The current minute-of-day, in `[0, 1440)`, and today's midnight as a unix
/// timestamp, both in local time.
fn local_minute_of_day(now: chrono::DateTime<chrono::Local>) -> (u32, i64) {
    use chrono::Timelike;
    let minute_of_day = now.hour() * 60 + now.minute();
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_local_timezone(chrono::Local)
        .single()
        .unwrap_or(now);
    (minute_of_day, midnight.timestamp())
}

/// A resolved sunrise/sunset partition for "now" (spec.md §4.6).
struct Partition {
    is_day: bool,
    next_transition: i64,
    sunrise_ts: i64,
    sunset_ts: i64,
}

/// Partition by a sunrise/sunset pair, both given as minutes-since-midnight;
/// a sunset earlier than sunrise is rolled +24h (spec.md §4.6).
fn partition_by_minutes(
    now_minute: u32,
    midnight_ts: i64,
    sunrise_minute: u32,
    sunset_minute: u32,
) -> Partition {
    let sunset_minute = if sunset_minute < sunrise_minute {
        sunset_minute + 24 * 60
    } else {
        sunset_minute
    };

    let is_day = now_minute >= sunrise_minute && now_minute < sunset_minute;
    let next_minute = if is_day {
        sunset_minute
    } else if now_minute < sunrise_minute {
        sunrise_minute
    } else {
        sunrise_minute + 24 * 60
    };

    Partition {
        is_day,
        next_transition: midnight_ts + i64::from(next_minute) * 60,
        sunrise_ts: midnight_ts + i64::from(sunrise_minute) * 60,
        sunset_ts: midnight_ts + i64::from(sunset_minute) * 60,
    }
}

/// Resolve today's (sunrise, sunset) in local minutes-of-day for the given
/// coordinates using the `sunrise` crate's solar calculation.
fn solar_minutes_for(now: chrono::DateTime<chrono::Local>, coords: Coordinates) -> (u32, u32) {
    let date = now.date_naive();
    let (sunrise_ts, sunset_ts) =
        sunrise::sunrise_sunset(coords.lat, coords.lon, date.format("%Y").to_string().parse().unwrap_or(1970), date.format("%m").to_string().parse().unwrap_or(1), date.format("%d").to_string().parse().unwrap_or(1));

    let to_local_minutes = |ts: i64| -> u32 {
        let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(ts, 0)
            .unwrap_or_else(chrono::Utc::now)
            .with_timezone(&chrono::Local);
        use chrono::Timelike;
        dt.hour() * 60 + dt.minute()
    };

    (to_local_minutes(sunrise_ts), to_local_minutes(sunset_ts))
}

pub struct Target {
    pub temp: u32,
    pub next_transition: i64,
    /// Today's (sunrise, sunset) as unix timestamps, when a sunrise/sunset
    /// schedule applies; `None` when disabled or no location/manual times
    /// resolved (spec.md §3 ColourState "today's sunrise, sunset").
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub is_day: Option<bool>,
}

/// Resolve the scheduling fallback chain (spec.md §4.6 "Scheduling").
pub async fn resolve(config: &ColourConfig, geolocator: &Geolocator) -> Target {
    let now = chrono::Local::now();
    let (now_minute, midnight_ts) = local_minute_of_day(now);
    let fallback_next = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
        + 24 * 3600;

    if !config.enabled {
        return Target {
            temp: config.high_temp,
            next_transition: fallback_next,
            sunrise: None,
            sunset: None,
            is_day: None,
        };
    }

    if let (Some(sunrise_m), Some(sunset_m)) =
        (config.manual_sunrise_minutes, config.manual_sunset_minutes)
    {
        let p = partition_by_minutes(now_minute, midnight_ts, sunrise_m, sunset_m);
        return Target {
            temp: if p.is_day { config.high_temp } else { config.low_temp },
            next_transition: p.next_transition,
            sunrise: Some(p.sunrise_ts),
            sunset: Some(p.sunset_ts),
            is_day: Some(p.is_day),
        };
    }

    let coords = if config.use_ip_location {
        geolocator.get().await
    } else {
        config.explicit_coords.map(|(lat, lon)| Coordinates { lat, lon })
    };

    if let Some(coords) = coords {
        let (sunrise_m, sunset_m) = solar_minutes_for(now, coords);
        let p = partition_by_minutes(now_minute, midnight_ts, sunrise_m, sunset_m);
        return Target {
            temp: if p.is_day { config.high_temp } else { config.low_temp },
            next_transition: p.next_transition,
            sunrise: Some(p.sunrise_ts),
            sunset: Some(p.sunset_ts),
            is_day: Some(p.is_day),
        };
    }

    Target {
        temp: config.low_temp,
        next_transition: fallback_next,
        sunrise: None,
        sunset: None,
        is_day: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_handles_normal_daytime_window() {
        let p = partition_by_minutes(12 * 60, 0, 7 * 60, 19 * 60);
        assert!(p.is_day);
        assert_eq!(p.next_transition, 19 * 60 * 60);
        assert_eq!(p.sunrise_ts, 7 * 60 * 60);
        assert_eq!(p.sunset_ts, 19 * 60 * 60);
    }

    #[test]
    fn partition_rolls_sunset_past_midnight() {
        // Sunset before sunrise (e.g. polar edge case): sunset rolls +24h.
        let p = partition_by_minutes(23 * 60, 0, 22 * 60, 2 * 60);
        assert!(p.is_day);
        assert_eq!(p.next_transition, (2 * 60 + 24 * 60) * 60);
        assert_eq!(p.sunset_ts, (2 * 60 + 24 * 60) * 60);
    }

    #[test]
    fn partition_returns_night_before_sunrise() {
        let p = partition_by_minutes(3 * 60, 0, 7 * 60, 19 * 60);
        assert!(!p.is_day);
        assert_eq!(p.next_transition, 7 * 60 * 60);
    }

    #[test]
    fn is_day_matches_sunrise_sunset_bounds() {
        // S4/invariant 6: isDay ⇔ sunrise ≤ now < sunset.
        let p = partition_by_minutes(7 * 60, 0, 7 * 60, 19 * 60);
        assert!(p.is_day, "now == sunrise must count as day");
        let p = partition_by_minutes(19 * 60, 0, 7 * 60, 19 * 60);
        assert!(!p.is_day, "now == sunset must count as night");
    }
}
