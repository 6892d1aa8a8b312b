use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// "Current date and time: Friday, March 7, 2025 at 2:05 PM UTC" in the configured zone.
pub fn run(timezone: &str, now: DateTime<Utc>) -> String {
    let tz = timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone, "Unknown timezone; falling back to UTC");
        Tz::UTC
    });
    let local = now.with_timezone(&tz);
    format!(
        "Current date and time: {}",
        local.format("%A, %B %-d, %Y at %-I:%M %p %Z")
    )
}
