use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub mod game;
pub mod lobby;
pub mod phase;
pub mod player;
pub mod settings;
pub mod validation;

/// Render a server timestamp (milliseconds since the Unix epoch) as RFC 3339.
pub fn format_server_time(timestamp_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_time_renders_as_rfc3339() {
        assert_eq!(format_server_time(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_server_time(61_000), "1970-01-01T00:01:01Z");
    }
}
