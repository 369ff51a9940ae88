use chrono::{DateTime, Utc};

pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// Wall-clock time of day, the way transfer lines are printed.
pub fn clock(ts: &Timestamp) -> String {
    ts.format("%H:%M:%S").to_string()
}

/// Full date and time, used for snapshot request/preparation times.
pub fn stamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%d:%H:%M:%S").to_string()
}
