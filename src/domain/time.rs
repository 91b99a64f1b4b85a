use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

pub const DEFAULT_BLOCK_SECONDS: i64 = 6 * 60;

// Ceiling to whole blocks. Zero or negative input still bills one block.
pub fn round_to_block(raw_seconds: i64, block_seconds: i64) -> i64 {
    let block_seconds = block_seconds.max(1);
    if raw_seconds <= 0 {
        return block_seconds;
    }
    let blocks = raw_seconds / block_seconds + i64::from(raw_seconds % block_seconds != 0);
    blocks * block_seconds
}

pub fn date_key(timestamp: NaiveDateTime) -> NaiveDate {
    timestamp.date()
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn at_time_of_day(date: NaiveDate, hhmm: &str) -> Option<NaiveDateTime> {
    parse_hhmm(hhmm).map(|time| date.and_time(time))
}

pub fn minutes(value: u32) -> Duration {
    Duration::minutes(i64::from(value))
}

pub fn elapsed_seconds(start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    (end - start).num_seconds().max(0)
}
