use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl BusyInterval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FillWindow {
    pub start: NaiveDateTime,
    pub minutes: u32,
}

#[derive(Debug, Clone)]
pub struct GapScheduler {
    day_start: NaiveDateTime,
    day_end: NaiveDateTime,
    busy: Vec<BusyInterval>,
    minimum_minutes: u32,
    buffer: Duration,
}

impl GapScheduler {
    pub fn new(
        date: NaiveDate,
        bounds: (NaiveTime, NaiveTime),
        mut busy: Vec<BusyInterval>,
        minimum_minutes: u32,
        buffer: Duration,
    ) -> Self {
        busy.sort_by(|left, right| left.start.cmp(&right.start));
        Self {
            day_start: date.and_time(bounds.0),
            day_end: date.and_time(bounds.1),
            busy,
            minimum_minutes,
            buffer,
        }
    }

    pub fn busy(&self) -> &[BusyInterval] {
        &self.busy
    }

    // An interval starting within the buffer before `from` still counts as the next
    // neighbour, so back-to-back items never read as overlapping.
    pub fn safe_duration_forward(&self, from: NaiveDateTime, desired_minutes: u32) -> u32 {
        let threshold = from - self.buffer;
        let ceiling = self
            .busy
            .iter()
            .find(|interval| interval.start > threshold)
            .map(|interval| interval.start)
            .unwrap_or(self.day_end);
        self.clamp(ceiling - from, desired_minutes)
    }

    pub fn safe_window_backward(&self, to: NaiveDateTime, desired_minutes: u32) -> FillWindow {
        let threshold = to + self.buffer;
        let floor = self
            .busy
            .iter()
            .filter(|interval| interval.end < threshold)
            .map(|interval| interval.end)
            .max()
            .unwrap_or(self.day_start);
        let minutes = self.clamp(to - floor, desired_minutes);
        FillWindow {
            start: to - Duration::minutes(i64::from(minutes)),
            minutes,
        }
    }

    pub fn free_slots(&self) -> Vec<BusyInterval> {
        let clipped = self
            .busy
            .iter()
            .filter_map(|interval| clip_interval(*interval, self.day_start, self.day_end))
            .collect::<Vec<_>>();
        free_slots(self.day_start, self.day_end, &merge_intervals(clipped))
    }

    fn clamp(&self, available: Duration, desired_minutes: u32) -> u32 {
        let available = u32::try_from(available.num_minutes().max(0)).unwrap_or(u32::MAX);
        available.min(desired_minutes).max(self.minimum_minutes)
    }
}

fn clip_interval(
    interval: BusyInterval,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Option<BusyInterval> {
    if interval.end <= window_start || interval.start >= window_end {
        return None;
    }
    let start = interval.start.max(window_start);
    let end = interval.end.min(window_end);
    (end > start).then_some(BusyInterval { start, end })
}

fn free_slots(
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    busy_intervals: &[BusyInterval],
) -> Vec<BusyInterval> {
    if window_end <= window_start {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut cursor = window_start;
    for interval in busy_intervals {
        if interval.start > cursor {
            slots.push(BusyInterval {
                start: cursor,
                end: interval.start,
            });
        }
        if interval.end > cursor {
            cursor = interval.end;
        }
    }
    if cursor < window_end {
        slots.push(BusyInterval {
            start: cursor,
            end: window_end,
        });
    }
    slots
}

fn merge_intervals(mut intervals: Vec<BusyInterval>) -> Vec<BusyInterval> {
    intervals.sort_unstable_by(|left, right| left.start.cmp(&right.start));
    let mut merged: Vec<BusyInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                if interval.end > last.end {
                    last.end = interval.end;
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}
