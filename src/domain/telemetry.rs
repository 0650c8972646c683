// Time-series domain models
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }

    pub fn at(timestamp: NaiveDateTime, value: f64) -> Self {
        Self::new(timestamp.and_utc().timestamp_millis(), value)
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp_millis(self.time_ms).map(|dt| dt.naive_utc())
    }
}

/// Closed time range shown by the detail figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start <= self.end && end >= self.start
    }

    /// Widened by fractional hours on each side, saturating at the calendar limits.
    pub fn widened(&self, before_hours: f64, after_hours: f64) -> Self {
        Self::new(
            self.start
                .checked_sub_signed(hours(before_hours))
                .unwrap_or(NaiveDateTime::MIN),
            self.end
                .checked_add_signed(hours(after_hours))
                .unwrap_or(NaiveDateTime::MAX),
        )
    }

    /// Window of the same length immediately after this one.
    pub fn next(&self) -> Self {
        Self::new(self.end, self.end + self.duration())
    }

    /// Window of the same length immediately before this one.
    pub fn previous(&self) -> Self {
        Self::new(self.start - self.duration(), self.start)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Converts fractional hours (the session paddings are floats) into a duration.
pub fn hours(value: f64) -> chrono::Duration {
    // `as` saturates, i64::MIN is the only value out of range
    chrono::Duration::try_milliseconds((value * 3_600_000.0).round() as i64).unwrap_or(chrono::Duration::MIN)
}

/// Downsample time series points using bucket averaging
pub fn downsample_points(points: &[TimeSeriesPoint], max_points: usize) -> Vec<TimeSeriesPoint> {
    if max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }

    let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        // Use middle point's timestamp and average value
        let mid_idx = chunk.len() / 2;
        let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;

        downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
    }

    downsampled
}
