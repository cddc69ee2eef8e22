//! OHLC aggregation over fee observations
//!
//! Candles are never stored. Each call rebuilds them from the observation slice, which is
//! bounded by the history capacity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{CoreError, CoreResult, Observation};

/// OHLC summary of `total_fee` over one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Named bucket widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[default]
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn millis(&self) -> u64 {
        const MINUTE: u64 = 60_000;
        match self {
            Timeframe::Min1 => MINUTE,
            Timeframe::Min5 => 5 * MINUTE,
            Timeframe::Min15 => 15 * MINUTE,
            Timeframe::Hour1 => 60 * MINUTE,
            Timeframe::Hour4 => 240 * MINUTE,
            Timeframe::Day1 => 1_440 * MINUTE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::Min1,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Day1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Start of the bucket containing `timestamp_ms`
pub fn bucket_start(timestamp_ms: u64, interval_ms: u64) -> u64 {
    (timestamp_ms / interval_ms) * interval_ms
}

struct Bucket {
    first_ts: u64,
    last_ts: u64,
    candle: Candle,
}

/// Aggregate observations into candles of `interval_ms` width.
///
/// Open and close come from the earliest and latest observation by timestamp, so the
/// input does not have to be sorted. Ties keep the first-seen value as open and the
/// last-seen value as close. Buckets with no observations produce no candle.
pub fn aggregate<'a, I>(observations: I, interval_ms: u64) -> CoreResult<Vec<Candle>>
where
    I: IntoIterator<Item = &'a Observation>,
{
    if interval_ms == 0 {
        return Err(CoreError::InvalidInterval(interval_ms));
    }

    let mut buckets: BTreeMap<u64, Bucket> = BTreeMap::new();

    for obs in observations {
        let ts = obs.timestamp_ms();
        let value = obs.total_fee();
        let start = bucket_start(ts, interval_ms);

        match buckets.get_mut(&start) {
            Some(bucket) => {
                let candle = &mut bucket.candle;
                candle.high = candle.high.max(value);
                candle.low = candle.low.min(value);
                if ts < bucket.first_ts {
                    bucket.first_ts = ts;
                    candle.open = value;
                }
                if ts >= bucket.last_ts {
                    bucket.last_ts = ts;
                    candle.close = value;
                }
            }
            None => {
                buckets.insert(
                    start,
                    Bucket {
                        first_ts: ts,
                        last_ts: ts,
                        candle: Candle {
                            bucket_start_ms: start,
                            open: value,
                            high: value,
                            low: value,
                            close: value,
                        },
                    },
                );
            }
        }
    }

    Ok(buckets.into_values().map(|b| b.candle).collect())
}

/// Aggregate into a named timeframe
pub fn aggregate_timeframe<'a, I>(observations: I, timeframe: Timeframe) -> Vec<Candle>
where
    I: IntoIterator<Item = &'a Observation>,
{
    // Named timeframes are never zero width
    aggregate(observations, timeframe.millis()).unwrap_or_default()
}
