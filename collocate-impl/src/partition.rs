use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{CollocateError, Result};
use crate::provider::{CorpusProvider, Region};
use crate::span::{Span, SpanSet};
use crate::store::IdGenerator;
use crate::subcorpus::{Subcorpus, SubcorpusId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    Day,
    /// ISO weeks, starting on Monday.
    Week,
    Month,
    Quarter,
    Year,
}

impl FromStr for Interval {
    type Err = CollocateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            "quarter" => Ok(Interval::Quarter),
            "year" => Ok(Interval::Year),
            _ => Err(CollocateError::UnsupportedInterval(s.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
            Interval::Quarter => "quarter",
            Interval::Year => "year",
        };
        f.write_str(name)
    }
}

impl Interval {
    /// Start of the interval containing `t`.
    pub fn truncate(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let start = match self {
            Interval::Hour => return date.and_time(Default::default()) + Duration::hours(t.hour() as i64),
            Interval::Day => date,
            Interval::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Interval::Month => first_of_month(date.year(), date.month()),
            Interval::Quarter => first_of_month(date.year(), (date.month0() / 3) * 3 + 1),
            Interval::Year => first_of_month(date.year(), 1),
        };
        start.and_time(Default::default())
    }

    /// Human-readable name of the bucket starting at `start`.
    pub fn label(&self, start: NaiveDateTime) -> String {
        match self {
            Interval::Hour => start.format("%Y-%m-%d %H:00").to_string(),
            Interval::Day => start.format("%Y-%m-%d").to_string(),
            Interval::Week => {
                let week = start.date().iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Interval::Month => start.format("%Y-%m").to_string(),
            Interval::Quarter => format!("{}-Q{}", start.year(), start.month0() / 3 + 1),
            Interval::Year => start.format("%Y").to_string(),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // month is always 1..=12 here
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
}

/// Parses the datetime formats found in corpus metadata.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(Default::default()))
        })
}

/// Groups regions into chronologically ordered buckets by the datetime
/// stored under `key`. Regions whose value is null are left out.
pub fn bucket_regions(
    regions: &[Region],
    key: &str,
    interval: Interval,
) -> Result<BTreeMap<NaiveDateTime, Vec<Span>>> {
    let mut buckets: BTreeMap<NaiveDateTime, Vec<Span>> = BTreeMap::new();
    for region in regions {
        let value = match region.metadata.get(key) {
            None => {
                return Err(CollocateError::MissingMetadata {
                    key: key.to_string(),
                    start: region.span.start,
                    end: region.span.end,
                })
            }
            Some(None) => continue,
            Some(Some(value)) => value,
        };
        let t = parse_datetime(value).ok_or_else(|| CollocateError::InvalidMetadataValue {
            key: key.to_string(),
            value: value.clone(),
        })?;
        buckets.entry(interval.truncate(t)).or_default().push(region.span);
    }
    Ok(buckets)
}

/// Identifies a partitioning request; equal keys yield the same collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PartitionKey {
    pub corpus_id: String,
    pub level: String,
    pub key: String,
    pub interval: Interval,
}

#[derive(Debug, Serialize)]
pub struct CollectionMember {
    pub bucket: NaiveDateTime,
    pub label: String,
    pub subcorpus: Arc<Subcorpus>,
}

/// Mutually exclusive subcorpora covering every dated region of a corpus, in
/// chronological order.
#[derive(Debug, Serialize)]
pub struct SubcorpusCollection {
    pub id: u64,
    pub key: PartitionKey,
    pub members: Vec<CollectionMember>,
}

impl SubcorpusCollection {
    pub fn subcorpora(&self) -> impl Iterator<Item = &Arc<Subcorpus>> {
        self.members.iter().map(|m| &m.subcorpus)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Splits a corpus into one subcorpus per time bucket.
#[instrument(skip(provider, ids))]
pub async fn partition(
    provider: &dyn CorpusProvider,
    ids: &IdGenerator,
    key: PartitionKey,
) -> Result<SubcorpusCollection> {
    let regions = provider
        .structural_regions(&key.corpus_id, &key.level)
        .await?;
    let buckets = bucket_regions(&regions, &key.key, key.interval)?;

    let collection_id = ids.next_id();
    let members = buckets
        .into_iter()
        .map(|(bucket, spans)| {
            let label = key.interval.label(bucket);
            let subcorpus = Subcorpus::new(
                SubcorpusId(ids.next_id()),
                key.corpus_id.clone(),
                format!("{}={}", key.key, label),
                SpanSet::from_spans(spans),
            )
            .in_collection(collection_id);
            CollectionMember {
                bucket,
                label,
                subcorpus: Arc::new(subcorpus),
            }
        })
        .collect_vec();

    info!(
        collection_id,
        regions = regions.len(),
        buckets = members.len(),
        "partitioned corpus"
    );
    Ok(SubcorpusCollection {
        id: collection_id,
        key,
        members,
    })
}
