//! Rolling contingency rows up and down between granularities, and ranking
//! them for display.
//!
//! The same table arithmetic serves three item definitions:
//!
//! - **items**: one row per distinct surface string,
//! - **discoursemes**: `O11` and `C1` summed over the discourseme's items,
//!   `R1` and `N` inherited from the scope,
//! - **unigrams**: every word of every (multi-word) item, deduplicated, with
//!   its own standalone counts.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::contingency::{ContingencyTable, CountField};
use crate::description::DiscoursemeId;
use crate::error::{CollocateError, Result};
use crate::keep_first_n::KeepFirstN;
use crate::measures::{Calculator, Measure, ScoreSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    pub item: String,
    pub table: ContingencyTable,
    pub scores: ScoreSet,
}

impl ScoredRow {
    pub fn new(item: impl Into<String>, table: ContingencyTable, calculator: &Calculator) -> Self {
        ScoredRow {
            item: item.into(),
            scores: calculator.score(&table),
            table,
        }
    }

    pub fn value(&self, key: SortKey) -> f64 {
        match key {
            SortKey::Measure(measure) => self.scores.get(measure),
            SortKey::Count(field) => self.table.field(field) as f64,
        }
    }
}

/// Scores every `(item, table)` pair with one calculator.
pub fn score_rows(tables: Vec<(String, ContingencyTable)>, calculator: &Calculator) -> Vec<ScoredRow> {
    tables
        .into_iter()
        .map(|(item, table)| ScoredRow::new(item, table, calculator))
        .collect()
}

/// Discourseme-level table: the sum of its items' `O11` and `C1` against the
/// shared `R1` and `N`. Item match sets are disjoint, so nothing is counted
/// twice.
pub fn sum_tables<'a, I>(tables: I, r1: u64, n: u64) -> Result<ContingencyTable>
where
    I: IntoIterator<Item = &'a ContingencyTable>,
{
    let (o11, c1) = tables
        .into_iter()
        .fold((0, 0), |(o11, c1), t| (o11 + t.o11, c1 + t.c1));
    ContingencyTable::new(o11, r1, c1, n)
}

/// Distinct `(attribute, word)` pairs of the given `(surface, attribute)`
/// items. A word shared by several multi-word items appears once.
pub fn unigrams<'a, I>(items: I) -> BTreeSet<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    items
        .into_iter()
        .flat_map(|(surface, attribute)| {
            surface
                .split_whitespace()
                .map(move |word| (attribute.to_string(), word.to_string()))
        })
        .collect()
}

/// What rows are ordered by: a measure or a raw count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SortKey {
    Measure(Measure),
    Count(CountField),
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Measure(Measure::ConservativeLogRatio)
    }
}

impl FromStr for SortKey {
    type Err = CollocateError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<Measure>()
            .map(SortKey::Measure)
            .or_else(|_| s.parse::<CountField>().map(SortKey::Count))
            .map_err(|_| CollocateError::invalid("sort_by", format!("'{}' is neither a measure nor a count", s)))
    }
}

impl TryFrom<String> for SortKey {
    type Error = CollocateError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Measure(m) => write!(f, "{}", m),
            SortKey::Count(c) => write!(f, "{}", format!("{:?}", c).to_ascii_lowercase()),
        }
    }
}

impl From<SortKey> for String {
    fn from(key: SortKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ranking {
    #[serde(default)]
    pub sort_by: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl Ranking {
    pub fn by(sort_by: SortKey) -> Self {
        Ranking {
            sort_by,
            order: SortOrder::Descending,
        }
    }

    /// `Less` when `a` is listed before `b`. Ties are broken by item,
    /// ascending, whatever the order.
    pub fn compare(&self, a: &ScoredRow, b: &ScoredRow) -> Ordering {
        let by_value = a.value(self.sort_by).total_cmp(&b.value(self.sort_by));
        let by_value = match self.order {
            SortOrder::Descending => by_value.reverse(),
            SortOrder::Ascending => by_value,
        };
        by_value.then_with(|| a.item.cmp(&b.item))
    }

    pub fn sort(&self, rows: &mut [ScoredRow]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }
}

/// A 1-based page of `size` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Result<Self> {
        if number == 0 {
            return Err(CollocateError::invalid("page_number", "pages are numbered from 1"));
        }
        if size == 0 {
            return Err(CollocateError::invalid("page_size", "must be positive"));
        }
        Ok(Page { number, size })
    }

    pub fn first(size: usize) -> Self {
        Page {
            number: 1,
            size: size.max(1),
        }
    }

    /// Index range of this page within `total` rows (empty past the end).
    pub fn bounds(&self, total: usize) -> std::ops::Range<usize> {
        let start = (self.number.saturating_sub(1)).saturating_mul(self.size).min(total);
        let end = self.number.saturating_mul(self.size).min(total);
        start..end
    }

    pub fn count(&self, total: usize) -> usize {
        (total + self.size.max(1) - 1) / self.size.max(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RowPage {
    pub rows: Vec<ScoredRow>,
    pub nr_items: usize,
    pub page_number: usize,
    pub page_size: usize,
    pub page_count: usize,
}

/// Ranks `rows` and cuts out one page. Only the rows up to the end of the
/// requested page are kept while ranking.
pub async fn paginate(rows: &[ScoredRow], ranking: Ranking, page: Page) -> RowPage {
    let bounds = page.bounds(rows.len());
    let ranked = futures::stream::iter(rows.iter().cloned())
        .keep_first_n(bounds.end, move |a: &ScoredRow, b: &ScoredRow| ranking.compare(b, a))
        .await;

    RowPage {
        rows: ranked.into_iter().skip(bounds.start).collect(),
        nr_items: rows.len(),
        page_number: page.number,
        page_size: page.size,
        page_count: page.count(rows.len()),
    }
}

/// Scores of one discourseme at all three granularities.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoursemeScores {
    pub discourseme_id: DiscoursemeId,
    pub name: String,
    pub global: ScoredRow,
    pub items: Vec<ScoredRow>,
    pub unigram_items: Vec<ScoredRow>,
}

impl DiscoursemeScores {
    pub fn ranked(&self, ranking: Ranking) -> DiscoursemeScores {
        let mut ranked = self.clone();
        ranking.sort(&mut ranked.items);
        ranking.sort(&mut ranked.unigram_items);
        ranked
    }
}

/// One page of an analysis as shown to a caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisView {
    pub analysis_id: u64,
    pub items: RowPage,
    pub discourseme_scores: Vec<DiscoursemeScores>,
}

impl AnalysisView {
    pub async fn new(
        analysis_id: u64,
        items: &[ScoredRow],
        discoursemes: &[DiscoursemeScores],
        ranking: Ranking,
        page: Page,
    ) -> Self {
        AnalysisView {
            analysis_id,
            items: paginate(items, ranking, page).await,
            discourseme_scores: discoursemes.iter().map(|d| d.ranked(ranking)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasureConfig;

    fn row(item: &str, o11: u64, c1: u64) -> ScoredRow {
        let calc = Calculator::new(&MeasureConfig::default(), 10);
        ScoredRow::new(item, ContingencyTable::new(o11, 100, c1, 10_000).unwrap(), &calc)
    }

    #[test]
    fn discourseme_sums_its_items() {
        let items = [
            ContingencyTable::new(40, 1000, 397, 149_800).unwrap(),
            ContingencyTable::new(2, 1000, 14, 149_800).unwrap(),
            ContingencyTable::new(9, 1000, 90, 149_800).unwrap(),
        ];
        let total = sum_tables(&items, 1000, 149_800).unwrap();
        assert_eq!(total.c1, 501);
        assert_eq!(total.o11, 51);
        assert_eq!((total.r1, total.n), (1000, 149_800));
    }

    #[test]
    fn unigrams_are_deduplicated() {
        let words = unigrams([
            ("Angela Merkel", "word"),
            ("Kanzlerin Merkel", "word"),
            ("Merkel", "lemma"),
        ]);
        assert_eq!(
            words.into_iter().collect::<Vec<_>>(),
            vec![
                ("lemma".to_string(), "Merkel".to_string()),
                ("word".to_string(), "Angela".to_string()),
                ("word".to_string(), "Kanzlerin".to_string()),
                ("word".to_string(), "Merkel".to_string()),
            ]
        );
    }

    #[test]
    fn sort_keys_parse() {
        assert_eq!("log_likelihood".parse::<SortKey>().unwrap(), SortKey::Measure(Measure::LogLikelihood));
        assert_eq!("C1".parse::<SortKey>().unwrap(), SortKey::Count(CountField::C1));
        assert_eq!("O11".parse::<SortKey>().unwrap(), SortKey::Measure(Measure::O11));
        assert!("banana".parse::<SortKey>().is_err());
        assert_eq!(SortKey::Count(CountField::R2).to_string(), "r2");
    }

    #[test]
    fn ties_break_by_item() {
        let mut rows = vec![row("b", 5, 50), row("a", 5, 50), row("c", 9, 50)];
        Ranking::by(SortKey::Measure(Measure::O11)).sort(&mut rows);
        assert_eq!(rows.iter().map(|r| r.item.as_str()).collect::<Vec<_>>(), ["c", "a", "b"]);

        let ascending = Ranking {
            sort_by: SortKey::Measure(Measure::O11),
            order: SortOrder::Ascending,
        };
        ascending.sort(&mut rows);
        assert_eq!(rows.iter().map(|r| r.item.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn pages_slice_the_full_ranking() {
        let rows = (0..25)
            .map(|i| row(&format!("w{:02}", i), i % 7, 50))
            .collect::<Vec<_>>();
        let ranking = Ranking::by(SortKey::Count(CountField::O11));

        let mut sorted = rows.clone();
        ranking.sort(&mut sorted);

        let mut paged = Vec::new();
        for number in 1..=3 {
            let page = paginate(&rows, ranking, Page::new(number, 10).unwrap()).await;
            assert_eq!(page.nr_items, 25);
            assert_eq!(page.page_count, 3);
            paged.extend(page.rows);
        }
        assert_eq!(paged, sorted);

        let past_end = paginate(&rows, ranking, Page::new(4, 10).unwrap()).await;
        assert!(past_end.rows.is_empty());
    }
}
