//! The boundary to the corpus query backend.
//!
//! The engine never tokenizes or indexes text. It asks a [`CorpusProvider`]
//! for match positions, scope sizes, frequencies and structural regions, and
//! does all of its arithmetic on the answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::span::{Span, SpanSet};
use crate::subcorpus::Scope;

/// One position of a query: the token's `attribute` must equal `value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenConstraint {
    pub attribute: String,
    pub value: String,
}

/// A contiguous token sequence query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Query {
    pub tokens: Vec<TokenConstraint>,
}

impl Query {
    /// Query for a (possibly multi-word) surface item; words are split on
    /// whitespace and matched against `attribute`.
    pub fn item(surface: &str, attribute: &str) -> Self {
        Query {
            tokens: surface
                .split_whitespace()
                .map(|value| TokenConstraint {
                    attribute: attribute.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// One structural region (sentence, text, ...) and its annotations.
///
/// A key mapped to `None` is present but null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub span: Span,
    #[serde(default)]
    pub metadata: BTreeMap<String, Option<String>>,
}

impl Region {
    pub fn new(span: Span) -> Self {
        Region {
            span,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), Some(value.into()));
        self
    }
}

/// Sorted, non-overlapping regions of one structural level, searchable by
/// position.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions: Vec<Region>,
}

impl RegionIndex {
    pub fn new(mut regions: Vec<Region>) -> Self {
        regions.sort_by_key(|r| r.span.start);
        RegionIndex { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn containing(&self, position: usize) -> Option<&Region> {
        let idx = self.regions.partition_point(|r| r.span.end < position);
        self.regions.get(idx).filter(|r| r.span.start <= position)
    }

    /// The extent of the regions `span` lies in, or `None` unless those
    /// regions tile `span` without a gap.
    pub fn cover(&self, span: &Span) -> Option<Span> {
        let first = self.regions.partition_point(|r| r.span.end < span.start);
        let last = self.regions.partition_point(|r| r.span.end < span.end);
        let touched = self.regions.get(first..=last)?;
        let (head, tail) = (touched.first()?, touched.last()?);
        let tiled = head.span.start <= span.start
            && touched
                .windows(2)
                .all(|pair| pair[0].span.end + 1 == pair[1].span.start);
        tiled.then(|| Span::new(head.span.start, tail.span.end))
    }
}

/// Position and frequency source for one or more read-only corpora.
///
/// Implementations must answer every call for a given corpus from the same
/// immutable snapshot.
#[async_trait]
pub trait CorpusProvider: Send + Sync {
    /// Every match of `query` whose span lies inside `scope`, in corpus order.
    async fn match_positions(&self, scope: &Scope, query: &Query)
        -> Result<Vec<Span>, ProviderError>;

    async fn scope_size(&self, scope: &Scope) -> Result<u64, ProviderError>;

    /// Number of matches of the (possibly multi-word) `item` inside `scope`.
    async fn item_frequency(
        &self,
        scope: &Scope,
        attribute: &str,
        item: &str,
    ) -> Result<u64, ProviderError>;

    async fn structural_regions(
        &self,
        corpus_id: &str,
        level: &str,
    ) -> Result<Vec<Region>, ProviderError>;

    /// Frequency of every value of `attribute` inside `scope`.
    async fn frequency_table(
        &self,
        scope: &Scope,
        attribute: &str,
    ) -> Result<Vec<(String, u64)>, ProviderError>;

    /// Frequency of every value of `attribute` at the given positions.
    async fn counts_within(
        &self,
        corpus_id: &str,
        attribute: &str,
        positions: &SpanSet,
    ) -> Result<Vec<(String, u64)>, ProviderError>;

    /// Values of `attribute` for each position of `span`.
    async fn values(
        &self,
        corpus_id: &str,
        attribute: &str,
        span: Span,
    ) -> Result<Vec<String>, ProviderError>;
}
