//! A [`CorpusProvider`] over corpora held in memory.
//!
//! Corpora are either registered directly or loaded on first use from
//! `{data_dir}/{corpus_id}.json`.

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::provider::{CorpusProvider, Query, Region};
use crate::span::{Span, SpanSet};
use crate::subcorpus::Scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Directory searched for `{corpus_id}.json` files.
    pub data_dir: PathBuf,
    pub default_p_attribute: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            data_dir: PathBuf::from("corpora"),
            default_p_attribute: "word".to_string(),
        }
    }
}

/// Serialized form of a corpus: one column per positional attribute and the
/// regions of every structural attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusData {
    pub id: String,
    pub p_attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub s_attributes: BTreeMap<String, Vec<Region>>,
}

#[derive(Debug)]
pub struct InMemoryCorpus {
    data: CorpusData,
    size: usize,
    postings: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl InMemoryCorpus {
    pub fn new(mut data: CorpusData) -> Result<Self, ProviderError> {
        let malformed = |reason: String| ProviderError::Malformed {
            corpus: data.id.clone(),
            reason,
        };

        let size = match data.p_attributes.values().map(Vec::len).dedup().collect_vec()[..] {
            [] => 0,
            [size] => size,
            _ => return Err(malformed("positional attributes differ in length".into())),
        };

        for (level, regions) in data.s_attributes.iter_mut() {
            regions.sort_by_key(|r| r.span.start);
            if let Some(r) = regions.iter().find(|r| r.span.end >= size) {
                return Err(malformed(format!(
                    "region {}..={} of '{}' exceeds the corpus",
                    r.span.start, r.span.end, level
                )));
            }
            if regions.windows(2).any(|w| w[0].span.end >= w[1].span.start) {
                return Err(malformed(format!("regions of '{}' overlap", level)));
            }
        }

        let postings = data
            .p_attributes
            .iter()
            .map(|(attribute, column)| {
                let mut index: HashMap<String, Vec<usize>> = HashMap::new();
                for (position, value) in column.iter().enumerate() {
                    index.entry(value.clone()).or_default().push(position);
                }
                (attribute.clone(), index)
            })
            .collect();

        Ok(InMemoryCorpus {
            data,
            size,
            postings,
        })
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn column(&self, attribute: &str) -> Result<&[String], ProviderError> {
        self.data
            .p_attributes
            .get(attribute)
            .map(Vec::as_slice)
            .ok_or_else(|| ProviderError::UnknownAttribute {
                corpus: self.data.id.clone(),
                attribute: attribute.to_string(),
            })
    }

    fn find(&self, query: &Query) -> Result<Vec<Span>, ProviderError> {
        let Some(first) = query.tokens.first() else {
            return Ok(Vec::new());
        };
        let columns = query
            .tokens
            .iter()
            .map(|c| self.column(&c.attribute))
            .collect::<Result<Vec<_>, _>>()?;
        let starts = self
            .postings
            .get(&first.attribute)
            .and_then(|index| index.get(&first.value))
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(starts
            .iter()
            .copied()
            .filter(|&start| start + query.len() <= self.size)
            .filter(|&start| {
                query
                    .tokens
                    .iter()
                    .zip(&columns)
                    .enumerate()
                    .skip(1)
                    .all(|(offset, (constraint, column))| column[start + offset] == constraint.value)
            })
            .map(|start| Span::new(start, start + query.len() - 1))
            .collect())
    }

    fn in_scope(scope: &Scope, span: &Span) -> bool {
        scope.spans().map_or(true, |spans| spans.contains_span(span))
    }
}

/// Corpora keyed by id, loaded lazily from [`ProviderConfig::data_dir`].
#[derive(Debug)]
pub struct InMemoryProvider {
    config: ProviderConfig,
    corpora: RwLock<HashMap<String, Arc<InMemoryCorpus>>>,
}

impl InMemoryProvider {
    pub fn new(config: ProviderConfig) -> Self {
        InMemoryProvider {
            config,
            corpora: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn insert(&self, data: CorpusData) -> Result<Arc<InMemoryCorpus>, ProviderError> {
        let corpus = Arc::new(InMemoryCorpus::new(data)?);
        self.corpora
            .write()
            .insert(corpus.id().to_string(), corpus.clone());
        Ok(corpus)
    }

    #[instrument(skip(self))]
    pub async fn corpus(&self, corpus_id: &str) -> Result<Arc<InMemoryCorpus>, ProviderError> {
        let cached = self.corpora.read().get(corpus_id).cloned();
        if let Some(corpus) = cached {
            return Ok(corpus);
        }

        let path = self.config.data_dir.join(format!("{}.json", corpus_id));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::UnknownCorpus(corpus_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut data: CorpusData = serde_json::from_slice(&bytes)?;
        data.id = corpus_id.to_string();
        debug!(path = %path.display(), "loaded corpus");

        // another task may have loaded the same corpus meanwhile; keep the first
        let corpus = Arc::new(InMemoryCorpus::new(data)?);
        Ok(self
            .corpora
            .write()
            .entry(corpus_id.to_string())
            .or_insert(corpus)
            .clone())
    }
}

#[async_trait]
impl CorpusProvider for InMemoryProvider {
    async fn match_positions(
        &self,
        scope: &Scope,
        query: &Query,
    ) -> Result<Vec<Span>, ProviderError> {
        let corpus = self.corpus(&scope.corpus_id).await?;
        Ok(corpus
            .find(query)?
            .into_iter()
            .filter(|span| InMemoryCorpus::in_scope(scope, span))
            .collect())
    }

    async fn scope_size(&self, scope: &Scope) -> Result<u64, ProviderError> {
        let corpus = self.corpus(&scope.corpus_id).await?;
        Ok(match &scope.subcorpus {
            Some(sub) => sub.size(),
            None => corpus.size() as u64,
        })
    }

    async fn item_frequency(
        &self,
        scope: &Scope,
        attribute: &str,
        item: &str,
    ) -> Result<u64, ProviderError> {
        Ok(self
            .match_positions(scope, &Query::item(item, attribute))
            .await?
            .len() as u64)
    }

    async fn structural_regions(
        &self,
        corpus_id: &str,
        level: &str,
    ) -> Result<Vec<Region>, ProviderError> {
        let corpus = self.corpus(corpus_id).await?;
        corpus
            .data
            .s_attributes
            .get(level)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownLevel {
                corpus: corpus_id.to_string(),
                level: level.to_string(),
            })
    }

    async fn frequency_table(
        &self,
        scope: &Scope,
        attribute: &str,
    ) -> Result<Vec<(String, u64)>, ProviderError> {
        match scope.spans() {
            Some(spans) => {
                self.counts_within(&scope.corpus_id, attribute, spans)
                    .await
            }
            None => {
                let corpus = self.corpus(&scope.corpus_id).await?;
                corpus.column(attribute)?;
                Ok(corpus
                    .postings
                    .get(attribute)
                    .into_iter()
                    .flatten()
                    .map(|(value, positions)| (value.clone(), positions.len() as u64))
                    .sorted()
                    .collect())
            }
        }
    }

    async fn counts_within(
        &self,
        corpus_id: &str,
        attribute: &str,
        positions: &SpanSet,
    ) -> Result<Vec<(String, u64)>, ProviderError> {
        let corpus = self.corpus(corpus_id).await?;
        let column = corpus.column(attribute)?;
        if let Some(last) = positions.spans().last() {
            if last.end >= corpus.size() {
                return Err(ProviderError::OutOfBounds {
                    corpus: corpus_id.to_string(),
                    position: last.end,
                    size: corpus.size(),
                });
            }
        }

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for position in positions.positions() {
            *counts.entry(column[position].as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(value, count)| (value.to_string(), count))
            .collect())
    }

    async fn values(
        &self,
        corpus_id: &str,
        attribute: &str,
        span: Span,
    ) -> Result<Vec<String>, ProviderError> {
        let corpus = self.corpus(corpus_id).await?;
        let column = corpus.column(attribute)?;
        column
            .get(span.start..=span.end)
            .map(<[String]>::to_vec)
            .ok_or(ProviderError::OutOfBounds {
                corpus: corpus_id.to_string(),
                position: span.end,
                size: corpus.size(),
            })
    }
}
