//! The engine: one provider, one configuration, and every artifact computed
//! from them.
//!
//! Analyses, descriptions and partitions are cached under the canonical
//! tuple of their parameters; asking twice for the same thing yields the
//! same `Arc` (and the same id).

use futures::future::try_join_all;
use futures::stream::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::collocation::{CollocationAnalysis, CollocationKey};
use crate::config::EngineConfig;
use crate::description::{
    self, ConstellationDescription, ConstellationDescriptionCollection, Constellation,
    DescriptionKey, Discourseme, DiscoursemeDescription,
};
use crate::error::{CollocateError, Result};
use crate::keyword::{KeywordAnalysis, KeywordKey};
use crate::partition::{self, Interval, PartitionKey, SubcorpusCollection};
use crate::provider::CorpusProvider;
use crate::semantic_map::{MapInput, PcaProjector, Projector, ScoredItems, SemanticMapManager};
use crate::span::SpanSet;
use crate::store::{IdGenerator, KeyedStore};
use crate::subcorpus::{Scope, Subcorpus, SubcorpusId};

/// A finished analysis, addressable by id.
#[derive(Debug, Clone)]
pub enum StoredAnalysis {
    Collocation(Arc<CollocationAnalysis>),
    Keyword(Arc<KeywordAnalysis>),
}

impl StoredAnalysis {
    pub fn id(&self) -> u64 {
        match self {
            StoredAnalysis::Collocation(a) => a.id,
            StoredAnalysis::Keyword(a) => a.id,
        }
    }

    pub(crate) fn map_input(&self) -> MapInput {
        match self {
            StoredAnalysis::Collocation(a) => a.map_input(),
            StoredAnalysis::Keyword(a) => a.map_input(),
        }
    }
}

pub struct Engine {
    provider: Arc<dyn CorpusProvider>,
    config: EngineConfig,
    pub(crate) ids: IdGenerator,
    subcorpora: RwLock<HashMap<SubcorpusId, Arc<Subcorpus>>>,
    partitions: KeyedStore<PartitionKey, SubcorpusCollection>,
    collections: RwLock<HashMap<u64, Arc<SubcorpusCollection>>>,
    descriptions: KeyedStore<DescriptionKey, DiscoursemeDescription>,
    pub(crate) collocations: KeyedStore<CollocationKey, CollocationAnalysis>,
    pub(crate) keywords: KeyedStore<KeywordKey, KeywordAnalysis>,
    analyses: RwLock<HashMap<u64, StoredAnalysis>>,
    pub(crate) maps: SemanticMapManager,
}

impl Engine {
    pub fn new(provider: Arc<dyn CorpusProvider>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Engine {
            provider,
            config,
            ids: IdGenerator::new(),
            subcorpora: RwLock::new(HashMap::new()),
            partitions: KeyedStore::new(),
            collections: RwLock::new(HashMap::new()),
            descriptions: KeyedStore::new(),
            collocations: KeyedStore::new(),
            keywords: KeyedStore::new(),
            analyses: RwLock::new(HashMap::new()),
            maps: SemanticMapManager::new(Arc::new(PcaProjector::default())),
        })
    }

    /// Replaces the routine computing semantic map coordinates.
    pub fn with_projector(mut self, projector: Arc<dyn Projector>) -> Self {
        self.maps = SemanticMapManager::new(projector);
        self
    }

    pub fn provider(&self) -> &dyn CorpusProvider {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers an ad-hoc subcorpus, e.g. one selected by an analyst.
    pub fn register_subcorpus(
        &self,
        corpus_id: impl Into<String>,
        name: impl Into<String>,
        spans: SpanSet,
    ) -> Arc<Subcorpus> {
        let subcorpus = Arc::new(Subcorpus::new(
            SubcorpusId(self.ids.next_id()),
            corpus_id,
            name,
            spans,
        ));
        self.subcorpora
            .write()
            .insert(subcorpus.id, subcorpus.clone());
        subcorpus
    }

    pub fn subcorpus(&self, id: SubcorpusId) -> Result<Arc<Subcorpus>> {
        self.subcorpora
            .read()
            .get(&id)
            .cloned()
            .ok_or(CollocateError::UnknownSubcorpus(id))
    }

    /// Resolves `(corpus, subcorpus?)` into a scope, rejecting subcorpora of
    /// other corpora.
    pub fn scope(&self, corpus_id: &str, subcorpus_id: Option<SubcorpusId>) -> Result<Scope> {
        let Some(id) = subcorpus_id else {
            return Ok(Scope::corpus(corpus_id));
        };
        let subcorpus = self.subcorpus(id)?;
        if subcorpus.corpus_id != corpus_id {
            return Err(CollocateError::InconsistentScope {
                subcorpus: id,
                owner: subcorpus.corpus_id.clone(),
                corpus: corpus_id.to_string(),
            });
        }
        Ok(Scope::subcorpus(subcorpus))
    }

    /// Splits a corpus into time buckets. Identical requests return the
    /// collection created first.
    #[instrument(skip(self))]
    pub async fn partition(
        &self,
        corpus_id: &str,
        level: &str,
        key: &str,
        interval: Interval,
    ) -> Result<Arc<SubcorpusCollection>> {
        let partition_key = PartitionKey {
            corpus_id: corpus_id.to_string(),
            level: level.to_string(),
            key: key.to_string(),
            interval,
        };
        let collection = self
            .partitions
            .get_or_try_create(partition_key.clone(), || {
                partition::partition(self.provider(), &self.ids, partition_key)
            })
            .await?;

        self.collections
            .write()
            .entry(collection.id)
            .or_insert_with(|| collection.clone());
        let mut subcorpora = self.subcorpora.write();
        for subcorpus in collection.subcorpora() {
            subcorpora
                .entry(subcorpus.id)
                .or_insert_with(|| subcorpus.clone());
        }
        Ok(collection)
    }

    pub fn collection(&self, id: u64) -> Result<Arc<SubcorpusCollection>> {
        self.collections
            .read()
            .get(&id)
            .cloned()
            .ok_or(CollocateError::UnknownCollection(id))
    }

    /// Resolves `discourseme` in `scope`, reusing an earlier description of
    /// the same template.
    pub async fn describe(
        &self,
        discourseme: &Discourseme,
        scope: &Scope,
        s_attribute: &str,
        p_attribute: &str,
    ) -> Result<Arc<DiscoursemeDescription>> {
        let key = DescriptionKey::new(discourseme, scope, s_attribute, p_attribute);
        self.descriptions
            .get_or_try_create(key, || {
                description::describe(
                    self.provider(),
                    self.ids.next_id(),
                    discourseme,
                    scope,
                    s_attribute,
                    p_attribute,
                )
            })
            .await
    }

    pub async fn describe_constellation(
        &self,
        constellation: &Constellation,
        scope: &Scope,
        s_attribute: &str,
        p_attribute: &str,
    ) -> Result<ConstellationDescription> {
        let descriptions = try_join_all(
            constellation
                .discoursemes
                .iter()
                .map(|d| self.describe(d, scope, s_attribute, p_attribute)),
        )
        .await?;
        Ok(ConstellationDescription {
            constellation_id: constellation.id,
            corpus_id: scope.corpus_id.clone(),
            subcorpus_id: scope.subcorpus_id(),
            s_attribute: s_attribute.to_string(),
            descriptions,
        })
    }

    /// Describes `constellation` in every member of a subcorpus collection.
    #[instrument(skip(self, constellation), fields(constellation = constellation.id))]
    pub async fn describe_constellation_collection(
        &self,
        constellation: &Constellation,
        collection_id: u64,
        s_attribute: &str,
        p_attribute: &str,
    ) -> Result<ConstellationDescriptionCollection> {
        let collection = self.collection(collection_id)?;
        let members = futures::stream::iter(collection.members.iter())
            .map(|member| async move {
                let scope = Scope::subcorpus(member.subcorpus.clone());
                let description = self
                    .describe_constellation(constellation, &scope, s_attribute, p_attribute)
                    .await?;
                Ok::<_, CollocateError>((member.label.clone(), description))
            })
            .buffered(self.config.max_concurrency)
            .try_collect()
            .await?;
        debug!(members = collection.len(), "described constellation collection");
        Ok(ConstellationDescriptionCollection {
            constellation_id: constellation.id,
            collection_id,
            members,
        })
    }

    /// Fails with `UnknownItem` if `item` never occurs in `scope`.
    pub(crate) async fn check_item(&self, scope: &Scope, attribute: &str, item: &str) -> Result<()> {
        if self.provider.item_frequency(scope, attribute, item).await? == 0 {
            return Err(CollocateError::UnknownItem(item.to_string()));
        }
        Ok(())
    }

    pub(crate) fn remember(&self, analysis: StoredAnalysis) {
        self.analyses
            .write()
            .entry(analysis.id())
            .or_insert(analysis);
    }

    pub fn analysis(&self, id: u64) -> Result<StoredAnalysis> {
        self.analyses
            .read()
            .get(&id)
            .cloned()
            .ok_or(CollocateError::UnknownAnalysis(id))
    }
}
