//! Collocation analysis: which items occur unusually often near a focus
//! discourseme.
//!
//! The context of the focus is measured in the analysis scope. `N` and every
//! `C1` come from the marginals scope, which is the whole corpus under
//! [`Marginals::Global`]. Switching marginals therefore never moves `R1` or
//! `O11`.

use futures::future::try_join_all;
use futures::stream::{StreamExt, TryStreamExt};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::aggregation::{
    score_rows, sum_tables, unigrams, AnalysisView, DiscoursemeScores, Page, Ranking, ScoredRow,
};
use crate::concordance::{covers_all, discourseme_ranges, line_extent, Overlap};
use crate::contingency::{collocation_context, ContingencyTable, Marginals};
use crate::description::{
    Constellation, ConstellationDescriptionCollection, Discourseme, DiscoursemeDescription,
    DiscoursemeId, TemplateItem,
};
use crate::engine::{Engine, StoredAnalysis};
use crate::error::{CollocateError, Result};
use crate::measures::Calculator;
use crate::provider::RegionIndex;
use crate::span::{Span, SpanSet};
use crate::subcorpus::{Scope, SubcorpusId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollocationRequest {
    pub corpus_id: String,
    #[serde(default)]
    pub subcorpus_id: Option<SubcorpusId>,
    pub focus: DiscoursemeId,
    pub p_attribute: String,
    /// Structural attribute windows may not cross.
    pub s_break: String,
    pub window: usize,
    #[serde(default)]
    pub marginals: Marginals,
    /// Keep only focus matches with this value inside their window.
    #[serde(default)]
    pub filter_item: Option<String>,
    /// Keep only focus matches whose window holds every one of these.
    #[serde(default)]
    pub filter_discourseme_ids: Vec<DiscoursemeId>,
}

impl CollocationRequest {
    pub fn new(
        corpus_id: impl Into<String>,
        focus: DiscoursemeId,
        p_attribute: impl Into<String>,
        s_break: impl Into<String>,
        window: usize,
    ) -> Self {
        CollocationRequest {
            corpus_id: corpus_id.into(),
            subcorpus_id: None,
            focus,
            p_attribute: p_attribute.into(),
            s_break: s_break.into(),
            window,
            marginals: Marginals::default(),
            filter_item: None,
            filter_discourseme_ids: Vec::new(),
        }
    }
}

/// Canonical parameter tuple of a collocation analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollocationKey {
    corpus_id: String,
    subcorpus_id: Option<SubcorpusId>,
    constellation_id: u64,
    constellation: Vec<(DiscoursemeId, Vec<TemplateItem>)>,
    focus: DiscoursemeId,
    p_attribute: String,
    s_break: String,
    window: usize,
    marginals: Marginals,
    filter_item: Option<String>,
    filter_discourseme_ids: Vec<DiscoursemeId>,
}

impl CollocationKey {
    pub fn new(constellation: &Constellation, request: &CollocationRequest) -> Self {
        CollocationKey {
            corpus_id: request.corpus_id.clone(),
            subcorpus_id: request.subcorpus_id,
            constellation_id: constellation.id,
            constellation: constellation.fingerprint(),
            focus: request.focus,
            p_attribute: request.p_attribute.clone(),
            s_break: request.s_break.clone(),
            window: request.window,
            marginals: request.marginals,
            filter_item: request.filter_item.clone(),
            filter_discourseme_ids: request
                .filter_discourseme_ids
                .iter()
                .copied()
                .sorted()
                .dedup()
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CollocationAnalysis {
    pub id: u64,
    pub constellation_id: u64,
    pub corpus_id: String,
    pub subcorpus_id: Option<SubcorpusId>,
    pub focus: DiscoursemeId,
    pub p_attribute: String,
    pub s_break: String,
    pub window: usize,
    pub marginals: Marginals,
    /// Focus matches left after filtering.
    pub focus_matches: usize,
    /// `R1`: positions in the context.
    pub context_size: u64,
    /// `N`: size of the marginals scope.
    pub n: u64,
    pub items: Vec<ScoredRow>,
    pub discoursemes: Vec<DiscoursemeScores>,
    /// Every discourseme of the constellation, scored or not.
    pub constellation_discoursemes: Vec<DiscoursemeId>,
}

impl CollocationAnalysis {
    pub fn is_empty(&self) -> bool {
        self.focus_matches == 0
    }

    pub fn item(&self, item: &str) -> Option<&ScoredRow> {
        self.items.iter().find(|row| row.item == item)
    }

    pub fn discourseme(&self, id: DiscoursemeId) -> Option<&DiscoursemeScores> {
        self.discoursemes.iter().find(|d| d.discourseme_id == id)
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesMember {
    pub label: String,
    pub analysis: Arc<CollocationAnalysis>,
}

/// One collocation analysis per member of a subcorpus collection.
#[derive(Debug, Serialize)]
pub struct CollocationSeries {
    pub collection_id: u64,
    pub descriptions: ConstellationDescriptionCollection,
    /// Chronological.
    pub members: Vec<SeriesMember>,
}

impl Engine {
    /// Gets or computes the collocation analysis for `request`.
    pub async fn collocation(
        &self,
        constellation: &Constellation,
        request: &CollocationRequest,
    ) -> Result<Arc<CollocationAnalysis>> {
        self.config().check_window(request.window)?;
        let scope = self.scope(&request.corpus_id, request.subcorpus_id)?;
        self.collocation_in(constellation, request, &scope).await
    }

    /// One page of items, plus the scores of every discourseme, ranked.
    pub async fn build_collocation(
        &self,
        constellation: &Constellation,
        request: &CollocationRequest,
        ranking: Ranking,
        page: Page,
    ) -> Result<AnalysisView> {
        let analysis = self.collocation(constellation, request).await?;
        Ok(AnalysisView::new(
            analysis.id,
            &analysis.items,
            &analysis.discoursemes,
            ranking,
            page,
        )
        .await)
    }

    /// Runs `request` in every member of a subcorpus collection. The corpus
    /// and subcorpus of `request` are replaced by the members'.
    #[instrument(skip(self, constellation, request), fields(focus = %request.focus))]
    pub async fn build_collocation_series(
        &self,
        constellation: &Constellation,
        collection_id: u64,
        request: &CollocationRequest,
    ) -> Result<CollocationSeries> {
        self.config().check_window(request.window)?;
        let collection = self.collection(collection_id)?;
        let descriptions = self
            .describe_constellation_collection(
                constellation,
                collection_id,
                &request.s_break,
                &request.p_attribute,
            )
            .await?;

        let members = futures::stream::iter(collection.members.iter())
            .map(|member| async move {
                let scope = Scope::subcorpus(member.subcorpus.clone());
                let member_request = CollocationRequest {
                    corpus_id: scope.corpus_id.clone(),
                    subcorpus_id: scope.subcorpus_id(),
                    ..request.clone()
                };
                let analysis = self
                    .collocation_in(constellation, &member_request, &scope)
                    .await?;
                Ok::<_, CollocateError>(SeriesMember {
                    label: member.label.clone(),
                    analysis,
                })
            })
            .buffered(self.config().max_concurrency)
            .try_collect()
            .await?;

        Ok(CollocationSeries {
            collection_id,
            descriptions,
            members,
        })
    }

    async fn collocation_in(
        &self,
        constellation: &Constellation,
        request: &CollocationRequest,
        scope: &Scope,
    ) -> Result<Arc<CollocationAnalysis>> {
        let key = CollocationKey::new(constellation, request);
        let analysis = self
            .collocations
            .get_or_try_create(key, || {
                self.compute_collocation(self.ids.next_id(), constellation, request, scope)
            })
            .await?;
        self.remember(StoredAnalysis::Collocation(analysis.clone()));
        Ok(analysis)
    }

    #[instrument(skip(self, constellation, request, scope), fields(scope = %scope, window = request.window))]
    async fn compute_collocation(
        &self,
        id: u64,
        constellation: &Constellation,
        request: &CollocationRequest,
        scope: &Scope,
    ) -> Result<CollocationAnalysis> {
        let marginal_scope = request.marginals.scope(scope);
        let mut analysis = CollocationAnalysis {
            id,
            constellation_id: constellation.id,
            corpus_id: scope.corpus_id.clone(),
            subcorpus_id: scope.subcorpus_id(),
            focus: request.focus,
            p_attribute: request.p_attribute.clone(),
            s_break: request.s_break.clone(),
            window: request.window,
            marginals: request.marginals,
            focus_matches: 0,
            context_size: 0,
            n: self.provider().scope_size(&marginal_scope).await?,
            items: Vec::new(),
            discoursemes: Vec::new(),
            constellation_discoursemes: constellation.discoursemes.iter().map(|d| d.id).collect(),
        };

        match self
            .score_collocation(&mut analysis, constellation, request, scope, &marginal_scope)
            .await
        {
            Ok(()) => {
                info!(
                    items = analysis.items.len(),
                    r1 = analysis.context_size,
                    n = analysis.n,
                    "computed collocation"
                );
                Ok(analysis)
            }
            Err(CollocateError::EmptyScope(empty)) => {
                warn!(scope = %empty, "no focus matches, analysis is empty");
                Ok(analysis)
            }
            Err(e) => Err(e),
        }
    }

    async fn score_collocation(
        &self,
        analysis: &mut CollocationAnalysis,
        constellation: &Constellation,
        request: &CollocationRequest,
        scope: &Scope,
        marginal_scope: &Scope,
    ) -> Result<()> {
        let focus = constellation
            .get(request.focus)
            .ok_or(CollocateError::UnknownDiscourseme(request.focus))?;
        let provider = self.provider();

        let focus_description = self
            .describe(focus, scope, &request.s_break, &request.p_attribute)
            .await?;
        let regions = RegionIndex::new(
            provider
                .structural_regions(&scope.corpus_id, &request.s_break)
                .await?,
        );
        let corpus_size = provider.scope_size(&scope.whole_corpus()).await? as usize;

        let focus_spans = self
            .filter_focus(constellation, &focus_description, scope, &regions, corpus_size, request)
            .await?;
        if focus_spans.is_empty() {
            return Err(CollocateError::EmptyScope(scope.to_string()));
        }

        let context = collocation_context(
            &focus_spans,
            &regions,
            scope.spans(),
            corpus_size,
            request.window,
        );
        let (r1, n) = (context.len() as u64, analysis.n);

        let (in_context, marginal) = futures::try_join!(
            provider.counts_within(&scope.corpus_id, &request.p_attribute, &context),
            provider.frequency_table(marginal_scope, &request.p_attribute),
        )?;
        let marginal: HashMap<String, u64> = marginal.into_iter().collect();
        let calculator = Calculator::new(&self.config().measures, in_context.len());

        let tables = in_context
            .into_iter()
            .map(|(item, o11)| {
                let c1 = marginal.get(&item).copied().unwrap_or(o11);
                Ok((item, ContingencyTable::new(o11, r1, c1, n)?))
            })
            .collect::<Result<Vec<_>>>()?;

        analysis.discoursemes = try_join_all(constellation.discoursemes.iter().map(|d| {
            self.discourseme_collocation(d, marginal_scope, &context, (r1, n), &calculator, request)
        }))
        .await?;
        analysis.items = score_rows(tables, &calculator);
        analysis.focus_matches = focus_spans.len();
        analysis.context_size = r1;
        Ok(())
    }

    /// Focus matches whose window passes the request's filters.
    async fn filter_focus(
        &self,
        constellation: &Constellation,
        focus: &DiscoursemeDescription,
        scope: &Scope,
        regions: &RegionIndex,
        corpus_size: usize,
        request: &CollocationRequest,
    ) -> Result<Vec<Span>> {
        let spans = focus.spans();
        if request.filter_item.is_none() && request.filter_discourseme_ids.is_empty() {
            return Ok(spans);
        }

        let filters = try_join_all(request.filter_discourseme_ids.iter().map(|id| async move {
            let discourseme = constellation
                .get(*id)
                .ok_or(CollocateError::UnknownDiscourseme(*id))?;
            self.describe(discourseme, scope, &request.s_break, &request.p_attribute)
                .await
        }))
        .await?;
        if let Some(item) = &request.filter_item {
            self.check_item(scope, &request.p_attribute, item).await?;
        }

        // same line as a concordance would show: discoursemes anywhere on the
        // displayed line, the item inside the window
        let extended_window = self.config().extended_window.max(request.window);
        let mut kept = Vec::with_capacity(spans.len());
        for span in spans {
            let Some(extent) = line_extent(
                &span,
                regions,
                Overlap::Partial,
                request.window,
                extended_window,
                corpus_size,
            ) else {
                continue;
            };
            if !covers_all(
                &discourseme_ranges(&extent.display, &filters),
                &request.filter_discourseme_ids,
            ) {
                continue;
            }
            if let Some(item) = &request.filter_item {
                let values = self
                    .provider()
                    .values(&scope.corpus_id, &request.p_attribute, extent.core)
                    .await?;
                if !values.iter().any(|v| v == item) {
                    continue;
                }
            }
            kept.push(span);
        }
        Ok(kept)
    }

    /// Item, discourseme and unigram rows of one discourseme against the
    /// focus context.
    async fn discourseme_collocation(
        &self,
        discourseme: &Discourseme,
        marginal_scope: &Scope,
        context: &SpanSet,
        (r1, n): (u64, u64),
        calculator: &Calculator,
        request: &CollocationRequest,
    ) -> Result<DiscoursemeScores> {
        let provider = self.provider();
        let description = self
            .describe(discourseme, marginal_scope, &request.s_break, &request.p_attribute)
            .await?;

        let mut inside: BTreeMap<&str, u64> = BTreeMap::new();
        for m in description.matches() {
            if context.contains_span(&m.span) {
                *inside.entry(m.item.as_str()).or_default() += 1;
            }
        }
        let tables = description
            .counts_by_item()
            .into_iter()
            .map(|(item, c1)| {
                let o11 = inside.get(item).copied().unwrap_or(0);
                Ok((item.to_string(), ContingencyTable::new(o11, r1, c1, n)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let global = ScoredRow::new(
            discourseme.name.clone(),
            sum_tables(tables.iter().map(|(_, t)| t), r1, n)?,
            calculator,
        );

        let mut by_attribute: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (attribute, word) in unigrams(
            description
                .template
                .iter()
                .map(|(surface, attribute)| (surface.as_str(), attribute.as_str())),
        ) {
            by_attribute.entry(attribute).or_default().push(word);
        }
        let mut unigram_tables = Vec::new();
        for (attribute, words) in by_attribute {
            let in_context: HashMap<String, u64> = provider
                .counts_within(&marginal_scope.corpus_id, &attribute, context)
                .await?
                .into_iter()
                .collect();
            let frequencies = try_join_all(
                words
                    .iter()
                    .map(|word| provider.item_frequency(marginal_scope, &attribute, word)),
            )
            .await?;
            for (word, c1) in words.into_iter().zip(frequencies) {
                let o11 = in_context.get(&word).copied().unwrap_or(0);
                unigram_tables.push((word, ContingencyTable::new(o11, r1, c1, n)?));
            }
        }

        Ok(DiscoursemeScores {
            discourseme_id: discourseme.id,
            name: discourseme.name.clone(),
            global,
            items: score_rows(tables, calculator),
            unigram_items: score_rows(unigram_tables, calculator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concordance::ConcordanceRequest;
    use crate::config::EngineConfig;
    use crate::memory::{CorpusData, InMemoryProvider, ProviderConfig};
    use crate::measures::Measure;
    use crate::provider::Region;

    // two sentences of 12 tokens; "x" is the focus
    fn engine() -> Engine {
        let words = "a x b c d e f g h i j k l m n x o p q r s t u v"
            .split(' ')
            .map(String::from)
            .collect_vec();
        let provider = InMemoryProvider::new(ProviderConfig::default());
        provider
            .insert(CorpusData {
                id: "toy".into(),
                p_attributes: BTreeMap::from([("word".into(), words)]),
                s_attributes: BTreeMap::from([(
                    "s".into(),
                    vec![
                        Region::new(Span::new(0, 11)),
                        Region::new(Span::new(12, 23)),
                    ],
                )]),
            })
            .unwrap();
        Engine::new(Arc::new(provider), EngineConfig::default()).unwrap()
    }

    fn constellation() -> Constellation {
        Constellation {
            id: 1,
            name: "toy".into(),
            focus: Some(DiscoursemeId(1)),
            discoursemes: vec![
                Discourseme::with_items(DiscoursemeId(1), "focus", ["x"]),
                Discourseme::with_items(DiscoursemeId(2), "early", ["a", "b c"]),
                Discourseme::with_items(DiscoursemeId(3), "late", ["p"]),
            ],
        }
    }

    #[tokio::test]
    async fn context_rows_and_discourseme_sums() {
        let engine = engine();
        let request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        let analysis = engine.collocation(&constellation(), &request).await.unwrap();

        // windows: 0..=4 minus the match at 1, and 12..=18 minus the match at 15
        assert_eq!(analysis.focus_matches, 2);
        assert_eq!(analysis.context_size, 4 + 6);
        assert_eq!(analysis.n, 24);

        let b = analysis.item("b").unwrap();
        assert_eq!((b.table.o11, b.table.c1, b.table.r1), (1, 1, 10));
        assert!(analysis.item("f").is_none());

        let early = analysis.discourseme(DiscoursemeId(2)).unwrap();
        assert_eq!(early.global.item, "early");
        assert_eq!((early.global.table.o11, early.global.table.c1), (2, 2));
        assert_eq!(early.items.len(), 2);
        // unigrams of "a" and "b c"
        assert_eq!(early.unigram_items.len(), 3);

        let late = analysis.discourseme(DiscoursemeId(3)).unwrap();
        assert_eq!(late.global.table.o11, 1);
        assert!(late.global.scores.get(Measure::LogLikelihood) > 0.0);
    }

    #[tokio::test]
    async fn identical_requests_share_one_analysis() {
        let engine = engine();
        let request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        let first = engine.collocation(&constellation(), &request).await.unwrap();
        let second = engine.collocation(&constellation(), &request).await.unwrap();
        assert_eq!(first.id, second.id);

        let wider = CollocationRequest { window: 4, ..request };
        assert_ne!(engine.collocation(&constellation(), &wider).await.unwrap().id, first.id);
        assert!(matches!(engine.analysis(first.id), Ok(StoredAnalysis::Collocation(_))));
    }

    #[tokio::test]
    async fn filters_restrict_the_focus_matches() {
        let engine = engine();
        let mut request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        request.filter_discourseme_ids = vec![DiscoursemeId(3)];
        let analysis = engine.collocation(&constellation(), &request).await.unwrap();
        assert_eq!(analysis.focus_matches, 1);
        assert!(analysis.item("a").is_none());

        let mut request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        request.filter_item = Some("zzz".into());
        assert!(matches!(
            engine.collocation(&constellation(), &request).await,
            Err(CollocateError::UnknownItem(_))
        ));
    }

    #[tokio::test]
    async fn discourseme_filters_read_the_displayed_line() {
        let engine = engine();
        let mut constellation = constellation();
        constellation
            .discoursemes
            .push(Discourseme::with_items(DiscoursemeId(4), "far", ["k"]));

        // "k" shares a sentence with the first "x" but lies outside its window
        let mut request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        request.filter_discourseme_ids = vec![DiscoursemeId(4)];
        let analysis = engine.collocation(&constellation, &request).await.unwrap();
        assert_eq!(analysis.focus_matches, 1);
        assert!(analysis.item("a").is_some());
        assert!(analysis.item("p").is_none());

        let scope = engine.scope("toy", None).unwrap();
        let focus = engine
            .describe(&constellation.discoursemes[0], &scope, "s", "word")
            .await
            .unwrap();
        let mut lines = ConcordanceRequest::new("word", "s", 3);
        lines.filter_discourseme_ids = vec![DiscoursemeId(4)];
        let concordance = engine
            .build_concordance(&scope, &focus.spans(), &constellation.discoursemes, &lines)
            .await
            .unwrap();
        assert_eq!(concordance.nr_lines, analysis.focus_matches);
    }

    #[tokio::test]
    async fn empty_scopes_give_empty_analyses() {
        let engine = engine();
        let sub = engine.register_subcorpus("toy", "middle", SpanSet::from_spans([Span::new(4, 10)]));
        let mut request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        request.subcorpus_id = Some(sub.id);
        let analysis = engine.collocation(&constellation(), &request).await.unwrap();
        assert!(analysis.is_empty());
        assert!(analysis.items.is_empty());
        assert_eq!(analysis.n, 7);
    }

    #[tokio::test]
    async fn empty_analyses_map_every_discourseme() {
        let engine = engine();
        let mut constellation = constellation();
        constellation.discoursemes[0] = Discourseme::with_items(DiscoursemeId(1), "focus", ["zzz"]);
        let request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 3);
        let analysis = engine.collocation(&constellation, &request).await.unwrap();
        assert!(analysis.is_empty());

        let map = engine.semantic_map(analysis.id).await.unwrap();
        assert!(map.items().is_empty());
        engine.set_user_coordinate(map.id, DiscoursemeId(2), 0.5, -0.5).unwrap();
        assert!(matches!(
            engine.set_user_coordinate(map.id, DiscoursemeId(9), 0.0, 0.0),
            Err(CollocateError::UnknownDiscourseme(DiscoursemeId(9)))
        ));

        let coordinates = engine.map_coordinates(map.id).unwrap();
        assert_eq!(coordinates.discoursemes.len(), 3);
        let early = coordinates
            .discoursemes
            .iter()
            .find(|d| d.discourseme_id == DiscoursemeId(2))
            .unwrap();
        assert_eq!((early.x, early.y), (None, None));
        assert_eq!((early.x_user, early.y_user), (Some(0.5), Some(-0.5)));
    }

    #[tokio::test]
    async fn windows_outside_the_bounds_are_rejected() {
        let engine = engine();
        let request = CollocationRequest::new("toy", DiscoursemeId(1), "word", "s", 2);
        assert!(matches!(
            engine.collocation(&constellation(), &request).await,
            Err(CollocateError::InvalidParameter { name: "window", .. })
        ));
    }
}
