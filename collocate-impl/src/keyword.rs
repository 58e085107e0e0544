//! Keyword analysis: items over-represented in a target scope compared to a
//! reference corpus.

use futures::future::try_join_all;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::aggregation::{
    score_rows, sum_tables, unigrams, AnalysisView, DiscoursemeScores, Page, Ranking, ScoredRow,
};
use crate::contingency::ContingencyTable;
use crate::description::{Constellation, Discourseme, DiscoursemeDescription, DiscoursemeId, TemplateItem};
use crate::engine::{Engine, StoredAnalysis};
use crate::error::{CollocateError, Result};
use crate::measures::Calculator;
use crate::subcorpus::{Scope, SubcorpusId};

fn default_min_freq() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRequest {
    pub corpus_id: String,
    #[serde(default)]
    pub subcorpus_id: Option<SubcorpusId>,
    pub reference_corpus_id: String,
    pub p_attribute: String,
    pub p_reference_attribute: String,
    /// Compare a subcorpus against the rest of its own corpus.
    #[serde(default)]
    pub sub_vs_rest: bool,
    pub s_break: String,
    /// Items observed fewer times in the target are not reported.
    #[serde(default = "default_min_freq")]
    pub min_freq: u64,
}

impl KeywordRequest {
    pub fn new(
        corpus_id: impl Into<String>,
        reference_corpus_id: impl Into<String>,
        p_attribute: impl Into<String>,
        s_break: impl Into<String>,
    ) -> Self {
        let p_attribute = p_attribute.into();
        KeywordRequest {
            corpus_id: corpus_id.into(),
            subcorpus_id: None,
            reference_corpus_id: reference_corpus_id.into(),
            p_reference_attribute: p_attribute.clone(),
            p_attribute,
            sub_vs_rest: false,
            s_break: s_break.into(),
            min_freq: default_min_freq(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordKey {
    corpus_id: String,
    subcorpus_id: Option<SubcorpusId>,
    reference_corpus_id: String,
    constellation_id: u64,
    constellation: Vec<(DiscoursemeId, Vec<TemplateItem>)>,
    p_attribute: String,
    p_reference_attribute: String,
    sub_vs_rest: bool,
    s_break: String,
    min_freq: u64,
}

impl KeywordKey {
    pub fn new(constellation: &Constellation, request: &KeywordRequest) -> Self {
        KeywordKey {
            corpus_id: request.corpus_id.clone(),
            subcorpus_id: request.subcorpus_id,
            reference_corpus_id: request.reference_corpus_id.clone(),
            constellation_id: constellation.id,
            constellation: constellation.fingerprint(),
            p_attribute: request.p_attribute.clone(),
            p_reference_attribute: request.p_reference_attribute.clone(),
            sub_vs_rest: request.sub_vs_rest,
            s_break: request.s_break.clone(),
            min_freq: request.min_freq,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeywordAnalysis {
    pub id: u64,
    pub constellation_id: u64,
    pub corpus_id: String,
    pub subcorpus_id: Option<SubcorpusId>,
    pub reference_corpus_id: String,
    pub p_attribute: String,
    pub p_reference_attribute: String,
    /// True when the reference was reduced to the complement of the target.
    pub sub_vs_rest: bool,
    /// `R1`.
    pub target_size: u64,
    /// `R2`.
    pub reference_size: u64,
    pub items: Vec<ScoredRow>,
    pub discoursemes: Vec<DiscoursemeScores>,
    /// Every discourseme of the constellation, scored or not.
    pub constellation_discoursemes: Vec<DiscoursemeId>,
}

impl KeywordAnalysis {
    pub fn item(&self, item: &str) -> Option<&ScoredRow> {
        self.items.iter().find(|row| row.item == item)
    }

    pub fn discourseme(&self, id: DiscoursemeId) -> Option<&DiscoursemeScores> {
        self.discoursemes.iter().find(|d| d.discourseme_id == id)
    }
}

/// Target and reference as used for counting.
struct Sides<'a> {
    target: &'a Scope,
    reference: &'a Scope,
    /// Set when reference counts must exclude the target.
    complement: bool,
    r1: u64,
    r2: u64,
}

impl Sides<'_> {
    fn table(&self, o11: u64, reference: u64, target_in_reference: u64) -> Result<ContingencyTable> {
        let o21 = if self.complement {
            reference.saturating_sub(target_in_reference)
        } else {
            reference
        };
        ContingencyTable::from_keyword(o11, self.r1, o21, self.r2)
    }
}

impl Engine {
    pub async fn keyword(
        &self,
        constellation: &Constellation,
        request: &KeywordRequest,
    ) -> Result<Arc<KeywordAnalysis>> {
        if request.sub_vs_rest && request.p_attribute != request.p_reference_attribute {
            return Err(CollocateError::invalid(
                "sub_vs_rest",
                "target and reference must use the same positional attribute",
            ));
        }
        let target = self.scope(&request.corpus_id, request.subcorpus_id)?;
        let key = KeywordKey::new(constellation, request);
        let analysis = self
            .keywords
            .get_or_try_create(key, || {
                self.compute_keyword(self.ids.next_id(), constellation, request, &target)
            })
            .await?;
        self.remember(StoredAnalysis::Keyword(analysis.clone()));
        Ok(analysis)
    }

    pub async fn build_keyword(
        &self,
        constellation: &Constellation,
        request: &KeywordRequest,
        ranking: Ranking,
        page: Page,
    ) -> Result<AnalysisView> {
        let analysis = self.keyword(constellation, request).await?;
        Ok(AnalysisView::new(
            analysis.id,
            &analysis.items,
            &analysis.discoursemes,
            ranking,
            page,
        )
        .await)
    }

    #[instrument(skip(self, constellation, request, target), fields(scope = %target, reference = %request.reference_corpus_id))]
    async fn compute_keyword(
        &self,
        id: u64,
        constellation: &Constellation,
        request: &KeywordRequest,
        target: &Scope,
    ) -> Result<KeywordAnalysis> {
        let provider = self.provider();
        let reference = Scope::corpus(request.reference_corpus_id.clone());
        let complement = request.sub_vs_rest
            && target.subcorpus.is_some()
            && target.corpus_id == request.reference_corpus_id;

        let (r1, reference_size) = futures::try_join!(
            provider.scope_size(target),
            provider.scope_size(&reference)
        )?;
        let sides = Sides {
            target,
            reference: &reference,
            complement,
            r1,
            r2: if complement {
                reference_size.saturating_sub(r1)
            } else {
                reference_size
            },
        };

        let mut analysis = KeywordAnalysis {
            id,
            constellation_id: constellation.id,
            corpus_id: target.corpus_id.clone(),
            subcorpus_id: target.subcorpus_id(),
            reference_corpus_id: request.reference_corpus_id.clone(),
            p_attribute: request.p_attribute.clone(),
            p_reference_attribute: request.p_reference_attribute.clone(),
            sub_vs_rest: complement,
            target_size: sides.r1,
            reference_size: sides.r2,
            items: Vec::new(),
            discoursemes: Vec::new(),
            constellation_discoursemes: constellation.discoursemes.iter().map(|d| d.id).collect(),
        };
        if r1 == 0 {
            warn!(scope = %target, "empty target, analysis is empty");
            return Ok(analysis);
        }

        let (target_freq, reference_freq) = futures::try_join!(
            provider.frequency_table(target, &request.p_attribute),
            provider.frequency_table(&reference, &request.p_reference_attribute),
        )?;
        let target_freq: HashMap<String, u64> = target_freq.into_iter().collect();
        let reference_freq: HashMap<String, u64> = reference_freq.into_iter().collect();
        let tables = target_freq
            .keys()
            .chain(reference_freq.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|item| {
                let o11 = target_freq.get(item).copied().unwrap_or(0);
                let reference = reference_freq.get(item).copied().unwrap_or(0);
                (item, o11, reference)
            })
            .filter(|(_, o11, _)| *o11 >= request.min_freq)
            .map(|(item, o11, reference)| Ok((item.clone(), sides.table(o11, reference, o11)?)))
            .collect::<Result<Vec<_>>>()?;
        let calculator = Calculator::new(&self.config().measures, tables.len());

        analysis.discoursemes = try_join_all(
            constellation
                .discoursemes
                .iter()
                .map(|d| self.discourseme_keyword(d, &sides, &calculator, request)),
        )
        .await?;
        analysis.items = score_rows(tables, &calculator);
        info!(
            items = analysis.items.len(),
            r1 = sides.r1,
            r2 = sides.r2,
            "computed keywords"
        );
        Ok(analysis)
    }

    async fn discourseme_keyword(
        &self,
        discourseme: &Discourseme,
        sides: &Sides<'_>,
        calculator: &Calculator,
        request: &KeywordRequest,
    ) -> Result<DiscoursemeScores> {
        let provider = self.provider();
        let (target, reference) = futures::try_join!(
            self.describe(discourseme, sides.target, &request.s_break, &request.p_attribute),
            self.describe(
                discourseme,
                sides.reference,
                &request.s_break,
                &request.p_reference_attribute
            ),
        )?;

        let target_counts = target.counts_by_item();
        let reference_counts = reference_counts(&reference, sides);
        let tables = target_counts
            .keys()
            .chain(reference_counts.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|item| {
                let o11 = target_counts.get(item).copied().unwrap_or(0);
                let o21 = reference_counts.get(item).copied().unwrap_or(0);
                Ok((item.to_string(), ContingencyTable::from_keyword(o11, sides.r1, o21, sides.r2)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let global = ScoredRow::new(
            discourseme.name.clone(),
            sum_tables(tables.iter().map(|(_, t)| t), sides.r1, sides.r1 + sides.r2)?,
            calculator,
        );

        let words = unigrams(
            target
                .template
                .iter()
                .map(|(surface, attribute)| (surface.as_str(), attribute.as_str())),
        )
        .into_iter()
        .collect_vec();
        let counts = try_join_all(words.iter().map(|(attribute, word)| async move {
            // the default attribute differs between the two sides
            let reference_attribute = if *attribute == request.p_attribute {
                request.p_reference_attribute.as_str()
            } else {
                attribute.as_str()
            };
            futures::try_join!(
                provider.item_frequency(sides.target, attribute, word),
                provider.item_frequency(sides.reference, reference_attribute, word),
            )
        }))
        .await?;
        let unigram_tables = words
            .into_iter()
            .zip(counts)
            .map(|((_, word), (o11, reference))| Ok((word, sides.table(o11, reference, o11)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(DiscoursemeScores {
            discourseme_id: discourseme.id,
            name: discourseme.name.clone(),
            global,
            items: score_rows(tables, calculator),
            unigram_items: score_rows(unigram_tables, calculator),
        })
    }
}

/// Reference matches per item; under `sub_vs_rest` those inside the target
/// subcorpus are left out.
fn reference_counts<'a>(reference: &'a DiscoursemeDescription, sides: &Sides<'_>) -> BTreeMap<&'a str, u64> {
    let target_spans = sides.target.spans().filter(|_| sides.complement);
    let mut counts = BTreeMap::new();
    for m in reference.matches() {
        if target_spans.map_or(false, |spans| spans.contains_span(&m.span)) {
            continue;
        }
        *counts.entry(m.item.as_str()).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memory::{CorpusData, InMemoryProvider, ProviderConfig};
    use crate::measures::Measure;
    use crate::provider::Region;
    use crate::span::{Span, SpanSet};

    fn corpus(id: &str, text: &str) -> CorpusData {
        let words = text.split(' ').map(String::from).collect_vec();
        let size = words.len();
        CorpusData {
            id: id.into(),
            p_attributes: BTreeMap::from([("word".into(), words)]),
            s_attributes: BTreeMap::from([("s".into(), vec![Region::new(Span::new(0, size - 1))])]),
        }
    }

    fn engine() -> Engine {
        let provider = InMemoryProvider::new(ProviderConfig::default());
        provider
            .insert(corpus("news", "refugees arrive refugees stay the border the now"))
            .unwrap();
        provider
            .insert(corpus("ref", "the the the border weather refugees the sun"))
            .unwrap();
        Engine::new(Arc::new(provider), EngineConfig::default()).unwrap()
    }

    fn constellation() -> Constellation {
        Constellation {
            id: 1,
            name: "migration".into(),
            focus: None,
            discoursemes: vec![Discourseme::with_items(
                DiscoursemeId(1),
                "migration",
                ["refugees", "border"],
            )],
        }
    }

    #[tokio::test]
    async fn target_against_reference() {
        let engine = engine();
        let analysis = engine
            .keyword(&constellation(), &KeywordRequest::new("news", "ref", "word", "s"))
            .await
            .unwrap();
        assert_eq!((analysis.target_size, analysis.reference_size), (8, 8));

        let refugees = analysis.item("refugees").unwrap();
        assert_eq!((refugees.table.o11, refugees.table.o21), (2, 1));
        assert!(analysis.item("weather").is_none());
        assert!(
            refugees.scores.get(Measure::LogRatio) > analysis.item("the").unwrap().scores.get(Measure::LogRatio)
        );

        let migration = analysis.discourseme(DiscoursemeId(1)).unwrap();
        assert_eq!((migration.global.table.o11, migration.global.table.o21), (3, 2));
        assert_eq!(migration.global.table.n, 16);
    }

    #[tokio::test]
    async fn reference_only_items_need_min_freq_zero() {
        let engine = engine();
        let mut request = KeywordRequest::new("news", "ref", "word", "s");
        request.min_freq = 0;
        let analysis = engine.keyword(&constellation(), &request).await.unwrap();

        let weather = analysis.item("weather").unwrap();
        assert_eq!((weather.table.o11, weather.table.o21), (0, 1));
        assert!(analysis.item("sun").is_some());
        assert!(analysis.item("arrive").is_some());
        assert_eq!(analysis.items.len(), 8);
    }

    #[tokio::test]
    async fn subcorpus_against_the_rest() {
        let engine = engine();
        let sub = engine.register_subcorpus("news", "first half", SpanSet::from_spans([Span::new(0, 3)]));
        let mut request = KeywordRequest::new("news", "news", "word", "s");
        request.subcorpus_id = Some(sub.id);
        request.sub_vs_rest = true;

        let analysis = engine.keyword(&constellation(), &request).await.unwrap();
        assert!(analysis.sub_vs_rest);
        assert_eq!((analysis.target_size, analysis.reference_size), (4, 4));
        let refugees = analysis.item("refugees").unwrap();
        assert_eq!((refugees.table.o11, refugees.table.o21), (2, 0));

        let migration = analysis.discourseme(DiscoursemeId(1)).unwrap();
        // refugees twice in the target, border once in the rest
        assert_eq!((migration.global.table.o11, migration.global.table.o21), (2, 1));
    }

    #[tokio::test]
    async fn sub_vs_rest_needs_one_attribute() {
        let engine = engine();
        let mut request = KeywordRequest::new("news", "news", "word", "s");
        request.p_reference_attribute = "lemma".into();
        request.sub_vs_rest = true;
        assert!(matches!(
            engine.keyword(&constellation(), &request).await,
            Err(CollocateError::InvalidParameter { name: "sub_vs_rest", .. })
        ));
    }
}
