//! Discoursemes, constellations, and their resolution against a scope.

use futures::future::try_join_all;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::provider::{CorpusProvider, Query};
use crate::span::{Span, SpanSet};
use crate::subcorpus::{Scope, SubcorpusId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoursemeId(pub u64);

impl fmt::Display for DiscoursemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One surface realization of a discourseme. Without an explicit attribute,
/// the analysis' positional attribute is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateItem {
    pub surface: String,
    #[serde(default)]
    pub p_attribute: Option<String>,
}

impl TemplateItem {
    pub fn new(surface: impl Into<String>) -> Self {
        TemplateItem {
            surface: surface.into(),
            p_attribute: None,
        }
    }

    pub fn on(mut self, p_attribute: impl Into<String>) -> Self {
        self.p_attribute = Some(p_attribute.into());
        self
    }

    pub fn attribute<'a>(&'a self, default: &'a str) -> &'a str {
        self.p_attribute.as_deref().unwrap_or(default)
    }

    /// The single words of a multi-word surface.
    pub fn unigrams(&self) -> impl Iterator<Item = &str> {
        self.surface.split_whitespace()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discourseme {
    pub id: DiscoursemeId,
    pub name: String,
    template: BTreeSet<TemplateItem>,
}

impl Discourseme {
    pub fn new(id: DiscoursemeId, name: impl Into<String>) -> Self {
        Discourseme {
            id,
            name: name.into(),
            template: BTreeSet::new(),
        }
    }

    pub fn with_items<I, S>(id: DiscoursemeId, name: impl Into<String>, surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut discourseme = Discourseme::new(id, name);
        for surface in surfaces {
            discourseme.add_item(TemplateItem::new(surface));
        }
        discourseme
    }

    /// Returns false if the item was already part of the template.
    pub fn add_item(&mut self, item: TemplateItem) -> bool {
        self.template.insert(item)
    }

    pub fn remove_item(&mut self, item: &TemplateItem) -> bool {
        self.template.remove(item)
    }

    pub fn template(&self) -> impl Iterator<Item = &TemplateItem> {
        self.template.iter()
    }

    /// Canonical form of the template, used in cache keys.
    pub fn fingerprint(&self) -> Vec<TemplateItem> {
        self.template.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constellation {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub focus: Option<DiscoursemeId>,
    pub discoursemes: Vec<Discourseme>,
}

impl Constellation {
    pub fn get(&self, id: DiscoursemeId) -> Option<&Discourseme> {
        self.discoursemes.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: DiscoursemeId) -> bool {
        self.get(id).is_some()
    }

    pub fn fingerprint(&self) -> Vec<(DiscoursemeId, Vec<TemplateItem>)> {
        self.discoursemes
            .iter()
            .map(|d| (d.id, d.fingerprint()))
            .sorted()
            .collect()
    }
}

/// Cache key of a [`DiscoursemeDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptionKey {
    pub discourseme_id: DiscoursemeId,
    pub template: Vec<TemplateItem>,
    pub corpus_id: String,
    pub subcorpus_id: Option<SubcorpusId>,
    pub s_attribute: String,
    pub p_attribute: String,
}

impl DescriptionKey {
    pub fn new(discourseme: &Discourseme, scope: &Scope, s_attribute: &str, p_attribute: &str) -> Self {
        DescriptionKey {
            discourseme_id: discourseme.id,
            template: discourseme.fingerprint(),
            corpus_id: scope.corpus_id.clone(),
            subcorpus_id: scope.subcorpus_id(),
            s_attribute: s_attribute.to_string(),
            p_attribute: p_attribute.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemMatch {
    pub item: String,
    pub span: Span,
}

/// A discourseme resolved in one scope: every match, labelled with the
/// surface item that produced it. No two matches share a position.
#[derive(Debug, Serialize)]
pub struct DiscoursemeDescription {
    pub id: u64,
    pub discourseme_id: DiscoursemeId,
    pub corpus_id: String,
    pub subcorpus_id: Option<SubcorpusId>,
    pub s_attribute: String,
    pub p_attribute: String,
    /// Template items, with their resolved attribute.
    pub template: Vec<(String, String)>,
    matches: Vec<ItemMatch>,
}

impl DiscoursemeDescription {
    /// Matches in corpus order.
    pub fn matches(&self) -> &[ItemMatch] {
        &self.matches
    }

    pub fn spans(&self) -> Vec<Span> {
        self.matches.iter().map(|m| m.span).collect()
    }

    pub fn span_set(&self) -> SpanSet {
        self.matches.iter().map(|m| m.span).collect()
    }

    /// Distinct surface items that matched at least once.
    pub fn items(&self) -> Vec<&str> {
        self.matches
            .iter()
            .map(|m| m.item.as_str())
            .sorted()
            .dedup()
            .collect()
    }

    pub fn counts_by_item(&self) -> BTreeMap<&str, u64> {
        let mut counts = BTreeMap::new();
        for m in &self.matches {
            *counts.entry(m.item.as_str()).or_default() += 1;
        }
        counts
    }

    /// Matches intersecting `span`.
    pub fn matches_within(&self, span: &Span) -> impl Iterator<Item = &ItemMatch> {
        let span = *span;
        let first = self.matches.partition_point(|m| m.span.end < span.start);
        self.matches[first..]
            .iter()
            .take_while(move |m| m.span.start <= span.end)
            .filter(move |m| m.span.intersects(&span))
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Keeps a position-disjoint subset of `candidates`: longer matches win over
/// shorter ones, earlier over later.
pub fn resolve_overlaps(mut candidates: Vec<ItemMatch>) -> Vec<ItemMatch> {
    candidates.sort_by(|a, b| {
        b.span
            .len()
            .cmp(&a.span.len())
            .then(a.span.start.cmp(&b.span.start))
            .then_with(|| a.item.cmp(&b.item))
    });

    // accepted spans keyed by start
    let mut taken: BTreeMap<usize, usize> = BTreeMap::new();
    let mut kept = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Span { start, end } = candidate.span;
        let blocked = taken
            .range(..=end)
            .next_back()
            .map_or(false, |(_, &taken_end)| taken_end >= start);
        if !blocked {
            taken.insert(start, end);
            kept.push(candidate);
        }
    }
    kept.sort_by_key(|m| m.span);
    kept
}

/// Resolves every template item of `discourseme` in `scope`.
#[instrument(skip(provider, discourseme, scope), fields(discourseme = %discourseme.id, scope = %scope))]
pub async fn describe(
    provider: &dyn CorpusProvider,
    id: u64,
    discourseme: &Discourseme,
    scope: &Scope,
    s_attribute: &str,
    p_attribute: &str,
) -> Result<DiscoursemeDescription> {
    let template = discourseme
        .template()
        .map(|item| (item.surface.clone(), item.attribute(p_attribute).to_string()))
        .collect_vec();

    let resolved = try_join_all(template.iter().map(|(surface, attribute)| async move {
        let spans = provider
            .match_positions(scope, &Query::item(surface, attribute))
            .await?;
        Ok::<_, crate::error::CollocateError>(
            spans
                .into_iter()
                .map(|span| ItemMatch {
                    item: surface.clone(),
                    span,
                })
                .collect_vec(),
        )
    }))
    .await?;

    let matches = resolve_overlaps(resolved.into_iter().flatten().collect());
    debug!(matches = matches.len(), "described discourseme");

    Ok(DiscoursemeDescription {
        id,
        discourseme_id: discourseme.id,
        corpus_id: scope.corpus_id.clone(),
        subcorpus_id: scope.subcorpus_id(),
        s_attribute: s_attribute.to_string(),
        p_attribute: p_attribute.to_string(),
        template,
        matches,
    })
}

/// A constellation resolved in one scope.
#[derive(Debug, Serialize)]
pub struct ConstellationDescription {
    pub constellation_id: u64,
    pub corpus_id: String,
    pub subcorpus_id: Option<SubcorpusId>,
    pub s_attribute: String,
    pub descriptions: Vec<Arc<DiscoursemeDescription>>,
}

impl ConstellationDescription {
    pub fn get(&self, id: DiscoursemeId) -> Option<&Arc<DiscoursemeDescription>> {
        self.descriptions.iter().find(|d| d.discourseme_id == id)
    }
}

/// One [`ConstellationDescription`] per member of a subcorpus collection, in
/// the collection's order.
#[derive(Debug, Serialize)]
pub struct ConstellationDescriptionCollection {
    pub constellation_id: u64,
    pub collection_id: u64,
    pub members: Vec<(String, ConstellationDescription)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(item: &str, start: usize, end: usize) -> ItemMatch {
        ItemMatch {
            item: item.to_string(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn longer_matches_win_overlaps() {
        let kept = resolve_overlaps(vec![
            m("Merkel", 1, 1),
            m("Angela Merkel", 0, 1),
            m("Merkel", 7, 7),
            m("Kanzlerin Merkel", 6, 7),
            m("Merkel", 12, 12),
        ]);
        assert_eq!(
            kept,
            vec![m("Angela Merkel", 0, 1), m("Kanzlerin Merkel", 6, 7), m("Merkel", 12, 12)]
        );
    }

    #[test]
    fn equal_length_overlaps_keep_the_earlier() {
        let kept = resolve_overlaps(vec![m("b c", 1, 2), m("a b", 0, 1), m("c d", 2, 3)]);
        assert_eq!(kept, vec![m("a b", 0, 1), m("c d", 2, 3)]);
    }

    #[test]
    fn template_edits() {
        let mut d = Discourseme::with_items(DiscoursemeId(1), "migration", ["Migration", "Flucht"]);
        assert!(!d.add_item(TemplateItem::new("Flucht")));
        assert!(d.add_item(TemplateItem::new("Flucht").on("lemma")));
        assert!(d.remove_item(&TemplateItem::new("Migration")));
        assert_eq!(d.fingerprint().len(), 2);
    }

    #[test]
    fn matches_within_a_window() {
        let description = DiscoursemeDescription {
            id: 1,
            discourseme_id: DiscoursemeId(1),
            corpus_id: "c".into(),
            subcorpus_id: None,
            s_attribute: "s".into(),
            p_attribute: "word".into(),
            template: vec![],
            matches: vec![m("a", 2, 3), m("b", 8, 8), m("a", 15, 16)],
        };
        let hits = description.matches_within(&Span::new(3, 15)).collect_vec();
        assert_eq!(hits.len(), 3);
        assert_eq!(description.matches_within(&Span::new(4, 7)).count(), 0);
        assert_eq!(description.items(), vec!["a", "b"]);
        assert_eq!(description.counts_by_item()["a"], 2);
    }
}
