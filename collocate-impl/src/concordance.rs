//! Concordance lines: a bounded window of tokens around every match, with
//! the ranges of highlighted discoursemes that fall onto each line.

use futures::future::try_join_all;
use futures::stream::{StreamExt, TryStreamExt};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::aggregation::Page;
use crate::description::{Discourseme, DiscoursemeDescription, DiscoursemeId};
use crate::engine::Engine;
use crate::error::{CollocateError, Result};
use crate::provider::RegionIndex;
use crate::span::Span;
use crate::subcorpus::Scope;

/// How matches crossing a structural boundary are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlap {
    /// Keep the match; its line may span every region the match touches.
    #[default]
    Partial,
    /// Drop matches that do not lie inside a single region.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrder {
    /// Corpus order.
    #[default]
    First,
    Last,
    /// By the primary value at `sort_by_offset`.
    Ascending,
    Descending,
    /// Shuffled with a fixed seed.
    Random,
}

impl LineOrder {
    fn needs_values(&self) -> bool {
        matches!(self, LineOrder::Ascending | LineOrder::Descending)
    }
}

fn first_page() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcordanceRequest {
    pub p_attribute: String,
    #[serde(default)]
    pub secondary_p_attribute: Option<String>,
    pub s_break: String,
    pub window: usize,
    /// Display range per side; the engine's `extended_window` when unset.
    #[serde(default)]
    pub extended_window: Option<usize>,
    #[serde(default)]
    pub overlap: Overlap,
    #[serde(default)]
    pub filter_item: Option<String>,
    #[serde(default)]
    pub filter_discourseme_ids: Vec<DiscoursemeId>,
    #[serde(default)]
    pub order: LineOrder,
    #[serde(default)]
    pub sort_by_offset: isize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "first_page")]
    pub page_number: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl ConcordanceRequest {
    pub fn new(p_attribute: impl Into<String>, s_break: impl Into<String>, window: usize) -> Self {
        ConcordanceRequest {
            p_attribute: p_attribute.into(),
            secondary_p_attribute: None,
            s_break: s_break.into(),
            window,
            extended_window: None,
            overlap: Overlap::default(),
            filter_item: None,
            filter_discourseme_ids: Vec::new(),
            order: LineOrder::default(),
            sort_by_offset: 0,
            seed: 0,
            page_number: 1,
            page_size: None,
        }
    }
}

/// Where one line starts and ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineExtent {
    pub match_span: Span,
    /// Tokens within the collocation window.
    pub core: Span,
    /// Tokens shown on the line.
    pub display: Span,
}

/// Extent of the line around `match_span`, or `None` if the match is dropped
/// under `overlap`.
pub fn line_extent(
    match_span: &Span,
    regions: &RegionIndex,
    overlap: Overlap,
    window: usize,
    extended_window: usize,
    corpus_size: usize,
) -> Option<LineExtent> {
    let corpus = Span::new(0, corpus_size.checked_sub(1)?);
    let bound = match overlap {
        Overlap::Partial => regions.cover(match_span).unwrap_or(corpus),
        Overlap::Full => {
            let region = regions.containing(match_span.start)?;
            if !region.span.contains_span(match_span) {
                return None;
            }
            region.span
        }
    }
    .intersection(&corpus)?;

    let clip = |width: usize| match_span.extend(width, width).intersection(&bound);
    Some(LineExtent {
        match_span: *match_span,
        core: clip(window)?,
        display: clip(extended_window.max(window))?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoursemeRange {
    pub discourseme_id: DiscoursemeId,
    pub start: usize,
    pub end: usize,
}

/// Every highlighted match intersecting `span`.
pub fn discourseme_ranges(span: &Span, highlights: &[Arc<DiscoursemeDescription>]) -> Vec<DiscoursemeRange> {
    highlights
        .iter()
        .flat_map(|description| {
            description
                .matches_within(span)
                .map(move |m| DiscoursemeRange {
                    discourseme_id: description.discourseme_id,
                    start: m.span.start,
                    end: m.span.end,
                })
        })
        .collect()
}

/// True if every id in `required` has at least one range.
pub fn covers_all(ranges: &[DiscoursemeRange], required: &[DiscoursemeId]) -> bool {
    required
        .iter()
        .all(|id| ranges.iter().any(|r| r.discourseme_id == *id))
}

fn offset(cpos: usize, match_span: &Span) -> isize {
    if cpos < match_span.start {
        -((match_span.start - cpos) as isize)
    } else if cpos > match_span.end {
        (cpos - match_span.end) as isize
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub cpos: usize,
    /// Negative left of the match, 0 inside it, positive to the right.
    pub offset: isize,
    pub primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    pub out_of_window: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcordanceLine {
    /// Index of the match in the input.
    pub match_id: usize,
    pub match_span: Span,
    pub tokens: Vec<Token>,
    pub discourseme_ranges: Vec<DiscoursemeRange>,
    /// Annotations of the region containing the match.
    pub metadata: BTreeMap<String, Option<String>>,
}

impl ConcordanceLine {
    pub fn value_at(&self, offset: isize) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.offset == offset)
            .map(|t| t.primary.as_str())
    }

    pub fn has_in_window(&self, item: &str) -> bool {
        self.tokens.iter().any(|t| !t.out_of_window && t.primary == item)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Concordance {
    pub lines: Vec<ConcordanceLine>,
    /// Lines left after filtering, over all pages.
    pub nr_lines: usize,
    pub page_number: usize,
    pub page_size: usize,
    pub page_count: usize,
}

/// A line before its tokens are fetched.
#[derive(Debug)]
struct PendingLine {
    match_id: usize,
    extent: LineExtent,
    ranges: Vec<DiscoursemeRange>,
}

fn arrange<T>(
    lines: &mut [T],
    request: &ConcordanceRequest,
    position: impl Fn(&T) -> usize,
    value: impl Fn(&T) -> Option<&str>,
) {
    match request.order {
        LineOrder::First => lines.sort_by_key(|l| position(l)),
        LineOrder::Last => lines.sort_by_key(|l| std::cmp::Reverse(position(l))),
        LineOrder::Ascending => {
            lines.sort_by(|a, b| value(a).cmp(&value(b)).then(position(a).cmp(&position(b))))
        }
        LineOrder::Descending => {
            lines.sort_by(|a, b| value(b).cmp(&value(a)).then(position(a).cmp(&position(b))))
        }
        LineOrder::Random => {
            lines.sort_by_key(|l| position(l));
            lines.shuffle(&mut ChaCha8Rng::seed_from_u64(request.seed));
        }
    }
}

impl Engine {
    /// Builds one page of concordance lines around `matches`.
    ///
    /// Every discourseme in `highlight` is resolved in `scope`; only those can
    /// be used in `filter_discourseme_ids`.
    #[instrument(skip(self, matches, highlight, request), fields(scope = %scope, matches = matches.len()))]
    pub async fn build_concordance(
        &self,
        scope: &Scope,
        matches: &[Span],
        highlight: &[Discourseme],
        request: &ConcordanceRequest,
    ) -> Result<Concordance> {
        let page = Page::new(
            request.page_number,
            request.page_size.unwrap_or(self.config().default_page_size),
        )?;
        let extended_window = request
            .extended_window
            .unwrap_or(self.config().extended_window)
            .max(request.window);

        if let Some(id) = request
            .filter_discourseme_ids
            .iter()
            .find(|id| !highlight.iter().any(|d| d.id == **id))
        {
            return Err(CollocateError::UnknownDiscourseme(*id));
        }
        if let Some(item) = &request.filter_item {
            self.check_item(scope, &request.p_attribute, item).await?;
        }

        let highlights = try_join_all(
            highlight
                .iter()
                .map(|d| self.describe(d, scope, &request.s_break, &request.p_attribute)),
        )
        .await?;
        let regions = RegionIndex::new(
            self.provider()
                .structural_regions(&scope.corpus_id, &request.s_break)
                .await?,
        );
        let corpus_size = self.provider().scope_size(&scope.whole_corpus()).await? as usize;

        let mut pending = matches
            .iter()
            .enumerate()
            .filter_map(|(match_id, m)| {
                let extent = line_extent(
                    m,
                    &regions,
                    request.overlap,
                    request.window,
                    extended_window,
                    corpus_size,
                )?;
                // discourseme filters see the whole displayed line; collocation
                // focus filters use the same extent
                let ranges = discourseme_ranges(&extent.display, &highlights);
                covers_all(&ranges, &request.filter_discourseme_ids).then_some(PendingLine {
                    match_id,
                    extent,
                    ranges,
                })
            })
            .collect_vec();

        let (nr_lines, lines) = if request.filter_item.is_some() || request.order.needs_values() {
            let mut lines = self
                .fill_lines(&scope.corpus_id, &regions, pending, request)
                .await?
                .into_iter()
                .filter(|line| {
                    request
                        .filter_item
                        .as_deref()
                        .map_or(true, |item| line.has_in_window(item))
                })
                .collect_vec();
            arrange(
                &mut lines,
                request,
                |l| l.match_span.start,
                |l| l.value_at(request.sort_by_offset),
            );
            let nr_lines = lines.len();
            (nr_lines, lines.drain(page.bounds(nr_lines)).collect_vec())
        } else {
            // only the requested page needs its tokens
            arrange(&mut pending, request, |l| l.extent.match_span.start, |_| None);
            let nr_lines = pending.len();
            let on_page = pending.drain(page.bounds(nr_lines)).collect_vec();
            (
                nr_lines,
                self.fill_lines(&scope.corpus_id, &regions, on_page, request)
                    .await?,
            )
        };

        debug!(nr_lines, "built concordance");
        Ok(Concordance {
            lines,
            nr_lines,
            page_number: page.number,
            page_size: page.size,
            page_count: page.count(nr_lines),
        })
    }

    async fn fill_lines(
        &self,
        corpus_id: &str,
        regions: &RegionIndex,
        pending: Vec<PendingLine>,
        request: &ConcordanceRequest,
    ) -> Result<Vec<ConcordanceLine>> {
        futures::stream::iter(pending)
            .map(|line| self.fill_line(corpus_id, regions, line, request))
            .buffered(self.config().max_concurrency)
            .try_collect()
            .await
    }

    async fn fill_line(
        &self,
        corpus_id: &str,
        regions: &RegionIndex,
        line: PendingLine,
        request: &ConcordanceRequest,
    ) -> Result<ConcordanceLine> {
        let LineExtent {
            match_span,
            core,
            display,
        } = line.extent;
        let primary = self
            .provider()
            .values(corpus_id, &request.p_attribute, display)
            .await?;
        let secondary = match &request.secondary_p_attribute {
            Some(attribute) => Some(self.provider().values(corpus_id, attribute, display).await?),
            None => None,
        };

        let tokens = display
            .positions()
            .zip(primary)
            .enumerate()
            .map(|(i, (cpos, primary))| Token {
                cpos,
                offset: offset(cpos, &match_span),
                primary,
                secondary: secondary.as_ref().and_then(|values| values.get(i).cloned()),
                out_of_window: !core.contains(cpos),
            })
            .collect();

        Ok(ConcordanceLine {
            match_id: line.match_id,
            match_span,
            tokens,
            discourseme_ranges: line.ranges,
            metadata: regions
                .containing(match_span.start)
                .map(|r| r.metadata.clone())
                .unwrap_or_default(),
        })
    }
}
