//! Position arithmetic over absolute corpus positions.
//!
//! Every position set the engine handles (query matches, context windows,
//! subcorpora) is a [`SpanSet`]: a sorted list of disjoint inclusive spans.
//! Items and regions refer to ranges in this index space, so sharing a token
//! between several multi-word items or overlapping windows never requires an
//! object graph.

use serde::{Deserialize, Serialize};
use std::cmp::{max, min};

/// An inclusive `[start, end]` range of corpus positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span {
            start: min(start, end),
            end: max(start, end),
        }
    }

    pub fn single(position: usize) -> Self {
        Span {
            start: position,
            end: position,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Spans are never empty; present for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, position: usize) -> bool {
        self.start <= position && position <= self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersects(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersection(&self, other: &Span) -> Option<Span> {
        if self.intersects(other) {
            Some(Span {
                start: max(self.start, other.start),
                end: min(self.end, other.end),
            })
        } else {
            None
        }
    }

    /// Grows the span by `left` and `right` positions, saturating at zero.
    pub fn extend(&self, left: usize, right: usize) -> Span {
        Span {
            start: self.start.saturating_sub(left),
            end: self.end.saturating_add(right),
        }
    }

    pub fn positions(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// A normalised set of corpus positions.
///
/// Spans are kept sorted, disjoint and non-adjacent, so two sets holding the
/// same positions always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanSet {
    spans: Vec<Span>,
}

impl SpanSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spans<I: IntoIterator<Item = Span>>(spans: I) -> Self {
        let mut spans = spans.into_iter().collect::<Vec<_>>();
        spans.sort_unstable();

        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start <= last.end.saturating_add(1) => {
                    last.end = max(last.end, span.end);
                }
                _ => merged.push(span),
            }
        }
        SpanSet { spans: merged }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Number of positions in the set.
    pub fn len(&self) -> usize {
        self.spans.iter().map(Span::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn locate(&self, position: usize) -> Option<&Span> {
        let idx = self.spans.partition_point(|s| s.end < position);
        self.spans.get(idx).filter(|s| s.start <= position)
    }

    pub fn contains(&self, position: usize) -> bool {
        self.locate(position).is_some()
    }

    /// True when every position of `span` is in the set.
    pub fn contains_span(&self, span: &Span) -> bool {
        self.locate(span.start)
            .map(|s| s.contains_span(span))
            .unwrap_or(false)
    }

    pub fn intersects_span(&self, span: &Span) -> bool {
        let idx = self.spans.partition_point(|s| s.end < span.start);
        self.spans
            .get(idx)
            .map(|s| s.intersects(span))
            .unwrap_or(false)
    }

    pub fn union(&self, other: &SpanSet) -> SpanSet {
        SpanSet::from_spans(self.spans.iter().chain(other.spans.iter()).copied())
    }

    pub fn intersection(&self, other: &SpanSet) -> SpanSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.spans.len() && j < other.spans.len() {
            let (a, b) = (self.spans[i], other.spans[j]);
            if let Some(common) = a.intersection(&b) {
                out.push(common);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        SpanSet { spans: out }
    }

    pub fn difference(&self, other: &SpanSet) -> SpanSet {
        let mut out = Vec::new();
        let mut j = 0;
        for a in &self.spans {
            while j < other.spans.len() && other.spans[j].end < a.start {
                j += 1;
            }
            let mut cursor = a.start;
            let mut k = j;
            let mut exhausted = false;
            while k < other.spans.len() && other.spans[k].start <= a.end {
                let b = other.spans[k];
                if b.start > cursor {
                    out.push(Span::new(cursor, b.start - 1));
                }
                if b.end >= a.end {
                    exhausted = true;
                    break;
                }
                cursor = b.end + 1;
                k += 1;
            }
            if !exhausted {
                out.push(Span::new(cursor, a.end));
            }
        }
        SpanSet { spans: out }
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().flat_map(Span::positions)
    }
}

impl FromIterator<Span> for SpanSet {
    fn from_iter<I: IntoIterator<Item = Span>>(iter: I) -> Self {
        SpanSet::from_spans(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(spans: &[(usize, usize)]) -> SpanSet {
        spans.iter().map(|&(s, e)| Span::new(s, e)).collect()
    }

    #[test]
    fn overlapping_and_adjacent_spans_merge() {
        let s = set(&[(10, 12), (0, 3), (2, 5), (6, 6), (20, 21)]);
        assert_eq!(s.spans(), &[Span::new(0, 6), Span::new(10, 12), Span::new(20, 21)]);
        assert_eq!(s.len(), 12);
    }

    #[test]
    fn membership() {
        let s = set(&[(0, 3), (10, 12)]);
        assert!(s.contains(3));
        assert!(!s.contains(4));
        assert!(s.contains_span(&Span::new(10, 12)));
        assert!(!s.contains_span(&Span::new(3, 10)));
        assert!(s.intersects_span(&Span::new(4, 10)));
        assert!(!s.intersects_span(&Span::new(4, 9)));
    }

    #[test]
    fn set_algebra() {
        let a = set(&[(0, 10), (20, 30)]);
        let b = set(&[(5, 22), (28, 40)]);

        assert_eq!(a.union(&b), set(&[(0, 40)]));
        assert_eq!(a.intersection(&b), set(&[(5, 10), (20, 22), (28, 30)]));
        assert_eq!(a.difference(&b), set(&[(0, 4), (23, 27)]));
        assert_eq!(b.difference(&a), set(&[(11, 19), (31, 40)]));
    }

    #[test]
    fn difference_with_hole_in_the_middle() {
        let a = set(&[(0, 10)]);
        let b = set(&[(3, 4), (6, 6)]);
        assert_eq!(a.difference(&b), set(&[(0, 2), (5, 5), (7, 10)]));
        assert_eq!(a.difference(&a), SpanSet::new());
    }

    #[test]
    fn extend_saturates_at_zero() {
        assert_eq!(Span::new(2, 3).extend(5, 5), Span::new(0, 8));
    }
}
