//! 2×2 contingency tables and the scopes their counts are taken from.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{CollocateError, Result};
use crate::provider::RegionIndex;
use crate::span::{Span, SpanSet};
use crate::subcorpus::Scope;

/// Observed counts and marginals of one item against one scope.
///
/// ```text
///            item    ¬item
/// context    O11     O12     R1
/// ¬context   O21     O22     R2
///            C1      C2      N
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencyTable {
    pub o11: u64,
    pub o12: u64,
    pub o21: u64,
    pub o22: u64,
    pub r1: u64,
    pub r2: u64,
    pub c1: u64,
    pub c2: u64,
    pub n: u64,
}

impl ContingencyTable {
    /// Derives the remaining cells; fails if the counts cannot form a table.
    pub fn new(o11: u64, r1: u64, c1: u64, n: u64) -> Result<Self> {
        let consistent = o11 <= r1.min(c1) && r1 <= n && c1 <= n && r1 + c1 <= n + o11;
        if !consistent {
            return Err(CollocateError::InvalidContingency { o11, r1, c1, n });
        }
        Ok(ContingencyTable {
            o11,
            o12: r1 - o11,
            o21: c1 - o11,
            o22: n + o11 - r1 - c1,
            r1,
            r2: n - r1,
            c1,
            c2: n - c1,
            n,
        })
    }

    /// Table for keyword analysis: target frequency and size against
    /// reference frequency and size.
    pub fn from_keyword(o11: u64, r1: u64, o21: u64, r2: u64) -> Result<Self> {
        ContingencyTable::new(o11, r1, o11 + o21, r1 + r2)
    }

    /// Expected frequencies `(E11, E12, E21, E22)` under independence.
    pub fn expected(&self) -> (f64, f64, f64, f64) {
        if self.n == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let n = self.n as f64;
        let (r1, r2, c1, c2) = (self.r1 as f64, self.r2 as f64, self.c1 as f64, self.c2 as f64);
        (r1 * c1 / n, r1 * c2 / n, r2 * c1 / n, r2 * c2 / n)
    }

    pub fn field(&self, field: CountField) -> u64 {
        match field {
            CountField::O11 => self.o11,
            CountField::O12 => self.o12,
            CountField::O21 => self.o21,
            CountField::O22 => self.o22,
            CountField::R1 => self.r1,
            CountField::R2 => self.r2,
            CountField::C1 => self.c1,
            CountField::C2 => self.c2,
            CountField::N => self.n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountField {
    O11,
    O12,
    O21,
    O22,
    R1,
    R2,
    C1,
    C2,
    N,
}

impl FromStr for CountField {
    type Err = CollocateError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "o11" => CountField::O11,
            "o12" => CountField::O12,
            "o21" => CountField::O21,
            "o22" => CountField::O22,
            "r1" => CountField::R1,
            "r2" => CountField::R2,
            "c1" => CountField::C1,
            "c2" => CountField::C2,
            "n" => CountField::N,
            _ => return Err(CollocateError::invalid("sort_by", format!("unknown field '{}'", s))),
        })
    }
}

/// Which totals an item is compared against.
///
/// `Local` takes `N` and `C1` from the analysed subcorpus, `Global` from the
/// whole corpus. The context (`R1`, `O11`) is always measured in the
/// analysed scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marginals {
    #[default]
    Local,
    Global,
}

impl FromStr for Marginals {
    type Err = CollocateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Marginals::Local),
            "global" => Ok(Marginals::Global),
            _ => Err(CollocateError::invalid("marginals", format!("expected local or global, got '{}'", s))),
        }
    }
}

impl Marginals {
    /// The scope `N` and `C1` are counted in.
    pub fn scope(&self, analysis: &Scope) -> Scope {
        match self {
            Marginals::Local => analysis.clone(),
            Marginals::Global => analysis.whole_corpus(),
        }
    }
}

/// Union of the windows around every focus match.
///
/// Each window reaches `window` tokens to either side of its match, stops at
/// the edges of the structural regions the match lies in, and is restricted
/// to `scope` (when given) and to the corpus. Focus matches themselves are
/// not part of the context.
pub fn collocation_context(
    focus: &[Span],
    regions: &RegionIndex,
    scope: Option<&SpanSet>,
    corpus_size: usize,
    window: usize,
) -> SpanSet {
    if corpus_size == 0 {
        return SpanSet::new();
    }
    let last = corpus_size - 1;

    let windows = focus
        .iter()
        .filter_map(|m| {
            let extended = m.extend(window, window);
            let bound = regions.cover(m).unwrap_or(Span::new(0, last));
            extended.intersection(&bound)?.intersection(&Span::new(0, last))
        })
        .collect::<SpanSet>();

    let windows = match scope {
        Some(spans) => windows.intersection(spans),
        None => windows,
    };
    windows.difference(&focus.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Region;

    #[test]
    fn cells_add_up() {
        let t = ContingencyTable::new(1481, 14989, 13765, 149800).unwrap();
        assert_eq!(t.o11 + t.o12, t.r1);
        assert_eq!(t.o11 + t.o21, t.c1);
        assert_eq!(t.o11 + t.o12 + t.o21 + t.o22, t.n);
        assert_eq!(t.r1 + t.r2, t.n);
        assert_eq!(t.c1 + t.c2, t.n);
    }

    #[test]
    fn impossible_tables_are_rejected() {
        assert!(ContingencyTable::new(5, 4, 10, 100).is_err());
        assert!(ContingencyTable::new(0, 60, 60, 100).is_err());
        assert!(ContingencyTable::new(0, 0, 0, 0).is_ok());
    }

    #[test]
    fn keyword_table() {
        let t = ContingencyTable::from_keyword(10, 1000, 30, 9000).unwrap();
        assert_eq!((t.c1, t.n, t.o21, t.r2), (40, 10000, 30, 9000));
    }

    #[test]
    fn windows_are_clipped_unioned_and_exclude_focus() {
        let regions = RegionIndex::new(vec![
            Region::new(Span::new(0, 9)),
            Region::new(Span::new(10, 29)),
        ]);
        // two matches whose windows overlap, one near a region edge
        let focus = [Span::new(12, 12), Span::new(15, 15), Span::new(8, 8)];
        let context = collocation_context(&focus, &regions, None, 30, 3);
        assert_eq!(
            context,
            SpanSet::from_spans([
                Span::new(5, 7),
                Span::new(9, 9),
                Span::new(10, 11),
                Span::new(13, 14),
                Span::new(16, 18),
            ])
        );
        assert_eq!(context.len(), 11);
    }

    #[test]
    fn windows_respect_the_analysis_scope() {
        let regions = RegionIndex::new(vec![Region::new(Span::new(0, 99))]);
        let scope = SpanSet::from_spans([Span::new(40, 60)]);
        let context = collocation_context(&[Span::new(42, 43)], &regions, Some(&scope), 100, 5);
        assert_eq!(
            context,
            SpanSet::from_spans([Span::new(40, 41), Span::new(44, 48)])
        );
    }

    #[test]
    fn global_marginals_widen_to_the_corpus() {
        let scope = Scope::corpus("c");
        assert!(Marginals::Global.scope(&scope).subcorpus.is_none());
        assert_eq!("GLOBAL".parse::<Marginals>().unwrap(), Marginals::Global);
    }
}
