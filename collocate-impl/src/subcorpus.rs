use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::span::SpanSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubcorpusId(pub u64);

impl fmt::Display for SubcorpusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named subset of one corpus, stored as the union of its regions.
#[derive(Debug, Serialize)]
pub struct Subcorpus {
    pub id: SubcorpusId,
    pub corpus_id: String,
    pub name: String,
    /// Set when the subcorpus was produced by partitioning.
    pub collection_id: Option<u64>,
    spans: SpanSet,
    #[serde(skip)]
    size: OnceCell<u64>,
}

impl Subcorpus {
    pub fn new(
        id: SubcorpusId,
        corpus_id: impl Into<String>,
        name: impl Into<String>,
        spans: SpanSet,
    ) -> Self {
        Subcorpus {
            id,
            corpus_id: corpus_id.into(),
            name: name.into(),
            collection_id: None,
            spans,
            size: OnceCell::new(),
        }
    }

    pub(crate) fn in_collection(mut self, collection_id: u64) -> Self {
        self.collection_id = Some(collection_id);
        self
    }

    pub fn spans(&self) -> &SpanSet {
        &self.spans
    }

    /// Token count, derived on first use.
    pub fn size(&self) -> u64 {
        *self.size.get_or_init(|| self.spans.len() as u64)
    }
}

/// Where an operation reads from: a whole corpus or one of its subcorpora.
#[derive(Debug, Clone)]
pub struct Scope {
    pub corpus_id: String,
    pub subcorpus: Option<Arc<Subcorpus>>,
}

impl Scope {
    pub fn corpus(corpus_id: impl Into<String>) -> Self {
        Scope {
            corpus_id: corpus_id.into(),
            subcorpus: None,
        }
    }

    pub fn subcorpus(subcorpus: Arc<Subcorpus>) -> Self {
        Scope {
            corpus_id: subcorpus.corpus_id.clone(),
            subcorpus: Some(subcorpus),
        }
    }

    pub fn subcorpus_id(&self) -> Option<SubcorpusId> {
        self.subcorpus.as_ref().map(|s| s.id)
    }

    /// The enclosing corpus-wide scope.
    pub fn whole_corpus(&self) -> Scope {
        Scope::corpus(self.corpus_id.clone())
    }

    pub fn spans(&self) -> Option<&SpanSet> {
        self.subcorpus.as_deref().map(Subcorpus::spans)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subcorpus {
            Some(sub) => write!(f, "corpus '{}' subcorpus {} ({})", self.corpus_id, sub.id, sub.name),
            None => write!(f, "corpus '{}'", self.corpus_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn size_counts_positions_of_all_regions() {
        let sub = Subcorpus::new(
            SubcorpusId(1),
            "c",
            "march",
            SpanSet::from_spans([Span::new(0, 9), Span::new(20, 24)]),
        );
        assert_eq!(sub.size(), 15);
        assert_eq!(Scope::subcorpus(Arc::new(sub)).subcorpus_id(), Some(SubcorpusId(1)));
    }
}
