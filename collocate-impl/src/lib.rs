pub use futures;
pub mod aggregation;
pub mod async_runtime;
pub mod collocation;
pub mod concordance;
pub mod config;
pub mod contingency;
pub mod description;
pub mod engine;
pub mod error;
pub mod keep_first_n;
pub mod keyword;
pub mod measures;
pub mod memory;
pub mod partition;
pub mod provider;
pub mod semantic_map;
pub mod span;
pub mod store;
pub mod subcorpus;

pub use aggregation::{AnalysisView, Page, Ranking, ScoredRow, SortKey, SortOrder};
pub use collocation::{CollocationAnalysis, CollocationRequest, CollocationSeries};
pub use concordance::{Concordance, ConcordanceLine, ConcordanceRequest, LineOrder, Overlap};
pub use config::{EngineConfig, MeasureConfig};
pub use contingency::{ContingencyTable, CountField, Marginals};
pub use description::{Constellation, Discourseme, DiscoursemeId, TemplateItem};
pub use engine::{Engine, StoredAnalysis};
pub use error::{CollocateError, ProviderError, Result};
pub use keep_first_n::KeepFirstN;
pub use keyword::{KeywordAnalysis, KeywordRequest};
pub use measures::{Measure, ScoreSet};
pub use memory::{CorpusData, InMemoryProvider, ProviderConfig};
pub use partition::{Interval, SubcorpusCollection};
pub use provider::{CorpusProvider, Query, Region};
pub use semantic_map::{MapCoordinates, PcaProjector, Projector, SemanticMap};
pub use span::{Span, SpanSet};
pub use subcorpus::{Scope, Subcorpus, SubcorpusId};
