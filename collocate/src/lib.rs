//! Collocation, keyword and concordance analysis of discoursemes (sets of
//! surface items) in annotated corpora.
//!
//! ## Example Usage
//!
//! ```rust
//! ##[tokio::main]
//! # async fn main() -> collocate::Result<()> {
//! use collocate::*;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let words = "we saw the cat and the cat saw us"
//!     .split(' ')
//!     .map(String::from)
//!     .collect::<Vec<_>>();
//! let provider = InMemoryProvider::new(ProviderConfig::default());
//! provider.insert(CorpusData {
//!     id: "demo".into(),
//!     p_attributes: BTreeMap::from([("word".to_string(), words)]),
//!     s_attributes: BTreeMap::from([(
//!         "s".to_string(),
//!         vec![Region::new(Span::new(0, 8))],
//!     )]),
//! })?;
//!
//! let engine = Engine::new(Arc::new(provider), EngineConfig::default())?;
//! let cat = Discourseme::with_items(DiscoursemeId(1), "cat", ["cat"]);
//! let constellation = Constellation {
//!     id: 1,
//!     name: "pets".into(),
//!     focus: Some(cat.id),
//!     discoursemes: vec![cat],
//! };
//!
//! let request = CollocationRequest::new("demo", DiscoursemeId(1), "word", "s", 3);
//! let view = engine
//!     .build_collocation(&constellation, &request, Ranking::default(), Page::first(5))
//!     .await?;
//! assert!(view.items.rows.iter().any(|row| row.item == "the"));
//! # Ok(())
//! # }
//! ```

#[doc(no_inline)]
pub use crate as collocate;
pub use collocate_impl;

pub use collocate_impl::*;
