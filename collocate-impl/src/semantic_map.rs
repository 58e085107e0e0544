//! 2-D layouts of scored item sets.
//!
//! A map's base coordinates never change once issued. Recomputing a layout
//! creates a new map (with a new id) and leaves the old one, overrides
//! included, as it was.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::aggregation::DiscoursemeScores;
use crate::async_runtime::run_blocking;
use crate::collocation::CollocationAnalysis;
use crate::description::DiscoursemeId;
use crate::engine::Engine;
use crate::error::{CollocateError, Result};
use crate::keyword::KeywordAnalysis;
use crate::measures::ScoreSet;
use crate::store::{IdGenerator, KeyedStore};

/// Places score vectors in the plane.
pub trait Projector: Send + Sync {
    /// One `(x, y)` per input vector, both within [-1, 1].
    fn project(&self, vectors: &[Vec<f64>]) -> Vec<(f64, f64)>;
}

/// Projection onto the two leading principal components of the
/// standardised score vectors.
#[derive(Debug, Clone, Default)]
pub struct PcaProjector;

/// Scales values into [-1, 1] by their largest magnitude.
fn normalise(values: Vec<f64>) -> Vec<f64> {
    let max = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if max > 0.0 {
        values.into_iter().map(|v| v / max).collect()
    } else {
        vec![0.0; values.len()]
    }
}

impl PcaProjector {
    /// One row per vector, columns centred and scaled to unit variance.
    /// Missing and non-finite scores count as 0.
    fn standardise(vectors: &[Vec<f64>]) -> DMatrix<f64> {
        let dims = vectors.iter().map(Vec::len).max().unwrap_or(0);
        let mut data = DMatrix::from_fn(vectors.len(), dims, |i, j| {
            vectors[i].get(j).copied().filter(|x| x.is_finite()).unwrap_or(0.0)
        });
        let rows = data.nrows() as f64;
        for mut column in data.column_iter_mut() {
            let mean = column.sum() / rows;
            let sd = (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / rows).sqrt();
            for x in column.iter_mut() {
                *x = if sd > 0.0 { (*x - mean) / sd } else { 0.0 };
            }
        }
        data
    }

    /// Eigenvectors of `covariance` by descending eigenvalue, each signed so
    /// that its largest component is positive.
    fn principal_axes(covariance: DMatrix<f64>) -> Vec<DVector<f64>> {
        let eigen = SymmetricEigen::new(covariance);
        let mut order = (0..eigen.eigenvalues.len()).collect_vec();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        order
            .into_iter()
            .map(|idx| {
                let axis = eigen.eigenvectors.column(idx).into_owned();
                let pivot = axis
                    .iter()
                    .copied()
                    .fold(0.0_f64, |p, v| if v.abs() > p.abs() { v } else { p });
                if pivot < 0.0 {
                    -axis
                } else {
                    axis
                }
            })
            .collect()
    }
}

impl Projector for PcaProjector {
    fn project(&self, vectors: &[Vec<f64>]) -> Vec<(f64, f64)> {
        let rows = vectors.len();
        if rows == 0 {
            return Vec::new();
        }
        let data = Self::standardise(vectors);
        if rows < 2 || data.ncols() == 0 {
            return vec![(0.0, 0.0); rows];
        }
        let covariance = data.tr_mul(&data) / rows as f64;
        let axes = Self::principal_axes(covariance);
        let axis = |rank: usize| match axes.get(rank) {
            Some(component) => normalise((&data * component).iter().copied().collect()),
            None => vec![0.0; rows],
        };
        axis(0).into_iter().zip(axis(1)).collect()
    }
}

/// What a map is computed from: one score vector per item, and the items
/// making up each discourseme.
#[derive(Debug, Clone, Serialize)]
pub struct MapInput {
    pub analysis_id: u64,
    pub items: Vec<(String, Vec<f64>)>,
    pub discoursemes: Vec<(DiscoursemeId, Vec<String>)>,
}

pub trait ScoredItems {
    fn map_input(&self) -> MapInput;
}

/// Discoursemes without scored rows (e.g. of an empty analysis) are kept
/// with no items, so that they can still carry user coordinates.
fn map_input<'a>(
    analysis_id: u64,
    items: impl Iterator<Item = (&'a str, &'a ScoreSet)>,
    scored: &[DiscoursemeScores],
    constellation: &[DiscoursemeId],
) -> MapInput {
    let discoursemes = constellation
        .iter()
        .map(|&id| {
            let items = scored
                .iter()
                .find(|d| d.discourseme_id == id)
                .map(|d| d.items.iter().map(|r| r.item.clone()).collect())
                .unwrap_or_default();
            (id, items)
        })
        .collect();
    MapInput {
        analysis_id,
        items: items
            .map(|(item, scores)| (item.to_string(), scores.vector()))
            .collect(),
        discoursemes,
    }
}

impl ScoredItems for CollocationAnalysis {
    fn map_input(&self) -> MapInput {
        map_input(
            self.id,
            self.items.iter().map(|r| (r.item.as_str(), &r.scores)),
            &self.discoursemes,
            &self.constellation_discoursemes,
        )
    }
}

impl ScoredItems for KeywordAnalysis {
    fn map_input(&self) -> MapInput {
        map_input(
            self.id,
            self.items.iter().map(|r| (r.item.as_str(), &r.scores)),
            &self.discoursemes,
            &self.constellation_discoursemes,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemCoordinate {
    pub item: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoursemeCoordinate {
    pub discourseme_id: DiscoursemeId,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub x_user: Option<f64>,
    pub y_user: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapCoordinates {
    pub map_id: u64,
    pub analysis_id: u64,
    pub items: Vec<ItemCoordinate>,
    pub discoursemes: Vec<DiscoursemeCoordinate>,
}

#[derive(Debug)]
pub struct SemanticMap {
    pub id: u64,
    pub analysis_id: u64,
    /// The map this one was recomputed from.
    pub previous: Option<u64>,
    items: Vec<ItemCoordinate>,
    discoursemes: BTreeMap<DiscoursemeId, Vec<String>>,
    overrides: RwLock<BTreeMap<DiscoursemeId, (f64, f64)>>,
}

impl SemanticMap {
    pub fn items(&self) -> &[ItemCoordinate] {
        &self.items
    }

    pub fn coordinate(&self, item: &str) -> Option<(f64, f64)> {
        self.items
            .iter()
            .find(|c| c.item == item)
            .map(|c| (c.x, c.y))
    }

    pub fn contains_discourseme(&self, id: DiscoursemeId) -> bool {
        self.discoursemes.contains_key(&id)
    }

    /// Centroid of the discourseme's items on this map.
    pub fn discourseme_base(&self, id: DiscoursemeId) -> Option<(f64, f64)> {
        let points = self
            .discoursemes
            .get(&id)?
            .iter()
            .filter_map(|item| self.coordinate(item))
            .collect_vec();
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (x, y) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        Some((x / n, y / n))
    }

    pub fn user_coordinate(&self, id: DiscoursemeId) -> Option<(f64, f64)> {
        self.overrides.read().get(&id).copied()
    }

    pub fn coordinates(&self) -> MapCoordinates {
        let overrides = self.overrides.read();
        MapCoordinates {
            map_id: self.id,
            analysis_id: self.analysis_id,
            items: self.items.clone(),
            discoursemes: self
                .discoursemes
                .keys()
                .map(|&id| {
                    let base = self.discourseme_base(id);
                    let user = overrides.get(&id);
                    DiscoursemeCoordinate {
                        discourseme_id: id,
                        x: base.map(|(x, _)| x),
                        y: base.map(|(_, y)| y),
                        x_user: user.map(|(x, _)| *x),
                        y_user: user.map(|(_, y)| *y),
                    }
                })
                .collect(),
        }
    }
}

/// Issues and versions semantic maps, one current map per analysis.
pub struct SemanticMapManager {
    projector: Arc<dyn Projector>,
    ids: IdGenerator,
    maps: RwLock<HashMap<u64, Arc<SemanticMap>>>,
    current: RwLock<HashMap<u64, u64>>,
    first: KeyedStore<u64, SemanticMap>,
}

impl SemanticMapManager {
    pub fn new(projector: Arc<dyn Projector>) -> Self {
        SemanticMapManager {
            projector,
            ids: IdGenerator::new(),
            maps: RwLock::new(HashMap::new()),
            current: RwLock::new(HashMap::new()),
            first: KeyedStore::new(),
        }
    }

    /// The current map of `input`'s analysis, projected on first request.
    pub async fn get_or_create(&self, input: MapInput) -> Result<Arc<SemanticMap>> {
        if let Some(map) = self.current(input.analysis_id) {
            return Ok(map);
        }
        let analysis_id = input.analysis_id;
        let created = self
            .first
            .get_or_try_create(analysis_id, || self.project(input, None))
            .await?;
        self.maps
            .write()
            .entry(created.id)
            .or_insert_with(|| created.clone());
        let current = *self
            .current
            .write()
            .entry(analysis_id)
            .or_insert(created.id);
        self.get(current)
    }

    /// Projects again under a new id; the new map becomes current and
    /// starts with a copy of the previous map's overrides.
    pub async fn recreate(&self, input: MapInput) -> Result<Arc<SemanticMap>> {
        let previous = self.current(input.analysis_id);
        let map = Arc::new(self.project(input, previous.as_deref()).await?);
        self.maps.write().insert(map.id, map.clone());
        self.current.write().insert(map.analysis_id, map.id);
        debug!(map = map.id, previous = ?map.previous, "recreated semantic map");
        Ok(map)
    }

    #[instrument(skip(self, input, previous), fields(analysis = input.analysis_id, items = input.items.len()))]
    async fn project(&self, input: MapInput, previous: Option<&SemanticMap>) -> Result<SemanticMap> {
        let projector = self.projector.clone();
        let (names, vectors): (Vec<String>, Vec<Vec<f64>>) = input.items.into_iter().unzip();
        let points = run_blocking(move || projector.project(&vectors)).await?;

        let overrides = previous
            .map(|p| p.overrides.read().clone())
            .unwrap_or_default();
        Ok(SemanticMap {
            id: self.ids.next_id(),
            analysis_id: input.analysis_id,
            previous: previous.map(|p| p.id),
            items: names
                .into_iter()
                .zip(points)
                .map(|(item, (x, y))| ItemCoordinate { item, x, y })
                .collect(),
            discoursemes: input.discoursemes.into_iter().collect(),
            overrides: RwLock::new(overrides),
        })
    }

    pub fn get(&self, map_id: u64) -> Result<Arc<SemanticMap>> {
        self.maps
            .read()
            .get(&map_id)
            .cloned()
            .ok_or(CollocateError::UnknownMap(map_id))
    }

    pub fn current(&self, analysis_id: u64) -> Option<Arc<SemanticMap>> {
        let map_id = self.current.read().get(&analysis_id).copied()?;
        self.get(map_id).ok()
    }

    pub fn set_user_coordinate(
        &self,
        map_id: u64,
        discourseme_id: DiscoursemeId,
        x_user: f64,
        y_user: f64,
    ) -> Result<()> {
        let map = self.get(map_id)?;
        if !map.contains_discourseme(discourseme_id) {
            return Err(CollocateError::UnknownDiscourseme(discourseme_id));
        }
        if !(x_user.is_finite() && y_user.is_finite()) {
            return Err(CollocateError::invalid("coordinate", "must be finite"));
        }
        map.overrides.write().insert(discourseme_id, (x_user, y_user));
        Ok(())
    }

    pub fn coordinates(&self, map_id: u64) -> Result<MapCoordinates> {
        Ok(self.get(map_id)?.coordinates())
    }
}

impl Engine {
    /// The current semantic map of an analysis, created on first request.
    pub async fn semantic_map(&self, analysis_id: u64) -> Result<Arc<SemanticMap>> {
        let input = self.analysis(analysis_id)?.map_input();
        self.maps.get_or_create(input).await
    }

    pub async fn recreate_semantic_map(&self, analysis_id: u64) -> Result<Arc<SemanticMap>> {
        let input = self.analysis(analysis_id)?.map_input();
        self.maps.recreate(input).await
    }

    pub fn set_user_coordinate(
        &self,
        map_id: u64,
        discourseme_id: DiscoursemeId,
        x_user: f64,
        y_user: f64,
    ) -> Result<()> {
        self.maps
            .set_user_coordinate(map_id, discourseme_id, x_user, y_user)
    }

    pub fn map_coordinates(&self, map_id: u64) -> Result<MapCoordinates> {
        self.maps.coordinates(map_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> MapInput {
        MapInput {
            analysis_id: 7,
            items: vec![
                ("a".into(), vec![1.0, 10.0, 0.0]),
                ("b".into(), vec![2.0, 8.0, 0.0]),
                ("c".into(), vec![3.0, 2.0, 0.0]),
                ("d".into(), vec![9.0, 1.0, f64::NAN]),
            ],
            discoursemes: vec![
                (DiscoursemeId(1), vec!["a".into(), "b".into()]),
                (DiscoursemeId(2), vec!["zzz".into()]),
            ],
        }
    }

    #[test]
    fn pca_is_deterministic_and_bounded() {
        let vectors = input().items.into_iter().map(|(_, v)| v).collect_vec();
        let projector = PcaProjector::default();
        let points = projector.project(&vectors);
        assert_eq!(points, projector.project(&vectors));
        assert_eq!(points.len(), 4);
        assert!(points
            .iter()
            .all(|(x, y)| (-1.0..=1.0).contains(x) && (-1.0..=1.0).contains(y)));
        assert!(points.iter().any(|(x, _)| x.abs() == 1.0));
    }

    #[test]
    fn degenerate_inputs() {
        let projector = PcaProjector::default();
        assert!(projector.project(&[]).is_empty());
        assert_eq!(projector.project(&[vec![1.0, 2.0]]), vec![(0.0, 0.0)]);
    }

    #[test]
    fn single_axis_of_variation() {
        let vectors = vec![vec![1.0, 4.0], vec![2.0, 4.0], vec![3.0, 4.0]];
        let points = PcaProjector.project(&vectors);
        let xs = points.iter().map(|(x, _)| *x).collect_vec();
        for (x, expected) in xs.iter().zip([-1.0, 0.0, 1.0]) {
            assert!((x - expected).abs() < 1e-9, "{:?}", xs);
        }
        assert!(points.iter().all(|(_, y)| y.abs() < 1e-9));
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let manager = SemanticMapManager::new(Arc::new(PcaProjector::default()));
        let first = manager.get_or_create(input()).await.unwrap();
        let second = manager.get_or_create(input()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.discourseme_base(DiscoursemeId(1)).is_some());
        assert!(first.discourseme_base(DiscoursemeId(2)).is_none());
    }

    #[tokio::test]
    async fn recreating_keeps_old_maps_and_overrides() {
        let manager = SemanticMapManager::new(Arc::new(PcaProjector::default()));
        let old = manager.get_or_create(input()).await.unwrap();
        manager
            .set_user_coordinate(old.id, DiscoursemeId(1), 0.5, -0.5)
            .unwrap();

        let new = manager.recreate(input()).await.unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(new.previous, Some(old.id));
        assert_eq!(manager.current(7).unwrap().id, new.id);
        assert_eq!(new.user_coordinate(DiscoursemeId(1)), Some((0.5, -0.5)));

        manager
            .set_user_coordinate(new.id, DiscoursemeId(1), 0.1, 0.1)
            .unwrap();
        let old = manager.get(old.id).unwrap();
        assert_eq!(old.user_coordinate(DiscoursemeId(1)), Some((0.5, -0.5)));
        assert_eq!(old.items(), manager.get(old.id).unwrap().items());
    }

    #[tokio::test]
    async fn overrides_need_a_known_discourseme() {
        let manager = SemanticMapManager::new(Arc::new(PcaProjector::default()));
        let map = manager.get_or_create(input()).await.unwrap();
        assert!(matches!(
            manager.set_user_coordinate(map.id, DiscoursemeId(3), 0.0, 0.0),
            Err(CollocateError::UnknownDiscourseme(DiscoursemeId(3)))
        ));
        assert!(matches!(
            manager.set_user_coordinate(999, DiscoursemeId(1), 0.0, 0.0),
            Err(CollocateError::UnknownMap(999))
        ));

        let coordinates = manager.coordinates(map.id).unwrap();
        assert_eq!(coordinates.items.len(), 4);
        let unset = &coordinates.discoursemes[0];
        assert_eq!((unset.x_user, unset.y_user), (None, None));
        assert!(unset.x.is_some());
    }
}
