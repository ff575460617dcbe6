//! Vectorized Scoring Module
//!
//! Scores a whole candidate set at once: the policy fills an n × 6 value matrix
//! and a matching confidence matrix column by column, totals are one
//! matrix-vector product with the weight vector.

pub mod components;

use crate::catalog::CatalogSnapshot;
use crate::models::{Component, ComponentScores, ScoreComponents, ScoredJob, User};
use crate::services::prefilter::Candidate;
use crate::utils::unit;
use components::Subscore;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::sync::Arc;

/// Lowest aggregate confidence reported for a scored job
pub const CONFIDENCE_FLOOR: f32 = 0.5;

pub struct ScoringInput<'a> {
    pub user: &'a User,
    pub candidates: &'a [Candidate],
    pub snapshot: &'a CatalogSnapshot,
}

/// Pluggable component formulas
pub trait ScoringPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Fill `values` and `confidence` (one row per candidate, one column per
    /// [`Component`]). Values outside [0, 1] are clamped afterwards.
    fn fill(&self, input: &ScoringInput<'_>, values: &mut Array2<f32>, confidence: &mut Array2<f32>);
}

/// Default formulas; catalog-only components come from the cache
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPolicy;

impl ScoringPolicy for StandardPolicy {
    fn name(&self) -> &str {
        "standard"
    }

    fn fill(&self, input: &ScoringInput<'_>, values: &mut Array2<f32>, confidence: &mut Array2<f32>) {
        let user = input.user;
        let snapshot = input.snapshot;
        let table = snapshot.locations();
        let job = |c: &Candidate| snapshot.job(c.idx);

        let mut column = |component: Component, subs: &mut dyn Iterator<Item = Subscore>| {
            let col = component.index();
            let cells = values
                .column_mut(col)
                .into_iter()
                .zip(confidence.column_mut(col));
            for ((value, conf), sub) in cells.zip(subs) {
                *value = sub.value;
                *conf = sub.confidence;
            }
        };

        let candidates = input.candidates;
        column(Component::Base, &mut candidates.iter().map(|c| c.derived.base));
        column(
            Component::Category,
            &mut candidates.iter().map(|c| components::category(user, job(c))),
        );
        column(
            Component::Salary,
            &mut candidates.iter().map(|c| components::salary(user, job(c))),
        );
        column(
            Component::Feature,
            &mut candidates.iter().map(|c| components::feature(user, job(c))),
        );
        column(
            Component::Freshness,
            &mut candidates.iter().map(|c| c.derived.freshness),
        );
        column(
            Component::Location,
            &mut candidates
                .iter()
                .map(|c| components::location(table, user, job(c))),
        );
    }
}

#[derive(Clone)]
pub struct VectorizedScorer {
    weights: Array1<f32>,
    policy: Arc<dyn ScoringPolicy>,
}

impl VectorizedScorer {
    /// Weights are validated with the run configuration
    pub fn new(weights: &ComponentScores, policy: Arc<dyn ScoringPolicy>) -> Self {
        Self {
            weights: Array1::from(weights.to_array().to_vec()),
            policy,
        }
    }

    pub fn policy(&self) -> &dyn ScoringPolicy {
        self.policy.as_ref()
    }

    /// Score every candidate; output is aligned with `candidates` and unranked
    pub fn score(
        &self,
        user: &User,
        candidates: &[Candidate],
        snapshot: &CatalogSnapshot,
    ) -> Vec<ScoredJob> {
        let n = candidates.len();
        if n == 0 {
            return Vec::new();
        }

        let mut values = Array2::<f32>::zeros((n, Component::COUNT));
        let mut confidence = Array2::<f32>::from_elem((n, Component::COUNT), CONFIDENCE_FLOOR);
        let input = ScoringInput {
            user,
            candidates,
            snapshot,
        };
        self.policy.fill(&input, &mut values, &mut confidence);

        values.mapv_inplace(unit);
        confidence.mapv_inplace(|c| unit(c).max(CONFIDENCE_FLOOR));

        let totals = values.dot(&self.weights);
        let row_confidence = confidence
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::from_elem(n, CONFIDENCE_FLOOR));

        candidates
            .iter()
            .enumerate()
            .map(|(row, candidate)| ScoredJob {
                job_id: snapshot.job(candidate.idx).id,
                score: unit(totals[row]),
                rank: 0,
                confidence: row_confidence[row].max(CONFIDENCE_FLOOR),
                components: ScoreComponents {
                    values: row_scores(values.row(row)),
                    confidence: row_scores(confidence.row(row)),
                },
            })
            .collect()
    }
}

fn row_scores(row: ArrayView1<'_, f32>) -> ComponentScores {
    let mut cells = [0.0; Component::COUNT];
    for (cell, value) in cells.iter_mut().zip(row.iter()) {
        *cell = *value;
    }
    ComponentScores::from_array(cells)
}
