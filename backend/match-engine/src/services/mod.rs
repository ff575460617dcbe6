pub mod cache;
pub mod prefilter;
pub mod scoring;
pub mod topk;

use crate::catalog::CatalogSnapshot;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{User, UserMatches};
use cache::{CatalogCache, JobDerived};
use prefilter::{Candidate, Prefilter, PrefilterStats};
use scoring::{ScoringPolicy, VectorizedScorer};
use std::sync::Arc;
use tiered_cache::LocalTier;
use topk::select_top_k;

/// Pre-filter → score → top-K for one user
#[derive(Clone)]
pub struct UserMatcher {
    prefilter: Prefilter,
    scorer: VectorizedScorer,
    k: usize,
}

/// Per-user result plus the pre-filter counts behind it
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matches: UserMatches,
    pub prefilter: PrefilterStats,
}

impl UserMatcher {
    pub fn new(config: &EngineConfig, policy: Arc<dyn ScoringPolicy>) -> Self {
        Self {
            prefilter: Prefilter::new(&config.prefilter),
            scorer: VectorizedScorer::new(&config.scoring.weights, policy),
            k: config.scheduler.k,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn scorer(&self) -> &VectorizedScorer {
        &self.scorer
    }

    /// Fails only for invalid user data
    pub async fn match_user(
        &self,
        user: &User,
        snapshot: &CatalogSnapshot,
        cache: &CatalogCache,
        local: &mut LocalTier<JobDerived>,
    ) -> Result<MatchOutcome> {
        user.validate()?;
        let filtered = self.prefilter.filter(user, snapshot, cache, local).await;
        let matches = self.rank(user, &filtered.candidates, snapshot, filtered.stats.fallback_used);
        Ok(MatchOutcome {
            matches,
            prefilter: filtered.stats,
        })
    }

    /// Scores the whole catalog; the reference the pre-filter must agree with
    pub async fn match_user_unfiltered(
        &self,
        user: &User,
        snapshot: &CatalogSnapshot,
        cache: &CatalogCache,
        local: &mut LocalTier<JobDerived>,
    ) -> Result<UserMatches> {
        user.validate()?;
        let candidates = Prefilter::unfiltered(snapshot, cache, local).await;
        Ok(self.rank(user, &candidates, snapshot, false))
    }

    fn rank(
        &self,
        user: &User,
        candidates: &[Candidate],
        snapshot: &CatalogSnapshot,
        fallback_used: bool,
    ) -> UserMatches {
        let scored = self.scorer.score(user, candidates, snapshot);
        UserMatches {
            user_id: user.id,
            matches: select_top_k(scored, self.k),
            fallback_used,
        }
    }
}
