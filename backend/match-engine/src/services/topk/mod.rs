//! Bounded-heap top-K selection
//!
//! Ranking order: score descending, then job id ascending. The heap keeps the
//! worst retained entry on top, so each candidate costs one peek and at most
//! one O(log K) replace.

use crate::models::ScoredJob;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct HeapEntry(ScoredJob);

impl HeapEntry {
    /// `Less` means `self` ranks ahead of `other`
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .score
            .total_cmp(&self.0.score)
            .then_with(|| self.0.job_id.cmp(&other.0.job_id))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank_cmp(other).is_eq()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank_cmp(other)
    }
}

#[derive(Debug)]
pub struct TopKSelector {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopKSelector {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k),
        }
    }

    pub fn push(&mut self, candidate: ScoredJob) {
        if self.k == 0 {
            return;
        }
        let candidate = HeapEntry(candidate);
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return;
        }

        let should_replace = self
            .heap
            .peek()
            .is_some_and(|worst| candidate.cmp(worst).is_lt());
        if should_replace {
            self.heap.pop();
            self.heap.push(candidate);
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Best first, with ranks 1..=n assigned
    pub fn into_ranked(self) -> Vec<ScoredJob> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .enumerate()
            .map(|(idx, HeapEntry(mut job))| {
                job.rank = idx as u32 + 1;
                job
            })
            .collect()
    }
}

pub fn select_top_k(candidates: impl IntoIterator<Item = ScoredJob>, k: usize) -> Vec<ScoredJob> {
    let mut selector = TopKSelector::new(k);
    for candidate in candidates {
        selector.push(candidate);
    }
    selector.into_ranked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentScores, ScoreComponents};

    fn scored(job_id: u64, score: f32) -> ScoredJob {
        ScoredJob {
            job_id,
            score,
            rank: 0,
            confidence: 1.0,
            components: ScoreComponents {
                values: ComponentScores::splat(score),
                confidence: ComponentScores::splat(1.0),
            },
        }
    }

    fn ids(jobs: &[ScoredJob]) -> Vec<u64> {
        jobs.iter().map(|j| j.job_id).collect()
    }

    #[test]
    fn test_selects_highest_scores() {
        let input = vec![
            scored(1, 0.2),
            scored(2, 0.9),
            scored(3, 0.5),
            scored(4, 0.7),
            scored(5, 0.1),
        ];
        let top = select_top_k(input, 3);
        assert_eq!(ids(&top), vec![2, 4, 3]);
        assert_eq!(top.iter().map(|j| j.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let top = select_top_k(
            vec![scored(9, 0.5), scored(3, 0.5), scored(7, 0.5), scored(1, 0.4)],
            2,
        );
        assert_eq!(ids(&top), vec![3, 7]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut input: Vec<ScoredJob> = (1..=50)
            .map(|id| scored(id, ((id * 37) % 11) as f32 / 10.0))
            .collect();
        let forward = select_top_k(input.clone(), 8);
        input.reverse();
        let backward = select_top_k(input, 8);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_fewer_than_k() {
        let top = select_top_k(vec![scored(2, 0.1), scored(1, 0.3)], 10);
        assert_eq!(ids(&top), vec![1, 2]);
    }

    #[test]
    fn test_k_zero() {
        assert!(select_top_k(vec![scored(1, 1.0)], 0).is_empty());
    }

    #[test]
    fn test_matches_full_sort() {
        let input: Vec<ScoredJob> = (1..=200)
            .map(|id| scored(id, ((id * 7919) % 101) as f32 / 100.0))
            .collect();
        let mut sorted = input.clone();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.job_id.cmp(&b.job_id)));

        let top = select_top_k(input, 25);
        assert_eq!(ids(&top), ids(&sorted[..25]));
    }
}
