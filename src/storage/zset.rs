//! Sorted set keyed by member with (score, member) ordering.
//!
//! Members are unique; ordering is by score first, then lexicographically by
//! member for equal scores. Backed by a member map plus an ordered set, which
//! gives O(log n) insert/remove and ordered range scans. Not yet wired into
//! the command table.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// One scored member.
#[derive(Debug, Clone, PartialEq)]
pub struct Elem {
    pub member: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct ScoredMember {
    score: f64,
    member: String,
}

impl PartialEq for ScoredMember {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredMember {}

impl PartialOrd for ScoredMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// A set of members ranked by score.
#[derive(Debug, Default)]
pub struct SortedSet {
    members: HashMap<String, f64>,
    order: BTreeSet<ScoredMember>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a member or updates its score. Returns `true` when the member
    /// is new, `false` when an existing member's score was updated.
    pub fn add(&mut self, member: &str, score: f64) -> bool {
        if let Some(old) = self.members.insert(member.to_string(), score) {
            self.order.remove(&ScoredMember {
                score: old,
                member: member.to_string(),
            });
            self.order.insert(ScoredMember {
                score,
                member: member.to_string(),
            });
            false
        } else {
            self.order.insert(ScoredMember {
                score,
                member: member.to_string(),
            });
            true
        }
    }

    /// Removes a member. Returns `true` if it existed.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some(score) => {
                self.order.remove(&ScoredMember {
                    score,
                    member: member.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Looks up a member's score.
    pub fn score(&self, member: &str) -> Option<f64> {
        self.members.get(member).copied()
    }

    /// Zero-based rank of a member in ascending order.
    pub fn rank(&self, member: &str) -> Option<usize> {
        let score = self.score(member)?;
        let target = ScoredMember {
            score,
            member: member.to_string(),
        };
        self.order.iter().position(|e| *e == target)
    }

    /// Members with ranks in `[start, stop)`, ascending.
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<Elem> {
        if start >= stop {
            return Vec::new();
        }
        self.order
            .iter()
            .skip(start)
            .take(stop - start)
            .map(|e| Elem {
                member: e.member.clone(),
                score: e.score,
            })
            .collect()
    }

    /// Members whose score lies in `[min, max]`, ascending.
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<Elem> {
        if min > max {
            return Vec::new();
        }
        let lo = Bound::Included(ScoredMember {
            score: min,
            member: String::new(),
        });
        let hi = Bound::Unbounded;
        self.order
            .range((lo, hi))
            .take_while(|e| e.score <= max)
            .map(|e| Elem {
                member: e.member.clone(),
                score: e.score,
            })
            .collect()
    }
}
