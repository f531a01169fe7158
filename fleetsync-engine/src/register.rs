//! Candidate register.
//!
//! Every terminal that holds a value for the same slot (an identity's
//! profile, or one artifact slot) contributes a candidate. The register keeps
//! all of them ordered by precedence, so the planner can take the overall
//! winner or, for versioned artifacts, the best candidate a given terminal
//! can actually accept.
//!
//! Precedence is a total order over origins. Which device saw a value and
//! when decides, never arrival order, so merging is commutative,
//! associative and idempotent.

use chrono::{DateTime, Utc};
use fleetsync_types::DeviceAddr;
use std::cmp::Ordering;

use crate::config::ConflictPolicy;

/// Where a candidate value was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub device: DeviceAddr,
    pub observed_at: DateTime<Utc>,
    pub primary: bool,
}

impl Origin {
    /// Compares two origins; `Greater` means `self` takes precedence.
    #[must_use]
    pub fn precedence(&self, other: &Origin, policy: ConflictPolicy) -> Ordering {
        // Lower address wins the final tie.
        let by_addr = other.device.cmp(&self.device);
        match policy {
            ConflictPolicy::PrimaryFirst => self
                .primary
                .cmp(&other.primary)
                .then(self.observed_at.cmp(&other.observed_at))
                .then(by_addr),
            ConflictPolicy::RecencyFirst => self
                .observed_at
                .cmp(&other.observed_at)
                .then(self.primary.cmp(&other.primary))
                .then(by_addr),
        }
    }
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<T> {
    pub value: T,
    pub origin: Origin,
}

/// All candidates for one slot, best first. At most one candidate per device.
#[derive(Debug, Clone)]
pub struct Register<T> {
    policy: ConflictPolicy,
    candidates: Vec<Candidate<T>>,
}

impl<T> Register<T> {
    /// Creates an empty register.
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            candidates: Vec::new(),
        }
    }

    /// Offers a candidate. A device that already offered keeps whichever of
    /// its two candidates takes precedence. Returns true if the register changed.
    pub fn offer(&mut self, value: T, origin: Origin) -> bool {
        let policy = self.policy;
        if let Some(pos) = self
            .candidates
            .iter()
            .position(|c| c.origin.device == origin.device)
        {
            if origin.precedence(&self.candidates[pos].origin, policy) != Ordering::Greater {
                return false;
            }
            self.candidates.remove(pos);
        }
        let at = self
            .candidates
            .partition_point(|c| c.origin.precedence(&origin, policy) == Ordering::Greater);
        self.candidates.insert(at, Candidate { value, origin });
        true
    }

    /// The highest-precedence candidate.
    #[must_use]
    pub fn winner(&self) -> Option<&Candidate<T>> {
        self.candidates.first()
    }

    /// The highest-precedence candidate whose value satisfies `accept`.
    pub fn best_matching(&self, mut accept: impl FnMut(&T) -> bool) -> Option<&Candidate<T>> {
        self.candidates.iter().find(|c| accept(&c.value))
    }

    /// Candidates, best first.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate<T>> {
        self.candidates.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

impl<T: PartialEq> Register<T> {
    /// Whether devices disagree about the value.
    #[must_use]
    pub fn is_contested(&self) -> bool {
        match self.candidates.split_first() {
            Some((first, rest)) => rest.iter().any(|c| c.value != first.value),
            None => false,
        }
    }
}

impl<T: Clone> Register<T> {
    /// Merges another register's candidates into this one.
    pub fn merge(&mut self, other: &Self) {
        for candidate in &other.candidates {
            self.offer(candidate.value.clone(), candidate.origin);
        }
    }

    /// Creates a new register that is the merge of this and another.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }
}

impl<T: PartialEq> PartialEq for Register<T> {
    fn eq(&self, other: &Self) -> bool {
        self.policy == other.policy && self.candidates == other.candidates
    }
}

impl<T: Eq> Eq for Register<T> {}
