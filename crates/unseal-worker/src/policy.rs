//! Access policies for decryption requests
//!
//! Before decrypting anything, the worker asks an [`AccessPolicy`]
//! whether the requesting party may see the plaintext. The ledger
//! already enforces who may submit results; this seam decides who may
//! ask for them. Results are public once submitted, so a deny here is
//! the only place a request can be refused on identity grounds.

use std::collections::HashSet;

use async_trait::async_trait;

use unseal_core::{Identity, RecordId};

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Decrypt and publish.
    Allow,
    /// Refuse; the optional reason ends up in the worker's logs.
    Deny { reason: Option<String> },
}

impl PolicyDecision {
    /// A denial with a logged reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: Some(reason.into()),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a decryption request should be honored.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn authorize(&self, requester: &Identity, id: RecordId) -> PolicyDecision;
}

/// Honors every request. The default for open deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn authorize(&self, _requester: &Identity, _id: RecordId) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Honors requests only from a fixed set of identities.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    allowed: HashSet<Identity>,
}

impl Allowlist {
    /// Build an allowlist from the given identities.
    pub fn new(allowed: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Add a party to the allowlist.
    pub fn insert(&mut self, party: Identity) {
        self.allowed.insert(party);
    }

    /// Whether a party is on the allowlist.
    pub fn contains(&self, party: &Identity) -> bool {
        self.allowed.contains(party)
    }
}

#[async_trait]
impl AccessPolicy for Allowlist {
    async fn authorize(&self, requester: &Identity, _id: RecordId) -> PolicyDecision {
        if self.allowed.contains(requester) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::deny("requester not on the allowlist")
        }
    }
}
