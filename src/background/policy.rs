//! Allow-list collaborators consulted by the housekeeping sweeps.

use std::collections::BTreeSet;

/// Decides whether an owning app package may still hold audiences.
pub trait OwnerPolicy: Send + Sync {
    fn is_owner_allowed(&self, owner: &str) -> bool;
}

/// Decides whether a buyer is still enrolled.
pub trait BuyerEnrollment: Send + Sync {
    fn is_buyer_enrolled(&self, buyer: &str) -> bool;
}

/// Permits every owner and buyer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl OwnerPolicy for AllowAll {
    fn is_owner_allowed(&self, _owner: &str) -> bool {
        true
    }
}

impl BuyerEnrollment for AllowAll {
    fn is_buyer_enrolled(&self, _buyer: &str) -> bool {
        true
    }
}

/// Permits exactly the listed identifiers.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    allowed: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    fn contains(&self, value: &str) -> bool {
        self.allowed.contains(value)
    }
}

impl OwnerPolicy for AllowList {
    fn is_owner_allowed(&self, owner: &str) -> bool {
        self.contains(owner)
    }
}

impl BuyerEnrollment for AllowList {
    fn is_buyer_enrolled(&self, buyer: &str) -> bool {
        self.contains(buyer)
    }
}
