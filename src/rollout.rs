use log::debug;
use md5::{Digest, Md5};
use serde::Deserialize;

use crate::flag_value::FlagValue;
use crate::operator::AssertionResult;

/// Number of buckets an identifier can be hashed into.
pub const BUCKET_COUNT: u32 = 10_000;

// The first 6 hex characters (24 bits) of the digest are used, scaled by the largest value they
// can hold.
const HASH_SCALE: f64 = 0xFF_FFFF as f64;

pub(crate) type AllocationRatio = f64;

/// One weighted slice of a rollout condition.
///
/// Allocations are laid out one after another in declared order, each covering
/// `ratio * BUCKET_COUNT` buckets.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Allocation {
    pub name: String,
    pub ratio: AllocationRatio,
    #[serde(default)]
    pub value: Option<FlagValue>,
}

impl Allocation {
    pub fn new(name: impl Into<String>, ratio: AllocationRatio, value: Option<FlagValue>) -> Self {
        Allocation {
            name: name.into(),
            ratio,
            value,
        }
    }
}

/// Deterministically assigns identifiers to the allocations of a rollout condition.
///
/// The same identifier, salt and allocations always land in the same allocation, which keeps a
/// user's percentage rollout stable across evaluations.
#[derive(Clone, Copy, Debug, Default)]
pub struct RolloutBucketer;

impl RolloutBucketer {
    /// Bucket `identifier` (salted with `salt`, the toggle name) and return the allocation it
    /// falls into. Identifiers beyond the last allocation's range do not match.
    pub fn validate<'a>(
        &self,
        allocations: &'a [Allocation],
        identifier: &str,
        salt: &str,
    ) -> AssertionResult<'a> {
        let bucket = self.bucket(identifier, salt);
        debug!("Get allocation for bucket {}", bucket);

        match allocation_for_bucket(allocations, bucket) {
            Some(allocation) => AssertionResult {
                is_valid: true,
                rollout_value: allocation.value.as_ref(),
            },
            None => AssertionResult::invalid(),
        }
    }

    /// Returns the bucket in `0..=BUCKET_COUNT` for `identifier` and `salt`.
    pub fn bucket(&self, identifier: &str, salt: &str) -> u32 {
        let ratio = hash_ratio(identifier, salt);
        debug!("Calculated split for {}: {}", identifier, ratio);
        (ratio * BUCKET_COUNT as f64) as u32
    }
}

fn hash_ratio(identifier: &str, salt: &str) -> f64 {
    let mut hash = Md5::new();
    hash.update(identifier.as_bytes());
    hash.update(b"-");
    hash.update(salt.as_bytes());
    let digest = hash.finalize();

    let prefix = u32::from_be_bytes([0, digest[0], digest[1], digest[2]]);
    prefix as f64 / HASH_SCALE
}

// Each allocation covers the half-open range ending at the floor of the running ratio sum, so
// the order of allocations decides which buckets they own.
fn allocation_for_bucket(allocations: &[Allocation], bucket: u32) -> Option<&Allocation> {
    let mut sum = 0.0;
    for allocation in allocations {
        sum += allocation.ratio * BUCKET_COUNT as f64;
        let range_end = sum.floor();
        if (bucket as f64) < range_end {
            return Some(allocation);
        }
    }
    None
}
