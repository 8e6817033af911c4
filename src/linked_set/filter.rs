/// Selects which members count when comparing a set against its target.
///
/// Only target checks consult the filter. Membership, cascade and payload
/// storage always see every key.
///
/// `counts` runs while the owning set's lock is held. It must not call back
/// into that set (`contains`, `add`, ...), or it will deadlock.
pub trait TargetFilter<K>: Send + Sync {
    /// Return `true` if `key` takes part in the target comparison.
    fn counts(&self, key: &K) -> bool;
}

/// Base filter: every member counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMembers;

impl<K> TargetFilter<K> for AllMembers {
    fn counts(&self, _key: &K) -> bool {
        true
    }
}

impl<K, F> TargetFilter<K> for F
where
    F: Fn(&K) -> bool + Send + Sync,
{
    fn counts(&self, key: &K) -> bool {
        self(key)
    }
}
