//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Accounts and journal entries are both entities: two values with the same
/// id describe the same record, even if other fields differ (e.g. a balance
/// observed before and after a transfer).
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Whether `other` refers to the same persisted record.
    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
