//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Identifiers are ordered so tables can keep rows in a stable, id-sorted order.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
