//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Units` of
/// `10.00` and `10.0` are the same amount, two `Currency` codes `"usd"` and
/// `"USD"` are the same currency. To "modify" one, build a new one.
///
/// - **Value Object**: `Units`, `Currency`, a balance delta
/// - **Entity**: `Account`, `Journal` (two accounts with the same id are the same account)
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
