//! K-ordered identifier generation.
//!
//! Aggregate ids must be globally unique and roughly time-ordered so that
//! `ORDER BY creation_date, id` stays deterministic and index-friendly.
//! UUIDv7 carries a millisecond timestamp in its high bits, which gives the
//! generator the snowflake-style ordering property without coordination.

/// Generator of unique, k-ordered identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce the next identifier.
    fn next_id(&self) -> String;
}

/// Production generator emitting UUIDv7 ids.
///
/// # Examples
///
/// ```
/// use portcullis_core::id::{IdGenerator, UuidGenerator};
///
/// let generator = UuidGenerator::new();
/// let a = generator.next_id();
/// let b = generator.next_id();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl UuidGenerator {
    /// Create a new UUIDv7 generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::now_v7().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let generator = UuidGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert_ne!(a, b);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the id is not a UUID
    fn ids_are_version_7() {
        let generator = UuidGenerator::new();
        let id = generator.next_id();
        let parsed = uuid::Uuid::parse_str(&id).expect("generated id should parse");
        assert_eq!(parsed.get_version_num(), 7);
    }
}
