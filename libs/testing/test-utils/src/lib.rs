//! Shared test utilities
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: deterministic stream, group and consumer names
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_stream_test() {
//!     let redis = TestRedis::new().await;
//!     let names = TestDataBuilder::from_test_name("my_stream_test");
//!
//!     let stream = names.stream("orders");
//!     let group = names.group("billing");
//! }
//! ```

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::TestRedis;

/// Builder for test names with a deterministic seed
///
/// Every test gets its own keys, so tests sharing one container don't see
/// each other's entries.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (seed is the hash of the name)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_reclaim");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// `test-<prefix>-<seed>-<suffix>`
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let name = TestDataBuilder::new(7).name("stream", "main");
    /// assert_eq!(name, "test-stream-7-main");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    pub fn stream(&self, suffix: &str) -> String {
        self.name("stream", suffix)
    }

    pub fn group(&self, suffix: &str) -> String {
        self.name("group", suffix)
    }

    pub fn consumer(&self, suffix: &str) -> String {
        self.name("consumer", suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.stream("jobs"), builder2.stream("jobs"));
        assert_eq!(builder1.group("workers"), "test-group-42-workers");
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.stream("jobs"), builder2.stream("jobs"));
    }

    #[test]
    fn test_name_kinds_do_not_collide() {
        let builder = TestDataBuilder::from_test_name("kinds");
        assert_ne!(builder.stream("a"), builder.group("a"));
        assert_ne!(builder.group("a"), builder.consumer("a"));
    }
}
