// Fault injection for database builds
//
// Lets tests abort a build at a chosen point and check that the published
// database is left alone.
//
// Faults:
// - Insertion failure after N successful puts
// - Publish (rename) failure after a complete flush

use std::io;

/// Fault injection configuration with builder pattern
///
/// # Example
/// ```
/// use dev_mkdb::chaos::ChaosConfig;
///
/// let config = ChaosConfig::new()
///     .with_insert_failure_after(3)
///     .with_publish_failure(true);
/// assert_eq!(config.fail_insert_after, Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaosConfig {
    /// Fail the insertion following this many successful ones
    pub fail_insert_after: Option<usize>,

    /// Fail the rename onto the destination path
    pub fail_publish: bool,
}

impl ChaosConfig {
    /// Create a configuration that injects nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the insertion after `n` successful ones
    ///
    /// # Example
    /// ```
    /// use dev_mkdb::chaos::ChaosConfig;
    /// let config = ChaosConfig::new().with_insert_failure_after(0);
    /// assert!(config.insert_fault(0).is_some());
    /// ```
    pub fn with_insert_failure_after(mut self, n: usize) -> Self {
        self.fail_insert_after = Some(n);
        self
    }

    /// Fail the publish step
    pub fn with_publish_failure(mut self, enabled: bool) -> Self {
        self.fail_publish = enabled;
        self
    }

    /// True when no fault is configured
    pub fn is_inert(&self) -> bool {
        self.fail_insert_after.is_none() && !self.fail_publish
    }

    /// Injected error for the insertion at `index` (0-based), if any
    pub fn insert_fault(&self, index: usize) -> Option<io::Error> {
        match self.fail_insert_after {
            Some(n) if index >= n => Some(io::Error::other(format!(
                "injected insertion failure after {n} records"
            ))),
            _ => None,
        }
    }

    /// Injected error for the publish step, if any
    pub fn publish_fault(&self) -> Option<io::Error> {
        self.fail_publish
            .then(|| io::Error::other("injected rename failure"))
    }
}
