//! Per-attempt application context.

/// Immutable settings for one application attempt.
///
/// `reapplying` is tri-state: unset means the caller did not say, and is
/// treated as "not reapplying" wherever a yes/no answer is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplierContext {
    reapplying: Option<bool>,
    updates_as_upserts: bool,
}

impl ApplierContext {
    /// Returns a builder with both flags unset.
    pub fn builder() -> ApplierContextBuilder {
        ApplierContextBuilder::default()
    }

    /// Context used to re-apply a unit after a write conflict: the unit
    /// may already be partially applied, and updates of missing documents
    /// must create them.
    pub fn for_reapply() -> Self {
        Self::builder()
            .reapplying(true)
            .updates_as_upserts(true)
            .build()
    }

    /// Returns the reapplying flag as given.
    pub fn reapplying(&self) -> Option<bool> {
        self.reapplying
    }

    /// Returns true if the reapplying flag is set to true.
    pub fn is_reapplying(&self) -> bool {
        self.reapplying.unwrap_or(false)
    }

    /// Returns true if updates of missing documents create them.
    pub fn updates_as_upserts(&self) -> bool {
        self.updates_as_upserts
    }
}

/// Builder for [`ApplierContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplierContextBuilder {
    reapplying: Option<bool>,
    updates_as_upserts: bool,
}

impl ApplierContextBuilder {
    /// Sets the reapplying flag.
    pub fn reapplying(mut self, reapplying: bool) -> Self {
        self.reapplying = Some(reapplying);
        self
    }

    /// Sets whether updates of missing documents create them.
    pub fn updates_as_upserts(mut self, updates_as_upserts: bool) -> Self {
        self.updates_as_upserts = updates_as_upserts;
        self
    }

    /// Builds the context.
    pub fn build(self) -> ApplierContext {
        ApplierContext {
            reapplying: self.reapplying,
            updates_as_upserts: self.updates_as_upserts,
        }
    }
}
