use serde::{Deserialize, Serialize};

/// Ordered thermal urgency level driving which configuration row applies.
///
/// The scale has a fixed total count so per-severity tables can be stored as
/// fixed-size arrays indexed by [`Severity::as_index`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Severity {
    #[default]
    None,
    Light,
    Moderate,
    Severe,
    Critical,
    Emergency,
    Shutdown,
}

impl Severity {
    /// Total number of severity levels.
    pub const COUNT: usize = 7;

    /// All levels in ascending order.
    pub const ALL: [Severity; Severity::COUNT] = [
        Severity::None,
        Severity::Light,
        Severity::Moderate,
        Severity::Severe,
        Severity::Critical,
        Severity::Emergency,
        Severity::Shutdown,
    ];

    /// Index of this level into a [`PerSeverity`] table.
    pub const fn as_index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn iter() -> impl Iterator<Item = Severity> {
        Self::ALL.into_iter()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Table with exactly one entry per severity level.
pub type PerSeverity<T> = [T; Severity::COUNT];
