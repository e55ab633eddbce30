use std::fmt;

/// Identifies one synchronization cycle. Later cycles compare greater.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Allocates generations and answers "is this result still wanted?".
///
/// This is the single staleness guard shared by every update path: a result
/// may touch shared state only while its generation is the latest allocated.
/// In-flight work is never cancelled; it is simply refused on arrival.
#[derive(Debug, Default, Clone)]
pub struct GenerationGuard {
    latest: Generation,
    applied: Option<Generation>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new cycle, superseding every earlier one.
    pub fn begin(&mut self) -> Generation {
        self.latest = Generation(self.latest.0.wrapping_add(1));
        self.latest
    }

    pub fn latest(&self) -> Generation {
        self.latest
    }

    pub fn is_current(&self, g: Generation) -> bool {
        g == self.latest
    }

    /// Records `g` as applied if it is still current.
    ///
    /// Returns `false` (and records nothing) for superseded generations, so the
    /// applied generation can only move forward.
    pub fn mark_applied(&mut self, g: Generation) -> bool {
        if !self.is_current(g) {
            return false;
        }
        self.applied = Some(g);
        true
    }

    pub fn applied(&self) -> Option<Generation> {
        self.applied
    }
}

#[cfg(test)]
mod tests {
    use super::{Generation, GenerationGuard};

    #[test]
    fn generations_are_monotonic() {
        let mut guard = GenerationGuard::new();
        let a = guard.begin();
        let b = guard.begin();
        assert!(a < b);
        assert_eq!(guard.latest(), b);
        assert!(!guard.is_current(a));
        assert!(guard.is_current(b));
    }

    #[test]
    fn superseded_generation_cannot_be_applied() {
        let mut guard = GenerationGuard::new();
        let g1 = guard.begin();
        let g2 = guard.begin();
        assert!(guard.mark_applied(g2));
        assert!(!guard.mark_applied(g1));
        assert_eq!(guard.applied(), Some(g2));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Generation(42).to_string(), "g42");
    }
}
