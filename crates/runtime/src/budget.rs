/// Caps how many batch entries one cooperative turn may process.
///
/// Counted in entries, never in elapsed time, so a replay slices a batch at
/// exactly the same boundaries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceBudget {
    remaining: usize,
}

impl SliceBudget {
    pub fn new(entries: usize) -> Self {
        Self { remaining: entries }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Claims up to `wanted` entries and returns how many were granted.
    pub fn take_up_to(&mut self, wanted: usize) -> usize {
        let granted = wanted.min(self.remaining);
        self.remaining -= granted;
        granted
    }

    /// Number of turns needed to drain `total` entries at `per_turn` each.
    /// An empty batch still takes one turn to report completion.
    pub fn turns_for(total: usize, per_turn: usize) -> usize {
        total.div_ceil(per_turn.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::SliceBudget;

    #[test]
    fn take_up_to_grants_partial() {
        let mut b = SliceBudget::new(5000);
        assert_eq!(b.take_up_to(3000), 3000);
        assert_eq!(b.remaining(), 2000);
        assert_eq!(b.take_up_to(3000), 2000);
        assert_eq!(b.take_up_to(1), 0);
        assert!(b.is_exhausted());
    }

    #[test]
    fn turns_round_up() {
        assert_eq!(SliceBudget::turns_for(12_000, 5000), 3);
        assert_eq!(SliceBudget::turns_for(10_000, 5000), 2);
        assert_eq!(SliceBudget::turns_for(0, 5000), 1);
        assert_eq!(SliceBudget::turns_for(3, 0), 3);
    }
}
