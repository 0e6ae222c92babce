use crate::price_snapshot::PriceSnapshot;

/// Decides whether `current` is worth forwarding given the last forwarded snapshot.
///
/// Returns `true` if nothing was forwarded yet, or if either price differs.
/// Comparison is exact: prices are discrete currency units upstream.
pub fn changed(last: Option<&PriceSnapshot>, current: &PriceSnapshot) -> bool {
    match last {
        None => true,
        Some(last) => !last.same_prices(current),
    }
}

/// Holds the single "last forwarded" slot of a session.
///
/// The slot is only advanced through [`ChangeDetector::commit`], which the
/// worker calls after a successful write. A snapshot that failed to reach
/// the client is therefore still considered new on the next poll.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<PriceSnapshot>,
}

impl ChangeDetector {
    /// Creates a detector with an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `current` differs from the last committed snapshot.
    pub fn is_changed(&self, current: &PriceSnapshot) -> bool {
        changed(self.last.as_ref(), current)
    }

    /// Records `snapshot` as the last one delivered.
    pub fn commit(&mut self, snapshot: PriceSnapshot) {
        self.last = Some(snapshot);
    }

    /// The last delivered snapshot, if any.
    pub fn last(&self) -> Option<&PriceSnapshot> {
        self.last.as_ref()
    }
}
