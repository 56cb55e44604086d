use crate::Error;

/// Consecutive partial refreshes left before a full refresh is mandatory.
///
/// Partial refreshes reuse the waveform loaded by the last full refresh and
/// accumulate ghosting, so the panel vendor bounds how many may follow each
/// other. The counter stays within `[0, limit]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RefreshBudget {
    remaining: u16,
    limit: u16,
}

impl RefreshBudget {
    /// A full budget of `limit` partial refreshes
    pub fn new(limit: u16) -> Self {
        Self {
            remaining: limit,
            limit,
        }
    }

    /// An empty budget, the first refresh has to be a full one
    pub fn exhausted(limit: u16) -> Self {
        Self {
            remaining: 0,
            limit,
        }
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn limit(&self) -> u16 {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Fails with [`Error::RefreshExhausted`] when no partial refresh is left.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_exhausted() {
            return Err(Error::RefreshExhausted);
        }
        Ok(())
    }

    /// Records one successful partial refresh.
    pub fn spend(&mut self) -> Result<(), Error> {
        self.check()?;
        self.remaining -= 1;
        Ok(())
    }

    /// Records a full refresh.
    pub fn reset(&mut self) {
        self.remaining = self.limit;
    }

    pub(crate) fn drain(&mut self) {
        self.remaining = 0;
    }
}
