//! Running token count against a hard limit.

#[derive(Debug, Clone, Copy)]
pub(crate) struct TokenBudget {
    limit: usize,
    used: usize,
}

impl TokenBudget {
    pub(crate) fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Charges `tokens` unconditionally; used for the system message.
    pub(crate) fn charge(&mut self, tokens: usize) {
        self.used += tokens;
    }

    /// Spends `tokens` only if the total stays within the limit.
    pub(crate) fn try_spend(&mut self, tokens: usize) -> bool {
        match self.used.checked_add(tokens) {
            Some(total) if total <= self.limit => {
                self.used = total;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }
}
