//! Two-register linear scan for loop induction variables
//!
//! `r12` and `r13` are reserved for `for`-loop counters. On loop entry
//! the induction name takes a free register if one exists; the register
//! is updated at the increment and mirrored to the variable's stack
//! slot, so interior uses that load from memory stay correct. The
//! register is released when the loop exits. Both registers are
//! callee-saved, so calls inside the body do not disturb them.

/// Registers reserved for induction variables, in allocation order.
pub(super) const LOOP_REGS: [&str; 2] = ["r12", "r13"];

#[derive(Debug, Default)]
pub(super) struct LoopRegisters {
    slots: [Option<String>; 2],
}

impl LoopRegisters {
    pub fn new() -> Self {
        LoopRegisters::default()
    }

    /// Map `name` to a free register, if any.
    pub fn acquire(&mut self, name: &str) -> Option<&'static str> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(name.to_string());
                return Some(LOOP_REGS[i]);
            }
        }
        None
    }

    /// Register currently holding `name`, if it got one.
    pub fn lookup(&self, name: &str) -> Option<&'static str> {
        self.slots
            .iter()
            .position(|s| s.as_deref() == Some(name))
            .map(|i| LOOP_REGS[i])
    }

    pub fn release(&mut self, name: &str) {
        for slot in self.slots.iter_mut() {
            if slot.as_deref() == Some(name) {
                *slot = None;
            }
        }
    }

    pub fn release_all(&mut self) {
        self.slots = [None, None];
    }

    /// `r13` doubles as the match-subject register; the match lowering
    /// saves and restores it when an induction variable owns it.
    pub fn r13_in_use(&self) -> bool {
        self.slots[1].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_in_order_then_exhaust() {
        let mut regs = LoopRegisters::new();
        assert_eq!(regs.acquire("i"), Some("r12"));
        assert_eq!(regs.acquire("j"), Some("r13"));
        assert_eq!(regs.acquire("k"), None);
        assert!(regs.r13_in_use());
    }

    #[test]
    fn test_release_frees_the_slot() {
        let mut regs = LoopRegisters::new();
        regs.acquire("i");
        regs.acquire("j");
        regs.release("i");
        assert_eq!(regs.lookup("i"), None);
        assert_eq!(regs.acquire("k"), Some("r12"));
        assert_eq!(regs.lookup("j"), Some("r13"));
    }
}
