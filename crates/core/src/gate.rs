//! Gating conditions: external predicates that must hold before an attempt
//! may start.

/// A user-supplied predicate with a human-readable message.
///
/// Typical implementations probe network availability, battery level, or
/// feature flags. The policy re-evaluates gates on every `should_start`, so
/// implementations should be cheap.
pub trait GatingCondition: Send + Sync + 'static {
    fn is_satisfied(&self) -> bool;

    /// Shown as the job's state message while the gate blocks it.
    fn message(&self) -> String;
}

/// A fixed gate, togglable from outside. Useful for holding jobs closed in
/// tests or behind an application switch.
pub struct StaticGate {
    open: std::sync::atomic::AtomicBool,
    message: String,
}

impl StaticGate {
    pub fn new(open: bool, message: impl Into<String>) -> Self {
        Self { open: std::sync::atomic::AtomicBool::new(open), message: message.into() }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, std::sync::atomic::Ordering::Release);
    }
}

impl GatingCondition for StaticGate {
    fn is_satisfied(&self) -> bool {
        self.open.load(std::sync::atomic::Ordering::Acquire)
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_gate_toggles() {
        let gate = StaticGate::new(false, "waiting for network");
        assert!(!gate.is_satisfied());
        assert_eq!(gate.message(), "waiting for network");
        gate.set_open(true);
        assert!(gate.is_satisfied());
    }
}
