//! Pure transition logic for the bootstrap state machine
//!
//! Kept free of I/O so the full health-code-to-action mapping can be
//! tested as a table.

use stoker_client::HealthStatus;

/// What the bootstrapper should do next given the store's health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Initialize the store, persist the init response, then unseal
    Initialize,
    /// Load the persisted init response and submit key shares
    Unseal,
    /// The store is ready; bootstrap work can proceed
    Finish,
    /// Another node holds the active role; this node has nothing to do
    StandBy,
    /// Health endpoint returned something unexpected; poll again
    Retry,
}

pub fn plan(status: HealthStatus) -> Action {
    match status {
        HealthStatus::Ready => Action::Finish,
        HealthStatus::Standby => Action::StandBy,
        HealthStatus::Uninitialized => Action::Initialize,
        HealthStatus::Sealed => Action::Unseal,
        HealthStatus::Unknown(_) => Action::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_health_state_maps_to_an_action() {
        assert_eq!(plan(HealthStatus::from_code(200)), Action::Finish);
        assert_eq!(plan(HealthStatus::from_code(429)), Action::StandBy);
        assert_eq!(plan(HealthStatus::from_code(501)), Action::Initialize);
        assert_eq!(plan(HealthStatus::from_code(503)), Action::Unseal);
        assert_eq!(plan(HealthStatus::from_code(500)), Action::Retry);
        assert_eq!(plan(HealthStatus::from_code(418)), Action::Retry);
    }
}
