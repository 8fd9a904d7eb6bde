//! Init/unseal bootstrap for the secret store
//!
//! Polls the store's health endpoint and drives it to the ready state:
//! initializing on first boot, unsealing from the persisted init
//! response on restarts, and standing down on standby nodes.

pub mod bootstrap;
pub mod initfile;
pub mod state;

pub use bootstrap::{BootstrapOutcome, Bootstrapper};
pub use state::{plan, Action};
