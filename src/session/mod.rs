pub mod controller;
pub mod index;
pub mod manager;
pub mod state;

pub use controller::{zeroed_payload, SessionController};
pub use index::{CharacteristicDescriptor, CharacteristicIndex, SharedIndex};
pub use state::{ConnectionInfo, DiscoveryOutcome, SessionState};
