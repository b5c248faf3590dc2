pub mod coordinator;

pub use coordinator::{CoordinatorSettings, RelayCoordinator, RelayDependencies};
