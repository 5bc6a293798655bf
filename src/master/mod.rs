pub mod controller;
pub mod events;
pub mod state;

pub use controller::{MasterDeps, MasterService};
pub use events::{MasterEvent, StatusSnapshot};
pub use state::{InteractionState, MasterState, OperatingMode, UsageStats};
