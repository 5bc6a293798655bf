pub mod controller;
pub mod loop_worker;

pub use controller::{TrackingController, TrackingEvent};
