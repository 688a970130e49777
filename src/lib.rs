pub mod cancel;
pub mod config;
pub mod date;
pub mod error;
pub mod events;
pub mod rotation;
pub mod scan;
pub mod schedule;
pub mod select;
pub mod service;
pub mod store;

pub use config_model::{NextSwitch, SelectionMode, SwitchSchedule};
pub use error::Error;
