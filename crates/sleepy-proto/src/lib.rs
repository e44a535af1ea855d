//! Shared model for the sleepy appliance: configuration, platform paths,
//! data types and the reserved-key table.  Nothing in here performs
//! playback or touches the terminal.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod router;
