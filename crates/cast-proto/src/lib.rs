//! Shared types and storage for the SeriousCast client: wire formats, the
//! channel table, configuration, persistence and listener profiles.

pub mod channels;
pub mod config;
pub mod platform;
pub mod playlist;
pub mod profiles;
pub mod protocol;
pub mod store;
