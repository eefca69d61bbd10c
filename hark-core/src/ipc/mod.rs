//! Types a host forwards to its UI or event bus.

pub mod events;
