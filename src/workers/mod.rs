//! Background workers spawned next to the HTTP server.

pub mod project_sweeper;
