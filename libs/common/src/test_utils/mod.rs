//! Test utilities shared by the engine and tool crates

pub mod schema;
