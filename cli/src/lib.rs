//! Image Archive CLI - archive, restore and clean up image versions.

pub mod commands;
pub mod output;
