// src/cli/handlers/mod.rs

// One module per top-level action.

pub mod list;
pub mod run;
