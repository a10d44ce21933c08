// src/core/mod.rs

pub mod abort;
pub mod config_loader;
pub mod context;
pub mod dispatcher;
pub mod failure;
pub mod gate;
pub mod poll;
pub mod registry;
pub mod task;
pub mod task_context;
