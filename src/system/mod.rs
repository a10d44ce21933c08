//! # System Interaction Layer
//!
//! The boundary between the orchestration core and the outside world:
//! processes on remote and local machines, files on disk and the operator.
//!
//! ## Modules
//!
//! - **`transport`**: How a command line reaches a machine. `SshTransport`
//!   spawns the system `ssh`, `LocalTransport` runs `sh -c` here.
//! - **`executor`**: Wraps commands in the configured shell (and `sudo`),
//!   echoes them, and turns non-zero exits into run aborts unless tolerated.
//! - **`templates`**: Loads the `templates.toml` catalog and renders
//!   `{{ key }}` placeholders from the context.
//! - **`confirm`**: Yes/no questions to the operator.

pub mod confirm;
pub mod executor;
pub mod templates;
pub mod transport;
