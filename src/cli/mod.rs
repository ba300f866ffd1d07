//! # Command-Line Interface
//!
//! Thin wrapper over the storage and revision layers.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Resolve | Identity to paths | `resolve`, `lookup`, `list` |
//! | Data | Move bytes between tiers | `read`, `write`, `pull`, `push`, `remove` |
//! | Scaffold | Schema structure | `build` |
//! | Revision | Component history | `revision create`, `revision publish` |
//!
//! Items are named with `--tags a,b` plus any number of `--field key=value`.
//!
//! ## Output Formats
//!
//! All commands support `--format`:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`. `ASSETPOOL_LOG` takes an
//! `EnvFilter` directive; otherwise `--verbose` selects `debug` and the
//! default is `warn`.

mod app;
mod item_cmd;
mod output;
mod revision_cmd;

pub use app::{run, Cli, Commands, Context, ItemArgs, KindArg};
pub use output::Output;
pub use revision_cmd::RevisionCommands;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "ASSETPOOL_LOG";
