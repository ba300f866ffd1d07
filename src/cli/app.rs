//! Main CLI application structure

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use super::output::Output;
use super::{item_cmd, revision_cmd};
use crate::domain::{FieldValue, Fields, Identifier};
use crate::storage::{CursorKind, OutputFormat, Settings, StoragePool};
use crate::vcs::{LocalSession, ProcessSession, Session};

#[derive(Parser)]
#[command(name = "assetpool")]
#[command(author, version, about = "Tiered asset storage for studio pipelines")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pool configuration file
    #[arg(long, short = 'p', global = true, env = "ASSETPOOL_POOL")]
    pub pool: Option<PathBuf>,

    /// Session store for revision commands
    #[arg(long, global = true, env = "ASSETPOOL_SESSION")]
    pub session: Option<PathBuf>,

    /// External program serving revision requests instead of a session store
    #[arg(long, global = true, conflicts_with = "session")]
    pub session_command: Option<PathBuf>,

    /// Output format (defaults to the settings file, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Log at debug level (overridden by ASSETPOOL_LOG)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Identity of the item a command acts on
#[derive(Args, Debug, Clone)]
pub struct ItemArgs {
    /// Comma-separated tags
    #[arg(long, short = 't', value_delimiter = ',', required = true)]
    pub tags: Vec<String>,

    /// Field as `key=value`; integers and floats are detected
    #[arg(long = "field", value_parser = parse_field)]
    pub fields: Vec<(String, FieldValue)>,
}

impl ItemArgs {
    pub fn identifier(&self) -> Identifier {
        let fields: Fields = self.fields.iter().cloned().collect();
        Identifier::new(self.tags.iter().map(|t| t.trim()), fields)
    }
}

fn parse_field(input: &str) -> std::result::Result<(String, FieldValue), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", input))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in '{}'", input));
    }
    Ok((key.to_string(), FieldValue::parse_auto(value.trim())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Revision,
    Sequence,
    Collection,
}

impl From<KindArg> for CursorKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Revision => CursorKind::Revision,
            KindArg::Sequence => CursorKind::Sequence,
            KindArg::Collection => CursorKind::Collection,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the tier chain an identity resolves to
    Resolve {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Check whether an item is stored
    Exists {
        #[command(flatten)]
        item: ItemArgs,

        /// Also look on upstream tiers
        #[arg(long)]
        upstream: bool,
    },

    /// Read an item, falling back upstream
    Read {
        #[command(flatten)]
        item: ItemArgs,

        /// Write the data here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Only look on the local tier
        #[arg(long)]
        local_only: bool,

        /// Print the item's metadata instead of its data
        #[arg(long)]
        metadata: bool,
    },

    /// Write an item to its tier and every tier upstream
    Write {
        #[command(flatten)]
        item: ItemArgs,

        /// Read the data from this file instead of stdin
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Overwrite tiers that already hold the item
        #[arg(long)]
        force: bool,

        /// Also write the metadata sidecar
        #[arg(long)]
        metadata: bool,

        /// Only write the local tier
        #[arg(long)]
        local_only: bool,
    },

    /// Copy an item from upstream into the local tier
    Pull {
        #[command(flatten)]
        item: ItemArgs,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        metadata: bool,
    },

    /// Copy an item from the local tier upstream
    Push {
        #[command(flatten)]
        item: ItemArgs,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        metadata: bool,
    },

    /// Remove an item
    Remove {
        #[command(flatten)]
        item: ItemArgs,

        /// Remove it from every tier
        #[arg(long)]
        propagate: bool,
    },

    /// Scaffold the schema structure for an identity
    Build {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Resolve a filesystem path back to its item
    Lookup {
        filename: String,
    },

    /// List the versions, frames or files of an item
    List {
        #[command(flatten)]
        item: ItemArgs,

        /// Member kind (defaults to the item's type)
        #[arg(long)]
        kind: Option<KindArg>,

        /// List the most upstream tier instead of the local one
        #[arg(long)]
        upstream: bool,
    },

    /// Manage component revisions
    #[command(subcommand)]
    Revision(revision_cmd::RevisionCommands),
}

/// Settings and global flags shared by every command
pub struct Context {
    pub output: Output,
    pub settings: Settings,
    pool: Option<PathBuf>,
    session: Option<PathBuf>,
    session_command: Option<PathBuf>,
}

impl Context {
    pub fn pool(&self) -> Result<StoragePool> {
        let path = self
            .pool
            .clone()
            .or_else(|| self.settings.pool.clone())
            .context("No pool config given; pass --pool or set 'pool' in the settings file")?;

        debug!(path = %path.display(), "loading pool");
        StoragePool::load(&path, &self.settings)
            .with_context(|| format!("Failed to load pool {}", path.display()))
    }

    pub fn session(&self) -> Result<Box<dyn Session>> {
        let user = self.settings.effective_user();

        if let Some(program) = &self.session_command {
            return Ok(Box::new(ProcessSession::new(program, user)));
        }

        let path = self
            .session
            .clone()
            .or_else(|| self.settings.session.clone())
            .context("No session given; pass --session or set 'session' in the settings file")?;
        Ok(Box::new(LocalSession::new(path, user)))
    }
}

/// Main entry point for the CLI
pub fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    let format = cli.format.unwrap_or(settings.default_format);

    let ctx = Context {
        output: Output::new(format),
        settings,
        pool: cli.pool,
        session: cli.session,
        session_command: cli.session_command,
    };

    match cli.command {
        Commands::Resolve { item } => item_cmd::resolve(&ctx, &item)?,
        Commands::Exists { item, upstream } => item_cmd::exists(&ctx, &item, upstream)?,
        Commands::Read {
            item,
            output,
            local_only,
            metadata,
        } => item_cmd::read(&ctx, &item, output.as_deref(), local_only, metadata)?,
        Commands::Write {
            item,
            input,
            force,
            metadata,
            local_only,
        } => item_cmd::write(&ctx, &item, input.as_deref(), force, metadata, local_only)?,
        Commands::Pull {
            item,
            force,
            metadata,
        } => item_cmd::pull(&ctx, &item, force, metadata)?,
        Commands::Push {
            item,
            force,
            metadata,
        } => item_cmd::push(&ctx, &item, force, metadata)?,
        Commands::Remove { item, propagate } => item_cmd::remove(&ctx, &item, propagate)?,
        Commands::Build { item } => item_cmd::build(&ctx, &item)?,
        Commands::Lookup { filename } => item_cmd::lookup(&ctx, &filename)?,
        Commands::List {
            item,
            kind,
            upstream,
        } => item_cmd::list(&ctx, &item, kind.map(Into::into), upstream)?,
        Commands::Revision(cmd) => revision_cmd::run(cmd, &ctx)?,
    }

    Ok(())
}
