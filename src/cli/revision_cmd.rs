//! Revision CLI commands

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Subcommand;
use serde_json::json;

use super::app::{Context, ItemArgs};
use crate::vcs::{Component, Revision};

#[derive(Subcommand)]
pub enum RevisionCommands {
    /// Open (or return) the current unpublished revision
    Create {
        #[command(flatten)]
        item: ItemArgs,

        /// Take over a revision owned by someone else
        #[arg(long)]
        force_ownership: bool,
    },

    /// Store data for the current revision and publish it
    Publish {
        #[command(flatten)]
        item: ItemArgs,

        /// File holding the data to publish
        #[arg(long, short)]
        input: PathBuf,

        /// Publish note
        #[arg(long, short)]
        comment: Option<String>,
    },

    /// List revisions, newest first
    List {
        #[command(flatten)]
        item: ItemArgs,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a revision record (stored data is kept)
    Remove {
        #[command(flatten)]
        item: ItemArgs,

        #[arg(long)]
        version: i64,
    },
}

pub fn run(cmd: RevisionCommands, ctx: &Context) -> Result<()> {
    match cmd {
        RevisionCommands::Create {
            item,
            force_ownership,
        } => create(ctx, &item, force_ownership),
        RevisionCommands::Publish {
            item,
            input,
            comment,
        } => publish(ctx, &item, &input, comment.as_deref()),
        RevisionCommands::List { item, limit } => list(ctx, &item, limit),
        RevisionCommands::Remove { item, version } => remove(ctx, &item, version),
    }
}

fn revision_json(revision: &Revision) -> serde_json::Value {
    json!({
        "component": revision.component().id(),
        "id": revision.id(),
        "version": revision.version(),
        "published": revision.is_published(),
        "comment": revision.comment(),
        "user": revision.user_id(),
        "created_at": revision.created_at(),
    })
}

fn create(ctx: &Context, item: &ItemArgs, force_ownership: bool) -> Result<()> {
    let session = ctx.session()?;
    let component = Component::new(&item.identifier());
    let revision = component.create_revision(session.as_ref(), force_ownership)?;

    if ctx.output.is_json() {
        ctx.output.data(&revision_json(&revision));
    } else {
        ctx.output.success(&format!(
            "Revision {} of {} is owned by {}",
            revision.version(),
            component.id(),
            revision.user_id()
        ));
    }
    Ok(())
}

fn publish(ctx: &Context, item: &ItemArgs, input: &Path, comment: Option<&str>) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let pool = ctx.pool()?;
    let session = ctx.session()?;
    let component = Component::new(&item.identifier());

    let mut revision = component
        .latest_revision(session.as_ref())?
        .filter(|revision| !revision.is_published())
        .with_context(|| {
            format!(
                "{} has no unpublished revision; run 'revision create' first",
                component
            )
        })?;

    let stored = revision.publish(&pool, session.as_ref(), comment, |tx| tx.write(&data))?;

    if ctx.output.is_json() {
        let mut value = revision_json(&revision);
        value["rpath"] = json!(stored.rpath());
        ctx.output.data(&value);
    } else {
        ctx.output.success(&format!(
            "Published revision {} to {}",
            revision.version(),
            stored.rpath()
        ));
    }
    Ok(())
}

fn list(ctx: &Context, item: &ItemArgs, limit: Option<usize>) -> Result<()> {
    let session = ctx.session()?;
    let component = Component::new(&item.identifier());
    let revisions = component.revisions(session.as_ref(), limit)?;

    if ctx.output.is_json() {
        let values: Vec<_> = revisions.iter().map(revision_json).collect();
        ctx.output.data(&values);
        return Ok(());
    }

    let rows: Vec<Vec<String>> = revisions
        .iter()
        .map(|revision| {
            let state = if revision.is_published() {
                "published"
            } else {
                "open"
            };
            vec![
                revision.version().to_string(),
                state.to_string(),
                revision.user_id().to_string(),
                revision.comment().unwrap_or_default().to_string(),
            ]
        })
        .collect();
    ctx.output.table(&rows);
    Ok(())
}

fn remove(ctx: &Context, item: &ItemArgs, version: i64) -> Result<()> {
    let session = ctx.session()?;
    let component = Component::new(&item.identifier());

    let revision = component
        .revisions(session.as_ref(), Some(usize::MAX))?
        .into_iter()
        .find(|revision| revision.version() == version)
        .with_context(|| format!("{} has no revision {}", component, version))?;
    revision.remove(session.as_ref())?;

    ctx.output
        .success(&format!("Removed revision {} of {}", version, component.id()));
    Ok(())
}
