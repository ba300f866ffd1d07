//! Item CLI commands

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context as _, Result};
use serde_json::json;

use super::app::{Context, ItemArgs};
use crate::storage::{
    Cursor, CursorKind, ReadOptions, StorageItem, StoragePool, WriteOptions,
};

fn storage_item(pool: &StoragePool, item: &ItemArgs) -> Result<StorageItem> {
    let identifier = item.identifier();
    pool.get_storage_item(&identifier)?
        .with_context(|| format!("No storage serves tags {:?}", identifier.tags))
}

fn chain_json(item: &StorageItem) -> Result<serde_json::Value> {
    let mut tiers = Vec::with_capacity(item.chain_len());
    let mut current = Some(item.most_downstream());
    while let Some(tier) = current {
        tiers.push(json!({
            "storage": tier.storage().name(),
            "rpath": tier.rpath(),
            "exists": tier.exists()?,
            "path": tier.filesystem_path(),
        }));
        current = tier.upstream();
    }

    Ok(json!({
        "tags": item.tags(),
        "fields": item.fields(),
        "type": item.item_type().as_str(),
        "chain": tiers,
    }))
}

pub fn resolve(ctx: &Context, item: &ItemArgs) -> Result<()> {
    let pool = ctx.pool()?;
    let item = storage_item(&pool, item)?;
    let chain = chain_json(&item)?;

    if ctx.output.is_json() {
        ctx.output.data(&chain);
        return Ok(());
    }

    println!("{} ({})", item.identifier(), item.item_type());
    let mut rows = Vec::with_capacity(item.chain_len());
    let mut current = Some(item.most_downstream());
    while let Some(tier) = current {
        let exists = if tier.exists()? { "yes" } else { "no" };
        rows.push(vec![
            tier.storage().name().to_string(),
            tier.rpath().to_string(),
            exists.to_string(),
        ]);
        current = tier.upstream();
    }
    ctx.output.table(&rows);
    Ok(())
}

pub fn exists(ctx: &Context, item: &ItemArgs, upstream: bool) -> Result<()> {
    let pool = ctx.pool()?;
    let item = storage_item(&pool, item)?;
    let found = if upstream {
        item.exists_upstream()?
    } else {
        item.exists()?
    };

    if ctx.output.is_json() {
        ctx.output.data(&json!({ "rpath": item.rpath(), "exists": found }));
    } else {
        println!("{}", found);
    }
    Ok(())
}

pub fn read(
    ctx: &Context,
    item: &ItemArgs,
    output: Option<&Path>,
    local_only: bool,
    metadata: bool,
) -> Result<()> {
    let pool = ctx.pool()?;
    let mut item = storage_item(&pool, item)?;

    let data = item
        .read(ReadOptions {
            current_item_only: local_only,
            with_metadata: metadata,
            ..Default::default()
        })?
        .with_context(|| format!("No data stored for {}", item))?;

    if metadata {
        ctx.output.data(item.metadata());
        return Ok(());
    }

    match output {
        Some(path) => {
            fs::write(path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            ctx.output.success(&format!(
                "Read {} bytes from {} into {}",
                data.len(),
                item.rpath(),
                path.display()
            ));
        }
        None => io::stdout()
            .write_all(&data)
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

pub fn write(
    ctx: &Context,
    item: &ItemArgs,
    input: Option<&Path>,
    force: bool,
    metadata: bool,
    local_only: bool,
) -> Result<()> {
    let data = match input {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let pool = ctx.pool()?;
    let item = storage_item(&pool, item)?;
    item.write(
        &data,
        WriteOptions {
            force,
            with_metadata: metadata,
            current_item_only: local_only,
            ..Default::default()
        },
    )?;

    ctx.output
        .success(&format!("Wrote {} bytes to {}", data.len(), item.rpath()));
    Ok(())
}

pub fn pull(ctx: &Context, item: &ItemArgs, force: bool, metadata: bool) -> Result<()> {
    let pool = ctx.pool()?;
    let mut item = storage_item(&pool, item)?;

    match item.pull(metadata, force)? {
        Some(data) => ctx
            .output
            .success(&format!("Pulled {} bytes into {}", data.len(), item.rpath())),
        None => ctx
            .output
            .success(&format!("{} is already local", item.rpath())),
    }
    Ok(())
}

pub fn push(ctx: &Context, item: &ItemArgs, force: bool, metadata: bool) -> Result<()> {
    let pool = ctx.pool()?;
    let mut item = storage_item(&pool, item)?;
    let data = item.push(metadata, force)?;

    ctx.output
        .success(&format!("Pushed {} bytes from {}", data.len(), item.rpath()));
    Ok(())
}

pub fn remove(ctx: &Context, item: &ItemArgs, propagate: bool) -> Result<()> {
    let pool = ctx.pool()?;
    let item = storage_item(&pool, item)?;
    item.remove(propagate)?;

    ctx.output.success(&format!("Removed {}", item.rpath()));
    Ok(())
}

pub fn build(ctx: &Context, item: &ItemArgs) -> Result<()> {
    let pool = ctx.pool()?;
    let identifier = item.identifier();
    let reports = pool.build_structure(&identifier.tags, &identifier.fields);

    if reports.is_empty() {
        anyhow::bail!("No storage serves tags {:?}", identifier.tags);
    }

    if ctx.output.is_json() {
        let reports: Vec<_> = reports
            .iter()
            .map(|(storage, report)| json!({ "storage": storage, "report": report }))
            .collect();
        ctx.output.data(&reports);
        return Ok(());
    }

    let mut rows = Vec::new();
    for (storage, report) in &reports {
        for built in &report.built {
            rows.push(vec![storage.clone(), "built".to_string(), built.clone()]);
        }
        for failure in &report.failures {
            rows.push(vec![
                storage.clone(),
                "failed".to_string(),
                format!("{}: {}", failure.template, failure.reason),
            ]);
        }
    }
    ctx.output.table(&rows);
    Ok(())
}

pub fn lookup(ctx: &Context, filename: &str) -> Result<()> {
    let pool = ctx.pool()?;
    let item = pool
        .storage_item_from_filename(filename)?
        .with_context(|| format!("No item matches {}", filename))?;

    if ctx.output.is_json() {
        ctx.output.data(&chain_json(&item)?);
    } else {
        println!("{}", item.identifier());
        ctx.output.table(&[vec![
            item.storage().name().to_string(),
            item.rpath().to_string(),
        ]]);
    }
    Ok(())
}

pub fn list(
    ctx: &Context,
    item: &ItemArgs,
    kind: Option<CursorKind>,
    upstream: bool,
) -> Result<()> {
    let pool = ctx.pool()?;
    let identifier = item.identifier();
    let meta_item = pool
        .get_item(&identifier.tags)
        .with_context(|| format!("No storage serves tags {:?}", identifier.tags))?;

    let kind = kind.unwrap_or_else(|| CursorKind::for_type(meta_item.item_type()));
    let cursor = Cursor::with_kind(meta_item, identifier.fields, kind);
    let items = cursor.items(upstream)?;

    if ctx.output.is_json() {
        let members: Vec<_> = items
            .iter()
            .map(|member| {
                json!({
                    "value": member.fields().get(cursor.primary_field()),
                    "rpath": member.rpath(),
                })
            })
            .collect();
        ctx.output.data(&members);
        return Ok(());
    }

    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|member| {
            let value = member
                .fields()
                .get(cursor.primary_field())
                .map(|v| v.to_string())
                .unwrap_or_default();
            vec![value, member.rpath().to_string()]
        })
        .collect();
    ctx.output.table(&rows);
    Ok(())
}
