//! Commands that talk to the coordinator.

use super::{plural, short};
use crate::context::{machine_name, Context};
use anyhow::{Context as _, Result};
use sentra_core::push::{client_id_for, BlobStore};
use sentra_core::sync::export::write_plaintext;
use sentra_core::sync::{export_target, sync_target};
use sentra_core::PushBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const EXPORT_DIR: &str = "sentra-export";

pub async fn register_machine(ctx: &Context) -> Result<()> {
    let remote = ctx.remote()?;
    let identity = ctx.identity()?;
    let name = machine_name();
    remote.client.register_machine(&identity, &name).await?;
    println!("✔ registered {} ({})", name, remote.config.machine_id);
    Ok(())
}

pub async fn push(ctx: &Context) -> Result<()> {
    let pending = ctx.store.commits().pending()?;
    if pending.is_empty() {
        println!("✔ nothing to push");
        return Ok(());
    }

    let remote = ctx.remote()?;
    let identity = ctx.identity()?;
    let name = machine_name();
    remote
        .client
        .register_machine(&identity, &name)
        .await
        .context("machine registration failed")?;

    let vault_key = ctx.vault_key(&remote).await?;
    let scan_root = ctx.store.scan_root()?;
    let blob_store = ctx.push_blob_store(remote.config.storage_mode)?;

    let mut builder = PushBuilder::new(
        &scan_root,
        &remote.user_id,
        &remote.config.machine_id,
        &name,
        &vault_key,
    );
    if let Some(store) = &blob_store {
        builder = builder.with_blob_store(store as &dyn BlobStore);
    }

    let mut pushed = 0;
    for mut commit in pending {
        let requests = builder.build(&commit).await?;
        for prepared in &requests {
            let resp = remote.client.push(&identity, prepared).await?;
            let note = if resp.deduplicated { ", already on server" } else { "" };
            println!(
                "  {} → {} ({}{})",
                resp.project_root,
                short(&resp.commit_id),
                plural(resp.files, "file"),
                note
            );
        }
        ctx.store.commits().mark_pushed(&mut commit)?;
        println!("✔ pushed {} {}", commit.short_id(), commit.message);
        pushed += 1;
    }

    ctx.store.record_push()?;
    info!("pushed {} commits", pushed);
    Ok(())
}

/// Whether the project folder for `root` exists under the scan root.
pub fn project_exists(scan_root: &Path, root: &str) -> bool {
    let root = root.trim();
    root.is_empty() || root == "." || scan_root.join(root).is_dir()
}

pub async fn sync(ctx: &Context) -> Result<()> {
    let remote = ctx.remote()?;
    let scan_root = ctx.store.scan_root()?;
    let mut projects = remote.client.projects().await?;
    if projects.is_empty() {
        println!("No projects on the server");
        return Ok(());
    }
    projects.sort_by(|a, b| a.root_path.cmp(&b.root_path));

    let keys = ctx.keys(&remote).await?;
    let decryptor = keys.decryptor();

    let mut written = 0;
    let mut skipped = Vec::new();
    for project in &projects {
        let root = project.root_path.trim();
        if !project_exists(&scan_root, root) {
            debug!("skipping {}: not present under {}", root, scan_root.display());
            skipped.push(root.to_string());
            continue;
        }

        let files = remote.client.export(root, None).await?;
        for file in &files {
            let target = sync_target(&scan_root, root, &file.file_path)?;
            let data = decryptor.decrypt(file).await?;
            write_plaintext(&target, &data)?;
            written += 1;
        }
        println!("✔ {} ({})", root, plural(files.len(), "file"));
    }

    println!(
        "Synced {} into {}",
        plural(written, "file"),
        scan_root.display()
    );
    if !skipped.is_empty() {
        warn!("{} not present locally", plural(skipped.len(), "project"));
        println!(
            "Skipped {} not found under the scan root: {}",
            plural(skipped.len(), "project"),
            skipped.join(", ")
        );
    }
    Ok(())
}

/// A local commit selector becomes that commit's client id; anything else
/// is passed through as a server commit id.
fn resolve_at(ctx: &Context, at: Option<&str>) -> Option<String> {
    let at = at.map(str::trim).filter(|a| !a.is_empty())?;
    match ctx.store.commits().resolve(at) {
        Ok(commit) => Some(client_id_for(&commit.id)),
        Err(_) => Some(at.to_string()),
    }
}

pub async fn export(ctx: &Context, project: &str, at: Option<&str>) -> Result<()> {
    let remote = ctx.remote()?;
    let root = project.trim();
    let at = resolve_at(ctx, at);

    let files = remote.client.export(root, at.as_deref()).await?;
    if files.is_empty() {
        println!("No files for {}", root);
        return Ok(());
    }

    let keys = ctx.keys(&remote).await?;
    let decryptor = keys.decryptor();
    let export_dir = PathBuf::from(EXPORT_DIR);
    for file in &files {
        let target = export_target(&export_dir, root, &file.file_path)?;
        let data = decryptor.decrypt(file).await?;
        write_plaintext(&target, &data)?;
        println!("  {}", target.display());
    }
    println!(
        "✔ exported {} to {}",
        plural(files.len(), "file"),
        export_dir.join(root).display()
    );
    Ok(())
}

pub async fn history(ctx: &Context, project: &str) -> Result<()> {
    let remote = ctx.remote()?;
    let commits = remote.client.commits(project.trim()).await?;
    if commits.is_empty() {
        println!("No commits for {}", project.trim());
        return Ok(());
    }
    for c in &commits {
        println!(
            "{}  {}  {}  ({}, from {})",
            short(&c.commit_id),
            c.created_at,
            c.message,
            plural(c.file_count, "file"),
            c.machine_name
        );
    }
    Ok(())
}

pub async fn projects(ctx: &Context) -> Result<()> {
    let remote = ctx.remote()?;
    let projects = remote.client.projects().await?;
    if projects.is_empty() {
        println!("No projects on the server");
        return Ok(());
    }
    for p in &projects {
        let last = match (&p.last_commit_id, &p.last_commit_message) {
            (Some(id), Some(msg)) => format!("{} {}", short(id), msg),
            (Some(id), None) => short(id).to_string(),
            _ => "-".to_string(),
        };
        println!("{}  ({})  {}", p.root_path, plural(p.file_count, "file"), last);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("api")).unwrap();
        assert!(project_exists(dir.path(), "api"));
        assert!(project_exists(dir.path(), "."));
        assert!(!project_exists(dir.path(), "web"));
    }
}
