//! Commands that only touch `~/.sentra` and the scan root.

use super::plural;
use crate::context::Context;
use crate::LogCommand;
use anyhow::{bail, Result};
use sentra_core::store::{scan_env_files, Commit, LogFilter};

pub fn add(ctx: &Context, paths: &[String]) -> Result<()> {
    if paths.iter().any(|p| p.trim() == ".") {
        let staged = ctx.store.stage_all()?;
        for path in &staged {
            tracing::debug!("staged {}", path);
        }
        println!("✔ staged {}", plural(staged.len(), "env file"));
        return Ok(());
    }

    for path in paths {
        let (rel, _) = ctx.store.stage(path)?;
        println!("✔ staged {}", rel);
    }
    Ok(())
}

pub fn rm(ctx: &Context, cached: bool, path: &str) -> Result<()> {
    if !cached {
        bail!("only `sentra rm --cached <path>` is supported; files on disk are never deleted");
    }
    if ctx.store.unstage(path)? {
        println!("✔ unstaged {}", path.trim());
    } else {
        println!("{} was not staged", path.trim());
    }
    Ok(())
}

pub fn scan(ctx: &Context) -> Result<()> {
    let scan_root = ctx.store.scan_root()?;
    let found = scan_env_files(&scan_root)?;
    println!("Scan root: {}", scan_root.display());
    println!("✔ {} detected", plural(found.len(), "env file"));
    for path in found.keys() {
        println!("  {}", path);
    }
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    let index = ctx.store.load_index()?;
    let (_, diff) = ctx.store.status()?;
    let pending = ctx.store.commits().pending()?;

    println!("Scan root: {}", index.scan_root);
    if index.staged.is_empty() {
        println!("Nothing staged");
    } else {
        println!("Staged ({}):", index.staged.len());
        for path in index.staged.keys() {
            println!("  {}", path);
        }
    }

    if diff.total() == 0 {
        println!("No changes since the last commit");
    } else {
        println!(
            "Changes since the last commit: {} changed, {} added, {} removed",
            diff.changed, diff.added, diff.removed
        );
    }

    if !pending.is_empty() {
        println!("{} (run: sentra push)", plural(pending.len(), "pending commit"));
    }
    Ok(())
}

pub fn commit(ctx: &Context, message: &str) -> Result<()> {
    let commit = ctx.store.commit(message)?;
    println!(
        "✔ {} {} ({})",
        commit.short_id(),
        commit.message,
        plural(commit.files.len(), "file")
    );
    Ok(())
}

fn print_commit(commit: &Commit) {
    let marker = if commit.is_pushed() { "pushed" } else { "pending" };
    println!(
        "{}  {}  {}  ({}, {})",
        commit.short_id(),
        commit.created_at,
        commit.message,
        plural(commit.files.len(), "file"),
        marker
    );
}

pub fn log(ctx: &Context, action: Option<LogCommand>) -> Result<()> {
    let commits = ctx.store.commits();
    let filter = match action.unwrap_or(LogCommand::Pending) {
        LogCommand::All => LogFilter::All,
        LogCommand::Pending => LogFilter::Pending,
        LogCommand::Pushed => LogFilter::Pushed,
        LogCommand::Rm { selector } => {
            let commit = commits.resolve(&selector)?;
            commits.delete(&commit.id)?;
            println!("✔ deleted {} {}", commit.short_id(), commit.message);
            return Ok(());
        }
        LogCommand::Clear => {
            let n = commits.clear()?;
            println!("✔ deleted {}", plural(n, "commit"));
            return Ok(());
        }
        LogCommand::Prune { selector } => {
            let report = commits.prune(&selector, &ctx.store.scan_root()?)?;
            println!(
                "✔ pruned {} from {}, deleted {}",
                plural(report.files_pruned, "missing file"),
                plural(report.commits_pruned, "commit"),
                plural(report.commits_deleted, "empty commit")
            );
            return Ok(());
        }
        LogCommand::Verify => {
            let broken = commits.verify(&ctx.store.scan_root()?)?;
            if broken.is_empty() {
                println!("✔ every pending commit is pushable");
                return Ok(());
            }
            for (commit, missing) in &broken {
                println!("{}  {}", commit.short_id(), commit.message);
                for path in missing {
                    println!("  missing: {}", path);
                }
            }
            bail!(
                "{} reference missing files (fix: sentra log prune <id>)",
                plural(broken.len(), "commit")
            );
        }
    };

    let list = commits.list_filtered(filter)?;
    if list.is_empty() {
        println!("No commits");
    }
    for commit in &list {
        print_commit(commit);
    }
    Ok(())
}
