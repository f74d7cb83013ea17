//! State command - inspect and maintain the package state cache

use super::AppContext;
use crate::cli::args::{OutputFormat, StateAction, StateArgs};
use crate::config::ConfigManager;
use crate::error::KegResult;
use crate::runner::ExecRunner;
use crate::state::{CacheSettings, PackageInfo, PackageState, PackageStateCache};
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Execute the state command
pub async fn execute(args: StateArgs, ctx: &AppContext) -> KegResult<()> {
    let cache = open_cache(ctx);

    match args.action {
        StateAction::Show { names, format } => show(ctx, &cache, names, format).await,
        StateAction::Refresh { force } => refresh(ctx, &cache, force).await,
        StateAction::Outdated { format } => outdated(ctx, &cache, format).await,
        StateAction::Versions { names } => versions(ctx, &cache, names).await,
        StateAction::Invalidate { names } => invalidate(&cache, names).await,
    }
}

pub(super) fn open_cache(ctx: &AppContext) -> PackageStateCache {
    PackageStateCache::open(
        ConfigManager::package_cache_path(&ctx.state_dir),
        Arc::new(ExecRunner::new()),
        CacheSettings::from(&ctx.config.packages),
    )
}

/// Refresh a stale cache before reading it; failures only warn.
async fn ensure_fresh(ctx: &AppContext, cache: &PackageStateCache, ui: &UiContext) {
    if !cache.is_stale().await {
        return;
    }
    let mut spinner = TaskSpinner::new(ui);
    if ui.use_fancy_output() {
        spinner.start("Querying package manager...");
    }
    match cache.refresh(&ctx.cancel, false).await {
        Ok(()) => spinner.clear(),
        Err(e) => {
            warn!("Package state refresh failed: {}", e);
            if ui.use_fancy_output() {
                spinner.stop_warn(&format!("Showing cached state: {}", e));
            }
        }
    }
}

async fn show(
    ctx: &AppContext,
    cache: &PackageStateCache,
    names: Vec<String>,
    format: OutputFormat,
) -> KegResult<()> {
    let ui = UiContext::detect().for_format(format.is_machine());
    ensure_fresh(ctx, cache, &ui).await;

    let rows: BTreeMap<String, Option<PackageState>> = if names.is_empty() {
        let snapshot = cache.snapshot().await;
        snapshot
            .packages
            .iter()
            .filter(|(_, p)| p.installed)
            .map(|(name, p)| (name.clone(), Some(p.clone())))
            .collect()
    } else {
        let mut rows = BTreeMap::new();
        for name in names {
            let state = cache.get_state(&name).await;
            rows.insert(name, state);
        }
        rows
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for (name, state) in &rows {
                if state.as_ref().is_some_and(|s| s.installed) {
                    println!("{}", name);
                }
            }
        }
        OutputFormat::Table => print_states(&ui, &rows),
    }
    Ok(())
}

fn print_states(ui: &UiContext, rows: &BTreeMap<String, Option<PackageState>>) {
    if rows.is_empty() {
        ui::step_info(ui, "No installed packages in cache");
        ui::remark(ui, "Run: keg state refresh");
        return;
    }

    println!(
        "{:<28} {:<12} {:<14} {:<14}",
        style("NAME").bold(),
        style("STATUS").bold(),
        style("INSTALLED").bold(),
        style("LATEST").bold()
    );
    for (name, state) in rows {
        let (status, installed, latest) = match state {
            None => (style("unknown").dim(), "-", "-"),
            Some(s) if s.outdated => (
                style("outdated").yellow(),
                s.installed_version.as_str(),
                s.latest_version.as_str(),
            ),
            Some(s) if s.installed => (
                style("installed").green(),
                s.installed_version.as_str(),
                s.latest_version.as_str(),
            ),
            Some(s) => (style("missing").dim(), "-", s.latest_version.as_str()),
        };
        println!(
            "{:<28} {:<12} {:<14} {:<14}",
            name,
            status,
            or_dash(installed),
            or_dash(latest)
        );
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

async fn refresh(ctx: &AppContext, cache: &PackageStateCache, force: bool) -> KegResult<()> {
    let ui = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ui);
    spinner.start("Querying package manager...");

    if let Err(e) = cache.refresh(&ctx.cancel, force).await {
        spinner.stop_warn("Package state refresh failed");
        return Err(e);
    }

    let installed = cache.installed_set().await.len();
    let outdated = cache.outdated_map().await.len();
    spinner.stop(&format!(
        "{} installed, {} outdated",
        installed, outdated
    ));
    Ok(())
}

async fn outdated(ctx: &AppContext, cache: &PackageStateCache, format: OutputFormat) -> KegResult<()> {
    let ui = UiContext::detect().for_format(format.is_machine());
    ensure_fresh(ctx, cache, &ui).await;

    let outdated: Vec<PackageInfo> = cache.outdated_map().await.into_values().collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outdated)?),
        OutputFormat::Plain => {
            for pkg in &outdated {
                println!("{}", pkg.name);
            }
        }
        OutputFormat::Table => {
            if outdated.is_empty() {
                ui::step_ok(&ui, "Everything is up to date");
                return Ok(());
            }
            for pkg in &outdated {
                println!(
                    "  {:<28} {} -> {}",
                    pkg.name,
                    style(&pkg.installed_version).dim(),
                    style(&pkg.latest_version).green()
                );
            }
            println!();
            println!("{} outdated package(s)", outdated.len());
        }
    }
    Ok(())
}

async fn versions(ctx: &AppContext, cache: &PackageStateCache, names: Vec<String>) -> KegResult<()> {
    let ui = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ui);
    spinner.start(&format!("Fetching versions for {} package(s)...", names.len()));

    if let Err(e) = cache.refresh_versions(&ctx.cancel, &names).await {
        spinner.stop_warn("Version query failed");
        return Err(e);
    }
    spinner.stop("Versions updated");

    let mut rows = BTreeMap::new();
    for name in names {
        let state = cache.get_state(&name).await;
        rows.insert(name, state);
    }
    print_states(&ui, &rows);
    Ok(())
}

async fn invalidate(cache: &PackageStateCache, names: Vec<String>) -> KegResult<()> {
    let ui = UiContext::detect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    cache.invalidate(&refs).await;

    if names.is_empty() {
        ui::step_ok(&ui, "Package state marked stale");
    } else {
        ui::step_ok_detail(&ui, "Dropped cached entries", &names.join(", "));
    }
    Ok(())
}
