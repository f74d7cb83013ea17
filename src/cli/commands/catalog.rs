//! Catalog command - refresh, inspect and search the local formula catalog

use super::state::open_cache;
use super::{format_bytes, run_blocking, AppContext};
use crate::catalog::{
    CatalogIndex, CatalogItem, CatalogMeta, CatalogStore, FetchResponse, Fetcher, HttpFetcher,
    RefreshOutcome, RefreshScheduler, SchedulerSettings, SearchOptions,
};
use crate::cli::args::{CatalogAction, CatalogArgs, OutputFormat, SearchArgs};
use crate::config::ConfigManager;
use crate::error::KegResult;
use crate::ui::{self, DownloadProgress, UiContext};
use chrono::{DateTime, Local, Utc};
use console::style;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Execute the catalog command
pub async fn execute(args: CatalogArgs, ctx: &AppContext) -> KegResult<()> {
    match args.action {
        CatalogAction::Refresh { force } => refresh(ctx, force).await,
        CatalogAction::Info { format } => info(ctx, format).await,
        CatalogAction::Search(search_args) => search(ctx, search_args).await,
    }
}

/// Shows download progress on top of the plain HTTP fetcher
struct ProgressFetcher {
    inner: HttpFetcher,
    progress: DownloadProgress,
}

impl Fetcher for ProgressFetcher {
    fn fetch(
        &self,
        url: &str,
        if_none_match: Option<&str>,
        max_bytes: u64,
    ) -> KegResult<FetchResponse> {
        let mut response = self.inner.fetch(url, if_none_match, max_bytes)?;
        if let Some(body) = response.body.take() {
            response.body = Some(self.progress.wrap(body, response.content_length));
        }
        Ok(response)
    }
}

/// Run a scheduler refresh on the blocking pool.
async fn run_refresh(
    ctx: &AppContext,
    ui: &UiContext,
    force: bool,
) -> KegResult<RefreshOutcome> {
    let dir = ConfigManager::catalog_dir(&ctx.state_dir);
    let settings = SchedulerSettings::from(&ctx.config.catalog);
    let progress = DownloadProgress::new(ui);
    let fetcher = ProgressFetcher {
        inner: HttpFetcher::new(&ctx.config.catalog),
        progress: progress.clone(),
    };
    let cancel = ctx.cancel.clone();

    let result = run_blocking(move || {
        let store = Arc::new(CatalogStore::open(dir));
        RefreshScheduler::new(store, Arc::new(fetcher), settings).refresh(&cancel, force)
    })
    .await;
    progress.finish();
    result
}

async fn refresh(ctx: &AppContext, force: bool) -> KegResult<()> {
    let ui = UiContext::detect();
    ui::intro(&ui, "Catalog refresh");

    match run_refresh(ctx, &ui, force).await? {
        RefreshOutcome::Fresh => {
            ui::step_info(&ui, "Catalog is up to date");
            ui::remark(&ui, "Use --force to check upstream anyway");
        }
        RefreshOutcome::NotModified => ui::step_ok(&ui, "Catalog unchanged upstream"),
        RefreshOutcome::Updated {
            count, size_bytes, ..
        } => ui::step_ok_detail(
            &ui,
            &format!("Stored {} formulae", count),
            &format_bytes(size_bytes),
        ),
        RefreshOutcome::Recovered {
            count, size_bytes, ..
        } => {
            ui::step_warn(&ui, "Catalog metadata was dangling; refetched from scratch");
            ui::step_ok_detail(
                &ui,
                &format!("Stored {} formulae", count),
                &format_bytes(size_bytes),
            );
        }
    }

    ui::outro_success(&ui, "Done");
    Ok(())
}

#[derive(Debug, Serialize)]
struct CatalogInfo {
    path: PathBuf,
    present: bool,
    in_memory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<CatalogMeta>,
}

async fn info(ctx: &AppContext, format: OutputFormat) -> KegResult<()> {
    let dir = ConfigManager::catalog_dir(&ctx.state_dir);
    let info = run_blocking(move || {
        let store = CatalogStore::open(dir);
        Ok(CatalogInfo {
            path: store.index_path().to_path_buf(),
            present: store.has_index(),
            in_memory: store.get_hot().is_some(),
            meta: store.read_meta()?,
        })
    })
    .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Plain => {
            if let Some(meta) = info.meta.as_ref().filter(|_| info.present) {
                println!("{}", meta.etag);
            }
        }
        OutputFormat::Table => print_info(&info),
    }
    Ok(())
}

fn print_info(info: &CatalogInfo) {
    let ui = UiContext::detect();
    ui::intro(&ui, "Catalog");

    if !info.present {
        ui::step_warn_hint(&ui, "No local catalog", "Run: keg catalog refresh");
        if let Some(checked) = info.meta.as_ref().and_then(|m| m.last_checked) {
            ui::key_value(&ui, "last checked", &local_time(checked));
        }
        return;
    }

    let meta = info.meta.clone().unwrap_or_default();
    ui::key_value(&ui, "path", &info.path.display().to_string());
    ui::key_value(&ui, "formulae", &meta.count.to_string());
    ui::key_value(&ui, "size", &format_bytes(meta.size_bytes));
    ui::key_value(&ui, "etag", &meta.etag);
    if !meta.upstream_etag.is_empty() {
        ui::key_value(&ui, "upstream etag", &meta.upstream_etag);
    }
    ui::key_value(&ui, "generated", &opt_time(meta.generated_at));
    ui::key_value(&ui, "last success", &opt_time(meta.last_success));
    ui::key_value(&ui, "last checked", &opt_time(meta.last_checked));
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn opt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(local_time).unwrap_or_else(|| "never".to_string())
}

async fn search(ctx: &AppContext, args: SearchArgs) -> KegResult<()> {
    let machine = args.fzf || args.format.is_machine();
    let ui = UiContext::detect().for_format(machine);

    // A failed refresh is not fatal: search whatever is stored.
    if let Err(e) = run_refresh(ctx, &UiContext::plain(), args.refresh).await {
        warn!("Catalog refresh failed: {}", e);
        if !machine {
            ui::step_warn(&ui, &format!("Catalog refresh failed, using cached copy: {}", e));
        }
    }

    let dir = ConfigManager::catalog_dir(&ctx.state_dir);
    let cancel = ctx.cancel.clone();
    let index =
        run_blocking(move || CatalogIndex::load(&CatalogStore::open(dir), &cancel)).await?;

    let options = SearchOptions {
        exact: args.exact,
        regex: args.regex,
        include_desc: !args.no_desc,
        limit: args.limit,
    };
    let query = args.query.unwrap_or_default();
    let hits = index.search(&query, options)?;

    if args.fzf {
        for item in &hits {
            println!("{}", fzf_line(item));
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&hits)?),
        OutputFormat::Plain => {
            for item in &hits {
                println!("{}", item.name);
            }
        }
        OutputFormat::Table => {
            // Cached state only; searching never queries the package manager
            let installed = open_cache(ctx).installed_set().await;
            print_hits(&ui, &hits, !args.no_desc, &installed);
        }
    }
    Ok(())
}

fn fzf_line(item: &CatalogItem) -> String {
    format!("{}\t{}\t{}", item.name, item.aliases.join(","), item.desc)
}

fn print_hits(ui: &UiContext, hits: &[&CatalogItem], with_desc: bool, installed: &BTreeSet<String>) {
    if hits.is_empty() {
        ui::step_info(ui, "No matching formulae");
        return;
    }

    println!(
        "{:<28} {:<14} {:<12} {}",
        style("NAME").bold(),
        style("VERSION").bold(),
        style("STATUS").bold(),
        if with_desc {
            style("DESCRIPTION").bold().to_string()
        } else {
            String::new()
        }
    );
    for item in hits {
        let name = if item.disabled {
            style(item.name.as_str()).red().to_string()
        } else if item.deprecated {
            style(item.name.as_str()).yellow().to_string()
        } else {
            item.name.clone()
        };
        let status = if installed.contains(&item.name) {
            style("installed").green()
        } else {
            style("-").dim()
        };
        let desc = if with_desc { item.desc.as_str() } else { "" };
        println!(
            "{:<28} {:<14} {:<12} {}",
            name,
            item.version,
            status,
            style(desc).dim()
        );
    }
    println!();
    println!("{} result(s)", hits.len());
}
