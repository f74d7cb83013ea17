//! Config command - show or initialize configuration

use super::AppContext;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::KegResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, ctx: &AppContext) -> KegResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(ctx)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }
    Ok(())
}

fn show_config(ctx: &AppContext) -> KegResult<()> {
    println!("{}", toml::to_string_pretty(&ctx.config)?);
    println!("# state directory: {}", ctx.state_dir.display());
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> KegResult<()> {
    let ui = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ui,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ui, "Configuration initialized", &path.display().to_string());
    Ok(())
}
