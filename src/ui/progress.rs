//! Spinners and download progress with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::time::Duration;

/// A task spinner; prints a single line per state change in plain mode
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    fancy: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            fancy: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.fancy {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_warn(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[WARN]").yellow(), message),
        }
    }

    /// Remove the spinner without a message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Byte progress for a catalog download.
///
/// Draws an indicatif bar on a terminal; in plain mode the body passes
/// through untouched.
#[derive(Clone)]
pub struct DownloadProgress {
    bar: Option<ProgressBar>,
}

impl DownloadProgress {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            bar: ctx.use_fancy_output().then(|| ProgressBar::new(0)),
        }
    }

    /// Wrap a response body, sizing the bar from the declared length when known.
    pub fn wrap(&self, body: Box<dyn Read + Send>, len: Option<u64>) -> Box<dyn Read + Send> {
        let Some(bar) = &self.bar else {
            return body;
        };

        match len {
            Some(len) => {
                bar.set_length(len);
                bar.set_style(bar_style(
                    "  {spinner:.cyan} Downloading catalog {bar:24.cyan/dim} {bytes}/{total_bytes} {elapsed:.dim}",
                ));
            }
            None => bar.set_style(bar_style(
                "  {spinner:.cyan} Downloading catalog {bytes} {elapsed:.dim}",
            )),
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Box::new(bar.clone().wrap_read(body))
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
        .progress_chars("━╸─")
}
