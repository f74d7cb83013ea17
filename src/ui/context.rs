//! Interactive vs plain output detection

use std::io::IsTerminal;

const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Decides whether spinners and progress bars are drawn
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// Fancy output only on a terminal, outside CI, and unless `KEG_PLAIN` is set.
    pub fn detect() -> Self {
        let terminal = std::io::stdout().is_terminal() && std::io::stderr().is_terminal();
        let ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        let forced_plain = std::env::var_os("KEG_PLAIN").is_some();
        Self {
            fancy: terminal && !ci && !forced_plain,
        }
    }

    /// Plain line-oriented output (tests, machine-readable formats)
    pub fn plain() -> Self {
        Self { fancy: false }
    }

    /// Drop to plain output when `machine` is set, e.g. for `--format json`.
    pub fn for_format(self, machine: bool) -> Self {
        Self {
            fancy: self.fancy && !machine,
        }
    }

    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}
