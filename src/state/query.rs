//! Parsing of package manager query output

use crate::error::{KegError, KegResult};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

/// Installed/latest version pair reported for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub installed: String,
    pub latest: String,
}

/// Parse "list installed" output: one name per line.
pub fn parse_installed(output: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct OutdatedReport {
    #[serde(default)]
    formulae: Vec<OutdatedFormula>,
}

#[derive(Debug, Deserialize)]
struct OutdatedFormula {
    name: String,
    #[serde(default)]
    installed_versions: Vec<String>,
    #[serde(default)]
    current_version: String,
}

/// Parse "list outdated" JSON, skipping any noise before the first `{`.
///
/// Formulae without an installed version are dropped.
pub fn parse_outdated(output: &[u8], command: &str) -> KegResult<HashMap<String, VersionInfo>> {
    let start = output
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| KegError::QueryParse {
            command: command.to_string(),
            reason: "no JSON object in output".to_string(),
        })?;

    let report: OutdatedReport =
        serde_json::from_slice(&output[start..]).map_err(|e| KegError::QueryParse {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    Ok(report
        .formulae
        .into_iter()
        .filter_map(|f| {
            let installed = f.installed_versions.into_iter().next()?;
            Some((
                f.name,
                VersionInfo {
                    installed,
                    latest: f.current_version,
                },
            ))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct InfoReport {
    #[serde(default)]
    formulae: Vec<InfoFormula>,
}

#[derive(Debug, Deserialize)]
struct InfoFormula {
    name: String,
    #[serde(default)]
    versions: InfoVersions,
    #[serde(default)]
    installed: Vec<InfoInstalled>,
}

#[derive(Debug, Default, Deserialize)]
struct InfoVersions {
    #[serde(default)]
    stable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoInstalled {
    version: String,
}

/// Parse per-package "info" JSON. An empty installed version means not installed.
pub fn parse_info(output: &[u8], command: &str) -> KegResult<HashMap<String, VersionInfo>> {
    let start = output.iter().position(|b| *b == b'{').unwrap_or(0);
    let report: InfoReport =
        serde_json::from_slice(&output[start..]).map_err(|e| KegError::QueryParse {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    Ok(report
        .formulae
        .into_iter()
        .map(|f| {
            let installed = f
                .installed
                .into_iter()
                .next()
                .map(|i| i.version)
                .unwrap_or_default();
            (
                f.name,
                VersionInfo {
                    installed,
                    latest: f.versions.stable.unwrap_or_default(),
                },
            )
        })
        .collect())
}

/// Order-preserving dedupe followed by fixed-size chunking.
pub fn dedupe_chunks(names: &[String], size: usize) -> Vec<Vec<String>> {
    let mut seen = BTreeSet::new();
    let unique: Vec<String> = names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect();
    unique.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}
