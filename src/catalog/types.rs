//! Catalog schema: upstream records in, reduced items out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema version of the reduced catalog payload
pub const SCHEMA_VERSION: u32 = 1;

/// Reduced, write-once projection of one upstream package record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tap: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,

    /// YYYY-MM-DD
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deprecation_date: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deprecation_reason: String,

    /// Replacement formula, else replacement cask
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replacement: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disable_date: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disable_reason: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub keg_only: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub has_bottle: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oldnames: Vec<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub dep_count: usize,

    #[serde(default, skip_serializing_if = "is_false")]
    pub outdated: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Outcome of a catalog build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub generated_at: DateTime<Utc>,
    pub count: usize,
    /// Lowercase hex SHA-256 of the compressed payload
    pub sha256: String,
    pub size_bytes: u64,
}

impl BuildOutput {
    /// Local content identity used as the stored catalog's ETag
    pub fn etag(&self) -> String {
        format!("sha256:{}", self.sha256)
    }
}

/// Upstream formula record; only the fields the catalog keeps.
///
/// Every field is optional upstream, and `null` is treated as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpstreamFormula {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub full_name: String,
    #[serde(deserialize_with = "nullable")]
    pub tap: String,
    #[serde(deserialize_with = "nullable")]
    pub desc: String,
    #[serde(deserialize_with = "nullable")]
    pub homepage: String,
    #[serde(deserialize_with = "nullable")]
    pub license: String,
    #[serde(deserialize_with = "nullable")]
    pub aliases: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub oldnames: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub versions: UpstreamVersions,

    #[serde(deserialize_with = "nullable")]
    pub deprecated: bool,
    #[serde(deserialize_with = "nullable")]
    pub deprecation_date: String,
    #[serde(deserialize_with = "nullable")]
    pub deprecation_reason: String,
    #[serde(deserialize_with = "nullable")]
    pub deprecation_replacement_formula: String,
    #[serde(deserialize_with = "nullable")]
    pub deprecation_replacement_cask: String,

    #[serde(deserialize_with = "nullable")]
    pub disabled: bool,
    #[serde(deserialize_with = "nullable")]
    pub disable_date: String,
    #[serde(deserialize_with = "nullable")]
    pub disable_reason: String,

    #[serde(deserialize_with = "nullable")]
    pub keg_only: bool,
    #[serde(deserialize_with = "nullable")]
    pub bottle: UpstreamBottle,
    #[serde(deserialize_with = "nullable")]
    pub dependencies: Vec<String>,

    #[serde(deserialize_with = "nullable")]
    pub outdated: bool,
    #[serde(deserialize_with = "nullable")]
    pub pinned: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpstreamVersions {
    #[serde(deserialize_with = "nullable")]
    pub stable: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpstreamBottle {
    #[serde(deserialize_with = "nullable")]
    pub stable: UpstreamBottleSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpstreamBottleSpec {
    #[serde(deserialize_with = "nullable")]
    pub files: HashMap<String, serde::de::IgnoredAny>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<UpstreamFormula> for CatalogItem {
    fn from(f: UpstreamFormula) -> Self {
        let replacement = if f.deprecation_replacement_formula.is_empty() {
            f.deprecation_replacement_cask
        } else {
            f.deprecation_replacement_formula
        };

        Self {
            name: f.name,
            full_name: f.full_name,
            tap: f.tap,
            version: f.versions.stable,
            desc: f.desc,
            homepage: f.homepage,
            license: f.license,
            deprecated: f.deprecated,
            deprecation_date: f.deprecation_date,
            deprecation_reason: f.deprecation_reason,
            replacement,
            disabled: f.disabled,
            disable_date: f.disable_date,
            disable_reason: f.disable_reason,
            keg_only: f.keg_only,
            has_bottle: !f.bottle.stable.files.is_empty(),
            aliases: f.aliases,
            oldnames: f.oldnames,
            dep_count: f.dependencies.len(),
            outdated: f.outdated,
            pinned: f.pinned,
        }
    }
}
