//! Run configuration, collected once from the environment at startup.
//!
//! Every knob has a default so a scheduled job only needs to provide the
//! target login (and usually a token). Components receive `&Config` and never
//! read the environment themselves.

use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::warn;

use crate::error::{ProfileError, Result};

pub const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

const DEFAULT_BIRTHDATE: &str = "2005-01-17";

/// Which repositories the heavy scan walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanScope {
    /// Only repositories owned by the user.
    Owned,
    /// Owned plus collaborator and organization-member repositories.
    Contributed,
}

impl ScanScope {
    /// GraphQL `ownerAffiliations` values for this scope.
    pub fn affiliations(self) -> &'static [&'static str] {
        match self {
            ScanScope::Owned => &["OWNER"],
            ScanScope::Contributed => &["OWNER", "COLLABORATOR", "ORGANIZATION_MEMBER"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: Option<String>,
    pub user_name: String,
    pub birthdate: NaiveDate,
    pub do_heavy: bool,
    pub force_cache: bool,
    pub embed_font: bool,
    pub scan_scope: ScanScope,
    pub cache_dir: PathBuf,
    pub svg_files: Vec<PathBuf>,
    pub logo_path: PathBuf,
    pub graphql_url: String,
}

impl Config {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get("ACCESS_TOKEN").or_else(|| get("GITHUB_TOKEN"));

        let repo_owner = get("GITHUB_REPOSITORY")
            .and_then(|r| r.split_once('/').map(|(owner, _)| owner.to_string()))
            .filter(|owner| !owner.is_empty());
        let user_name = get("USER_NAME")
            .or_else(|| get("GITHUB_ACTOR"))
            .or(repo_owner)
            .ok_or_else(|| {
                ProfileError::Config("cannot infer USER_NAME; set the USER_NAME variable".into())
            })?;

        let birthdate = match get("BIRTHDATE") {
            Some(raw) => parse_birthdate(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Invalid BIRTHDATE, expected YYYY-MM-DD; using {DEFAULT_BIRTHDATE}");
                default_birthdate()
            }),
            None => default_birthdate(),
        };

        let scan_scope = match get("SCAN_SCOPE").as_deref().map(str::trim) {
            None | Some("contributed") => ScanScope::Contributed,
            Some("owned") => ScanScope::Owned,
            Some(other) => {
                warn!(value = %other, "Unknown SCAN_SCOPE, using 'contributed'");
                ScanScope::Contributed
            }
        };

        let svg_files = get("SVG_FILES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![PathBuf::from("dark.svg"), PathBuf::from("light.svg")]);

        Ok(Self {
            token,
            user_name,
            birthdate,
            do_heavy: flag(lookup("DO_HEAVY"), true),
            force_cache: flag(lookup("FORCE_CACHE"), false),
            embed_font: flag(lookup("EMBED_FONT"), true),
            scan_scope,
            cache_dir: get("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cache")),
            svg_files,
            logo_path: get("LOGO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logo.png")),
            graphql_url: get("GITHUB_GRAPHQL_URL").unwrap_or_else(|| DEFAULT_GRAPHQL_URL.to_string()),
        })
    }
}

/// `"1"` enables and unset takes the default. Anything else disables,
/// including a variable that is set but empty.
fn flag(value: Option<String>, default: bool) -> bool {
    value.map(|v| v.trim() == "1").unwrap_or(default)
}

fn parse_birthdate(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Accept full ISO timestamps too, only the date part matters.
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn default_birthdate() -> NaiveDate {
    NaiveDate::from_ymd_opt(2005, 1, 17).unwrap_or(NaiveDate::MIN)
}
