//! Profile statistics: the light account-level pass plus the optional heavy
//! scan over every repository's default-branch history.

use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::age::Age;
use crate::cache::{CacheStore, cache_path, repo_key};
use crate::config::{Config, ScanScope};
use crate::error::Result;
use crate::github::{Account, OwnedRepos, RepoActivity};

/// Where the collector gets its numbers from. `GithubClient` is the real one.
pub trait StatsSource {
    async fn account(&self, login: &str) -> Result<Account>;
    async fn owned_repos(&self, login: &str) -> Result<OwnedRepos>;
    async fn contributed_repo_count(&self, login: &str) -> Result<u64>;
    async fn follower_count(&self, login: &str) -> Result<u64>;
    async fn repo_names(&self, login: &str, scope: ScanScope) -> Result<Vec<String>>;
    async fn commit_total(&self, owner: &str, name: &str) -> Result<u64>;
    async fn repo_activity(&self, owner: &str, name: &str, login: &str) -> Result<RepoActivity>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocStats {
    pub additions: u64,
    pub deletions: u64,
}

impl LocStats {
    pub fn net(&self) -> i64 {
        let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
        clamp(self.additions).saturating_sub(clamp(self.deletions))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStats {
    pub age: Age,
    pub repos: u64,
    pub stars: u64,
    pub followers: u64,
    pub commits: u64,
    pub contributed_repos: u64,
    /// `None` when the heavy scan was skipped.
    pub loc: Option<LocStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeavyTotals {
    pub commits: u64,
    pub loc: LocStats,
}

/// Gather everything the cards show. Light-pass failures are returned as-is.
pub async fn collect<S: StatsSource>(
    source: &S,
    config: &Config,
    today: NaiveDate,
) -> Result<ProfileStats> {
    let login = config.user_name.as_str();

    let account = source.account(login).await?;
    debug!(id = %account.id, created_at = %account.created_at, "Resolved account");

    let owned = source.owned_repos(login).await?;
    let contributed_repos = source.contributed_repo_count(login).await?;
    let followers = source.follower_count(login).await?;

    let (commits, loc) = if config.do_heavy {
        info!(scope = ?config.scan_scope, "Running heavy scan (commits & LOC)");
        let path = cache_path(&config.cache_dir, login);
        let mut cache = if config.force_cache {
            CacheStore::empty(path, login)
        } else {
            CacheStore::load(path, login)
        };

        let totals = heavy_scan(source, login, config.scan_scope, &mut cache).await?;

        match cache.save() {
            Ok(()) => debug!(entries = cache.len(), "Cache updated"),
            Err(e) => warn!(path = %cache.path().display(), error = %e, "Failed to write cache"),
        }
        (totals.commits, Some(totals.loc))
    } else {
        (0, None)
    };

    Ok(ProfileStats {
        age: Age::between(config.birthdate, today),
        repos: owned.count,
        stars: owned.stars,
        followers,
        commits,
        contributed_repos,
        loc,
    })
}

/// Sum the user's commits and line changes over every repository in `scope`,
/// each `owner/name` counted once.
pub async fn heavy_scan<S: StatsSource>(
    source: &S,
    login: &str,
    scope: ScanScope,
    cache: &mut CacheStore,
) -> Result<HeavyTotals> {
    let names = source.repo_names(login, scope).await?;

    let mut seen = HashSet::new();
    let mut totals = HeavyTotals::default();

    for full_name in names {
        if !seen.insert(full_name.clone()) {
            continue;
        }
        let Some((owner, name)) = full_name.split_once('/') else {
            warn!(repo = %full_name, "Skipping repository with malformed name");
            continue;
        };

        match scan_repo(source, cache, login, &full_name, owner, name).await {
            Ok(activity) => {
                totals.commits = totals.commits.saturating_add(activity.my_commits);
                totals.loc.additions = totals.loc.additions.saturating_add(activity.additions);
                totals.loc.deletions = totals.loc.deletions.saturating_add(activity.deletions);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(repo = %full_name, error = %e, "Skipping repository"),
        }
    }

    info!(
        repos = seen.len(),
        commits = totals.commits,
        additions = totals.loc.additions,
        deletions = totals.loc.deletions,
        "Heavy scan finished"
    );
    Ok(totals)
}

async fn scan_repo<S: StatsSource>(
    source: &S,
    cache: &mut CacheStore,
    login: &str,
    full_name: &str,
    owner: &str,
    name: &str,
) -> Result<RepoActivity> {
    let key = repo_key(full_name);
    let total = source.commit_total(owner, name).await?;

    if let Some(entry) = cache.lookup(&key).filter(|e| e.total_commits == total) {
        debug!(repo = %full_name, total, "Cache hit");
        return Ok(RepoActivity {
            total_commits: entry.total_commits,
            my_commits: entry.my_commits,
            additions: entry.additions,
            deletions: entry.deletions,
        });
    }

    let activity = if total == 0 {
        RepoActivity::default()
    } else {
        source.repo_activity(owner, name, login).await?
    };
    if activity.total_commits != total {
        debug!(repo = %full_name, before = total, after = activity.total_commits, "History moved during scan");
    }
    debug!(repo = %full_name, total, ?activity, "Cache miss, rescanned");

    cache.upsert(
        &key,
        total,
        activity.my_commits,
        activity.additions,
        activity.deletions,
    );
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfileError;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockSource {
        names: Vec<String>,
        repos: HashMap<String, (u64, RepoActivity)>,
        transient_failures: HashSet<String>,
        fatal_failures: HashSet<String>,
        list_calls: Cell<u32>,
        total_calls: Cell<u32>,
        activity_calls: Cell<u32>,
    }

    impl MockSource {
        fn with_repo(mut self, full_name: &str, total: u64, mine: u64, add: u64, del: u64) -> Self {
            self.names.push(full_name.to_string());
            self.repos.insert(
                full_name.to_string(),
                (
                    total,
                    RepoActivity {
                        total_commits: total,
                        my_commits: mine,
                        additions: add,
                        deletions: del,
                    },
                ),
            );
            self
        }

        fn check(&self, full_name: &str) -> Result<()> {
            if self.fatal_failures.contains(full_name) {
                return Err(ProfileError::Unauthorized);
            }
            if self.transient_failures.contains(full_name) {
                return Err(ProfileError::Http {
                    status: 502,
                    body: "Bad Gateway".into(),
                });
            }
            Ok(())
        }
    }

    impl StatsSource for MockSource {
        async fn account(&self, login: &str) -> Result<Account> {
            Ok(Account {
                id: format!("ID_{login}"),
                created_at: "2020-01-01T00:00:00Z".into(),
            })
        }

        async fn owned_repos(&self, _login: &str) -> Result<OwnedRepos> {
            Ok(OwnedRepos { count: 2, stars: 8 })
        }

        async fn contributed_repo_count(&self, _login: &str) -> Result<u64> {
            Ok(5)
        }

        async fn follower_count(&self, _login: &str) -> Result<u64> {
            Ok(42)
        }

        async fn repo_names(&self, _login: &str, _scope: ScanScope) -> Result<Vec<String>> {
            self.list_calls.set(self.list_calls.get() + 1);
            Ok(self.names.clone())
        }

        async fn commit_total(&self, owner: &str, name: &str) -> Result<u64> {
            self.total_calls.set(self.total_calls.get() + 1);
            let full_name = format!("{owner}/{name}");
            self.check(&full_name)?;
            Ok(self.repos.get(&full_name).map(|(t, _)| *t).unwrap_or(0))
        }

        async fn repo_activity(&self, owner: &str, name: &str, _login: &str) -> Result<RepoActivity> {
            self.activity_calls.set(self.activity_calls.get() + 1);
            let full_name = format!("{owner}/{name}");
            self.check(&full_name)?;
            Ok(self
                .repos
                .get(&full_name)
                .map(|(_, a)| *a)
                .unwrap_or_default())
        }
    }

    fn config(cache_dir: &TempDir, extra: &[(&str, &str)]) -> Config {
        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("USER_NAME".into(), "octocat".into());
        env.insert("BIRTHDATE".into(), "2005-01-17".into());
        env.insert(
            "CACHE_DIR".into(),
            cache_dir.path().to_string_lossy().into_owned(),
        );
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 17).unwrap()
    }

    #[tokio::test]
    async fn test_light_pass_without_heavy_scan() {
        let temp_dir = TempDir::new().unwrap();
        let source = MockSource::default().with_repo("octocat/hello", 3, 3, 30, 3);
        let config = config(&temp_dir, &[("DO_HEAVY", "0")]);

        let stats = collect(&source, &config, today()).await.unwrap();

        assert_eq!(stats.commits, 0);
        assert_eq!(stats.loc, None);
        assert_eq!(stats.repos, 2);
        assert_eq!(stats.stars, 8);
        assert_eq!(stats.followers, 42);
        assert_eq!(stats.contributed_repos, 5);
        assert_eq!(stats.age.years, 19);
        assert_eq!(source.list_calls.get(), 0);
        assert!(!cache_path(temp_dir.path(), "octocat").exists());
    }

    #[tokio::test]
    async fn test_heavy_scan_sums_and_writes_cache() {
        let temp_dir = TempDir::new().unwrap();
        let source = MockSource::default()
            .with_repo("octocat/hello", 3, 2, 30, 3)
            .with_repo("org/shared", 10, 1, 7, 4);
        let config = config(&temp_dir, &[]);

        let stats = collect(&source, &config, today()).await.unwrap();

        assert_eq!(stats.commits, 3);
        assert_eq!(
            stats.loc,
            Some(LocStats {
                additions: 37,
                deletions: 7
            })
        );
        assert_eq!(stats.loc.unwrap().net(), 30);

        let cache = CacheStore::load(cache_path(temp_dir.path(), "octocat"), "octocat");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&repo_key("org/shared")).unwrap().total_commits, 10);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_history_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, &[]);
        let path = cache_path(temp_dir.path(), "octocat");

        let mut cache = CacheStore::empty(path, "octocat");
        cache.upsert(&repo_key("octocat/hello"), 3, 2, 500, 100);
        cache.save().unwrap();

        // Same total as cached; the mock's own numbers must not be used.
        let source = MockSource::default().with_repo("octocat/hello", 3, 9, 9, 9);

        let stats = collect(&source, &config, today()).await.unwrap();

        assert_eq!(source.total_calls.get(), 1);
        assert_eq!(source.activity_calls.get(), 0);
        assert_eq!(stats.commits, 2);
        assert_eq!(
            stats.loc,
            Some(LocStats {
                additions: 500,
                deletions: 100
            })
        );
    }

    #[tokio::test]
    async fn test_changed_total_overwrites_entry() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, &[]);
        let path = cache_path(temp_dir.path(), "octocat");
        let key = repo_key("octocat/hello");

        let mut cache = CacheStore::empty(path.clone(), "octocat");
        cache.upsert(&key, 3, 2, 500, 100);
        cache.save().unwrap();

        let source = MockSource::default().with_repo("octocat/hello", 4, 3, 520, 101);

        let stats = collect(&source, &config, today()).await.unwrap();

        assert_eq!(source.activity_calls.get(), 1);
        assert_eq!(stats.commits, 3);

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text
            .lines()
            .skip(crate::cache::HEADER_LINES)
            .filter(|row| row.starts_with(&key))
            .collect();
        let expected = format!("{key} 4 3 520 101");
        assert_eq!(rows, vec![expected.as_str()]);
    }

    #[tokio::test]
    async fn test_force_cache_ignores_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir, &[("FORCE_CACHE", "1")]);

        let mut cache = CacheStore::empty(cache_path(temp_dir.path(), "octocat"), "octocat");
        cache.upsert(&repo_key("octocat/hello"), 3, 2, 500, 100);
        cache.upsert(&repo_key("octocat/deleted"), 1, 1, 1, 1);
        cache.save().unwrap();

        let source = MockSource::default().with_repo("octocat/hello", 3, 1, 10, 2);

        let stats = collect(&source, &config, today()).await.unwrap();

        assert_eq!(source.activity_calls.get(), 1);
        assert_eq!(stats.commits, 1);
        let reloaded = CacheStore::load(cache_path(temp_dir.path(), "octocat"), "octocat");
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockSource::default()
            .with_repo("octocat/flaky", 5, 5, 50, 5)
            .with_repo("octocat/ok", 2, 1, 10, 0);
        source.transient_failures.insert("octocat/flaky".into());

        let mut cache = CacheStore::empty(temp_dir.path().join("c.txt"), "octocat");
        let totals = heavy_scan(&source, "octocat", ScanScope::Contributed, &mut cache)
            .await
            .unwrap();

        assert_eq!(totals.commits, 1);
        assert_eq!(totals.loc.additions, 10);
        assert!(cache.lookup(&repo_key("octocat/flaky")).is_none());
        assert!(cache.lookup(&repo_key("octocat/ok")).is_some());
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_scan() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockSource::default()
            .with_repo("octocat/first", 1, 1, 1, 1)
            .with_repo("octocat/locked", 1, 1, 1, 1);
        source.fatal_failures.insert("octocat/locked".into());

        let mut cache = CacheStore::empty(temp_dir.path().join("c.txt"), "octocat");
        let err = heavy_scan(&source, "octocat", ScanScope::Contributed, &mut cache)
            .await
            .unwrap_err();

        assert!(matches!(err, ProfileError::Unauthorized));
    }

    #[tokio::test]
    async fn test_totals_saturate_instead_of_overflowing() {
        let temp_dir = TempDir::new().unwrap();
        let source = MockSource::default()
            .with_repo("octocat/huge", 9, 9, u64::MAX, 1)
            .with_repo("octocat/small", 1, 1, 5, 1);

        let mut cache = CacheStore::empty(temp_dir.path().join("c.txt"), "octocat");
        let totals = heavy_scan(&source, "octocat", ScanScope::Contributed, &mut cache)
            .await
            .unwrap();

        assert_eq!(totals.commits, 10);
        assert_eq!(totals.loc.additions, u64::MAX);
        assert_eq!(totals.loc.deletions, 2);
    }

    #[tokio::test]
    async fn test_repository_listed_twice_counts_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockSource::default().with_repo("org/shared", 4, 2, 20, 5);
        source.names.push("org/shared".into());

        let mut cache = CacheStore::empty(temp_dir.path().join("c.txt"), "octocat");
        let totals = heavy_scan(&source, "octocat", ScanScope::Contributed, &mut cache)
            .await
            .unwrap();

        assert_eq!(source.total_calls.get(), 1);
        assert_eq!(totals.commits, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_repository_cached_without_history_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let source = MockSource::default().with_repo("octocat/empty", 0, 0, 0, 0);

        let mut cache = CacheStore::empty(temp_dir.path().join("c.txt"), "octocat");
        heavy_scan(&source, "octocat", ScanScope::Owned, &mut cache)
            .await
            .unwrap();

        assert_eq!(source.activity_calls.get(), 0);
        assert_eq!(
            cache.lookup(&repo_key("octocat/empty")).unwrap().total_commits,
            0
        );
    }
}
