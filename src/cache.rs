// Per-user commit/LOC cache for the heavy scan.
// One flat text file per user, loaded whole, mutated in memory and written back atomically.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// Number of comment lines preceding the rows.
pub const HEADER_LINES: usize = 5;

/// Last observed numbers for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub repo_hash: String,
    pub total_commits: u64,
    pub my_commits: u64,
    pub additions: u64,
    pub deletions: u64,
}

impl CacheEntry {
    fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.repo_hash, self.total_commits, self.my_commits, self.additions, self.deletions
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let entry = CacheEntry {
            repo_hash: fields.next()?.to_string(),
            total_commits: fields.next()?.parse().ok()?,
            my_commits: fields.next()?.parse().ok()?,
            additions: fields.next()?.parse().ok()?,
            deletions: fields.next()?.parse().ok()?,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(entry)
    }
}

/// SHA-256 hex of a repository's `owner/name`.
pub fn repo_key(name_with_owner: &str) -> String {
    sha256_hex(name_with_owner)
}

/// Cache file location for a user: `<dir>/<sha256(user)>.txt`.
pub fn cache_path(dir: &Path, user: &str) -> PathBuf {
    dir.join(format!("{}.txt", sha256_hex(user)))
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub struct CacheStore {
    path: PathBuf,
    user: String,
    entries: Vec<CacheEntry>,
    index: HashMap<String, usize>,
}

impl CacheStore {
    /// An empty store that will be written to `path`.
    pub fn empty(path: PathBuf, user: &str) -> Self {
        Self {
            path,
            user: user.to_string(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load the cache file. A missing or unreadable file gives an empty store.
    pub fn load(path: PathBuf, user: &str) -> Self {
        let mut store = Self::empty(path, user);

        let contents = match fs::read_to_string(&store.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %store.path.display(), "No cache file yet, starting cold");
                return store;
            }
            Err(e) => {
                warn!(path = %store.path.display(), error = %e, "Failed to read cache, starting cold");
                return store;
            }
        };

        let mut entries = Vec::new();
        for (n, line) in contents.lines().enumerate().skip(HEADER_LINES) {
            if line.trim().is_empty() {
                continue;
            }
            match CacheEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => {
                    warn!(path = %store.path.display(), line = n + 1, "Corrupt cache row, starting cold");
                    return store;
                }
            }
        }

        for entry in entries {
            store.insert(entry);
        }
        debug!(path = %store.path.display(), entries = store.entries.len(), "Loaded cache");
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn lookup(&self, repo_key: &str) -> Option<&CacheEntry> {
        self.index.get(repo_key).map(|&i| &self.entries[i])
    }

    /// Replace the row for `repo_key` in place, or append a new one.
    pub fn upsert(
        &mut self,
        repo_key: &str,
        total_commits: u64,
        my_commits: u64,
        additions: u64,
        deletions: u64,
    ) {
        self.insert(CacheEntry {
            repo_hash: repo_key.to_string(),
            total_commits,
            my_commits,
            additions,
            deletions,
        });
    }

    fn insert(&mut self, entry: CacheEntry) {
        match self.index.get(&entry.repo_hash) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.repo_hash.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Write header and rows via a temp file and rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut text = String::new();
        text.push_str("Cache File for LOC / Commit Stats\n");
        text.push_str("Format: sha256(repo) totalCommits myCommits additions deletions\n");
        text.push_str(&format!("User: {}\n", self.user));
        text.push_str(&format!("Generated: {}\n", Utc::now().to_rfc3339()));
        text.push_str("---\n");
        for entry in &self.entries {
            text.push_str(&entry.to_line());
            text.push('\n');
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = cache_path(temp_dir.path(), "octocat");

        let mut store = CacheStore::empty(path.clone(), "octocat");
        store.upsert(&repo_key("octocat/hello"), 12, 4, 120, 30);
        store.upsert(&repo_key("octocat/world"), 3, 3, 9, 1);
        store.save().unwrap();

        let reloaded = CacheStore::load(path, "octocat");
        assert_eq!(reloaded.entries, store.entries);
        assert_eq!(
            reloaded.lookup(&repo_key("octocat/world")),
            Some(&CacheEntry {
                repo_hash: repo_key("octocat/world"),
                total_commits: 3,
                my_commits: 3,
                additions: 9,
                deletions: 1,
            })
        );
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let path = cache_path(temp_dir.path(), "octocat");
        let key = repo_key("octocat/hello");

        let mut store = CacheStore::empty(path.clone(), "octocat");
        store.upsert(&key, 1, 1, 10, 2);
        store.upsert(&repo_key("octocat/other"), 5, 0, 0, 0);
        store.upsert(&key, 2, 2, 15, 3);
        store.save().unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.entries[0].total_commits, 2);

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().skip(HEADER_LINES).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|row| row.starts_with(&key)).count(), 1);
        assert!(rows[0].ends_with(" 2 2 15 3"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::load(temp_dir.path().join("nope.txt"), "octocat");
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.txt");
        fs::write(
            &path,
            "h1\nh2\nh3\nh4\n---\nabc 1 2 3 4\nnot a valid row\n",
        )
        .unwrap();

        let store = CacheStore::load(path, "octocat");
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_cache_path_is_hash_of_user() {
        let path = cache_path(Path::new("cache"), "octocat");
        let name = path.file_name().unwrap().to_str().unwrap();

        assert_eq!(name.len(), 64 + ".txt".len());
        assert!(name.ends_with(".txt"));
        assert_ne!(path, cache_path(Path::new("cache"), "other"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.txt");

        CacheStore::empty(path.clone(), "octocat").save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
