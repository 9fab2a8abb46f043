use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::{Config, ScanScope};
use crate::error::{ProfileError, Result};
use crate::stats::StatsSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);
const PAGE_SIZE: u32 = 100;
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountObj {
    total_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<Value>,
    errors: Option<Vec<GraphQlMessage>>,
}

#[derive(Deserialize)]
struct GraphQlMessage {
    #[serde(default)]
    message: String,
}

/// Buckets used to report how many GraphQL requests a run issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    UserGetter,
    Followers,
    ReposStars,
    LocListRepos,
    LocRepoScan,
}

impl QueryKind {
    const ALL: [QueryKind; 5] = [
        QueryKind::UserGetter,
        QueryKind::Followers,
        QueryKind::ReposStars,
        QueryKind::LocListRepos,
        QueryKind::LocRepoScan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::UserGetter => "user_getter",
            QueryKind::Followers => "followers",
            QueryKind::ReposStars => "repos_stars",
            QueryKind::LocListRepos => "loc_list_repos",
            QueryKind::LocRepoScan => "loc_repo_scan",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct QueryCounts([AtomicU64; 5]);

impl QueryCounts {
    fn record(&self, kind: QueryKind) {
        self.0[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, kind: QueryKind) -> u64 {
        self.0[kind.index()].load(Ordering::Relaxed)
    }
}

impl fmt::Display for QueryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kind) in QueryKind::ALL.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", kind.as_str(), self.get(*kind))?;
        }
        Ok(())
    }
}

/// Account identity returned by the user lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub created_at: String,
}

/// Owned repository count and the stars summed across all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnedRepos {
    pub count: u64,
    pub stars: u64,
}

/// One repository's default-branch history as seen by the heavy scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoActivity {
    pub total_commits: u64,
    pub my_commits: u64,
    pub additions: u64,
    pub deletions: u64,
}

pub struct GithubClient {
    http: Client,
    endpoint: String,
    counts: QueryCounts,
}

impl GithubClient {
    /// Create a GraphQL client for the configured endpoint and optional token.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|_| ProfileError::Config("access token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("profile-card"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: config.graphql_url.clone(),
            counts: QueryCounts::default(),
        })
    }

    pub fn query_counts(&self) -> &QueryCounts {
        &self.counts
    }

    /// Single GraphQL round trip. Any `errors` entry fails the call.
    async fn graphql<T: DeserializeOwned>(
        &self,
        kind: QueryKind,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let envelope = self.send(kind, query, variables).await?;
        if let Some(messages) = error_messages(&envelope) {
            return Err(classify_errors(kind, messages));
        }
        decode(kind, envelope.data)
    }

    /// Like [`Self::graphql`], but keeps the data GitHub did return when the
    /// errors only cover some nodes (SAML-protected or deleted repositories).
    /// Rate-limit errors and responses without data still fail.
    async fn graphql_partial<T: DeserializeOwned>(
        &self,
        kind: QueryKind,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let envelope = self.send(kind, query, variables).await?;
        if let Some(messages) = error_messages(&envelope) {
            if envelope.data.is_none() || mentions_rate_limit(&messages) {
                return Err(classify_errors(kind, messages));
            }
            warn!(query = kind.as_str(), %messages, "Partial GraphQL response; keeping returned nodes");
        }
        decode(kind, envelope.data)
    }

    /// Posts the query and maps HTTP-level failures. Auth and rate-limit
    /// statuses come back as fatal errors.
    async fn send(&self, kind: QueryKind, query: &str, variables: Value) -> Result<Envelope> {
        self.counts.record(kind);

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        match status {
            StatusCode::UNAUTHORIZED => return Err(ProfileError::Unauthorized),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                return Err(if status == StatusCode::TOO_MANY_REQUESTS
                    || mentions_rate_limit(&body)
                {
                    ProfileError::RateLimited(truncate_body(&body))
                } else {
                    ProfileError::Unauthorized
                });
            }
            s if !s.is_success() => {
                return Err(ProfileError::Http {
                    status: s.as_u16(),
                    body: truncate_body(&body),
                });
            }
            _ => {}
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl StatsSource for GithubClient {
    async fn account(&self, login: &str) -> Result<Account> {
        const QUERY: &str = r#"
            query($login: String!) {
                user(login: $login) {
                    id
                    createdAt
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct User {
            id: String,
            created_at: String,
        }

        let data: Data = self
            .graphql(QueryKind::UserGetter, QUERY, json!({ "login": login }))
            .await?;
        let user = data
            .user
            .ok_or_else(|| ProfileError::UserNotFound(login.to_string()))?;

        Ok(Account {
            id: user.id,
            created_at: user.created_at,
        })
    }

    async fn owned_repos(&self, login: &str) -> Result<OwnedRepos> {
        const QUERY: &str = r#"
            query($login: String!, $first: Int!, $cursor: String) {
                user(login: $login) {
                    repositories(first: $first, after: $cursor, ownerAffiliations: OWNER) {
                        totalCount
                        nodes {
                            stargazers {
                                totalCount
                            }
                        }
                        pageInfo {
                            hasNextPage
                            endCursor
                        }
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Deserialize)]
        struct User {
            repositories: Repos,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repos {
            total_count: u64,
            nodes: Option<Vec<Option<StarNode>>>,
            page_info: PageInfo,
        }
        #[derive(Deserialize)]
        struct StarNode {
            stargazers: CountObj,
        }

        let mut owned = OwnedRepos::default();
        let mut cursor: Option<String> = None;

        loop {
            let data: Data = self
                .graphql(
                    QueryKind::ReposStars,
                    QUERY,
                    json!({ "login": login, "first": PAGE_SIZE, "cursor": cursor }),
                )
                .await?;
            let repos = data
                .user
                .ok_or_else(|| ProfileError::UserNotFound(login.to_string()))?
                .repositories;

            owned.count = repos.total_count;
            let page_stars = repos
                .nodes
                .unwrap_or_default()
                .iter()
                .flatten()
                .map(|n| n.stargazers.total_count)
                .fold(0u64, u64::saturating_add);
            owned.stars = owned.stars.saturating_add(page_stars);

            match next_cursor(repos.page_info) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(owned)
    }

    async fn contributed_repo_count(&self, login: &str) -> Result<u64> {
        const QUERY: &str = r#"
            query($login: String!) {
                user(login: $login) {
                    repositories(first: 1, ownerAffiliations: [OWNER, COLLABORATOR, ORGANIZATION_MEMBER]) {
                        totalCount
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Deserialize)]
        struct User {
            repositories: CountObj,
        }

        let data: Data = self
            .graphql(QueryKind::ReposStars, QUERY, json!({ "login": login }))
            .await?;

        Ok(data.user.map(|u| u.repositories.total_count).unwrap_or(0))
    }

    async fn follower_count(&self, login: &str) -> Result<u64> {
        const QUERY: &str = r#"
            query($login: String!) {
                user(login: $login) {
                    followers {
                        totalCount
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Deserialize)]
        struct User {
            followers: CountObj,
        }

        let data: Data = self
            .graphql(QueryKind::Followers, QUERY, json!({ "login": login }))
            .await?;

        Ok(data.user.map(|u| u.followers.total_count).unwrap_or(0))
    }

    async fn repo_names(&self, login: &str, scope: ScanScope) -> Result<Vec<String>> {
        const QUERY: &str = r#"
            query($login: String!, $affiliations: [RepositoryAffiliation], $first: Int!, $cursor: String) {
                user(login: $login) {
                    repositories(first: $first, after: $cursor, ownerAffiliations: $affiliations) {
                        nodes {
                            nameWithOwner
                        }
                        pageInfo {
                            hasNextPage
                            endCursor
                        }
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Deserialize)]
        struct User {
            repositories: Repos,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repos {
            nodes: Option<Vec<Option<NameNode>>>,
            page_info: PageInfo,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct NameNode {
            name_with_owner: String,
        }

        let mut names = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data: Data = self
                .graphql_partial(
                    QueryKind::LocListRepos,
                    QUERY,
                    json!({
                        "login": login,
                        "affiliations": scope.affiliations(),
                        "first": PAGE_SIZE,
                        "cursor": cursor,
                    }),
                )
                .await?;
            let repos = data
                .user
                .ok_or_else(|| ProfileError::UserNotFound(login.to_string()))?
                .repositories;

            names.extend(
                repos
                    .nodes
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .map(|n| n.name_with_owner),
            );

            match next_cursor(repos.page_info) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    async fn commit_total(&self, owner: &str, name: &str) -> Result<u64> {
        const QUERY: &str = r#"
            query($owner: String!, $repo: String!) {
                repository(owner: $owner, name: $repo) {
                    defaultBranchRef {
                        target {
                            ... on Commit {
                                history(first: 0) {
                                    totalCount
                                }
                            }
                        }
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repository>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repository {
            default_branch_ref: Option<BranchRef>,
        }
        #[derive(Deserialize)]
        struct BranchRef {
            target: Option<Target>,
        }
        #[derive(Deserialize)]
        struct Target {
            history: Option<CountObj>,
        }

        let data: Data = self
            .graphql(
                QueryKind::LocRepoScan,
                QUERY,
                json!({ "owner": owner, "repo": name }),
            )
            .await?;
        let repository = data
            .repository
            .ok_or(ProfileError::MissingData("loc_repo_scan"))?;

        // Empty repositories have no default branch.
        Ok(repository
            .default_branch_ref
            .and_then(|r| r.target)
            .and_then(|t| t.history)
            .map(|h| h.total_count)
            .unwrap_or(0))
    }

    async fn repo_activity(&self, owner: &str, name: &str, login: &str) -> Result<RepoActivity> {
        const QUERY: &str = r#"
            query($owner: String!, $repo: String!, $first: Int!, $cursor: String) {
                repository(owner: $owner, name: $repo) {
                    defaultBranchRef {
                        target {
                            ... on Commit {
                                history(first: $first, after: $cursor) {
                                    totalCount
                                    nodes {
                                        additions
                                        deletions
                                        author {
                                            user {
                                                login
                                            }
                                        }
                                    }
                                    pageInfo {
                                        hasNextPage
                                        endCursor
                                    }
                                }
                            }
                        }
                    }
                }
            }
        "#;

        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repository>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repository {
            default_branch_ref: Option<BranchRef>,
        }
        #[derive(Deserialize)]
        struct BranchRef {
            target: Option<Target>,
        }
        #[derive(Deserialize)]
        struct Target {
            history: Option<History>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct History {
            total_count: u64,
            nodes: Option<Vec<Option<CommitNode>>>,
            page_info: PageInfo,
        }
        #[derive(Deserialize)]
        struct CommitNode {
            additions: Option<u64>,
            deletions: Option<u64>,
            author: Option<CommitAuthor>,
        }
        #[derive(Deserialize)]
        struct CommitAuthor {
            user: Option<UserLogin>,
        }
        #[derive(Deserialize)]
        struct UserLogin {
            login: String,
        }

        let mut activity = RepoActivity::default();
        let mut cursor: Option<String> = None;

        loop {
            let data: Data = self
                .graphql(
                    QueryKind::LocRepoScan,
                    QUERY,
                    json!({ "owner": owner, "repo": name, "first": PAGE_SIZE, "cursor": cursor }),
                )
                .await?;

            let Some(history) = data
                .repository
                .ok_or(ProfileError::MissingData("loc_repo_scan"))?
                .default_branch_ref
                .and_then(|r| r.target)
                .and_then(|t| t.history)
            else {
                break;
            };

            activity.total_commits = history.total_count;
            for node in history.nodes.unwrap_or_default().into_iter().flatten() {
                let authored = node
                    .author
                    .and_then(|a| a.user)
                    .is_some_and(|u| u.login.eq_ignore_ascii_case(login));
                if authored {
                    activity.my_commits = activity.my_commits.saturating_add(1);
                    activity.additions = activity.additions.saturating_add(node.additions.unwrap_or(0));
                    activity.deletions = activity.deletions.saturating_add(node.deletions.unwrap_or(0));
                }
            }

            match next_cursor(history.page_info) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(repo = %format!("{owner}/{name}"), ?activity, "Scanned commit history");
        Ok(activity)
    }
}

fn error_messages(envelope: &Envelope) -> Option<String> {
    let errors = envelope.errors.as_ref().filter(|e| !e.is_empty())?;
    Some(
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
    )
}

fn classify_errors(kind: QueryKind, messages: String) -> ProfileError {
    if mentions_rate_limit(&messages) {
        ProfileError::RateLimited(messages)
    } else {
        ProfileError::GraphQl {
            tag: kind.as_str(),
            messages,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: QueryKind, data: Option<Value>) -> Result<T> {
    let data = data.ok_or(ProfileError::MissingData(kind.as_str()))?;
    Ok(serde_json::from_value(data)?)
}

fn next_cursor(page: PageInfo) -> Option<String> {
    if page.has_next_page { page.end_cursor } else { None }
}

fn mentions_rate_limit(text: &str) -> bool {
    text.to_ascii_lowercase().contains("rate limit")
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}
