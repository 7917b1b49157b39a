//! Repository data providers: where file trees and file contents come from.
//!
//! The graph builder only sees the [`RepositoryProvider`] trait. Two
//! implementations ship: [`GitHubProvider`] for hosted repositories and
//! [`LocalProvider`] for a directory on disk.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cartograph_core::{CartographError, GitHubConfig};
use serde::Deserialize;

/// Opaque bearer token identifying the caller to the provider.
///
/// `Debug` never prints the secret.
///
/// # Examples
///
/// ```
/// use cartograph_graph::provider::Credential;
///
/// let cred = Credential::new("ghp_secret");
/// assert_eq!(format!("{cred:?}"), "Credential(***)");
/// assert_eq!(cred.expose(), "ghp_secret");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A credential for providers that need none.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Blob,
    Tree,
    Commit,
}

/// One path in a repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn blob(path: &str, size: u64) -> Self {
        Self {
            path: path.to_string(),
            entry_type: EntryType::Blob,
            size: Some(size),
        }
    }
}

/// Repository metadata needed to pick a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub default_branch: String,
}

/// Source of repository trees and file contents.
///
/// Every call is fallible; implementations decide what is retryable.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// List every path in the tree at `branch`.
    async fn list_tree(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<TreeEntry>, CartographError>;

    /// Fetch one file's text at `branch`.
    async fn file_content(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<String, CartographError>;

    /// Fetch repository metadata.
    async fn repo_info(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
    ) -> Result<RepoInfo, CartographError>;
}

/// Run `op` under a timeout, retrying transient failures with linear backoff.
///
/// # Errors
///
/// Returns the last error once `retries` extra attempts are exhausted, or
/// immediately for non-transient errors.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    retries: u32,
    mut op: F,
) -> Result<T, CartographError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CartographError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CartographError::Timeout {
                operation: operation.to_string(),
                elapsed: timeout,
            }),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                tracing::debug!(operation, attempt, error = %e, "retrying");
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse a repository reference (`owner/repo` or `owner/repo@branch`).
///
/// # Errors
///
/// Returns [`CartographError::Config`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use cartograph_graph::provider::parse_repo_reference;
///
/// let (owner, repo, branch) = parse_repo_reference("octocat/hello-world@dev").unwrap();
/// assert_eq!(owner, "octocat");
/// assert_eq!(repo, "hello-world");
/// assert_eq!(branch.as_deref(), Some("dev"));
///
/// let (_, _, branch) = parse_repo_reference("octocat/hello-world").unwrap();
/// assert!(branch.is_none());
/// ```
pub fn parse_repo_reference(
    reference: &str,
) -> Result<(String, String, Option<String>), CartographError> {
    let (owner_repo, branch) = match reference.split_once('@') {
        Some((or, b)) if !b.is_empty() => (or, Some(b.to_string())),
        Some(_) => {
            return Err(CartographError::Config(format!(
                "invalid repository reference '{reference}', branch after '@' is empty"
            )))
        }
        None => (reference, None),
    };
    let Some((owner, repo)) = owner_repo.split_once('/') else {
        return Err(CartographError::Config(format!(
            "invalid repository reference '{reference}', expected owner/repo[@branch]"
        )));
    };
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return Err(CartographError::Config(format!(
            "invalid repository reference '{reference}', expected owner/repo[@branch]"
        )));
    }
    Ok((owner.to_string(), repo.to_string(), branch))
}

/// GitHub REST provider.
///
/// Trees come from the git-trees API, contents from the raw media type, and
/// repository metadata from `octocrab`.
pub struct GitHubProvider {
    http: reqwest::Client,
    octocrab: octocrab::Octocrab,
    /// Token `octocrab` was built with; other credentials get their own client.
    token: Credential,
    api_url: String,
    timeout: Duration,
    retries: u32,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: String,
}

impl GitHubProvider {
    /// Create a provider from GitHub configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Provider`] if an HTTP client cannot be built,
    /// or [`CartographError::Config`] if `api_url` is not a valid URI.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use cartograph_core::GitHubConfig;
    /// use cartograph_graph::provider::GitHubProvider;
    ///
    /// # async fn example() -> Result<(), cartograph_core::CartographError> {
    /// let provider = GitHubProvider::new(&GitHubConfig::default(), Duration::from_secs(30), 2)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        config: &GitHubConfig,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, CartographError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("cartograph")
            .build()
            .map_err(|e| CartographError::Provider(format!("failed to create HTTP client: {e}")))?;
        let api_url = config.api_url.trim_end_matches('/').to_string();
        let token = match &config.token {
            Some(token) => Credential::new(token.clone()),
            None => Credential::anonymous(),
        };
        let octocrab = octocrab_client(&api_url, &token)?;
        Ok(Self {
            http,
            octocrab,
            token,
            api_url,
            timeout,
            retries,
        })
    }

    fn octocrab_for(&self, credential: &Credential) -> Result<octocrab::Octocrab, CartographError> {
        if *credential == self.token {
            return Ok(self.octocrab.clone());
        }
        octocrab_client(&self.api_url, credential)
    }

    async fn get(
        &self,
        credential: &Credential,
        url: &str,
        accept: &str,
    ) -> Result<reqwest::Response, CartographError> {
        let mut request = self.http.get(url).header("Accept", accept);
        if !credential.is_anonymous() {
            request = request.header("Authorization", format!("Bearer {}", credential.expose()));
        }
        let response = request
            .send()
            .await
            .map_err(|e| CartographError::ProviderUnreachable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CartographError::ProviderStatus {
                status: status.as_u16(),
                message: format!("GET {url}: {body}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RepositoryProvider for GitHubProvider {
    async fn list_tree(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<TreeEntry>, CartographError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1",
            self.api_url
        );
        let operation = format!("list tree {owner}/{repo}@{branch}");
        let tree: TreeResponse = with_retry(&operation, self.timeout, self.retries, || async {
            self.get(credential, &url, "application/vnd.github+json")
                .await?
                .json::<TreeResponse>()
                .await
                .map_err(|e| CartographError::Provider(format!("failed to parse tree: {e}")))
        })
        .await?;

        if tree.truncated {
            tracing::warn!(owner, repo, branch, "tree listing truncated by GitHub");
        }
        Ok(tree.tree)
    }

    async fn file_content(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<String, CartographError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/{path}?ref={branch}",
            self.api_url
        );
        let operation = format!("fetch {path}");
        with_retry(&operation, self.timeout, self.retries, || async {
            self.get(credential, &url, "application/vnd.github.raw+json")
                .await?
                .text()
                .await
                .map_err(|e| CartographError::Provider(format!("failed to read {path}: {e}")))
        })
        .await
    }

    async fn repo_info(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
    ) -> Result<RepoInfo, CartographError> {
        let octocrab = self.octocrab_for(credential)?;
        let route = format!("/repos/{owner}/{repo}");
        let operation = format!("repo info {owner}/{repo}");
        let response: RepoResponse = with_retry(&operation, self.timeout, self.retries, || async {
            octocrab
                .get::<RepoResponse, _, ()>(&route, None)
                .await
                .map_err(|e| match e {
                    octocrab::Error::GitHub { source, .. } => CartographError::ProviderStatus {
                        status: source.status_code.as_u16(),
                        message: format!("GET {route}: {}", source.message),
                    },
                    other => CartographError::Provider(format!("failed to fetch {owner}/{repo}: {other}")),
                })
        })
        .await?;

        Ok(RepoInfo {
            default_branch: response.default_branch,
        })
    }
}

fn octocrab_client(
    api_url: &str,
    credential: &Credential,
) -> Result<octocrab::Octocrab, CartographError> {
    let builder = octocrab::Octocrab::builder()
        .base_uri(api_url)
        .map_err(|e| CartographError::Config(format!("invalid GitHub API URL: {e}")))?;
    let builder = if credential.is_anonymous() {
        builder
    } else {
        builder.personal_token(credential.expose().to_string())
    };
    builder
        .build()
        .map_err(|e| CartographError::Provider(format!("failed to create GitHub client: {e}")))
}

/// Serves a directory on disk, respecting `.gitignore`.
///
/// Owner and repo arguments are ignored; the branch is always `HEAD`.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use cartograph_graph::provider::LocalProvider;
///
/// let provider = LocalProvider::new(PathBuf::from("."));
/// assert_eq!(provider.repo_name(), "cartograph-graph");
/// ```
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory name used as the repository name.
    pub fn repo_name(&self) -> String {
        self.root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| self.root.display().to_string())
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CartographError> {
        let candidate = self.root.join(path);
        let root = self.root.canonicalize()?;
        let resolved = candidate.canonicalize()?;
        if !resolved.starts_with(&root) {
            return Err(CartographError::Provider(format!(
                "path {path} escapes repository root"
            )));
        }
        Ok(resolved)
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[async_trait]
impl RepositoryProvider for LocalProvider {
    async fn list_tree(
        &self,
        _credential: &Credential,
        _owner: &str,
        _repo: &str,
        _branch: &str,
    ) -> Result<Vec<TreeEntry>, CartographError> {
        if !self.root.is_dir() {
            return Err(CartographError::Provider(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in ignore::WalkBuilder::new(&root).hidden(false).build() {
                let Ok(entry) = entry else {
                    continue;
                };
                let Some(file_type) = entry.file_type() else {
                    continue;
                };
                let Some(path) = relative_path(&root, entry.path()) else {
                    continue;
                };
                if path == ".git" || path.starts_with(".git/") {
                    continue;
                }
                if file_type.is_dir() {
                    entries.push(TreeEntry {
                        path,
                        entry_type: EntryType::Tree,
                        size: None,
                    });
                } else if file_type.is_file() {
                    let size = entry.metadata().ok().map(|m| m.len());
                    entries.push(TreeEntry {
                        path,
                        entry_type: EntryType::Blob,
                        size,
                    });
                }
            }
            entries
        })
        .await
        .map_err(|e| CartographError::Provider(format!("directory walk failed: {e}")))?;
        Ok(entries)
    }

    async fn file_content(
        &self,
        _credential: &Credential,
        _owner: &str,
        _repo: &str,
        path: &str,
        _branch: &str,
    ) -> Result<String, CartographError> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(resolved).await?)
    }

    async fn repo_info(
        &self,
        _credential: &Credential,
        _owner: &str,
        _repo: &str,
    ) -> Result<RepoInfo, CartographError> {
        Ok(RepoInfo {
            default_branch: "HEAD".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn parse_reference_rejects_malformed_input() {
        assert!(parse_repo_reference("no-slash").is_err());
        assert!(parse_repo_reference("a/b/c").is_err());
        assert!(parse_repo_reference("/repo").is_err());
        assert!(parse_repo_reference("owner/repo@").is_err());
    }

    #[test]
    fn tree_entry_deserializes_github_shape() {
        let json = r#"{"path":"src/a.ts","mode":"100644","type":"blob","sha":"abc","size":42}"#;
        let entry: TreeEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry, TreeEntry::blob("src/a.ts", 42));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn github_client_is_built_once_per_provider() {
        let config = GitHubConfig {
            token: Some("ghp_configured".into()),
            ..GitHubConfig::default()
        };
        let provider = GitHubProvider::new(&config, Duration::from_secs(5), 0).unwrap();
        assert!(provider.token == Credential::new("ghp_configured"));
        assert!(provider.octocrab_for(&Credential::new("ghp_configured")).is_ok());
        assert!(provider.octocrab_for(&Credential::new("ghp_other")).is_ok());

        let credential = Credential::anonymous();
        let info = provider.repo_info(&credential, "octocat", "hello");
        assert_send(&info);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", Duration::from_secs(1), 2, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CartographError::ProviderUnreachable("connection reset".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_skips_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", Duration::from_secs(1), 5, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CartographError::ProviderStatus {
                status: 404,
                message: "GET /repos/o/r".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_reported() {
        let result: Result<(), _> = with_retry("slow", Duration::from_millis(10), 0, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CartographError::Timeout { .. })));
    }

    #[tokio::test]
    async fn local_provider_lists_and_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "export function a() {}\n").unwrap();

        let provider = LocalProvider::new(dir.path().to_path_buf());
        let cred = Credential::anonymous();
        let tree = provider.list_tree(&cred, "local", "x", "HEAD").await.unwrap();
        assert!(tree
            .iter()
            .any(|e| e.path == "src/a.ts" && e.entry_type == EntryType::Blob));
        assert!(tree
            .iter()
            .any(|e| e.path == "src" && e.entry_type == EntryType::Tree));

        let content = provider
            .file_content(&cred, "local", "x", "src/a.ts", "HEAD")
            .await
            .unwrap();
        assert!(content.contains("function a"));
    }

    #[tokio::test]
    async fn local_provider_refuses_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("repo")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();

        let provider = LocalProvider::new(dir.path().join("repo"));
        let result = provider
            .file_content(&Credential::anonymous(), "l", "r", "../secret.txt", "HEAD")
            .await;
        assert!(matches!(result, Err(CartographError::Provider(_))));
    }
}
