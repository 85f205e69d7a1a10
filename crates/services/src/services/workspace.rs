use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use db::models::repository::Repository;
use git2::{
    CertificateCheckStatus, Cred, Delta, ErrorClass, ErrorCode, FetchOptions, ObjectType, Oid,
    RemoteCallbacks, Repository as GitRepository, TreeWalkMode, TreeWalkResult,
    build::{CheckoutBuilder, RepoBuilder},
};
use thiserror::Error;
use tracing::{debug, warn};
use utils::path::sanitize_component;

use crate::services::{config::CoreConfig, platform_app::PlatformAppService};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid path component: {0:?}")]
    InvalidPath(String),
    #[error("workspace corrupt: {0}")]
    Corrupt(String),
    #[error("commit not found: {0}")]
    CommitNotFound(String),
    #[error("remote rejected credentials: {0}")]
    Credential(String),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    TaskJoin(String),
}

/// On-disk checkout handle for one branch of one repository. Owned by the
/// service instance that prepared it; never persisted.
#[derive(Debug, Clone)]
pub struct RepositoryWorkspace {
    pub org_name: String,
    pub repo_name: String,
    pub branch_name: String,
    pub remote_url: String,
    pub working_dir: PathBuf,
    pub commit_id: String,
    pub previous_commit_id: Option<String>,
}

impl RepositoryWorkspace {
    pub fn is_incremental(&self) -> bool {
        self.previous_commit_id
            .as_deref()
            .is_some_and(|previous| !previous.is_empty() && previous != self.commit_id)
    }
}

#[derive(Debug, Clone)]
struct GitCredentials {
    username: String,
    secret: String,
}

enum GitFailure {
    Transient,
    Corrupt,
    Credential,
    Fatal,
}

const CORRUPTION_MARKERS: [&str; 5] =
    ["corrupt", "invalid", "not a git repository", "bad object", "broken"];

/// Owns the `{root}/{org}/{repo}/tree` storage layout and the git surface
/// over it. Transient transport failures retry with a fixed delay here; the
/// exponential corruption-recovery loop lives in the incremental updater and
/// the two must stay separate.
pub struct WorkspaceManager {
    repositories_dir: PathBuf,
    cleanup_after_processing: bool,
    max_retry_attempts: u32,
    retry_delay: Duration,
    accept_invalid_certs: bool,
    global_token: Option<String>,
    platform: Arc<dyn PlatformAppService>,
}

impl WorkspaceManager {
    pub fn new(config: &CoreConfig, platform: Arc<dyn PlatformAppService>) -> Self {
        WorkspaceManager {
            repositories_dir: config.repositories_dir.clone(),
            cleanup_after_processing: config.cleanup_after_processing,
            max_retry_attempts: config.max_retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            accept_invalid_certs: config.accept_invalid_certs,
            global_token: config.platform_token.clone(),
            platform,
        }
    }

    pub fn tree_path(&self, org_name: &str, repo_name: &str) -> Result<PathBuf, WorkspaceError> {
        let org = sanitize_component(org_name)
            .ok_or_else(|| WorkspaceError::InvalidPath(org_name.to_string()))?;
        let name = sanitize_component(repo_name)
            .ok_or_else(|| WorkspaceError::InvalidPath(repo_name.to_string()))?;
        Ok(self.repositories_dir.join(org).join(name).join("tree"))
    }

    /// Ensure a checkout of `branch_name` exists on disk and report its HEAD.
    ///
    /// An existing `.git` directory is fetched and fast-forwarded; anything
    /// else is cloned fresh. Transport failures retry up to the configured
    /// attempt count with fixed backoff; corruption surfaces immediately as
    /// [`WorkspaceError::Corrupt`] for the caller to recover from.
    pub async fn prepare(
        &self,
        repo: &Repository,
        branch_name: &str,
        previous_commit_id: Option<String>,
    ) -> Result<RepositoryWorkspace, WorkspaceError> {
        let working_dir = self.tree_path(&repo.org_name, &repo.repo_name)?;
        let credentials = self.synthesize_credentials(repo).await;

        let mut attempt = 1u32;
        let commit_id = loop {
            let dir = working_dir.clone();
            let url = repo.remote_url.clone();
            let branch = branch_name.to_string();
            let creds = credentials.clone();
            let accept_invalid_certs = self.accept_invalid_certs;

            let result = tokio::task::spawn_blocking(move || {
                clone_or_update(&dir, &url, &branch, creds, accept_invalid_certs)
            })
            .await
            .map_err(|e| WorkspaceError::TaskJoin(e.to_string()))?;

            match result {
                Ok(head) => break head,
                Err(err) => match classify_git_failure(&err) {
                    GitFailure::Corrupt => {
                        return Err(WorkspaceError::Corrupt(err.message().to_string()));
                    }
                    GitFailure::Credential => {
                        return Err(WorkspaceError::Credential(err.message().to_string()));
                    }
                    GitFailure::Transient if attempt < self.max_retry_attempts => {
                        warn!(
                            "Transient git failure preparing {}/{} (attempt {attempt}): {}",
                            repo.org_name,
                            repo.repo_name,
                            err.message()
                        );
                        tokio::time::sleep(self.retry_delay).await;
                        attempt += 1;
                    }
                    _ => return Err(err.into()),
                },
            }
        };

        Ok(RepositoryWorkspace {
            org_name: repo.org_name.clone(),
            repo_name: repo.repo_name.clone(),
            branch_name: branch_name.to_string(),
            remote_url: repo.remote_url.clone(),
            working_dir,
            commit_id,
            previous_commit_id,
        })
    }

    /// Remove the working tree when cleanup-on-exit is configured.
    /// Idempotent and infallible: failures are logged and swallowed.
    pub async fn cleanup(&self, workspace: &RepositoryWorkspace) {
        if !self.cleanup_after_processing {
            return;
        }
        let dir = workspace.working_dir.clone();
        match tokio::task::spawn_blocking(move || remove_tree_blocking(&dir)).await {
            Ok(Ok(())) => debug!(
                "Removed working tree for {}/{}",
                workspace.org_name, workspace.repo_name
            ),
            Ok(Err(e)) => warn!(
                "Failed to remove working tree for {}/{}: {e}",
                workspace.org_name, workspace.repo_name
            ),
            Err(e) => warn!("Working-tree cleanup task failed: {e}"),
        }
    }

    /// Unconditionally delete the on-disk tree, forcing the next prepare to
    /// clone from scratch. Used by corruption recovery.
    pub async fn remove_tree(
        &self,
        org_name: &str,
        repo_name: &str,
    ) -> Result<(), WorkspaceError> {
        let dir = self.tree_path(org_name, repo_name)?;
        tokio::task::spawn_blocking(move || remove_tree_blocking(&dir))
            .await
            .map_err(|e| WorkspaceError::TaskJoin(e.to_string()))??;
        Ok(())
    }

    /// Paths touched between two commits: the union of added, modified,
    /// renamed and copied files. Deletions are dropped because the generator
    /// has nothing to patch for them. An empty or locally-unknown
    /// `from_commit` degrades to every tracked file at `to_commit`.
    pub async fn changed_files(
        &self,
        workspace: &RepositoryWorkspace,
        from_commit: Option<&str>,
        to_commit: &str,
    ) -> Result<Vec<String>, WorkspaceError> {
        let dir = workspace.working_dir.clone();
        let from = from_commit.map(|s| s.to_string());
        let to = to_commit.to_string();
        tokio::task::spawn_blocking(move || diff_changed_files(&dir, from, &to))
            .await
            .map_err(|e| WorkspaceError::TaskJoin(e.to_string()))?
    }

    /// First non-empty credential source wins: per-repository secret, then a
    /// platform-app installation token for the organization, then the global
    /// configured token.
    async fn synthesize_credentials(&self, repo: &Repository) -> Option<GitCredentials> {
        if let (Some(account), Some(secret)) =
            (repo.auth_account.as_deref(), repo.auth_secret.as_deref())
            && !account.is_empty()
            && !secret.is_empty()
        {
            return Some(GitCredentials {
                username: account.to_string(),
                secret: secret.to_string(),
            });
        }

        if let Some(token) = self.platform.installation_token(&repo.org_name).await {
            return Some(GitCredentials {
                username: "x-access-token".to_string(),
                secret: token,
            });
        }

        self.global_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(|token| GitCredentials {
                username: "x-access-token".to_string(),
                secret: token.to_string(),
            })
    }
}

fn classify_git_failure(err: &git2::Error) -> GitFailure {
    if err.code() == ErrorCode::Auth {
        return GitFailure::Credential;
    }
    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Os => {
            GitFailure::Transient
        }
        ErrorClass::Odb | ErrorClass::Index | ErrorClass::Object => GitFailure::Corrupt,
        _ => {
            let message = err.message().to_lowercase();
            if CORRUPTION_MARKERS
                .iter()
                .any(|marker| message.contains(marker))
            {
                GitFailure::Corrupt
            } else {
                GitFailure::Fatal
            }
        }
    }
}

fn make_fetch_options(
    credentials: Option<GitCredentials>,
    accept_invalid_certs: bool,
) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed_types| {
        if let Some(credentials) = &credentials {
            return Cred::userpass_plaintext(&credentials.username, &credentials.secret);
        }
        // No synthesized credentials: try the SSH agent, then the key file.
        if let Some(username) = username_from_url
            && let Ok(cred) = Cred::ssh_key_from_agent(username)
        {
            return Ok(cred);
        }
        let home = dirs::home_dir()
            .ok_or_else(|| git2::Error::from_str("Could not find home directory"))?;
        let key_path = home.join(".ssh").join("id_rsa");
        Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key_path, None)
    });

    if accept_invalid_certs {
        // Accept any transport certificate: deployments behind TLS
        // inspection proxies present certificates libgit2 cannot verify.
        callbacks.certificate_check(|_cert, _hostname| Ok(CertificateCheckStatus::CertificateOk));
    }

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);
    fetch_opts
}

fn clone_or_update(
    working_dir: &Path,
    remote_url: &str,
    branch_name: &str,
    credentials: Option<GitCredentials>,
    accept_invalid_certs: bool,
) -> Result<String, git2::Error> {
    if working_dir.join(".git").exists() {
        let repo = GitRepository::open(working_dir)?;
        fetch_branch(&repo, branch_name, credentials, accept_invalid_certs)?;
        fast_forward_to_remote(&repo, branch_name)
    } else {
        if working_dir.exists() {
            // A directory without .git is a half-finished checkout.
            std::fs::remove_dir_all(working_dir).map_err(|e| {
                git2::Error::from_str(&format!("failed to clear partial checkout: {e}"))
            })?;
        }
        if let Some(parent) = working_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                git2::Error::from_str(&format!("failed to create storage directory: {e}"))
            })?;
        }

        let mut builder = RepoBuilder::new();
        builder.branch(branch_name);
        builder.fetch_options(make_fetch_options(credentials, accept_invalid_certs));
        let repo = builder.clone(remote_url, working_dir)?;
        let head = repo.head()?.peel_to_commit()?.id();
        Ok(head.to_string())
    }
}

fn fetch_branch(
    repo: &GitRepository,
    branch_name: &str,
    credentials: Option<GitCredentials>,
    accept_invalid_certs: bool,
) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    let refspec = format!("+refs/heads/{branch_name}:refs/remotes/origin/{branch_name}");
    remote.fetch(
        &[refspec.as_str()],
        Some(&mut make_fetch_options(credentials, accept_invalid_certs)),
        None,
    )
}

fn fast_forward_to_remote(
    repo: &GitRepository,
    branch_name: &str,
) -> Result<String, git2::Error> {
    let remote_ref = repo.find_reference(&format!("refs/remotes/origin/{branch_name}"))?;
    let target = remote_ref
        .target()
        .ok_or_else(|| git2::Error::from_str("remote branch has no target"))?;

    repo.reference(
        &format!("refs/heads/{branch_name}"),
        target,
        true,
        "fast-forward to fetched head",
    )?;
    repo.set_head(&format!("refs/heads/{branch_name}"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;

    Ok(target.to_string())
}

fn diff_changed_files(
    working_dir: &Path,
    from_commit: Option<String>,
    to_commit: &str,
) -> Result<Vec<String>, WorkspaceError> {
    let repo = GitRepository::open(working_dir)?;

    let to_tree = Oid::from_str(to_commit)
        .ok()
        .and_then(|oid| repo.find_commit(oid).ok())
        .ok_or_else(|| WorkspaceError::CommitNotFound(to_commit.to_string()))?
        .tree()?;

    let from_tree = from_commit
        .filter(|commit| !commit.is_empty())
        .and_then(|commit| Oid::from_str(&commit).ok())
        .and_then(|oid| repo.find_commit(oid).ok())
        .map(|commit| commit.tree())
        .transpose()?;

    let mut files = Vec::new();
    match from_tree {
        None => {
            // Full rebuild: every tracked blob at the target commit.
            to_tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(ObjectType::Blob)
                    && let Some(name) = entry.name()
                {
                    files.push(format!("{root}{name}"));
                }
                TreeWalkResult::Ok
            })?;
        }
        Some(from_tree) => {
            let mut diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
            diff.find_similar(None)?;
            for delta in diff.deltas() {
                match delta.status() {
                    Delta::Added | Delta::Modified | Delta::Renamed | Delta::Copied => {
                        if let Some(path) = delta.new_file().path() {
                            files.push(path.to_string_lossy().replace('\\', "/"));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(files)
}

fn remove_tree_blocking(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    clear_readonly(dir)?;
    std::fs::remove_dir_all(dir)
}

// Git marks its object store read-only on some filesystems; remove_dir_all
// fails on those entries unless the attribute is cleared first.
fn clear_readonly(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            clear_readonly(&entry.path())?;
        } else if metadata.permissions().readonly() {
            let mut permissions = metadata.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            std::fs::set_permissions(entry.path(), permissions)?;
        }
    }
    Ok(())
}
