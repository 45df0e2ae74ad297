//! Git checkouts kept in lockstep with an upstream branch.
use std::path::Path;

use anyhow::{Context as _, Result, anyhow, bail};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, Oid, Repository, ResetType, StatusOptions};

/// How a local directory relates to the requested checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    /// Nothing there yet (or an empty directory).
    Absent,
    /// Same repository, on the branch, at the upstream tip, no local edits.
    UpToDate,
    /// Same repository but not matching upstream.
    Drifted(String),
    /// Something that must not be overwritten.
    Foreign(String),
}

/// Clones and synchronizes git checkouts.
#[cfg_attr(test, mockall::automock)]
pub trait SourceFetcher: Send + Sync + std::fmt::Debug {
    /// Whether `dir` is a checkout whose origin is `url`, whatever its state.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` exists but cannot be inspected.
    fn is_checkout_of(&self, url: &str, dir: &Path) -> Result<bool>;

    /// Compare `dir` with the tip of `branch` at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository or upstream cannot be queried.
    fn checkout_state(&self, url: &str, dir: &Path, branch: &str) -> Result<CheckoutState>;

    /// Fetch and hard-reset an existing checkout to the upstream branch.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` is not a checkout of `url` or git fails.
    fn sync(&self, url: &str, dir: &Path, branch: &str) -> Result<()>;

    /// Clone `url` at `branch` into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone fails.
    fn clone_repo(&self, url: &str, dir: &Path, branch: &str) -> Result<()>;
}

/// Compare repository URLs ignoring a trailing slash or `.git`.
fn same_url(a: &str, b: &str) -> bool {
    let norm = |u: &str| {
        let u = u.trim().trim_end_matches('/');
        u.strip_suffix(".git").unwrap_or(u).to_string()
    };
    norm(a) == norm(b)
}

fn is_absent(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut entries =
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    Ok(entries.next().is_none())
}

fn origin_url(repo: &Repository) -> Option<String> {
    repo.find_remote("origin")
        .ok()
        .and_then(|r| r.url().map(str::to_string))
}

/// Oid of `refs/heads/<branch>` as advertised by `url`.
fn upstream_tip(repo: &Repository, url: &str, branch: &str) -> Result<Oid> {
    let wanted = format!("refs/heads/{branch}");
    let mut remote = repo
        .remote_anonymous(url)
        .with_context(|| format!("creating remote for {url}"))?;
    remote
        .connect(Direction::Fetch)
        .with_context(|| format!("connecting to {url}"))?;
    let tip = remote
        .list()
        .with_context(|| format!("listing refs of {url}"))?
        .iter()
        .find(|head| head.name() == wanted)
        .map(git2::RemoteHead::oid);
    remote.disconnect().ok();
    tip.ok_or_else(|| anyhow!("branch {branch} not found at {url}"))
}

fn has_local_modifications(repo: &Repository) -> Result<bool> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(false).include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .context("reading working tree status")?;
    Ok(!statuses.is_empty())
}

/// [`SourceFetcher`] backed by libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitSourceFetcher;

impl GitSourceFetcher {
    /// Open `dir` if it is a checkout of `url`, otherwise say why not.
    fn open_matching(url: &str, dir: &Path) -> std::result::Result<Repository, String> {
        let Ok(repo) = Repository::open(dir) else {
            return Err(format!("{} is not a git repository", dir.display()));
        };
        match origin_url(&repo) {
            Some(origin) if same_url(&origin, url) => Ok(repo),
            Some(origin) => Err(format!(
                "{} is a checkout of {origin}, not {url}",
                dir.display()
            )),
            None => Err(format!("{} has no origin remote", dir.display())),
        }
    }
}

impl SourceFetcher for GitSourceFetcher {
    fn is_checkout_of(&self, url: &str, dir: &Path) -> Result<bool> {
        if is_absent(dir)? {
            return Ok(false);
        }
        Ok(Self::open_matching(url, dir).is_ok())
    }

    fn checkout_state(&self, url: &str, dir: &Path, branch: &str) -> Result<CheckoutState> {
        if is_absent(dir)? {
            return Ok(CheckoutState::Absent);
        }
        let repo = match Self::open_matching(url, dir) {
            Ok(repo) => repo,
            Err(reason) => return Ok(CheckoutState::Foreign(reason)),
        };

        let head = repo.head().context("reading HEAD")?;
        if !head.is_branch() || head.shorthand() != Some(branch) {
            let current = head.shorthand().unwrap_or("detached HEAD").to_string();
            return Ok(CheckoutState::Drifted(format!("on {current}, expected {branch}")));
        }
        if has_local_modifications(&repo)? {
            return Ok(CheckoutState::Drifted("tracked files modified".to_string()));
        }
        let local = head.target();
        let upstream = upstream_tip(&repo, url, branch)?;
        if local != Some(upstream) {
            return Ok(CheckoutState::Drifted(format!(
                "{branch} is not at upstream {upstream}"
            )));
        }
        Ok(CheckoutState::UpToDate)
    }

    fn sync(&self, url: &str, dir: &Path, branch: &str) -> Result<()> {
        let repo = match Self::open_matching(url, dir) {
            Ok(repo) => repo,
            Err(reason) => bail!("refusing to sync: {reason}"),
        };

        let local_ref = format!("refs/heads/{branch}");
        let tracking_ref = format!("refs/remotes/origin/{branch}");
        let refspec = format!("+{local_ref}:{tracking_ref}");
        repo.find_remote("origin")
            .context("finding origin")?
            .fetch(&[refspec.as_str()], None, None)
            .with_context(|| format!("fetching {branch} from {url}"))?;

        let oid = repo
            .refname_to_id(&tracking_ref)
            .with_context(|| format!("resolving {tracking_ref}"))?;
        repo.reference(&local_ref, oid, true, "oradock-provision: sync")
            .with_context(|| format!("updating {local_ref}"))?;
        repo.set_head(&local_ref)
            .with_context(|| format!("checking out {branch}"))?;
        let target = repo.find_object(oid, None).context("resolving fetched commit")?;
        repo.reset(&target, ResetType::Hard, Some(CheckoutBuilder::new().force()))
            .context("resetting working tree")?;
        tracing::debug!("{} reset to {oid}", dir.display());
        Ok(())
    }

    fn clone_repo(&self, url: &str, dir: &Path, branch: &str) -> Result<()> {
        RepoBuilder::new()
            .branch(branch)
            .clone(url, dir)
            .with_context(|| format!("cloning {url} into {}", dir.display()))?;
        Ok(())
    }
}
