//! Read-only version-control queries used to resolve snapshot recency.
//!
//! The merge engine depends only on [`VcsQuery`]. [`GitCli`] shells out to
//! `git` with the repository root passed explicitly through `current_dir`,
//! and every invocation is bounded by a timeout. Paths are always passed as
//! literal pathspecs, so `sensor_[1].csv` never matches `sensor_1.csv`. [`MemoryVcs`] is an
//! in-memory stand-in keyed by path.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub trait VcsQuery {
    fn repo_root(&self) -> Result<PathBuf>;
    fn is_tracked(&self, path: &Path) -> Result<bool>;
    fn last_commit_time(&self, path: &Path) -> Result<OffsetDateTime>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    /// Locate the repository containing `dir`.
    pub fn discover(dir: &Path, timeout: Duration) -> Result<Self> {
        let root = run_git(dir, &["rev-parse", "--show-toplevel"], timeout)?;
        let root = root.trim();
        if root.is_empty() {
            return Err(Error::Vcs {
                command: "git rev-parse --show-toplevel".to_string(),
                message: "empty output".to_string(),
            });
        }
        Ok(Self {
            root: PathBuf::from(root),
            timeout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pathspec(&self, path: &Path) -> String {
        relative_to(&self.root, path).to_string_lossy().into_owned()
    }
}

impl VcsQuery for GitCli {
    fn repo_root(&self) -> Result<PathBuf> {
        let out = run_git(&self.root, &["rev-parse", "--show-toplevel"], self.timeout)?;
        Ok(PathBuf::from(out.trim()))
    }

    fn is_tracked(&self, path: &Path) -> Result<bool> {
        let spec = self.pathspec(path);
        let args = ["ls-files", "--error-unmatch", "--", spec.as_str()];
        let out = git(&self.root, &args, self.timeout)?;
        match out.status.code() {
            Some(0) => Ok(true),
            // --error-unmatch exits 1 for a path git does not know.
            Some(1) => Ok(false),
            _ => Err(out.failure()),
        }
    }

    fn last_commit_time(&self, path: &Path) -> Result<OffsetDateTime> {
        let spec = self.pathspec(path);
        let args = ["log", "-1", "--format=%ct", "--", spec.as_str()];
        let out = run_git(&self.root, &args, self.timeout)?;
        parse_commit_time(out.trim()).ok_or_else(|| Error::Vcs {
            command: format!("git {}", args.join(" ")),
            message: format!("unexpected commit time {:?}", out.trim()),
        })
    }
}

fn parse_commit_time(raw: &str) -> Option<OffsetDateTime> {
    let secs = raw.parse::<i64>().ok()?;
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

/// Express `path` relative to `root` when both resolve inside the same tree.
fn relative_to(root: &Path, path: &Path) -> PathBuf {
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    // Deleted files cannot be canonicalized; resolve through their parent.
    let canonical = path.canonicalize().unwrap_or_else(|_| {
        match (path.parent().and_then(|p| p.canonicalize().ok()), path.file_name()) {
            (Some(parent), Some(name)) => parent.join(name),
            _ => path.to_path_buf(),
        }
    });
    canonical
        .strip_prefix(&canonical_root)
        .map(Path::to_path_buf)
        .unwrap_or(canonical)
}

/// Captured result of a finished child process.
struct Captured {
    command: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl Captured {
    fn failure(&self) -> Error {
        Error::Vcs {
            command: self.command.clone(),
            message: format!(
                "exit {}: {}",
                self.status.code().unwrap_or(-1),
                self.stderr.trim()
            ),
        }
    }
}

/// Run `git <args>` in `dir`, returning stdout. A non-zero exit, a spawn
/// failure or an expired deadline are all errors.
fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let out = git(dir, args, timeout)?;
    if !out.status.success() {
        return Err(out.failure());
    }
    Ok(out.stdout)
}

/// Run `git <args>` in `dir` with pathspec globbing disabled, whatever the
/// exit status.
fn git(dir: &Path, args: &[&str], timeout: Duration) -> Result<Captured> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push("--literal-pathspecs");
    full.extend_from_slice(args);
    run_bounded("git", dir, &full, timeout)
}

/// Spawn `program <args>` in `dir` and wait at most `timeout` for it.
///
/// Both pipes are drained on reader threads while the child runs, so output
/// larger than the pipe buffer cannot stall it. On expiry the child is killed
/// and reaped before `VcsTimeout` is returned.
fn run_bounded(program: &str, dir: &Path, args: &[&str], timeout: Duration) -> Result<Captured> {
    let command = format!("{program} {}", args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| Error::Vcs {
            command: command.clone(),
            message: format!("spawn failed: {err}"),
        })?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                reap(&mut child);
                return Err(Error::VcsTimeout { command, timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                reap(&mut child);
                return Err(err.into());
            }
        }
    };

    Ok(Captured {
        command,
        status,
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
    })
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn collect(reader: Option<JoinHandle<io::Result<String>>>) -> Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let text = reader
        .join()
        .map_err(|_| io::Error::other("pipe reader panicked"))??;
    Ok(text)
}

/// Stages, commits and optionally pushes the results of a finished run.
///
/// This mutates the repository and is never called by the pipeline itself.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    root: PathBuf,
    timeout: Duration,
}

impl GitPublisher {
    pub fn new(git: &GitCli) -> Self {
        Self {
            root: git.root.clone(),
            timeout: git.timeout,
        }
    }

    /// Returns `false` when there was nothing to commit.
    pub fn publish(&self, paths: &[PathBuf], message: &str, push: bool) -> Result<bool> {
        if paths.is_empty() {
            return Ok(false);
        }
        let specs: Vec<String> = paths
            .iter()
            .map(|p| relative_to(&self.root, p).to_string_lossy().into_owned())
            .collect();
        let mut add = vec!["add", "-A", "--"];
        add.extend(specs.iter().map(String::as_str));
        run_git(&self.root, &add, self.timeout)?;

        // `diff --cached --quiet` exits 1 when something is staged.
        if run_git(&self.root, &["diff", "--cached", "--quiet"], self.timeout).is_ok() {
            log::info!("nothing to commit");
            return Ok(false);
        }
        run_git(&self.root, &["commit", "-m", message], self.timeout)?;
        log::info!("committed {} path(s)", specs.len());
        if push {
            run_git(&self.root, &["push"], self.timeout)?;
            log::info!("pushed");
        }
        Ok(true)
    }
}

/// In-memory [`VcsQuery`]: a path is tracked iff it was registered.
#[derive(Debug, Clone, Default)]
pub struct MemoryVcs {
    root: Option<PathBuf>,
    commits: HashMap<PathBuf, OffsetDateTime>,
    broken: HashSet<PathBuf>,
}

impl MemoryVcs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// A repository whose root cannot be resolved.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, path: impl Into<PathBuf>, at: OffsetDateTime) -> &mut Self {
        self.commits.insert(path.into(), at);
        self
    }

    /// Tracked, but the commit-time lookup fails.
    pub fn break_history(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.broken.insert(path.into());
        self
    }
}

impl VcsQuery for MemoryVcs {
    fn repo_root(&self) -> Result<PathBuf> {
        self.root.clone().ok_or_else(|| Error::Vcs {
            command: "repo_root".to_string(),
            message: "not a repository".to_string(),
        })
    }

    fn is_tracked(&self, path: &Path) -> Result<bool> {
        Ok(self.commits.contains_key(path) || self.broken.contains(path))
    }

    fn last_commit_time(&self, path: &Path) -> Result<OffsetDateTime> {
        if self.broken.contains(path) {
            return Err(Error::Vcs {
                command: "last_commit_time".to_string(),
                message: format!("history unavailable for {}", path.display()),
            });
        }
        self.commits.get(path).copied().ok_or_else(|| Error::Vcs {
            command: "last_commit_time".to_string(),
            message: format!("{} has no commits", path.display()),
        })
    }
}
