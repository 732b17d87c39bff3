//! Plan retrieval through the external tool
//!
//! Each attempt runs the tool once against one tier with stdout and stderr
//! both redirected into a fresh capture file, then classifies what landed in
//! the file. The capture file is deleted as soon as the attempt is judged,
//! unless the attempt is valid and the caller takes it to persist.

use crate::attempt::{ProcessOutcome, RetrievalAttempt};
use crate::config::ToolConfig;
use crate::error::ResolveError;
use crate::tier::{PlanId, Tier};
use crate::validator::ContentValidator;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Highest numeric suffix tried when the output name is taken
const MAX_PERSIST_SUFFIX: u32 = 1000;

/// Probes install locations for the retrieval tool
#[derive(Debug, Clone)]
pub struct ToolLocator {
    candidates: Vec<PathBuf>,
    fallback: Option<PathBuf>,
}

impl ToolLocator {
    pub fn new(candidates: Vec<PathBuf>, fallback: Option<PathBuf>) -> Self {
        ToolLocator {
            candidates,
            fallback,
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.candidates.clone(), config.fallback.clone())
    }

    /// Every path checked, in order
    pub fn search_order(&self) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .chain(self.fallback.iter())
            .cloned()
            .collect()
    }

    /// First candidate that exists as a file, then the fallback
    pub fn locate(&self) -> Result<PathBuf> {
        let searched = self.search_order();
        for path in &searched {
            if path.is_file() {
                debug!("Found plan tool at {:?}", path);
                return Ok(path.clone());
            }
        }
        Err(ResolveError::ToolNotFound { searched })
    }
}

/// Tool arguments for one tier
///
/// Default: `<planId>`. Archive: `-tar <planId> -tardir <archivePath>`.
pub fn tool_args(plan_id: PlanId, tier: &Tier) -> Vec<OsString> {
    match tier {
        Tier::Default => vec![plan_id.to_string().into()],
        Tier::Archive(archive) => vec![
            "-tar".into(),
            plan_id.to_string().into(),
            "-tardir".into(),
            archive.path.clone().into_os_string(),
        ],
    }
}

/// Runs one retrieval. The seam between the search and the process.
#[async_trait]
pub trait PlanRetriever: Send + Sync {
    /// Retrieve `plan_id` from `tier`, writing all output into `capture`.
    ///
    /// Return `Err` only when no retrieval can ever succeed
    /// (`ToolNotFound`); every other problem is a `ProcessOutcome`.
    async fn retrieve(&self, plan_id: PlanId, tier: &Tier, capture: File)
        -> Result<ProcessOutcome>;

    /// Command line that reproduces the retrieval by hand
    fn reproducer(&self, plan_id: PlanId, tier: &Tier) -> String;
}

/// The external plan retrieval executable
#[derive(Debug, Clone)]
pub struct PlanTool {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl PlanTool {
    pub fn new(executable: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        PlanTool {
            executable: executable.into(),
            timeout,
        }
    }

    /// Locate the tool per `config`; fails fast with `ToolNotFound`
    pub fn locate(config: &ToolConfig) -> Result<Self> {
        let executable = ToolLocator::from_config(config).locate()?;
        info!("Using plan tool {:?}", executable);
        Ok(Self::new(executable, config.timeout()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl PlanRetriever for PlanTool {
    async fn retrieve(
        &self,
        plan_id: PlanId,
        tier: &Tier,
        capture: File,
    ) -> Result<ProcessOutcome> {
        let stderr = match capture.try_clone() {
            Ok(f) => f,
            Err(e) => {
                return Ok(ProcessOutcome::ProcessError {
                    message: format!("cannot share capture file: {e}"),
                })
            }
        };

        let mut command = Command::new(&self.executable);
        command
            .args(tool_args(plan_id, tier))
            .stdin(Stdio::null())
            .stdout(Stdio::from(capture))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::ToolNotFound {
                    searched: vec![self.executable.clone()],
                });
            }
            Err(e) => {
                return Ok(ProcessOutcome::ProcessError {
                    message: e.to_string(),
                })
            }
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(
                        "Plan tool exceeded {}s on {}, killing it",
                        limit.as_secs(),
                        tier.label()
                    );
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill plan tool: {}", e);
                    }
                    return Ok(ProcessOutcome::TimedOut {
                        limit_secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        };

        Ok(match waited {
            Ok(status) => ProcessOutcome::Exited {
                success: status.success(),
                code: status.code(),
            },
            Err(e) => ProcessOutcome::ProcessError {
                message: e.to_string(),
            },
        })
    }

    fn reproducer(&self, plan_id: PlanId, tier: &Tier) -> String {
        let args: Vec<String> = tool_args(plan_id, tier)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        format!("{} {}", self.executable.display(), args.join(" "))
    }
}

/// Temp file holding one attempt's output. Deleted on drop.
#[derive(Debug)]
pub struct CaptureFile {
    inner: NamedTempFile,
}

impl CaptureFile {
    /// Create `plan_<id>_<token>_XXXXXX.pln` in `dir`
    pub fn create(dir: &Path, plan_id: PlanId, token: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let inner = tempfile::Builder::new()
            .prefix(&format!("plan_{plan_id}_{token}_"))
            .suffix(".pln")
            .tempfile_in(dir)?;
        Ok(CaptureFile { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Fresh write handle for the child process
    fn sink(&self) -> std::io::Result<File> {
        self.inner.reopen()
    }

    async fn read_text(&self) -> std::io::Result<String> {
        let bytes = tokio::fs::read(self.path()).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Move the capture to `<dir>/<stem>.pln` without replacing anything.
    ///
    /// If that name is taken, `<stem>.1.pln`, `<stem>.2.pln`, ... are tried.
    pub fn persist_into(self, dir: &Path, stem: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|source| ResolveError::Persist {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut file = self.inner;
        for n in 0..=MAX_PERSIST_SUFFIX {
            let name = if n == 0 {
                format!("{stem}.pln")
            } else {
                format!("{stem}.{n}.pln")
            };
            let dest = dir.join(name);

            match file.persist_noclobber(&dest) {
                Ok(_) => return Ok(dest),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    file = e.file;
                }
                Err(e) => {
                    // Rename can fail across filesystems; copy instead.
                    debug!("Rename into {:?} failed ({}), copying", dest, e.error);
                    return copy_noclobber(e.file.path(), &dest).map(|()| dest);
                }
            }
        }

        Err(ResolveError::Persist {
            path: dir.join(format!("{stem}.pln")),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free artifact name",
            ),
        })
    }
}

fn copy_noclobber(src: &Path, dest: &Path) -> Result<()> {
    let persist_err = |source: std::io::Error| ResolveError::Persist {
        path: dest.to_path_buf(),
        source,
    };
    let mut reader = File::open(src).map_err(persist_err)?;
    let mut writer = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(persist_err)?;
    std::io::copy(&mut reader, &mut writer).map_err(persist_err)?;
    Ok(())
}

/// An attempt plus, when valid, its still-live capture file
#[derive(Debug)]
pub struct Extraction {
    pub attempt: RetrievalAttempt,
    capture: Option<CaptureFile>,
}

impl Extraction {
    /// Take the capture to persist it. `None` for invalid attempts.
    pub fn take_capture(&mut self) -> Option<CaptureFile> {
        self.capture.take()
    }
}

/// Runs and judges single retrieval attempts
pub struct PlanExtractor<R> {
    retriever: R,
    validator: ContentValidator,
    scratch_dir: PathBuf,
    token: String,
}

impl<R: PlanRetriever> PlanExtractor<R> {
    pub fn new(retriever: R, validator: ContentValidator, scratch_dir: impl Into<PathBuf>) -> Self {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(8);
        PlanExtractor {
            retriever,
            validator,
            scratch_dir: scratch_dir.into(),
            token,
        }
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    pub fn validator(&self) -> &ContentValidator {
        &self.validator
    }

    /// Token that keeps this extractor's capture names apart from others
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn reproducer(&self, plan_id: PlanId, tier: &Tier) -> String {
        self.retriever.reproducer(plan_id, tier)
    }

    /// Retrieve and classify `plan_id` from one tier.
    ///
    /// Fails only with `ToolNotFound` or when no capture file can be made.
    pub async fn extract(&self, plan_id: PlanId, tier: &Tier) -> Result<Extraction> {
        let capture = CaptureFile::create(&self.scratch_dir, plan_id, &self.token)?;
        let started_at = Utc::now();
        let start = Instant::now();

        let process = match capture.sink() {
            Ok(sink) => self.retriever.retrieve(plan_id, tier, sink).await?,
            Err(e) => ProcessOutcome::ProcessError {
                message: format!("cannot open capture file: {e}"),
            },
        };

        let text = match capture.read_text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read capture {:?}: {}", capture.path(), e);
                String::new()
            }
        };
        let verdict = self.validator.judge(&text, &process);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            plan_id = %plan_id,
            tier = %tier.label(),
            valid = verdict.is_valid(),
            bytes = text.len(),
            duration_ms,
            "Retrieval attempt classified"
        );

        let capture = if verdict.is_valid() {
            Some(capture)
        } else {
            drop(capture);
            None
        };

        Ok(Extraction {
            attempt: RetrievalAttempt {
                tier: tier.clone(),
                text,
                process,
                verdict,
                started_at,
                duration_ms,
            },
            capture,
        })
    }
}
