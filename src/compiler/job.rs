//! One compile of one page: translate, write, spawn, collect, finalize.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Translator, ARTIFACT_SUFFIX, GENERATED_SUFFIX, STAGING_SUFFIX, STRINGS_SUFFIX};
use crate::error::{PageError, Result};

// == Artifact Paths ==
/// Every file a page's compile reads or writes, derived from its source path.
///
/// The names are fixed per source, so two pages never collide and one page
/// always reuses the same names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub source: PathBuf,
    pub generated: PathBuf,
    pub strings: PathBuf,
    pub artifact: PathBuf,
    pub staged_strings: PathBuf,
    pub staged_artifact: PathBuf,
}

impl ArtifactPaths {
    pub fn derive(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let strings = with_suffix(&source, STRINGS_SUFFIX);
        let artifact = with_suffix(&source, ARTIFACT_SUFFIX);
        Self {
            generated: with_suffix(&source, GENERATED_SUFFIX),
            staged_strings: with_suffix(&strings, STAGING_SUFFIX),
            staged_artifact: with_suffix(&artifact, STAGING_SUFFIX),
            strings,
            artifact,
            source,
        }
    }

    /// Files that only exist while a compile is running.
    pub fn temporaries(&self) -> [&Path; 3] {
        [&self.generated, &self.staged_strings, &self.staged_artifact]
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

// == Compiler ==
/// Drives the external toolchain for page compiles.
#[derive(Clone)]
pub struct Compiler {
    toolchain: String,
    translator: Arc<dyn Translator>,
    timeout: Option<Duration>,
}

impl Compiler {
    pub fn new(toolchain: impl Into<String>, translator: Arc<dyn Translator>) -> Self {
        Self {
            toolchain: toolchain.into(),
            translator,
            timeout: None,
        }
    }

    /// Kills the toolchain and fails the compile once `timeout` elapses.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compiles `paths.source` into `paths.artifact`.
    ///
    /// The toolchain runs in `work_dir` with `flags`, then the page's own
    /// flags, then `<generated> -o <staged artifact>`. Temporary files are
    /// removed whatever the outcome.
    pub async fn compile(&self, work_dir: &Path, paths: &ArtifactPaths, flags: &[String]) -> Result<()> {
        let outcome = self.run(work_dir, paths, flags).await;
        remove_temporaries(paths).await;
        match &outcome {
            Ok(()) => info!(source = %paths.source.display(), "page compiled"),
            Err(e) => warn!(source = %paths.source.display(), error = %e, "page compile failed"),
        }
        outcome
    }

    async fn run(&self, work_dir: &Path, paths: &ArtifactPaths, flags: &[String]) -> Result<()> {
        let name = paths.source.to_string_lossy().into_owned();
        let raw = fs::read(&paths.source)
            .await
            .map_err(|e| PageError::fs(&paths.source, e))?;
        let text = String::from_utf8(raw)
            .map_err(|e| PageError::parse(&name, format!("source is not UTF-8: {e}"), 0))?;

        let translation = self.translator.translate(&name, &text)?;

        fs::write(&paths.generated, translation.source.as_bytes())
            .await
            .map_err(|e| PageError::fs(&paths.generated, e))?;
        fs::write(&paths.staged_strings, &translation.string_table)
            .await
            .map_err(|e| PageError::fs(&paths.staged_strings, e))?;

        let mut command = Command::new(&self.toolchain);
        command
            .args(flags)
            .args(&translation.flags)
            .arg(&paths.generated)
            .arg("-o")
            .arg(&paths.staged_artifact)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(toolchain = %self.toolchain, source = %name, "spawning compiler");

        let (status, output) = match self.spawn_and_collect(command).await? {
            Finished::Exited(status, output) => (status, output),
            Finished::TimedOut(limit, output) => {
                return Err(PageError::Compile {
                    path: name,
                    message: format!("compiler timed out after {}s", limit.as_secs_f64()),
                    output: String::from_utf8_lossy(&output).into_owned(),
                });
            }
        };

        if !status.success() {
            return Err(PageError::Compile {
                path: name,
                message: format!("compiler exited with {status}"),
                output: String::from_utf8_lossy(&output).into_owned(),
            });
        }

        fs::rename(&paths.staged_artifact, &paths.artifact)
            .await
            .map_err(|e| PageError::fs(&paths.staged_artifact, e))?;
        fs::rename(&paths.staged_strings, &paths.strings)
            .await
            .map_err(|e| PageError::fs(&paths.staged_strings, e))?;
        Ok(())
    }

    /// Runs the toolchain to exit or until the timeout, keeping whatever
    /// output arrived either way.
    async fn spawn_and_collect(&self, mut command: Command) -> Result<Finished> {
        let program = PathBuf::from(&self.toolchain);
        let mut child = command.spawn().map_err(|e| PageError::fs(&program, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut output = Vec::new();
        let run = async {
            collect_output(stdout, stderr, &mut output).await?;
            child.wait().await
        };
        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        match waited {
            Some(status) => {
                let status = status.map_err(|e| PageError::fs(&program, e))?;
                Ok(Finished::Exited(status, output))
            }
            None => {
                if let Err(e) = child.kill().await {
                    warn!(toolchain = %self.toolchain, error = %e, "failed to kill timed out compiler");
                }
                Ok(Finished::TimedOut(self.timeout.unwrap_or_default(), output))
            }
        }
    }
}

/// How a toolchain run ended.
enum Finished {
    Exited(ExitStatus, Vec<u8>),
    TimedOut(Duration, Vec<u8>),
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("toolchain", &self.toolchain)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Reads both pipes into `output` until they close, interleaving chunks in
/// arrival order. Chunks already appended survive if this is cancelled.
async fn collect_output<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    output: &mut Vec<u8>,
) -> io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let (mut out_open, mut err_open) = (stdout.is_some(), stderr.is_some());
    let (mut stdout, mut stderr) = (stdout, stderr);

    while out_open || err_open {
        tokio::select! {
            read = read_some(&mut stdout, &mut out_buf), if out_open => match read? {
                0 => out_open = false,
                n => output.extend_from_slice(&out_buf[..n]),
            },
            read = read_some(&mut stderr, &mut err_buf), if err_open => match read? {
                0 => err_open = false,
                n => output.extend_from_slice(&err_buf[..n]),
            },
        }
    }
    Ok(())
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

async fn remove_temporaries(paths: &ArtifactPaths) {
    for path in paths.temporaries() {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed temporary"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary"),
        }
    }
}
