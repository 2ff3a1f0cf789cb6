//! Host process runner.
//!
//! Spawns the child directly on the host, in its own process group, feeds
//! its stdin, and collects stdout and stderr concurrently. The request is
//! over when the child exits, not when its pipes close: descendants that
//! inherited the pipes get a short grace period to flush, then the group is
//! killed. When the invocation carries limits the memory ceiling is installed
//! before exec and the wait runs under the wall-clock timeout; on expiry the
//! whole group is killed.

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, instrument, warn};

use super::{ExitKind, Invocation, ProcessOutput, ProcessRunner};
use crate::error::ProcessError;
use crate::governor::apply_memory_ceiling;

/// How long output pipes may stay open after the child itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone)]
pub struct HostProcessRunner {}

impl HostProcessRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl ProcessRunner for HostProcessRunner {
    #[instrument(skip(self, invocation), fields(program = %invocation.program))]
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Group leader, so a timeout can take down everything the guest spawned
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        if let Some(bytes) = invocation.limits.and_then(|l| l.memory_bytes) {
            apply_memory_ceiling(&mut cmd, bytes);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        // The group id; only meaningful while the child has not been reaped
        let group = child.id();

        // Take pipe handles out so `child` stays usable for kill-on-timeout
        let stdin = child.stdin.take();
        let child_stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let child_stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let status = {
            let pumps = async {
                let (fed, out, err) = tokio::join!(
                    feed_stdin(stdin, invocation.stdin.as_deref()),
                    pump(child_stdout, &mut stdout_buf),
                    pump(child_stderr, &mut stderr_buf),
                );
                fed?;
                out.map_err(|source| ProcessError::Io {
                    action: "read stdout of",
                    source,
                })?;
                err.map_err(|source| ProcessError::Io {
                    action: "read stderr of",
                    source,
                })?;
                Ok::<_, ProcessError>(())
            };
            tokio::pin!(pumps);
            let mut pumped = false;

            let status = match invocation.limits {
                Some(limits) => {
                    let timed = tokio::time::timeout(
                        limits.timeout,
                        wait_while_pumping(&mut child, pumps.as_mut(), &mut pumped),
                    )
                    .await;
                    if let Ok(result) = timed {
                        result?
                    } else {
                        kill_group(group);
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Failed to kill timed-out process");
                        }
                        debug!(timeout = ?limits.timeout, "Process timed out");
                        return Ok(ProcessOutput {
                            exit: ExitKind::TimedOut,
                            stdout: String::new(),
                            stderr: String::new(),
                        });
                    }
                }
                None => wait_while_pumping(&mut child, pumps.as_mut(), &mut pumped).await?,
            };

            if !pumped {
                match tokio::time::timeout(DRAIN_GRACE, pumps.as_mut()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!("Descendants still hold the output pipes; killing group");
                        kill_group(group);
                    }
                }
            }
            status
        };

        let output = ProcessOutput {
            exit: ExitKind::Exited(exit_code(status)),
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        };

        debug!(exit = ?output.exit, "Process completed");

        Ok(output)
    }
}

/// Wait for the child to exit while driving the pipe pumps.
///
/// Returns as soon as the child exits, whether or not the pumps have seen
/// EOF; `pumped` records whether they have.
async fn wait_while_pumping<F>(
    child: &mut Child,
    mut pumps: Pin<&mut F>,
    pumped: &mut bool,
) -> Result<ExitStatus, ProcessError>
where
    F: Future<Output = Result<(), ProcessError>>,
{
    loop {
        tokio::select! {
            status = child.wait() => {
                return status.map_err(|source| ProcessError::Io {
                    action: "wait for",
                    source,
                });
            }
            result = pumps.as_mut(), if !*pumped => {
                result?;
                *pumped = true;
            }
        }
    }
}

/// Copy a pipe into `buf` chunk by chunk, so whatever was read survives if
/// the pump is abandoned.
async fn pump<P: AsyncRead + Unpin>(mut pipe: P, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // Nothing left in the group
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
const fn kill_group(_group: Option<u32>) {}

async fn feed_stdin(pipe: Option<ChildStdin>, input: Option<&str>) -> Result<(), ProcessError> {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return Ok(());
    };
    match pipe.write_all(input.as_bytes()).await {
        // The guest may exit without reading its input.
        Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(ProcessError::Io {
            action: "write to",
            source: e,
        }),
        _ => Ok(()),
    }
}


fn missing_pipe(name: &str) -> ProcessError {
    ProcessError::Io {
        action: "open pipes of",
        source: std::io::Error::other(format!("{name} was not captured")),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::governor::ResourceLimits;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
            stdin: None,
            limits: None,
        }
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let output = HostProcessRunner::new()
            .run(&sh("echo out; echo err >&2"))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn pipes_stdin() {
        let mut inv = sh("cat");
        inv.stdin = Some("line one\nline two\n".to_string());
        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(output.stdout, "line one\nline two\n");
    }

    #[tokio::test]
    async fn unread_stdin_is_not_an_error() {
        let mut inv = sh("exit 0");
        inv.stdin = Some("x".repeat(1 << 20));
        tokio_test::assert_ok!(HostProcessRunner::new().run(&inv).await);
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let output = HostProcessRunner::new().run(&sh("exit 3")).await.unwrap();
        assert_eq!(output.exit, ExitKind::Exited(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn signal_maps_to_128_plus() {
        let output = HostProcessRunner::new()
            .run(&sh("kill -9 $$"))
            .await
            .unwrap();
        assert_eq!(output.exit, ExitKind::Exited(137));
    }

    #[tokio::test]
    async fn runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = sh("pwd");
        inv.cwd = Some(dir.path().to_path_buf());
        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        let reported = std::path::PathBuf::from(output.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let mut inv = sh("sleep 30");
        inv.limits = Some(ResourceLimits::new(Duration::from_millis(200), None));

        let started = Instant::now();
        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(output.exit, ExitKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn exit_does_not_wait_for_inherited_pipes() {
        let mut inv = sh("sleep 30 & echo done");
        inv.limits = Some(ResourceLimits::new(Duration::from_secs(10), None));

        let started = Instant::now();
        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(output.exit, ExitKind::Exited(0));
        assert_eq!(output.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unlimited_run_does_not_wait_for_inherited_pipes() {
        let started = Instant::now();
        let output = HostProcessRunner::new()
            .run(&sh("sleep 30 & echo built >&2; exit 2"))
            .await
            .unwrap();
        assert_eq!(output.exit, ExitKind::Exited(2));
        assert_eq!(output.stderr, "built\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = sh("sleep 30 & echo $! > grandchild; wait");
        inv.cwd = Some(dir.path().to_path_buf());
        inv.limits = Some(ResourceLimits::new(Duration::from_millis(500), None));

        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(output.exit, ExitKind::TimedOut);

        let pid = std::fs::read_to_string(dir.path().join("grandchild")).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(pid) {
            assert!(Instant::now() < deadline, "grandchild {pid} survived the timeout");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Running and not a zombie awaiting its reaper.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            stat.rsplit_once(')')
                .is_some_and(|(_, rest)| !rest.trim_start().starts_with(['Z', 'X']))
        })
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn memory_ceiling_is_applied() {
        let mut inv = sh("ulimit -v");
        inv.limits = Some(ResourceLimits::new(Duration::from_secs(5), Some(64)));
        let output = HostProcessRunner::new().run(&inv).await.unwrap();
        assert_eq!(output.stdout.trim(), (64 * 1024).to_string());
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let inv = Invocation {
            program: "/nonexistent/polyexec-binary".to_string(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            limits: None,
        };
        let err = HostProcessRunner::new().run(&inv).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
