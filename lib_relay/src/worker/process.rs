use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{WorkerError, WorkerSpec};

// How long to wait for the output pumps to hit EOF after the worker exited.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line the worker wrote, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// # Worker Process
///
/// A running auxiliary process plus the tasks that log its output.
///
/// Call [`terminate`](Self::terminate) on shutdown. Dropping the handle
/// without terminating still kills the process (`kill_on_drop`), but skips
/// the graceful SIGTERM.
pub struct WorkerProcess {
    command: String,
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Starts the worker with stdout and stderr captured into the log.
    pub fn launch(spec: &WorkerSpec) -> Result<Self, WorkerError> {
        Self::spawn(spec, None)
    }

    /// Like [`launch`](Self::launch), and also forwards every output line to `lines`.
    pub fn launch_observed(
        spec: &WorkerSpec,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<Self, WorkerError> {
        Self::spawn(spec, Some(lines))
    }

    fn spawn(
        spec: &WorkerSpec,
        lines: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Result<Self, WorkerError> {
        let command = spec.to_string();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            command: command.clone(),
            source,
        })?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, OutputStream::Stdout, lines.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, OutputStream::Stderr, lines)));
        }

        log::info!(
            "Worker `{}` started (pid {})",
            command,
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        Ok(Self {
            command,
            child,
            pumps,
        })
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking check whether the worker already exited.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, WorkerError> {
        self.child.try_wait().map_err(WorkerError::Wait)
    }

    /// # Terminate
    ///
    /// Sends the worker a termination request (SIGTERM on Unix) and waits up
    /// to `grace` for it to exit, then kills it. Returns its exit status.
    pub async fn terminate(mut self, grace: Duration) -> Result<ExitStatus, WorkerError> {
        let status = match self.try_status()? {
            Some(status) => {
                log::info!("Worker `{}` had already exited: {}", self.command, status);
                status
            }
            None => {
                self.request_stop()?;
                match tokio::time::timeout(grace, self.child.wait()).await {
                    Ok(waited) => waited.map_err(WorkerError::Wait)?,
                    Err(_) => {
                        log::warn!(
                            "Worker `{}` ignored termination for {:?}, killing it",
                            self.command,
                            grace
                        );
                        self.child.kill().await.map_err(WorkerError::Wait)?;
                        self.child.wait().await.map_err(WorkerError::Wait)?
                    }
                }
            }
        };

        for pump in self.pumps.drain(..) {
            let abort = pump.abort_handle();
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                // A grandchild can keep the pipe open after the worker itself is gone.
                abort.abort();
            }
        }

        log::info!("Worker `{}` stopped: {}", self.command, status);
        Ok(status)
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> Result<(), WorkerError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| WorkerError::Signal(format!("pid {} out of range", pid)))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(WorkerError::Signal(e.to_string())),
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> Result<(), WorkerError> {
        self.child
            .start_kill()
            .map_err(|e| WorkerError::Signal(e.to_string()))
    }
}

async fn pump<R>(reader: R, stream: OutputStream, lines: Option<mpsc::UnboundedSender<OutputLine>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                match stream {
                    OutputStream::Stdout => log::info!(target: "worker", "{}", line),
                    OutputStream::Stderr => log::warn!(target: "worker", "{}", line),
                }
                if let Some(tx) = &lines {
                    let _ = tx.send(OutputLine { stream, line });
                }
            }
            Err(e) => {
                log::warn!(target: "worker", "Reading worker {} failed: {}", stream, e);
                break;
            }
        }
    }
}
