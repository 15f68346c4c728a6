//! External process lifecycle: spawn with log redirection, PID persistence,
//! liveness probing, signal-based termination and reachability probes.

pub mod pid;

pub use pid::PidFile;

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::ProcessConfig;
use crate::errors::{Result, TflowError};

/// Everything needed to start one external command for a step.
#[derive(Debug, Clone)]
pub struct Launch {
    pub segment: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// stdout and stderr are appended here
    pub log_file: PathBuf,
    /// Written right after spawn and removed on normal exit
    pub pid_file: Option<PidFile>,
}

impl Launch {
    /// The command line as a shell would show it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a `stop` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No PID file was found
    NotFound,
    /// A PID file exists but nothing with that id is alive
    NotActive { pid: u32 },
    Killed { pid: u32 },
    /// The segment never runs an external process
    NotApplicable,
}

/// Result of a reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolProbe {
    Found { output: String },
    Unavailable { message: String },
}

impl ToolProbe {
    pub fn is_found(&self) -> bool {
        matches!(self, ToolProbe::Found { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ProcessController {
    settle: Duration,
    retry: Duration,
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new(&ProcessConfig::default())
    }
}

impl ProcessController {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            settle: Duration::from_millis(config.kill_settle_millis),
            retry: Duration::from_millis(config.kill_retry_millis),
        }
    }

    /// Run `launch` to completion.
    ///
    /// An interrupt delivered to this process kills the child first and
    /// then surfaces as `TflowError::Interrupted`. The PID file is left
    /// behind in that case.
    pub async fn run(&self, launch: &Launch) -> Result<std::process::ExitStatus> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&launch.log_file)
            .map_err(|e| TflowError::io(&launch.log_file, e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| TflowError::io(&launch.log_file, e))?;

        tracing::debug!(
            "spawning {} in {}",
            launch.command_line(),
            launch.working_dir.display()
        );

        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&launch.segment, &launch.program, e))?;

        if let (Some(pid_file), Some(pid)) = (&launch.pid_file, child.id()) {
            pid_file.write(pid)?;
        }

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| TflowError::io(&launch.log_file, e))?;
                if let Some(pid_file) = &launch.pid_file {
                    pid_file.remove()?;
                }
                tracing::debug!("{} exited with {}", launch.segment, status);
                Ok(status)
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupt received, killing {} process", launch.segment);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {} process: {}", launch.segment, e);
                }
                Err(TflowError::Interrupted {
                    action: format!("Running {}", launch.segment),
                })
            }
        }
    }

    /// Send SIGKILL until the process is confirmed gone.
    pub async fn terminate(&self, pid: u32) -> Result<()> {
        send_kill(pid)?;
        tokio::time::sleep(self.settle).await;
        while process_exists(pid) {
            tracing::info!("Continuing to try to kill process {}", pid);
            send_kill(pid)?;
            tokio::time::sleep(self.retry).await;
        }
        Ok(())
    }

    /// Stop whatever the PID file points at. A missing file is a report,
    /// not a failure; a stale file is reported and left in place.
    pub async fn stop(&self, pid_file: &PidFile) -> Result<StopOutcome> {
        let Some(pid) = pid_file.read()? else {
            return Ok(StopOutcome::NotFound);
        };
        if !process_exists(pid) {
            tracing::warn!(
                "PID file {} names process {} which is not running",
                pid_file.path().display(),
                pid
            );
            return Ok(StopOutcome::NotActive { pid });
        }
        self.terminate(pid).await?;
        Ok(StopOutcome::Killed { pid })
    }

    /// Check that `program` can be started at all. Any exit status counts
    /// as found; only a spawn failure makes the tool unavailable.
    pub async fn probe(&self, program: &str, args: &[String]) -> ToolProbe {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                ToolProbe::Found { output: text }
            }
            Err(e) => ToolProbe::Unavailable {
                message: e.to_string(),
            },
        }
    }
}

fn spawn_error(segment: &str, program: &str, err: std::io::Error) -> TflowError {
    if err.kind() == ErrorKind::NotFound {
        TflowError::environment(format!(
            "{} cannot be found with shell command: \"{}\"",
            segment, program
        ))
    } else {
        TflowError::environment(format!("Failed to start {} ({}): {}", segment, program, err))
    }
}

/// Non-destructive liveness probe. Only asks whether some process has this
/// id; it does not verify the process is the one originally spawned.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_kill(pid: u32) -> Result<()> {
    let raw = libc::pid_t::try_from(pid)
        .map_err(|_| TflowError::environment(format!("Process id {} is out of range", pid)))?;
    // SAFETY: plain kill(2) on a pid read from a PID file.
    let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(TflowError::environment(format!(
                "Failed to kill process {}: {}",
                pid, err
            )));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_kill(pid: u32) -> Result<()> {
    Err(TflowError::environment(format!(
        "Stopping process {} is only supported on unix",
        pid
    )))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quick_controller() -> ProcessController {
        ProcessController::new(&ProcessConfig {
            kill_settle_millis: 20,
            kill_retry_millis: 20,
        })
    }

    fn sh(working_dir: PathBuf, script: &str, pid_file: Option<PidFile>) -> Launch {
        Launch {
            segment: "Foo".into(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            log_file: working_dir.join("Foo.out"),
            working_dir,
            pid_file,
        }
    }

    #[tokio::test]
    async fn run_appends_output_and_cleans_pid_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Foo.out"), "previous\n").unwrap();
        let pid_file = PidFile::for_job(dir.path(), "Foo");
        let launch = sh(
            dir.path().to_path_buf(),
            "echo Started; echo oops >&2; test -f Foo.auto.pid && echo pid-present",
            Some(pid_file.clone()),
        );

        let status = quick_controller().run(&launch).await.unwrap();
        assert!(status.success());

        let log = std::fs::read_to_string(dir.path().join("Foo.out")).unwrap();
        assert!(log.starts_with("previous\n"));
        assert!(log.contains("Started"));
        assert!(log.contains("oops"));
        assert!(log.contains("pid-present"));
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn run_reports_exit_status() {
        let dir = tempdir().unwrap();
        let launch = sh(dir.path().to_path_buf(), "exit 3", None);
        let status = quick_controller().run(&launch).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_environment_error() {
        let dir = tempdir().unwrap();
        let mut launch = sh(dir.path().to_path_buf(), "", None);
        launch.program = "tflow-test-definitely-not-installed".into();
        match quick_controller().run(&launch).await {
            Err(TflowError::Environment { message }) => {
                assert!(message.contains("cannot be found"))
            }
            other => panic!("Expected Environment error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_without_pid_file_is_not_found() {
        let dir = tempdir().unwrap();
        let outcome = quick_controller()
            .stop(&PidFile::for_job(dir.path(), "Foo"))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::NotFound);
    }

    #[tokio::test]
    async fn stale_pid_file_is_reported_and_kept() {
        let dir = tempdir().unwrap();
        let pid_file = PidFile::for_job(dir.path(), "Foo");
        pid_file.write(2_147_483_000).unwrap();

        let outcome = quick_controller().stop(&pid_file).await.unwrap();
        assert_eq!(outcome, StopOutcome::NotActive { pid: 2_147_483_000 });
        assert!(pid_file.exists());
    }

    #[tokio::test]
    async fn stop_kills_live_process() {
        let dir = tempdir().unwrap();
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let pid_file = PidFile::for_job(dir.path(), "Foo");
        pid_file.write(pid).unwrap();

        // reap concurrently so the killed child does not linger as a zombie
        let reaper = tokio::spawn(async move { child.wait().await });
        let controller = quick_controller();
        let outcome = controller.stop(&pid_file).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed { pid });
        assert!(!reaper.await.unwrap().unwrap().success());
    }

    #[test]
    fn liveness_of_self_and_bogus_pid() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(0));
        assert!(!process_exists(2_147_483_000));
    }

    #[tokio::test]
    async fn probe_distinguishes_found_and_unavailable() {
        let controller = quick_controller();
        let found = controller.probe("sh", &["-c".into(), "echo hello".into()]).await;
        assert_eq!(
            found,
            ToolProbe::Found {
                output: "hello\n".into()
            }
        );
        let failing = controller.probe("sh", &["-c".into(), "exit 255".into()]).await;
        assert!(failing.is_found());
        let missing = controller
            .probe("tflow-test-definitely-not-installed", &[])
            .await;
        assert!(!missing.is_found());
    }
}
