//! Invocation of the external `cv` pipeline tool.
//!
//! The tool is called once per job:
//!
//! ```text
//! cv --output <abs output dir> --input <abs input>... --pipeline <pipeline json>
//! ```
//!
//! Exit code zero means every input was processed and written to the output directory under its
//! original file name.

use crate::{
    common::{EXECUTOR_POLL_INTERVAL, errors::ProcessingError},
    models::PipelineDescriptor,
};
use log::{debug, warn};
use std::{
    io::Read,
    path::{self, Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

/// Blocking capability that runs a pipeline over a batch of staged images.
///
/// Called from the blocking thread pool; implementations may block for as long as the tool runs
/// but should return [`ProcessingError::Cancelled`] soon after `cancel` fires.
pub trait PipelineExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        pipeline: &PipelineDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError>;
}

#[derive(Debug, Clone)]
pub struct CvExecutable {
    program: PathBuf,
}

impl CvExecutable {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_command(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        pipeline_json: &str,
    ) -> Result<Command, ProcessingError> {
        let abs_output = absolute(output_dir)?;
        let abs_inputs = input_paths
            .iter()
            .map(|p| absolute(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--output")
            .arg(abs_output)
            .arg("--input")
            .args(abs_inputs)
            .arg("--pipeline")
            .arg(pipeline_json);
        // Own process group, so cancelling also reaches anything the tool spawns.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

impl PipelineExecutor for CvExecutable {
    fn execute(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        pipeline: &PipelineDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError> {
        if input_paths.is_empty() {
            return Err(ProcessingError::execution("no input files to process", ""));
        }
        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let pipeline_json = pipeline.to_json().map_err(|err| {
            ProcessingError::execution(format!("failed to encode pipeline: {err}"), "")
        })?;
        debug!("Pipeline for {:?}: {}", output_dir, pipeline_json);

        let mut cmd = self.build_command(input_paths, output_dir, &pipeline_json)?;
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessingError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let waited = match wait_or_cancel(&mut child, cancel) {
            Ok(Some(status)) => Ok(status),
            // Output is not reported for a cancelled job; the readers end when the pipes close.
            Ok(None) => return Err(ProcessingError::Cancelled),
            Err(err) => Err(err),
        };

        let mut output = collect(stdout);
        let err_output = collect(stderr);
        if !output.is_empty() && !err_output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&err_output);

        match waited {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ProcessingError::execution(
                format!("{:?} failed: {}", self.program, status),
                output,
            )),
            Err(err) => Err(ProcessingError::execution(
                format!("failed to wait for {:?}: {}", self.program, err),
                output,
            )),
        }
    }
}

/// Polls the child until it exits or the token fires. `Ok(None)` means the child was killed.
fn wait_or_cancel(
    child: &mut Child,
    cancel: &CancellationToken,
) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if cancel.is_cancelled() {
            if let Err(err) = kill_tree(child) {
                warn!("Failed to kill cancelled pipeline process {}: {}", child.id(), err);
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(EXECUTOR_POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // The group is already gone; make sure the direct child is too.
        Err(Errno::ESRCH) => child.kill(),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn absolute(p: &Path) -> Result<PathBuf, ProcessingError> {
    path::absolute(p).map_err(|err| {
        ProcessingError::execution(format!("failed to get absolute path for {:?}: {}", p, err), "")
    })
}
