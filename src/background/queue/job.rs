use crate::{
    background::processors::Upload, common::errors::ProcessingError, models::PipelineDescriptor,
};
use std::{io::Read, path::PathBuf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle::JobHandle;

/// Outcome of one job, delivered exactly once through its [`JobHandle`].
#[derive(Debug)]
pub struct ProcessingResult {
    pub job_id: Uuid,
    /// Produced files in upload order. Empty when `error` is set.
    pub output_files: Vec<PathBuf>,
    pub error: Option<ProcessingError>,
}

impl ProcessingResult {
    pub fn success(job_id: Uuid, output_files: Vec<PathBuf>) -> Self {
        Self {
            job_id,
            output_files,
            error: None,
        }
    }

    pub fn failure(job_id: Uuid, error: ProcessingError) -> Self {
        Self {
            job_id,
            output_files: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<PathBuf>, ProcessingError> {
        match self.error {
            None => Ok(self.output_files),
            Some(err) => Err(err),
        }
    }
}

pub(crate) struct Job {
    pub id: Uuid,
    pub uploads: Vec<Upload>,
    pub filenames: Vec<String>,
    pub pipeline: PipelineDescriptor,
    pub result_tx: oneshot::Sender<ProcessingResult>,
    pub cancel: CancellationToken,
}

impl Job {
    /// Pairs the upload streams with their names and creates the job's result channel.
    pub fn new(
        files: Vec<Box<dyn Read + Send>>,
        filenames: Vec<String>,
        pipeline: PipelineDescriptor,
        parent: &CancellationToken,
    ) -> Result<(Job, JobHandle), ProcessingError> {
        if files.len() != filenames.len() {
            return Err(ProcessingError::InvalidSubmission(format!(
                "{} files but {} filenames",
                files.len(),
                filenames.len()
            )));
        }

        let uploads = files
            .into_iter()
            .zip(filenames.iter())
            .map(|(reader, filename)| Upload {
                filename: filename.clone(),
                reader,
            })
            .collect();

        let id = Uuid::new_v4();
        let cancel = parent.child_token();
        let (result_tx, result_rx) = oneshot::channel();
        let handle = JobHandle::new(id, result_rx, cancel.clone());
        let job = Job {
            id,
            uploads,
            filenames,
            pipeline,
            result_tx,
            cancel,
        };
        Ok((job, handle))
    }
}
