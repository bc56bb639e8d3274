//! Per-job staging directories.
//!
//! Every job owns `<root>/input/<job id>/` and `<root>/output/<job id>/`. Job ids are v4 UUIDs, so
//! two jobs never share a directory and no locking is needed.

use crate::{
    common::{INPUT_DIR_NAME, OUTPUT_DIR_NAME, errors::ProcessingError},
    utils::{base_name, is_image_file},
};
use log::{info, warn};
use path_clean::PathClean;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// One uploaded file as received by the request handler.
pub struct Upload {
    pub filename: String,
    pub reader: Box<dyn Read + Send>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            filename: filename.into(),
            reader: Box::new(reader),
        }
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirs {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(work_root: impl AsRef<Path>) -> Self {
        let work_root = work_root.as_ref().clean();
        Self {
            input_root: work_root.join(INPUT_DIR_NAME),
            output_root: work_root.join(OUTPUT_DIR_NAME),
        }
    }

    pub fn dirs(&self, job_id: Uuid) -> ArtifactDirs {
        let name = job_id.to_string();
        ArtifactDirs {
            input: self.input_root.join(&name),
            output: self.output_root.join(&name),
        }
    }

    /// Creates the staging roots if they are missing.
    pub fn initialize_roots(&self) -> io::Result<()> {
        fs::create_dir_all(&self.input_root)?;
        fs::create_dir_all(&self.output_root)?;
        Ok(())
    }

    /// Removes job directories left behind by a previous process.
    ///
    /// Only entries named like a job id are touched. Returns how many directories were removed.
    pub fn purge_stale(&self) -> usize {
        let mut removed = 0;
        for root in [&self.input_root, &self.output_root] {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("Failed to list staging root {:?}: {}", root, err);
                    continue;
                }
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                let is_job_dir = path.is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| Uuid::parse_str(name).is_ok());
                if !is_job_dir {
                    continue;
                }
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!("Failed to remove stale job dir {:?}: {}", path, err),
                }
            }
        }
        if removed > 0 {
            info!("Removed {} stale job directories", removed);
        }
        removed
    }

    /// Writes the image uploads of a job into its input directory.
    ///
    /// Non-images and files that fail to persist are skipped. The job only fails when nothing
    /// survives, or when its directories cannot be created.
    pub fn stage_inputs(
        &self,
        job_id: Uuid,
        uploads: Vec<Upload>,
    ) -> Result<Vec<PathBuf>, ProcessingError> {
        let dirs = self.dirs(job_id);
        for dir in [&dirs.input, &dirs.output] {
            fs::create_dir_all(dir).map_err(|source| ProcessingError::Staging {
                path: dir.clone(),
                source,
            })?;
        }

        let mut staged = Vec::new();
        let mut seen = HashSet::new();
        for mut upload in uploads {
            if !is_image_file(&upload.filename) {
                warn!("Job {}: not an image file: {:?}", job_id, upload.filename);
                continue;
            }
            let Some(name) = base_name(&upload.filename) else {
                warn!("Job {}: unusable file name: {:?}", job_id, upload.filename);
                continue;
            };
            if !seen.insert(name.clone()) {
                warn!("Job {}: duplicate file name: {:?}", job_id, name);
                continue;
            }

            let dest = dirs.input.join(&name);
            if let Err(err) = persist(&mut upload.reader, &dest) {
                warn!("Job {}: failed to persist input file {:?}: {}", job_id, name, err);
                let _ = fs::remove_file(&dest);
                continue;
            }
            staged.push(dest);
        }

        if staged.is_empty() {
            return Err(ProcessingError::NoValidImages);
        }
        Ok(staged)
    }

    /// Output files the executor produced for the given upload names, in upload order.
    pub fn collect_outputs(&self, job_id: Uuid, filenames: &[String]) -> Vec<PathBuf> {
        let output_dir = self.dirs(job_id).output;
        let mut seen = HashSet::new();
        filenames
            .iter()
            .filter(|filename| is_image_file(filename))
            .filter_map(|filename| base_name(filename))
            .filter(|name| seen.insert(name.clone()))
            .map(|name| output_dir.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Deletes both job directories.
    ///
    /// Missing directories are not an error, so calling this twice is fine. Both removals are
    /// attempted even when the first one fails.
    pub fn cleanup(&self, job_id: Uuid) -> Result<(), ProcessingError> {
        let dirs = self.dirs(job_id);
        let errors: Vec<String> = [("input", &dirs.input), ("output", &dirs.output)]
            .into_iter()
            .filter_map(|(label, dir)| match remove_dir_if_exists(dir) {
                Ok(()) => None,
                Err(err) => Some(format!("failed to remove {} dir {:?}: {}", label, dir, err)),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProcessingError::Cleanup(errors))
        }
    }
}

fn persist(reader: &mut dyn Read, dest: &Path) -> io::Result<()> {
    let mut file = File::create(dest)?;
    io::copy(reader, &mut file)?;
    file.sync_all()
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
