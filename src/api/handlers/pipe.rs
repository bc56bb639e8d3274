use crate::api::{AppError, AppResult};
use crate::background::processors::archive;
use crate::background::queue::JobQueue;
use crate::common::ARCHIVE_FILENAME;
use crate::config::{AdmissionPolicy, AppConfig};
use crate::models::PipelineDescriptor;
use anyhow::anyhow;
use log::{error, info, warn};
use rocket::form::{Errors, Form, FromForm};
use rocket::fs::TempFile;
use rocket::http::Header;
use rocket::response::Responder;
use rocket::{Route, State, post, routes};
use std::io::{Cursor, Read};
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::task::spawn_blocking;

#[derive(FromForm, Debug)]
pub struct PipeForm<'r> {
    /// Images in the order the editor sent them
    #[field(name = "images")]
    pub images: Vec<TempFile<'r>>,

    /// Pipeline graph as JSON
    #[field(name = "data")]
    pub data: Option<String>,
}

#[derive(Responder)]
#[response(status = 200, content_type = "application/zip")]
pub struct ZipResponse {
    body: Vec<u8>,
    disposition: Header<'static>,
}

impl ZipResponse {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename={}", ARCHIVE_FILENAME),
            ),
        }
    }
}

/// The name the client gave the file, before Rocket's sanitizing. The artifact store strips
/// directories itself.
fn get_filename(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default()
}

/// Reader over an uploaded file for the worker to stage from.
///
/// Multipart files live on disk, so the job keeps an open descriptor instead of the bytes. The
/// descriptor stays valid after Rocket removes the temp file with the form.
async fn open_upload(file: &TempFile<'_>) -> std::io::Result<Box<dyn Read + Send>> {
    if let Some(path) = file.path() {
        let file = tokio::fs::File::open(path).await?;
        return Ok(Box::new(file.into_std().await));
    }

    let reader = file.open().await?;
    tokio::pin!(reader);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Box::new(Cursor::new(buf)))
}

#[post("/api/pipe", data = "<form>")]
pub async fn pipe(
    queue: &State<JobQueue>,
    config: &State<AppConfig>,
    form: Result<Form<PipeForm<'_>>, Errors<'_>>,
) -> AppResult<ZipResponse> {
    let inner_form = match form {
        Ok(form) => form.into_inner(),
        Err(errors) => {
            let error_chain = errors
                .iter()
                .map(|e| anyhow!(e.to_string()))
                .reduce(|acc, e| acc.context(e.to_string()));

            return match error_chain {
                Some(chain) => Err(AppError::bad_request(
                    chain.context("Failed to parse form data"),
                )),
                None => Err(AppError::bad_request(anyhow!("Failed to parse form data"))),
            };
        }
    };

    if inner_form.images.is_empty() {
        return Err(AppError::bad_request(anyhow!("No images uploaded")));
    }
    let data = inner_form
        .data
        .ok_or_else(|| AppError::bad_request(anyhow!("Pipeline data not provided")))?;
    let pipeline = PipelineDescriptor::from_json(&data)
        .map_err(|err| AppError::bad_request(anyhow!(err).context("Invalid pipeline data JSON")))?;

    let mut files: Vec<Box<dyn Read + Send>> = Vec::with_capacity(inner_form.images.len());
    let mut filenames = Vec::with_capacity(inner_form.images.len());
    for file in &inner_form.images {
        let filename = get_filename(file);
        match open_upload(file).await {
            Ok(reader) => {
                files.push(reader);
                filenames.push(filename);
            }
            Err(err) => warn!("Failed to read uploaded file {:?}: {}", filename, err),
        }
    }

    let start_time = Instant::now();
    let handle = match config.admission {
        AdmissionPolicy::Block => queue.submit(files, filenames, pipeline).await,
        AdmissionPolicy::Reject => queue.try_submit(files, filenames, pipeline),
    }
    .map_err(|err| {
        error!("Failed to submit job: {}", err);
        AppError::processing(err)
    })?;
    let job_id = handle.id();

    let result = handle
        .wait(config.result_timeout())
        .await
        .map_err(|err| {
            error!("Job {} was not answered: {}", job_id, err);
            AppError::processing(err)
        })?;

    let store = queue.artifacts().clone();
    let archived = spawn_blocking(move || {
        let archived = result.into_result().and_then(|outputs| archive(&outputs));
        if let Err(err) = store.cleanup(job_id) {
            warn!("Job {}: {}", job_id, err);
        }
        archived
    })
    .await?;

    let bytes = archived.map_err(|err| {
        error!("Processing failed for job {}: {}", job_id, err);
        AppError::processing(err)
    })?;
    info!(duration = &*format!("{:?}", start_time.elapsed());
        "Job {} answered with {} byte archive",
        job_id,
        bytes.len()
    );
    Ok(ZipResponse::new(bytes))
}

pub fn generate_pipe_routes() -> Vec<Route> {
    routes![pipe]
}
