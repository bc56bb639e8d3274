pub mod handlers;

use crate::{
    background::queue::JobQueue,
    common::errors::{ErrorKind, ProcessingError},
    config::AppConfig,
};
use rocket::data::{Limits, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::{Build, Rocket};
use serde_json::json;
use std::io::Cursor;

use handlers::pipe::generate_pipe_routes;
use handlers::system::generate_system_routes;

/// Assembles the HTTP server around an already initialized queue.
pub fn build_rocket(config: &AppConfig, queue: JobQueue) -> Rocket<Build> {
    let upload_limit = config.upload_limit_mb.mebibytes();
    let limits = Limits::default()
        .limit("data-form", upload_limit)
        .limit("file", upload_limit);
    let figment = rocket::Config::figment()
        .merge(("shutdown.ctrlc", false))
        .merge(("limits", limits));

    rocket::custom(figment)
        .manage(queue)
        .manage(config.clone())
        .mount("/", generate_pipe_routes())
        .mount("/", generate_system_routes())
}

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: Status, error: impl Into<anyhow::Error>) -> Self {
        AppError {
            status,
            error: error.into(),
        }
    }

    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        AppError::new(Status::BadRequest, error)
    }

    /// Maps a job error onto the status that tells bad input, failures and timeouts apart.
    pub fn processing(err: ProcessingError) -> Self {
        let status = match err.kind() {
            ErrorKind::BadInput => Status::BadRequest,
            ErrorKind::Processing => Status::InternalServerError,
            ErrorKind::Timeout => Status::RequestTimeout,
            ErrorKind::Unavailable => Status::ServiceUnavailable,
        };
        AppError::new(status, err)
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: anyhow::Error::from(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
