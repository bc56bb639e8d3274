use crate::background::queue::{JobQueue, QueueStats};
use rocket::serde::json::Json;
use rocket::{Route, State, get, routes};

#[get("/api/queue/status")]
pub async fn queue_status(queue: &State<JobQueue>) -> Json<QueueStats> {
    Json(queue.stats())
}

pub fn generate_system_routes() -> Vec<Route> {
    routes![queue_status]
}
