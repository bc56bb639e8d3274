pub mod errors;

use std::time::Duration;

/// Extensions accepted as pipeline input. Compared against the lowercased extension.
pub const VALID_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_UPLOAD_LIMIT_MB: u64 = 512;

/// How often a running executor checks its cancellation token.
pub const EXECUTOR_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const INPUT_DIR_NAME: &str = "input";

pub const OUTPUT_DIR_NAME: &str = "output";

pub const ARCHIVE_FILENAME: &str = "processed_images.zip";
