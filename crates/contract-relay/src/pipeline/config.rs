use std::path::PathBuf;

use crate::config::WorkerConfig;

pub struct PipelineConfig {
    pub bucket_name: String,
    pub output_directory: PathBuf,
    /// Error payloads are only published on the final receive.
    pub max_receive_count: u32,
}

impl PipelineConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            bucket_name: config.bucket_name.clone(),
            output_directory: config.output_directory.clone(),
            max_receive_count: config.queue.max_receive_count,
        }
    }
}
