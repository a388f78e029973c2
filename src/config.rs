use std::time::Duration;

pub struct Config {
    pub upload_dir: &'static str,
    pub processed_dir: &'static str,
    pub max_upload_bytes: usize,
    pub queue_capacity: usize,
    pub job_retention: Duration,
    pub sweep_interval: Duration,
    pub denoise_timeout: Option<Duration>,
}

// FIXME : these should be options (environment variables?) instead of being hardcoded

pub static CONFIG: Config = Config {
    upload_dir: "uploads",
    processed_dir: "processed",
    max_upload_bytes: 16 * 1024 * 1024,
    queue_capacity: 1024,
    job_retention: Duration::from_secs(24 * 60 * 60),
    sweep_interval: Duration::from_secs(60 * 60),
    denoise_timeout: Some(Duration::from_secs(120)),
};
