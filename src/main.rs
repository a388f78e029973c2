use std::sync::Arc;
use std::thread;

use crate::config::CONFIG;
use crate::denoise::FfmpegDenoiser;
use crate::lifecycle::JobService;
use crate::store::JobStore;
use crate::web::start_web_server;

mod command;
mod config;
mod denoise;
mod error;
mod lifecycle;
mod models;
mod processor;
mod queue;
mod store;
mod web;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    std::fs::create_dir_all(CONFIG.upload_dir)?;
    std::fs::create_dir_all(CONFIG.processed_dir)?;

    let jobs = Arc::new(JobStore::new());
    let (tx, rx) = queue::bounded(CONFIG.queue_capacity);

    processor::spawn(rx, jobs.clone(), FfmpegDenoiser)?;

    let service = JobService::new(jobs, tx);

    let sweeper = service.clone();
    thread::Builder::new()
        .name("cleanup".to_owned())
        .spawn(move || lifecycle::cleanup_loop(sweeper))?;

    start_web_server(service).await
}
