use std::env;
use log::LevelFilter;
use crate::cli::{execute, Args};
use crate::error::AppRunError;

pub mod bridge;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod formula;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod series;
pub mod session;
pub mod sim;

pub fn init_logging(level: LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    execute(args)
}
