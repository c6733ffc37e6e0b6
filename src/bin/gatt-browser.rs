use clap::Parser;
use log::{error, info};
use gatt_browser::{init_logging, run};
use gatt_browser::cli::Args;
use gatt_browser::error::AppRunError;

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.log_level());
    info!(concat!("GATT Browser ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(err) => {
            error!("{}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
