use std::path::Path;

use crate::logger::{self, print_env};
use ackmq_models::errors::SendableError;
use log::{info, LevelFilter};

pub fn startup(name: &str, log_file: Option<&Path>) -> Result<(), SendableError> {
    logger::setup_logger(LevelFilter::Info, log_file)?;
    log_panics::init();

    info!("--- {} ---", name);
    print_env()?;

    Ok(())
}
