use std::{env, fmt, path::Path, time::SystemTime};

use ackmq_models::errors::SendableError;
use log::{info, Level, LevelFilter};

pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_line(SystemTime::now(), record.level(), record.target(), message)
            ))
        })
        .level(level)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn format_line(at: SystemTime, level: Level, target: &str, message: &fmt::Arguments) -> String {
    format!(
        "[{} {} {}] {}",
        humantime::format_rfc3339_seconds(at),
        level,
        target,
        message
    )
}

pub fn print_env() -> std::io::Result<()> {
    let path = env::current_dir()?;
    info!("The current directory is {}", path.display());
    Ok(())
}
