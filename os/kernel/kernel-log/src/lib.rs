//! # Host Logging
//!
//! The kernel crates only talk to the [`log`] facade. This crate provides the
//! backend an emulator host installs to see those messages: [`HostLogger`]
//! writes one line per record to standard error.
//!
//! ```text
//! [DEBUG] hle_kernel::shared_memory: mapped shared memory 'font' ...
//! [ERROR] hle_kernel::shared_memory: unmap size 0x1000 does not match ...
//! ```
//!
//! ## Usage
//! ```rust
//! use log::{LevelFilter, info};
//!
//! kernel_log::init(LevelFilter::Debug).unwrap();
//! info!("kernel ready");
//!
//! // Installing again is fine and only adjusts the global filter.
//! kernel_log::init(LevelFilter::Warn).unwrap();
//! ```

mod logger;

pub use logger::HostLogger;
use log::{LevelFilter, SetLoggerError};
use std::sync::OnceLock;

static LOGGER: OnceLock<HostLogger> = OnceLock::new();

/// Install [`HostLogger`] as the global logger with the given level.
///
/// The first call installs the logger. Later calls keep it and only set
/// [`log::max_level`], which can narrow but not widen what the installed
/// logger prints.
///
/// # Errors
/// Fails if a different logger was installed before the first call.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    let mut first = false;
    let logger = LOGGER.get_or_init(|| {
        first = true;
        HostLogger::new(level)
    });
    if first {
        log::set_logger(logger)?;
    }
    log::set_max_level(level.min(logger.max_level()));
    Ok(())
}
