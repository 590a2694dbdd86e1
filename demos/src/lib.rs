//! # chanio demos
//!
//! Run a demo with:
//!
//! ```bash
//! cargo run --example echo_server -- --debug
//! cargo run --example echo_client -- --message hello
//! cargo run --example http_client -- --host example.com --https
//! ```
#![warn(rust_2018_idioms)]

use std::io::Write;
use std::str::FromStr;

/// Installs the demo log format: `file:line [LEVEL] time - message`.
pub fn init_logger(log_level: &str) -> Result<(), log::ParseLevelError> {
    let log_level = log::LevelFilter::from_str(log_level)?;
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, log_level)
        .init();
    Ok(())
}
