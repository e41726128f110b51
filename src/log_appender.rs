use anyhow::{anyhow, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::path::Path;

const LOG_FILE_LIMIT: u64 = 10 * 1024 * 1024;
const LOG_ARCHIVES: u32 = 3;

pub fn setup_logging(log_dir: &Path, level: LevelFilter) -> Result<()> {
    let logs = log_dir.join("logs");
    fs::create_dir_all(&logs)?;

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({l})} {d(%Y-%m-%d %H:%M:%S)} {M} - {m}{n}")))
        .build();

    // Keep the last few rolled files, gzip-compressed
    let archive_pattern = logs.join("clouddrive.{}.log.gz");
    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(path_str(&archive_pattern)?, LOG_ARCHIVES)?;

    let trigger = SizeTrigger::new(LOG_FILE_LIMIT);
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} {M}::{m}{n}")))
        .build(logs.join("clouddrive.log"), Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(Root::builder().appender("stdout").appender("file").build(level))?;

    log4rs::init_config(config)?;
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("Log path is not valid UTF-8: {}", path.display()))
}
