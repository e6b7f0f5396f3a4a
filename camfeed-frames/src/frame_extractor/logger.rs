use std::{fmt::Arguments, path::PathBuf};

/// A buffered log message from ffmpeg
pub struct Item {
    pub level: Level,
    pub target: String,
    pub body: String,
}

/// Where the extractor sends its messages, lets callers add context to ffmpeg's
/// otherwise context-less logs.
pub trait Logger {
    fn log(&self, level: Level, target: &str, body: Arguments<'_>);
    fn log_item(&self, item: Item) {
        self.log(item.level, &item.target, format_args!("{}", item.body))
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Level {
    Verbose,
    Info,
    Warn,
    Error,
}

pub struct LogLogger;

impl Logger for LogLogger {
    fn log(&self, level: Level, target: &str, body: Arguments<'_>) {
        let level = match level {
            Level::Verbose => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        };
        log::log!(target: target, level, "{}", body);
    }
}

/// Suffixes every message with the clip it is about.
pub struct ContextLogger {
    clip: PathBuf,
}

impl ContextLogger {
    pub fn new(clip: impl Into<PathBuf>) -> Self {
        Self { clip: clip.into() }
    }
}

impl Logger for ContextLogger {
    fn log(&self, level: Level, target: &str, body: Arguments<'_>) {
        LogLogger.log(
            level,
            target,
            format_args!("{} ({})", body, self.clip.display()),
        )
    }
}

macro_rules! warning {
    ($logger:expr, $($args:tt),* $(,)*) => {
        $logger.log(
            $crate::frame_extractor::logger::Level::Warn,
            std::module_path!(),
            std::format_args!($($args),*)
        )
    }
}

macro_rules! fault {
    ($logger:expr, $($args:tt),* $(,)*) => {
        $logger.log(
            $crate::frame_extractor::logger::Level::Error,
            std::module_path!(),
            std::format_args!($($args),*)
        )
    }
}

pub(crate) use fault;
pub(crate) use warning;
