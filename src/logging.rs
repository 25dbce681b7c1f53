use log::LevelFilter;

pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Maps a `LOG_LEVEL` value to a filter. Anything unrecognized keeps the
/// tool quiet apart from errors.
pub fn level_from(value: Option<&str>) -> LevelFilter {
    match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
        Some("DEBUG") => LevelFilter::Debug,
        Some("INFO") => LevelFilter::Info,
        Some("WARN") => LevelFilter::Warn,
        _ => LevelFilter::Error,
    }
}

/// Installs the global logger on stderr, one line per event.
pub fn init(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();
}
