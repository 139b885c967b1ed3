use crate::config::{LoggingConfig, Section};
use parking_lot::Mutex;
use std::{
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    filter::{FilterFn, Targets},
    fmt,
};

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};

// -------- level helpers --------
fn parse_tracing_level(s: &str) -> Option<tracing::Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target == crate_name
        || (target.starts_with(crate_name) && target[crate_name.len()..].starts_with("::"))
}

type MetaPredicate = Box<dyn Fn(&tracing::Metadata<'_>) -> bool + Send + Sync + 'static>;

/// Passes records at or above `max_level` whose target is not claimed by an explicit section.
fn unclaimed_targets_filter(
    crate_names: &[String],
    max_level: Option<Level>,
) -> FilterFn<MetaPredicate> {
    let crates = crate_names.to_vec();
    let predicate: MetaPredicate = Box::new(move |meta: &tracing::Metadata<'_>| {
        let Some(max_level) = max_level else {
            return false;
        };
        if crates.iter().any(|c| matches_crate_prefix(meta.target(), c)) {
            return false;
        }
        meta.level() <= &max_level
    });
    FilterFn::new(predicate)
}

// -------- rotating writer for files --------
#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendCount>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

struct RotWriterHandle(Arc<Mutex<FileRotate<AppendCount>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Resolve a log file path against `base_dir` (home_dir).
/// Absolute paths are kept as-is; relative paths are joined with `base_dir`.
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer(section: &Section, base_dir: &Path) -> std::io::Result<RotWriter> {
    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) * 1024 * 1024;
    let rot = FileRotate::new(
        log_path,
        AppendCount::new(section.max_backups.unwrap_or(3)),
        ContentLimit::BytesSurpassed(max_bytes as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn explicit_targets(
    sections: &[(&String, &Section)],
    level_of: impl Fn(&Section) -> &str,
) -> Targets {
    sections
        .iter()
        .fold(Targets::new().with_default(LevelFilter::OFF), |targets, (name, section)| {
            let level = parse_tracing_level(level_of(*section))
                .map(LevelFilter::from_level)
                .unwrap_or(LevelFilter::OFF);
            targets.with_target(name.as_str(), level)
        })
}

/// Initialize logging from a configuration.
/// - `cfg`: the "default" section drives everything not named explicitly;
///   other keys are target prefixes (e.g. "apikit::http") with their own levels
/// - `base_dir`: resolves a relative `file` of the "default" section
///
/// Records go to the console and, when the "default" section names a file,
/// as JSON lines to a size-rotated file.
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, prelude::*, Registry};

    // Bridge `log` → `tracing` *before* installing the subscriber
    let _ = tracing_log::LogTracer::init();

    let Some(default_section) = cfg.get("default") else {
        init_default_logging();
        return;
    };

    let sections: Vec<(&String, &Section)> =
        cfg.iter().filter(|(k, _)| k.as_str() != "default").collect();
    let crate_names: Vec<String> = sections.iter().map(|(k, _)| (*k).clone()).collect();
    let ansi = std::io::stdout().is_terminal();

    let console_explicit = fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(explicit_targets(&sections, |s| s.console_level.as_str()));
    let console_default = fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(unclaimed_targets_filter(
            &crate_names,
            parse_tracing_level(&default_section.console_level),
        ));

    let writer = if default_section.file.trim().is_empty() {
        None
    } else {
        match create_rotating_writer(default_section, base_dir) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("Failed to initialize log file '{}': {e}", default_section.file);
                None
            }
        }
    };

    let file_explicit = writer.clone().map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .with_filter(explicit_targets(&sections, |s| s.file_level.as_str()))
    });
    let file_default = writer.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .with_filter(unclaimed_targets_filter(
                &crate_names,
                parse_tracing_level(&default_section.file_level),
            ))
    });

    let _ = Registry::default()
        .with(console_explicit)
        .with(console_default)
        .with(file_explicit)
        .with(file_default)
        .try_init();
}

fn init_default_logging() {
    let _ = fmt()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level("warn"), Some(Level::WARN));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("bogus"), Some(Level::INFO));
    }

    #[test]
    fn crate_prefix_requires_path_separator() {
        assert!(matches_crate_prefix("apikit", "apikit"));
        assert!(matches_crate_prefix("apikit::http::binder", "apikit"));
        assert!(!matches_crate_prefix("apikit_extra", "apikit"));
        assert!(!matches_crate_prefix("runtime", "apikit"));
    }

    #[test]
    fn relative_log_paths_join_base_dir() {
        let base = Path::new("/srv/app");
        assert_eq!(
            resolve_log_path("logs/api.log", base),
            PathBuf::from("/srv/app/logs/api.log")
        );
        assert_eq!(
            resolve_log_path("/tmp/api.log", base),
            PathBuf::from("/tmp/api.log")
        );
    }

    #[test]
    fn rotating_writer_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let section = Section {
            console_level: "info".into(),
            file: "nested/dir/api.log".into(),
            file_level: "debug".into(),
            max_backups: Some(1),
            max_size_mb: Some(1),
        };

        let writer = create_rotating_writer(&section, tmp.path()).unwrap();
        let mut handle = RotWriterHandle(writer.0.clone());
        handle.write_all(b"{\"msg\":\"hello\"}\n").unwrap();
        handle.flush().unwrap();

        let written = std::fs::read_to_string(tmp.path().join("nested/dir/api.log")).unwrap();
        assert!(written.contains("hello"));
    }
}
