use crate::config::{LogSection, LoggingConfig};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{level_filters::LevelFilter, Level, Metadata};
use tracing_subscriber::{
    filter::{FilterFn, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const DEFAULT_MAX_SIZE_MB: u64 = 100;

// -------- level helpers --------

/// `None` means "off". Unknown strings fall back to INFO.
fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == name or target starts with "name::".
fn matches_crate_prefix(target: &str, name: &str) -> bool {
    target
        .strip_prefix(name)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Everything at or below `max_level` that no explicit subsystem claims.
fn unclaimed_filter(
    claimed: Vec<String>,
    max_level: Level,
) -> FilterFn<impl Fn(&Metadata<'_>) -> bool + Send + Sync + 'static> {
    FilterFn::new(move |meta: &Metadata<'_>| {
        meta.level() <= &max_level
            && !claimed.iter().any(|c| matches_crate_prefix(meta.target(), c))
    })
}

// -------- rotating file writers --------

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

struct RotWriterHandle(Option<Arc<Mutex<FileRotate<AppendTimestamp>>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => file.lock().write(buf),
            // no file for this target; drop the record
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => file.lock().flush(),
            None => Ok(()),
        }
    }
}

/// Routes records to per-subsystem files by target prefix (longest match
/// wins), falling back to the default file.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotWriter>,
    by_prefix: HashMap<String, RotWriter>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<&RotWriter> {
        self.by_prefix
            .iter()
            .filter(|(name, _)| matches_crate_prefix(target, name))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, w)| w)
            .or(self.default.as_ref())
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RotWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.default.as_ref().map(|w| w.0.clone()))
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        RotWriterHandle(self.resolve_for(meta.target()).map(|w| w.0.clone()))
    }
}

/// Relative paths are joined with `base_dir` (the server home directory).
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer(log_path: &Path, section: &LogSection) -> std::io::Result<RotWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) * 1024 * 1024;
    let limit = match (section.max_backups, section.max_age_days) {
        (Some(n), _) => FileLimit::MaxFiles(n.max(1)),
        (None, Some(days)) => FileLimit::Age(chrono::Duration::days(i64::from(days.max(1)))),
        (None, None) => FileLimit::Age(chrono::Duration::days(1)),
    };

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn open_section_file(name: &str, section: &LogSection, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }
    let log_path = resolve_log_path(&section.file, base_dir);
    match create_rotating_writer(&log_path, section) {
        Ok(writer) => Some(writer),
        Err(e) => {
            // the subscriber is not installed yet
            eprintln!(
                "failed to open log file for '{}': {} ({})",
                name,
                log_path.display(),
                e
            );
            None
        }
    }
}

// -------- plan --------

/// The `default` section plus explicit subsystem sections, split once.
struct LogPlan<'a> {
    default: Option<&'a LogSection>,
    subsystems: Vec<(&'a str, &'a LogSection)>,
}

impl<'a> LogPlan<'a> {
    fn new(cfg: &'a LoggingConfig) -> Self {
        let mut subsystems: Vec<_> = cfg
            .iter()
            .filter(|(k, _)| k.as_str() != "default")
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        subsystems.sort_by_key(|(k, _)| *k);
        Self {
            default: cfg.get("default"),
            subsystems,
        }
    }

    fn claimed(&self) -> Vec<String> {
        self.subsystems.iter().map(|(k, _)| k.to_string()).collect()
    }

    fn console_targets(&self) -> Targets {
        self.subsystems
            .iter()
            .fold(Targets::new().with_default(LevelFilter::OFF), |t, (name, s)| {
                match parse_tracing_level(&s.console_level) {
                    Some(level) => t.with_target(*name, LevelFilter::from_level(level)),
                    None => t,
                }
            })
    }

    fn file_targets(&self) -> Targets {
        self.subsystems
            .iter()
            .filter(|(_, s)| !s.file.trim().is_empty())
            .fold(Targets::new().with_default(LevelFilter::OFF), |t, (name, s)| {
                match parse_tracing_level(&s.file_level) {
                    Some(level) => t.with_target(*name, LevelFilter::from_level(level)),
                    None => t,
                }
            })
    }

    fn file_router(&self, base_dir: &Path) -> FileRouter {
        FileRouter {
            default: self
                .default
                .and_then(|s| open_section_file("default", s, base_dir)),
            by_prefix: self
                .subsystems
                .iter()
                .filter_map(|(name, s)| {
                    open_section_file(name, s, base_dir).map(|w| (name.to_string(), w))
                })
                .collect(),
        }
    }

    fn layers(&self, base_dir: &Path, ansi: bool) -> Vec<BoxedLayer> {
        let console = || {
            fmt::layer()
                .with_ansi(ansi)
                .with_target(true)
                .with_level(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
        };
        let router = self.file_router(base_dir);
        let file = |router: FileRouter| {
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(router)
        };

        let mut layers: Vec<BoxedLayer> = vec![console().with_filter(self.console_targets()).boxed()];
        if !router.by_prefix.is_empty() {
            layers.push(file(router.clone()).with_filter(self.file_targets()).boxed());
        }

        if let Some(section) = self.default {
            if let Some(level) = parse_tracing_level(&section.console_level) {
                layers.push(
                    console()
                        .with_filter(unclaimed_filter(self.claimed(), level))
                        .boxed(),
                );
            }
            if router.default.is_some() {
                if let Some(level) = parse_tracing_level(&section.file_level) {
                    layers.push(
                        file(router)
                            .with_filter(unclaimed_filter(self.claimed(), level))
                            .boxed(),
                    );
                }
            }
        }
        layers
    }
}

// -------- public init --------

/// Install the global subscriber.
/// - `cfg`: the `logging` sections of the app config
/// - `base_dir`: resolves relative log file paths (usually `server.home_dir`)
///
/// Calling it twice is harmless; only the first subscriber is installed.
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    // bridge `log` → `tracing` before installing the subscriber
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        init_default_logging();
        return;
    }

    let ansi = std::io::stdout().is_terminal();
    let layers = LogPlan::new(cfg).layers(base_dir, ansi);
    let _ = tracing_subscriber::registry().with(layers).try_init();
}

pub fn init_default_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_logging_config;
    use tempfile::tempdir;

    fn section(console: &str, file: &str, file_level: &str) -> LogSection {
        LogSection {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_tracing_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level(" Info "), Some(Level::INFO));
        assert_eq!(parse_tracing_level("warning"), Some(Level::WARN));
        assert_eq!(parse_tracing_level("ERROR"), Some(Level::ERROR));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("none"), None);
        assert_eq!(parse_tracing_level("loud"), Some(Level::INFO));
    }

    #[test]
    fn crate_prefix_matching() {
        assert!(matches_crate_prefix("modkit", "modkit"));
        assert!(matches_crate_prefix("modkit::registry", "modkit"));
        assert!(!matches_crate_prefix("modkit_extra::x", "modkit"));
        assert!(!matches_crate_prefix("api", "api_ingress"));
    }

    #[test]
    fn plan_splits_default_and_subsystems() {
        let mut cfg = default_logging_config();
        cfg.insert("modkit".into(), section("debug", "logs/modkit.log", "trace"));
        cfg.insert("api_ingress".into(), section("warn", "", "debug"));

        let plan = LogPlan::new(&cfg);
        assert!(plan.default.is_some());
        assert_eq!(plan.claimed(), vec!["api_ingress", "modkit"]);
    }

    #[test]
    fn file_router_prefers_longest_prefix() {
        let tmp = tempdir().unwrap();
        let mut cfg = default_logging_config();
        cfg.insert("modkit".into(), section("info", "logs/modkit.log", "debug"));
        cfg.insert(
            "modkit::loader".into(),
            section("info", "logs/loader.log", "debug"),
        );

        let router = LogPlan::new(&cfg).file_router(tmp.path());
        assert!(router.default.is_some());
        assert_eq!(router.by_prefix.len(), 2);

        let loader = router.resolve_for("modkit::loader::watch").unwrap();
        assert!(Arc::ptr_eq(&loader.0, &router.by_prefix["modkit::loader"].0));
        let core = router.resolve_for("modkit::registry").unwrap();
        assert!(Arc::ptr_eq(&core.0, &router.by_prefix["modkit"].0));
        let other = router.resolve_for("hyper::proto").unwrap();
        assert!(Arc::ptr_eq(&other.0, &router.default.as_ref().unwrap().0));
    }

    #[test]
    fn file_paths_resolve_against_base_dir() {
        let tmp = tempdir().unwrap();
        let resolved = resolve_log_path("logs/test.log", tmp.path());
        assert!(resolved.starts_with(tmp.path()));
        assert!(resolved.ends_with("logs/test.log"));

        let abs = tmp.path().join("abs.log");
        assert_eq!(resolve_log_path(abs.to_str().unwrap(), Path::new("/ignored")), abs);
    }

    #[test]
    fn rotating_writer_creates_parent_and_writes() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("nested/dir/app.log");

        let writer = create_rotating_writer(&p, &section("info", "x", "debug")).unwrap();
        let mut handle = RotWriterHandle(Some(writer.0.clone()));
        handle.write_all(b"hello\n").unwrap();
        handle.flush().unwrap();
        assert!(p.parent().unwrap().is_dir());
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "hello\n");
    }

    #[test]
    fn blank_file_disables_file_output() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert("default".into(), section("info", "  ", "debug"));

        let plan = LogPlan::new(&cfg);
        assert!(plan.file_router(tmp.path()).default.is_none());
        // console default only
        assert_eq!(plan.layers(tmp.path(), false).len(), 2);
    }
}
