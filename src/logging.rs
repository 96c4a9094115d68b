//! Logging: ANSI console output plus a dated, collision-suffixed log file.
//!
//! Filter precedence: the launcher's debug flag > `RUST_LOG` > "info".

use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt::time::UtcTime, layer::Identity, prelude::*};

const LOGFILE_BASE: &str = "astrotux";
const MAX_COLLISION_SUFFIX: u32 = 1_000_000;

/// Picks `<dir>/astrotux_<YYYY-MM-DD>.log`, appending `_N` until the name
/// is free. One file per supervisor run.
pub fn logfile_path(log_dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;

    let date = chrono::Local::now().format("%Y-%m-%d");
    let base = format!("{LOGFILE_BASE}_{date}");

    let mut path = log_dir.join(format!("{base}.log"));
    let mut i = 1;
    while path.exists() {
        if i > MAX_COLLISION_SUFFIX {
            return Err(std::io::Error::other(
                "all collision-suffixed log file names are taken",
            ));
        }
        path = log_dir.join(format!("{base}_{i}.log"));
        i += 1;
    }

    Ok(path)
}

/// Initializes logging. Returns the log file path, or `None` when file
/// logging could not be set up (console logging still works then).
pub fn init(log_dir: &Path, log_debug: bool) -> Option<PathBuf> {
    let env_filter = if log_debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    let logfile = match logfile_path(log_dir).and_then(|path| {
        let file = fs::File::create(&path)?;
        Ok((path, file))
    }) {
        Ok(pair) => Some(pair),
        Err(e) => {
            eprintln!(
                "Failed to create log file in '{}', continuing with console logs: {e}",
                log_dir.display()
            );
            None
        }
    };

    match logfile {
        Some((path, file)) => {
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file);

            // Keep guard alive for process lifetime
            let _leaked: &'static _ = Box::leak(Box::new(file_guard));

            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking);
            let _ = registry.with(file_layer).try_init();
            Some(path)
        }
        None => {
            let _ = registry.with(Identity::new()).try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logfile_name_is_dated_and_collision_suffixed() {
        let dir = tempfile::tempdir().unwrap();

        let first = logfile_path(dir.path()).unwrap();
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("astrotux_"));
        assert!(name.ends_with(".log"));

        fs::write(&first, "").unwrap();
        let second = logfile_path(dir.path()).unwrap();
        assert_ne!(first, second);
        assert!(second
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_1.log"));

        fs::write(&second, "").unwrap();
        let third = logfile_path(dir.path()).unwrap();
        assert!(third
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_2.log"));
    }

    #[test]
    fn logfile_path_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = logfile_path(&nested).unwrap();
        assert!(path.starts_with(&nested));
        assert!(nested.is_dir());
    }
}
