//! Driving the external depot downloader: bootstrap, install/update runs,
//! and installed-build versioning.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

const DEPOTDL_LATEST_ZIP_URL: &str =
    "https://github.com/SteamRE/DepotDownloader/releases/latest/download/DepotDownloader-linux-x64.zip";
/// Name of the executable inside the release archive.
const DEPOTDL_ARCHIVE_EXEC: &str = "DepotDownloader";

const DS_STATS_URL: &str = "https://servercheck.spycibot.com/stats";

#[derive(Debug, Error)]
pub enum SteamError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("could not extract downloader archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("downloader executable not present after extraction")]
    MissingExecutable,
    #[error("downloader path {0} does not point to a file")]
    NotAFile(String),
    #[error("malformed version string: {0:?}")]
    BadVersion(String),
    #[error("malformed response from stats endpoint: {0}")]
    BadStats(String),
}

fn io_err(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> SteamError {
    let context = context.into();
    move |source| SteamError::Io { context, source }
}

/// A game build version: dot-separated integers, e.g. `1.27.101.0`.
/// Compared component-wise; not semver (the game uses four components).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVersion(Vec<u64>);

impl FromStr for BuildVersion {
    type Err = SteamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Result<Vec<u64>, _> = s.trim().split('.').map(str::parse).collect();
        match parts {
            Ok(parts) if !parts.is_empty() => Ok(Self(parts)),
            _ => Err(SteamError::BadVersion(s.to_string())),
        }
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

impl Ord for BuildVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BuildVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reads the installed build version from `<install-dir>/build.version`:
/// first line with the trailing 10 characters (a timestamp suffix) cut off.
pub fn read_build_version(astro_path: &Path) -> Option<String> {
    let verfile = astro_path.join("build.version");
    if !verfile.is_file() {
        return None;
    }
    let contents = fs::read_to_string(&verfile).ok()?;
    let line = contents.lines().next().unwrap_or("");
    let cut = line.len().saturating_sub(10);
    let version = if line.is_char_boundary(cut) {
        &line[..cut]
    } else {
        line
    };
    let version = version.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Asks the community stats endpoint for the latest published DS version.
pub async fn latest_ds_version() -> Result<String, SteamError> {
    #[derive(Deserialize)]
    struct Stats {
        #[serde(rename = "LatestVersion")]
        latest_version: String,
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let stats: Stats = client
        .get(DS_STATS_URL)
        .send()
        .await?
        .json()
        .await
        .map_err(|e| SteamError::BadStats(e.to_string()))?;
    Ok(stats.latest_version)
}

/// Fetches the latest downloader release, extracts the executable into
/// `dest_path`, and marks it executable.
pub async fn dl_depotdownloader(dest_path: &Path) -> Result<(), SteamError> {
    let tmpdir = tempfile::tempdir().map_err(io_err("could not create temp dir"))?;

    debug!("Fetching downloader release from {DEPOTDL_LATEST_ZIP_URL}");
    let bytes = reqwest::get(DEPOTDL_LATEST_ZIP_URL)
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let zip_path = tmpdir.path().join("depotdl.zip");
    fs::write(&zip_path, &bytes).map_err(io_err("could not write downloader archive"))?;

    let file = fs::File::open(&zip_path).map_err(io_err("could not open downloader archive"))?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(tmpdir.path())?;

    let extracted = tmpdir.path().join(DEPOTDL_ARCHIVE_EXEC);
    if !extracted.is_file() {
        return Err(SteamError::MissingExecutable);
    }

    if let Some(dir) = dest_path.parent() {
        fs::create_dir_all(dir).map_err(io_err("could not create downloader directory"))?;
    }
    // Copy instead of rename: the temp dir may live on another filesystem.
    fs::copy(&extracted, dest_path).map_err(io_err("could not install downloader"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest_path, fs::Permissions::from_mode(0o755))
            .map_err(io_err("could not mark downloader executable"))?;
    }

    Ok(())
}

/// Runs the downloader with `-app <id> -os <os> -dir <abs> -validate`,
/// piping its output into the log at debug level. Returns whether the
/// process exited zero.
pub async fn update_app(
    exec_path: &Path,
    app: &str,
    os: &str,
    directory: &Path,
) -> Result<bool, SteamError> {
    if !exec_path.is_file() {
        return Err(SteamError::NotAFile(exec_path.display().to_string()));
    }
    let abs_dir =
        std::path::absolute(directory).map_err(io_err("could not resolve install dir"))?;

    let mut child = tokio::process::Command::new(exec_path)
        .arg("-app")
        .arg(app)
        .arg("-os")
        .arg(os)
        .arg("-dir")
        .arg(&abs_dir)
        .arg("-validate")
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(io_err("could not start downloader"))?;

    let mut reporters = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        reporters.push(tokio::spawn(report_output(stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        reporters.push(tokio::spawn(report_output(stderr)));
    }

    let status = child
        .wait()
        .await
        .map_err(io_err("downloader process failed"))?;
    for reporter in reporters {
        let _ = reporter.await;
    }

    Ok(status.success())
}

async fn report_output(stream: impl tokio::io::AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[DepotDownloader] {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_version_compare_is_component_wise() {
        let old: BuildVersion = "1.27.101.0".parse().unwrap();
        let new: BuildVersion = "1.28.0.0".parse().unwrap();
        assert!(new > old);
        assert_eq!(old, "1.27.101.0".parse().unwrap());
        // Numeric, not lexicographic: 1.9 < 1.10
        let nine: BuildVersion = "1.9".parse().unwrap();
        let ten: BuildVersion = "1.10".parse().unwrap();
        assert!(ten > nine);
    }

    #[test]
    fn build_version_rejects_garbage() {
        assert!("".parse::<BuildVersion>().is_err());
        assert!("1.x.3".parse::<BuildVersion>().is_err());
    }

    #[test]
    fn build_version_display_roundtrip() {
        let version: BuildVersion = "1.27.101.0".parse().unwrap();
        assert_eq!(version.to_string(), "1.27.101.0");
    }

    #[test]
    fn read_build_version_strips_trailing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        // Suffix is ten characters of build timestamp noise.
        fs::write(dir.path().join("build.version"), "1.27.101.0 2021.01.01\n").unwrap();
        assert_eq!(
            read_build_version(dir.path()),
            Some("1.27.101.0".to_string())
        );
    }

    #[test]
    fn read_build_version_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_build_version(dir.path()), None);
    }

    #[test]
    fn read_build_version_short_line_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("build.version"), "short\n").unwrap();
        assert_eq!(read_build_version(dir.path()), None);
    }
}
