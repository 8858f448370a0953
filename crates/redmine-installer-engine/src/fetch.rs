use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use redmine_installer_core::{ArchiveType, InstallerError, PackageReference, Settings};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cancel::is_cancelled;

const USER_AGENT: &str = concat!("redmine-installer/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct ResolvedPackage {
    pub reference: PackageReference,
    pub path: PathBuf,
    pub archive_type: ArchiveType,
    download_file: Option<NamedTempFile>,
}

impl ResolvedPackage {
    pub fn is_download(&self) -> bool {
        self.download_file.is_some()
    }
}

pub fn resolve_package(
    input: &str,
    settings: &Settings,
    cancel: &AtomicBool,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<ResolvedPackage> {
    let reference = PackageReference::classify(input, |candidate| Path::new(candidate).is_file())?;
    debug!(reference = ?reference, "classified package reference");

    let Some(url) = reference.download_url(&settings.release_url_template) else {
        let path = Path::new(reference.as_str())
            .canonicalize()
            .with_context(|| format!("failed to resolve package path {}", reference.as_str()))?;
        let archive_type = detect_archive_type(&path, reference.as_str())?;
        return Ok(ResolvedPackage {
            reference,
            path,
            archive_type,
            download_file: None,
        });
    };

    info!(url = %url, "downloading package");
    let download = download_to_temp(&url, cancel, progress)?;
    let path = download.path().to_path_buf();
    let archive_type = detect_archive_type(&path, &url)?;
    Ok(ResolvedPackage {
        reference,
        path,
        archive_type,
        download_file: Some(download),
    })
}

fn download_to_temp(
    url: &str,
    cancel: &AtomicBool,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<NamedTempFile> {
    let network = |detail: String| InstallerError::Network {
        url: url.to_string(),
        detail,
    };

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
        .build()
        .map_err(|err| network(err.to_string()))?;
    let mut response = client
        .get(url)
        .send()
        .map_err(|err| network(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(network(format!("server answered {status}")).into());
    }

    let total = response.content_length();
    let mut file = tempfile::Builder::new()
        .prefix("redmine-package-")
        .tempfile()
        .context("failed to create temp file for download")?;
    let mut buffer = [0_u8; 64 * 1024];
    let mut received = 0_u64;
    loop {
        if is_cancelled(cancel) {
            return Err(InstallerError::Cancelled {
                step: "resolve".to_string(),
            }
            .into());
        }
        let read = response
            .read(&mut buffer)
            .map_err(|err| network(err.to_string()))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("failed to write downloaded package")?;
        received += read as u64;
        progress(received, total);
    }
    file.as_file()
        .sync_all()
        .context("failed to flush downloaded package")?;

    debug!(bytes = received, path = %file.path().display(), "download complete");
    Ok(file)
}

pub fn detect_archive_type(path: &Path, name: &str) -> Result<ArchiveType> {
    if let Some(archive_type) = ArchiveType::infer_from_name(name) {
        return Ok(archive_type);
    }

    let mut leading = [0_u8; 4];
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let read = file
        .read(&mut leading)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ArchiveType::sniff(&leading[..read]).ok_or_else(|| {
        InstallerError::MalformedPackage {
            reason: format!("{} is neither a zip nor a tar.gz archive", path.display()),
        }
        .into()
    })
}
