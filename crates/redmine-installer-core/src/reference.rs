use semver::Version;

use crate::InstallerError;

pub const DEFAULT_RELEASE_URL_TEMPLATE: &str =
    "https://www.redmine.org/releases/redmine-{version}.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageReference {
    LocalPath(String),
    RemoteUrl(String),
    VersionTag(String),
}

impl PackageReference {
    pub fn classify<F>(input: &str, is_local_file: F) -> Result<Self, InstallerError>
    where
        F: FnOnce(&str) -> bool,
    {
        let input = input.trim();
        if input.is_empty() {
            return Err(InstallerError::InvalidPackageReference {
                reference: String::new(),
                reason: "no package given and none remembered in the selected profile"
                    .to_string(),
            });
        }

        if is_local_file(input) {
            return Ok(Self::LocalPath(input.to_string()));
        }
        if has_url_scheme(input) {
            return Ok(Self::RemoteUrl(input.to_string()));
        }
        if parse_version_tag(input).is_some() {
            return Ok(Self::VersionTag(input.to_string()));
        }

        Err(InstallerError::InvalidPackageReference {
            reference: input.to_string(),
            reason: "not an existing file, a URL, or a version tag like v3.1.0".to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::LocalPath(value) | Self::RemoteUrl(value) | Self::VersionTag(value) => value,
        }
    }

    pub fn download_url(&self, template: &str) -> Option<String> {
        match self {
            Self::LocalPath(_) => None,
            Self::RemoteUrl(url) => Some(url.clone()),
            Self::VersionTag(tag) => {
                let version = parse_version_tag(tag)?;
                Some(template.replace("{version}", &version.to_string()))
            }
        }
    }
}

pub fn parse_version_tag(input: &str) -> Option<Version> {
    let raw = input.strip_prefix('v').unwrap_or(input);
    Version::parse(raw).ok()
}

fn has_url_scheme(input: &str) -> bool {
    let Some((scheme, rest)) = input.split_once("://") else {
        return false;
    };
    !rest.is_empty()
        && !scheme.is_empty()
        && scheme
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}
