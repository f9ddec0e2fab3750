//! Container image references (`[registry/]repository[:tag][@digest]`)

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("Image reference cannot be empty")]
    Empty,

    #[error("Invalid repository name '{0}': use lowercase letters, digits and . _ - / separators")]
    InvalidRepository(String),

    #[error("Invalid tag '{0}': at most 128 characters of [A-Za-z0-9_.-], not starting with . or -")]
    InvalidTag(String),

    #[error("Invalid digest '{0}': expected sha256:<64 hex characters>")]
    InvalidDigest(String),
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

fn repository_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("valid regex"))
}

impl ImageReference {
    /// Parses a reference; a reference without tag or digest gets `latest`
    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(ImageRefError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; before it, a registry port
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        if let Some(ref t) = tag {
            if !tag_re().is_match(t) {
                return Err(ImageRefError::InvalidTag(t.clone()));
            }
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, name.to_string()),
        };

        if !repository_re().is_match(&repository) {
            return Err(ImageRefError::InvalidRepository(repository));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Whether the reference pins content by digest
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
