//! Resolution of the upstream API key.
//!
//! The key is looked up on every request from an ordered list of [`CredentialSource`]s: the
//! `CB_OPENAI_KEY` environment variable first, then a series of `secure/cb_keys.json` files
//! placed outside the public web root. The first source yielding a non-blank value wins.
//!
//! Secret files are flat JSON objects. The recognised keys, in priority order, are
//! `CB_OPENAI_KEY` and `OPENAI_API_KEY`:
//!
//! ```json
//! { "CB_OPENAI_KEY": "sk-..." }
//! ```
use crate::env::{ReadEnv, var_non_blank};
use crate::fs::ReadFile;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable holding the key directly. Takes precedence over every secret file.
pub const API_KEY_ENV_VAR: &str = "CB_OPENAI_KEY";

/// Keys looked up inside a secret file, in priority order.
pub const SECRET_FILE_KEYS: [&str; 2] = ["CB_OPENAI_KEY", "OPENAI_API_KEY"];

pub const SECRETS_DIR: &str = "secure";
pub const SECRETS_FILE_NAME: &str = "cb_keys.json";

/// Ancestor depths of the base directory searched for `secure/`, in order.
const SECRET_DIR_DEPTHS: [usize; 3] = [2, 3, 1];

/// A resolved, non-blank API key. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for blank or whitespace-only input.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_owned()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Nothing usable in the environment or in any secret file.
    #[error("no API key found in $CB_OPENAI_KEY or any of {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

/// One place an API key may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A process environment variable.
    Env(String),
    /// A JSON secret file; see the module docs for its layout.
    File(PathBuf),
}

impl CredentialSource {
    pub fn lookup(&self, env: &dyn ReadEnv, fs: &dyn ReadFile) -> Option<ApiKey> {
        match self {
            CredentialSource::Env(name) => {
                var_non_blank(env, name).and_then(|value| ApiKey::new(&value))
            }
            CredentialSource::File(path) => lookup_secret_file(fs, path),
        }
    }
}

fn lookup_secret_file(fs: &dyn ReadFile, path: &Path) -> Option<ApiKey> {
    let contents = match fs.read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Secret file not readable, skipping");
            return None;
        }
    };

    // Only the position is logged: a data error would echo the file contents.
    let values: Map<String, Value> = match serde_json::from_str(&contents) {
        Ok(values) => values,
        Err(e) => {
            warn!(
                path = %path.display(),
                line = e.line(),
                column = e.column(),
                "Secret file is not a JSON object, skipping"
            );
            return None;
        }
    };

    SECRET_FILE_KEYS.iter().find_map(|key| {
        values
            .get(*key)
            .and_then(Value::as_str)
            .and_then(ApiKey::new)
    })
}

/// An ordered chain of sources; the first one that yields a key wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialResolver {
    sources: Vec<CredentialSource>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self { sources }
    }

    /// The standard chain: `CB_OPENAI_KEY`, then `explicit_file` if given, then the secret
    /// files derived from `base_dir` by [`candidate_paths`](Self::candidate_paths).
    pub fn standard(base_dir: &Path, explicit_file: Option<PathBuf>) -> Self {
        let mut sources = vec![CredentialSource::Env(API_KEY_ENV_VAR.to_owned())];
        let mut files: Vec<PathBuf> = explicit_file.into_iter().collect();
        for path in Self::candidate_paths(base_dir) {
            if !files.contains(&path) {
                files.push(path);
            }
        }
        sources.extend(files.into_iter().map(CredentialSource::File));
        Self { sources }
    }

    /// Secret file locations for a relay served from `base_dir`, e.g. for
    /// `/home/site/public_html/api`:
    ///
    /// 1. `/home/site/secure/cb_keys.json`
    /// 2. `/home/secure/cb_keys.json`
    /// 3. `/home/site/public_html/secure/cb_keys.json`
    ///
    /// Depths that run past the filesystem root are skipped. `base_dir` should be absolute.
    pub fn candidate_paths(base_dir: &Path) -> Vec<PathBuf> {
        let ancestors: Vec<&Path> = base_dir.ancestors().collect();
        let mut paths: Vec<PathBuf> = Vec::with_capacity(SECRET_DIR_DEPTHS.len());
        for depth in SECRET_DIR_DEPTHS {
            if let Some(dir) = ancestors.get(depth) {
                let path = dir.join(SECRETS_DIR).join(SECRETS_FILE_NAME);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }

    pub fn resolve(&self, env: &dyn ReadEnv, fs: &dyn ReadFile) -> Result<ApiKey, CredentialError> {
        if let Some((source, key)) = self
            .sources
            .iter()
            .find_map(|source| source.lookup(env, fs).map(|key| (source, key)))
        {
            match source {
                CredentialSource::Env(name) => debug!(var = %name, "API key resolved from environment"),
                CredentialSource::File(path) => {
                    debug!(path = %path.display(), "API key resolved from secret file")
                }
            }
            return Ok(key);
        }

        let searched = self
            .sources
            .iter()
            .filter_map(|source| match source {
                CredentialSource::File(path) => Some(path.clone()),
                CredentialSource::Env(_) => None,
            })
            .collect();
        Err(CredentialError::NotFound { searched })
    }
}
