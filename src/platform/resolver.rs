//! Remote sound download
//!
//! Remote sources are fetched once into the user cache directory and the
//! local copy is reused on later plays.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ResolveError, SourceResolver};

/// Give up on a download after this long
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest file accepted, in bytes
const MAX_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;

pub struct HttpResolver {
    dir: PathBuf,
    agent: ureq::Agent,
}

impl HttpResolver {
    /// Resolver storing downloads in `~/.cache/soundkeys/remote`
    pub fn new() -> Self {
        let mut dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push("soundkeys");
        dir.push("remote");
        Self::with_dir(dir)
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build();
        Self { dir, agent }
    }

    /// Where `url` is stored once downloaded
    pub fn local_path(&self, url: &str) -> Result<PathBuf, ResolveError> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let (_, rest) = without_query
            .split_once("://")
            .ok_or_else(|| ResolveError::InvalidUrl(url.to_string()))?;

        let name: String = rest
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("sound")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        Ok(self.dir.join(format!("{:016x}-{}", hasher.finish(), name)))
    }
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceResolver for HttpResolver {
    fn resolve(&self, url: &str) -> Result<PathBuf, ResolveError> {
        let path = self.local_path(url)?;
        if path.is_file() {
            log::debug!("Using cached download {}", path.display());
            return Ok(path);
        }

        std::fs::create_dir_all(&self.dir)?;
        log::info!("Downloading {}", url);

        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                ResolveError::Http(format!("{} returned status {}", url, code))
            }
            ureq::Error::Transport(t) => ResolveError::Http(format!("{}: {}", url, t)),
        })?;

        let written = save_download(response.into_reader(), &path, MAX_DOWNLOAD_BYTES, url)?;
        log::info!("Saved {} ({} bytes)", path.display(), written);
        Ok(path)
    }
}

/// Stream `reader` into `path` through a `.part` file
///
/// Only a complete download of at most `limit` bytes is renamed into place;
/// on any failure the partial file is removed.
fn save_download<R: Read>(
    reader: R,
    path: &Path,
    limit: u64,
    url: &str,
) -> Result<u64, ResolveError> {
    let partial = path.with_extension("part");
    let result = write_partial(reader, &partial, limit, url)
        .and_then(|written| std::fs::rename(&partial, path).map(|_| written).map_err(Into::into));
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&partial) {
            log::debug!("Could not remove {}: {}", partial.display(), e);
        }
    }
    result
}

fn write_partial<R: Read>(
    reader: R,
    partial: &Path,
    limit: u64,
    url: &str,
) -> Result<u64, ResolveError> {
    let mut file = std::fs::File::create(partial)?;
    // One byte past the limit tells a full-size file from an oversized one
    let written = std::io::copy(&mut reader.take(limit + 1), &mut file)?;
    if written > limit {
        return Err(ResolveError::Http(format!(
            "{} is larger than {} bytes",
            url, limit
        )));
    }
    if written == 0 {
        return Err(ResolveError::Http(format!("{} returned no data", url)));
    }
    file.flush()?;
    Ok(written)
}
