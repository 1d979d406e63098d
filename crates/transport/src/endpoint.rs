//! Local socket endpoints: filesystem paths or abstract names

use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

/// Where the daemon listens
///
/// A leading `#` or `@` selects the Linux abstract namespace, anything else is
/// a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Path(PathBuf),
    Abstract(String),
}

impl FromStr for Endpoint {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty endpoint"));
        }
        match s.strip_prefix('#').or_else(|| s.strip_prefix('@')) {
            Some("") => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty abstract socket name",
            )),
            Some(name) => Ok(Endpoint::Abstract(name.to_string())),
            None => Ok(Endpoint::Path(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Path(path) => write!(f, "{}", path.display()),
            Endpoint::Abstract(name) => write!(f, "#{}", name),
        }
    }
}

impl Endpoint {
    pub fn path(path: impl AsRef<Path>) -> Self {
        Endpoint::Path(path.as_ref().to_path_buf())
    }

    /// Open a stream to this endpoint
    pub async fn connect(&self) -> io::Result<UnixStream> {
        match self {
            Endpoint::Path(path) => UnixStream::connect(path).await,
            Endpoint::Abstract(name) => UnixStream::connect(abstract_path(name)?).await,
        }
    }

    /// Bind a listener on this endpoint
    ///
    /// Filesystem sockets replace a stale socket file, never any other kind of
    /// file. The socket is restricted to the owner, and a parent directory
    /// created here is owner-only.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match self {
            Endpoint::Path(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if !parent.exists() {
                        fs::create_dir_all(parent)?;
                        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
                    }
                }
                remove_stale_socket(path)?;

                let listener = UnixListener::bind(path)?;
                fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
                Ok(listener)
            }
            Endpoint::Abstract(name) => UnixListener::bind(abstract_path(name)?),
        }
    }

    /// Remove the socket file left behind by [`Endpoint::bind`]
    pub fn cleanup(&self) {
        if let Endpoint::Path(path) = self {
            let _ = remove_stale_socket(path);
        }
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!("Removing stale socket {}", path.display());
            fs::remove_file(path)
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Socket path naming `name` in the abstract namespace (leading NUL byte)
#[cfg(any(target_os = "linux", target_os = "android"))]
fn abstract_path(name: &str) -> io::Result<PathBuf> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let mut raw = Vec::with_capacity(name.len() + 1);
    raw.push(0);
    raw.extend_from_slice(name.as_bytes());
    Ok(PathBuf::from(OsString::from_vec(raw)))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn abstract_path(name: &str) -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract socket #{} requires Linux", name),
    ))
}
