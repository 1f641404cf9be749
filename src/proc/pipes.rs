//! Anonymous pipe pair for wiring a service to its logger.

use std::io;
use std::os::fd::OwnedFd;

/// One anonymous pipe: the logger reads `reader` on stdin, the main service
/// writes `writer` from stdout.
///
/// Both ends are plain owned fds; moving one into a [`StdioSpec::Pipe`]
/// (and from there into a spawn) transfers it to the child, and whatever
/// the parent still holds closes when the pair drops.
///
/// [`StdioSpec::Pipe`]: crate::StdioSpec::Pipe
#[derive(Debug)]
pub struct ServicePipes {
    /// Read end, destined for the logger's stdin.
    pub reader: OwnedFd,
    /// Write end, destined for the main service's stdout.
    pub writer: OwnedFd,
}

impl ServicePipes {
    /// Creates a fresh pipe pair.
    pub fn create() -> io::Result<Self> {
        let (reader, writer) =
            nix::unistd::pipe().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(Self { reader, writer })
    }
}
