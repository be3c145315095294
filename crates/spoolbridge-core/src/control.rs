//! Control channel: one batch path per line.
//!
//! The sender and receiver work over any async byte stream. In production
//! that is a pair of FIFOs opened with [`open_fifo_sender`] and
//! [`open_fifo_receiver`]; tests use in-memory duplex pipes.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Result, SpoolError};

/// Writes batch announcements.
#[derive(Debug)]
pub struct ControlSender<W> {
    writer: W,
    announced: u64,
}

impl<W: AsyncWrite + Unpin> ControlSender<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            announced: 0,
        }
    }

    /// Write `path` followed by a newline and flush it to the peer.
    pub async fn announce(&mut self, path: &Path) -> Result<()> {
        let text = path
            .to_str()
            .ok_or_else(|| SpoolError::NonUtf8Path(path.to_path_buf()))?;
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        self.announced += 1;
        trace!(path = %path.display(), "Wrote control line");
        Ok(())
    }

    /// Lines written so far.
    #[must_use]
    pub fn announced(&self) -> u64 {
        self.announced
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads batch announcements.
#[derive(Debug)]
pub struct ControlReceiver<R> {
    reader: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin> ControlReceiver<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }

    /// Next announced path, or `None` once the peer closed its end.
    ///
    /// Blank lines are skipped.
    pub async fn next_path(&mut self) -> Result<Option<PathBuf>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let path = self.line.trim_end_matches(['\n', '\r']);
            if path.is_empty() {
                continue;
            }
            trace!(path, "Read control line");
            return Ok(Some(PathBuf::from(path)));
        }
    }
}

#[cfg(unix)]
mod fifo {
    use std::path::Path;

    use tokio::net::unix::pipe;

    use crate::error::{Error, Result};

    fn options() -> pipe::OpenOptions {
        #[cfg_attr(not(target_os = "linux"), allow(unused_mut))]
        let mut options = pipe::OpenOptions::new();
        // Read-write opens never block on a missing peer and keep the
        // receiver from seeing EOF while the worker reopens its end.
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options
    }

    /// Open the host→worker FIFO for writing.
    pub fn open_fifo_sender(path: &Path) -> Result<pipe::Sender> {
        options()
            .open_sender(path)
            .map_err(|source| Error::Initialization {
                what: "input control pipe",
                path: path.to_path_buf(),
                source,
            })
    }

    /// Open the worker→host FIFO for reading.
    pub fn open_fifo_receiver(path: &Path) -> Result<pipe::Receiver> {
        options()
            .open_receiver(path)
            .map_err(|source| Error::Initialization {
                what: "output control pipe",
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(unix)]
pub use fifo::{open_fifo_receiver, open_fifo_sender};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn announcements_arrive_in_order() {
        let (host, worker) = tokio::io::duplex(1024);
        let mut sender = ControlSender::new(host);
        let mut receiver = ControlReceiver::new(BufReader::new(worker));

        sender.announce(Path::new("/dev/shm/in_0")).await.unwrap();
        sender.announce(Path::new("/dev/shm/in_1")).await.unwrap();
        assert_eq!(sender.announced(), 2);
        drop(sender);

        assert_eq!(
            receiver.next_path().await.unwrap(),
            Some(PathBuf::from("/dev/shm/in_0"))
        );
        assert_eq!(
            receiver.next_path().await.unwrap(),
            Some(PathBuf::from("/dev/shm/in_1"))
        );
        assert_eq!(receiver.next_path().await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_and_crlf_lines_are_tolerated() {
        let input: &[u8] = b"\n/dev/shm/out_3\r\n\n/dev/shm/out_4";
        let mut receiver = ControlReceiver::new(BufReader::new(input));
        assert_eq!(
            receiver.next_path().await.unwrap(),
            Some(PathBuf::from("/dev/shm/out_3"))
        );
        assert_eq!(
            receiver.next_path().await.unwrap(),
            Some(PathBuf::from("/dev/shm/out_4"))
        );
        assert_eq!(receiver.next_path().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut sender = ControlSender::new(Vec::new());
        let path = Path::new(OsStr::from_bytes(b"/dev/shm/\xff_0"));
        let err = sender.announce(path).await.unwrap_err();
        assert!(matches!(err, Error::Spool(SpoolError::NonUtf8Path(_))));
        assert!(sender.into_inner().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_fifo_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_fifo_receiver(&dir.path().join("absent.fifo")).unwrap_err();
        assert!(matches!(
            err,
            Error::Initialization {
                what: "output control pipe",
                ..
            }
        ));
    }
}
