//! Channel fabric
//!
//! One unidirectional pipe per work item, all created before the first fork
//! so every worker inherits the same descriptor topology. Each end is an
//! owned handle: closing an end means dropping it, and an end can only be in
//! one place at a time.
//!
//! After a worker has called [`ChannelFabric::isolate`] and the coordinator
//! has taken every write end, each write end is held by exactly one worker
//! and each read end by the coordinator alone.

use crate::error::{FanoutError, Result};
use rustix::fd::OwnedFd;
use rustix::io::{self as rio, Errno};
use rustix::pipe::{pipe_with, PipeFlags};
use std::io;

/// Coordinator side of a channel
pub struct ReadEnd {
    fd: OwnedFd,
}

impl ReadEnd {
    /// Read one message into `buf`.
    ///
    /// Blocks until a NUL byte arrives, the writer closes its end, or `buf`
    /// is full. Returns the number of bytes read; `0` means the writer closed
    /// without sending anything.
    pub fn read_message(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match rio::read(&self.fd, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    let terminated = buf[filled..filled + n].contains(&0);
                    filled += n;
                    if terminated {
                        break;
                    }
                }
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Worker side of a channel
pub struct WriteEnd {
    fd: OwnedFd,
}

impl WriteEnd {
    /// Write all of `buf`, retrying short writes and `EINTR`.
    ///
    /// Does not allocate, so it is safe to call in a freshly forked child.
    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match rio::write(&self.fd, buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Both ends of one work item's pipe, as seen by the current process
pub struct Channel {
    read: Option<ReadEnd>,
    write: Option<WriteEnd>,
}

impl Channel {
    /// Create a close-on-exec pipe
    pub fn open() -> io::Result<Self> {
        let (read, write) = pipe_with(PipeFlags::CLOEXEC)?;
        Ok(Self {
            read: Some(ReadEnd { fd: read }),
            write: Some(WriteEnd { fd: write }),
        })
    }

    /// Number of ends this process still holds (0..=2)
    fn open_ends(&self) -> usize {
        usize::from(self.read.is_some()) + usize::from(self.write.is_some())
    }
}

/// The full set of channels for one batch
pub struct ChannelFabric {
    channels: Vec<Channel>,
}

impl ChannelFabric {
    /// Allocate `n` channels.
    ///
    /// On failure every channel created so far is closed before returning.
    pub fn allocate(n: usize) -> Result<Self> {
        let mut channels = Vec::with_capacity(n);
        for index in 0..n {
            let channel = Channel::open().map_err(|source| FanoutError::ChannelCreate {
                index,
                source,
            })?;
            channels.push(channel);
        }
        Ok(Self { channels })
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the fabric holds no channels
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Move channel `index`'s write end out
    pub fn take_write(&mut self, index: usize) -> Option<WriteEnd> {
        self.channels.get_mut(index)?.write.take()
    }

    /// Move channel `index`'s read end out
    pub fn take_read(&mut self, index: usize) -> Option<ReadEnd> {
        self.channels.get_mut(index)?.read.take()
    }

    /// Reduce this process's view of the fabric to worker `index`'s write end.
    ///
    /// Closes every read end and every other worker's write end, then hands
    /// back the worker's own write end. Runs in a freshly forked child, so it
    /// only closes descriptors and never frees memory.
    pub fn isolate(&mut self, index: usize) -> Option<WriteEnd> {
        for (k, channel) in self.channels.iter_mut().enumerate() {
            drop(channel.read.take());
            if k != index {
                drop(channel.write.take());
            }
        }
        self.take_write(index)
    }

    /// Total number of ends still held by this process
    pub fn open_ends(&self) -> usize {
        self.channels.iter().map(Channel::open_ends).sum()
    }
}
