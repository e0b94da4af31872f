//! Byte sources the parsers read from.
//!
//! ```text
//! SocketWrapper ──► BodySource (stops at Content-Length) ──► cursors
//!       │
//!       └──────────► start line, headers
//! &[u8] ───────────► bulk decoders, tests
//! ```

use crate::{
    errors::{Error, Result},
    server::socket::SocketWrapper,
};
use std::future::Future;

/// Anything the HTTP parsers can pull bytes from, one at a time.
///
/// `Ok(None)` means the source has no more data. Sources bounded by a
/// length (like [`BodySource`]) report the end of data there and treat an
/// early end of the underlying stream as an error instead.
pub trait ByteSource: Send {
    fn read_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send;

    /// Reads up to `buf.len()` bytes, returning how many were read
    /// (`0` at the end of data).
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut count = 0;
            while count < buf.len() {
                match self.read_byte().await? {
                    Some(byte) => buf[count] = byte,
                    None => break,
                }
                count += 1;
            }
            Ok(count)
        }
    }

    /// Reads a line, dropping every `\r` and stopping after `\n`.
    ///
    /// Returns `None` if the source ended before any byte was read, and the
    /// partial line if it ended later. A line longer than `max` bytes
    /// (terminator included) is a forbidden use.
    fn read_line(&mut self, max: usize) -> impl Future<Output = Result<Option<String>>> + Send {
        async move {
            let mut line = Vec::with_capacity(64);
            let mut count = 0;

            loop {
                if count >= max {
                    return Err(Error::ForbiddenUse(format!(
                        "client sent more bytes than allowed for a single line, max: {max}"
                    )));
                }
                count += 1;

                match self.read_byte().await? {
                    None if count == 1 => return Ok(None),
                    None | Some(b'\n') => break,
                    Some(b'\r') => continue,
                    Some(byte) => line.push(byte),
                }
            }

            Ok(Some(line_to_string(line)))
        }
    }
}

/// Converts a raw line, replacing invalid UTF-8 sequences.
#[inline]
pub(crate) fn line_to_string(line: Vec<u8>) -> String {
    match simdutf8::basic::from_utf8(&line) {
        // SAFETY: `simdutf8` just validated these exact bytes as UTF-8.
        Ok(_) => unsafe { String::from_utf8_unchecked(line) },
        Err(_) => String::from_utf8_lossy(&line).into_owned(),
    }
}

impl<T: ByteSource> ByteSource for &mut T {
    #[inline]
    fn read_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send {
        (**self).read_byte()
    }

    #[inline]
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send {
        (**self).read_chunk(buf)
    }

    #[inline]
    fn read_line(&mut self, max: usize) -> impl Future<Output = Result<Option<String>>> + Send {
        (**self).read_line(max)
    }
}

impl ByteSource for &[u8] {
    async fn read_byte(&mut self) -> Result<Option<u8>> {
        let slice: &[u8] = *self;
        match slice.split_first() {
            Some((&byte, rest)) => {
                *self = rest;
                Ok(Some(byte))
            }
            None => Ok(None),
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let slice: &[u8] = *self;
        let count = buf.len().min(slice.len());
        buf[..count].copy_from_slice(&slice[..count]);
        *self = &slice[count..];
        Ok(count)
    }
}

/// The request body as it arrives on the socket: exactly `Content-Length`
/// bytes, counted as they are consumed.
pub struct BodySource<'s> {
    socket: &'s mut SocketWrapper,
    consumed: usize,
    limit: usize,
}

impl<'s> BodySource<'s> {
    pub(crate) fn new(socket: &'s mut SocketWrapper, limit: usize) -> Self {
        Self {
            socket,
            consumed: 0,
            limit,
        }
    }

    /// Bytes of the body read so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes of the body still on the wire.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.consumed
    }

    #[inline]
    pub(crate) fn socket(&mut self) -> &mut SocketWrapper {
        self.socket
    }

    /// Reads whatever is left of the body, up to `max` bytes.
    ///
    /// Returns `false` without reading when more than `max` bytes remain,
    /// leaving the stream position unknown to the caller.
    pub(crate) async fn drain(&mut self, max: usize) -> Result<bool> {
        if self.remaining() > max {
            return Ok(false);
        }

        let mut buf = [0u8; 8192];
        while self.remaining() > 0 {
            self.read_chunk(&mut buf).await?;
        }
        Ok(true)
    }
}

impl ByteSource for BodySource<'_> {
    async fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.consumed >= self.limit {
            return Ok(None);
        }

        match self.socket.read_byte().await? {
            Some(byte) => {
                self.consumed += 1;
                Ok(Some(byte))
            }
            None => Err(Error::closed_unexpectedly()),
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let max = buf.len().min(self.remaining());
        if max == 0 {
            return Ok(0);
        }

        match self.socket.read_chunk(&mut buf[..max]).await? {
            0 => Err(Error::closed_unexpectedly()),
            count => {
                self.consumed += count;
                Ok(count)
            }
        }
    }
}
