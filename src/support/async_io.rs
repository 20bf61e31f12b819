//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

use std::io;
use std::mem;
use std::pin::Pin;
use std::task;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::handler::TlsSocketWrapper;
use crate::support::error::Error;

/// Byte streams a session can run over.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

pub type BoxedSessionStream = Box<dyn SessionStream>;

/// RFC 5321 §4.5.3.1: 998 octets of text plus CRLF.
const MAX_LINE: usize = 1000;

const READ_CHUNK: usize = 4096;

/// The I/O side of one session.
///
/// This fulfils three roles:
/// - Reading CRLF-delimited lines (and DATA payload chunks) under the
///   connection idle timeout, which resets on every successful read.
/// - Buffering outgoing replies so a batch of pipelined commands is answered
///   without interleaved flushes.
/// - Switching the underlying transport from cleartext to TLS mid-stream
///   when STARTTLS is accepted.
pub(crate) struct SessionIo {
    stream: BoxedSessionStream,
    rbuf: Vec<u8>,
    rpos: usize,
    wbuf: Vec<u8>,
    timeout: Duration,
}

impl SessionIo {
    pub(crate) fn new(stream: BoxedSessionStream, timeout: Duration) -> Self {
        SessionIo {
            stream,
            rbuf: Vec::with_capacity(READ_CHUNK),
            rpos: 0,
            wbuf: Vec::new(),
            timeout,
        }
    }

    fn buffered(&self) -> &[u8] {
        &self.rbuf[self.rpos..]
    }

    fn compact(&mut self) {
        if self.rpos == self.rbuf.len() {
            self.rbuf.clear();
            self.rpos = 0;
        } else if self.rpos > READ_CHUNK {
            self.rbuf.drain(..self.rpos);
            self.rpos = 0;
        }
    }

    /// Reads more input, bounded by the idle timeout. Returns 0 at EOF.
    async fn fill(&mut self) -> Result<usize, Error> {
        self.compact();

        let mut chunk = [0u8; READ_CHUNK];
        let n = tokio::time::timeout(self.timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| Error::IdleTimeout)??;
        self.rbuf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Reads one line into `out`, without its terminator.
    ///
    /// Lines are CRLF-delimited; a bare LF is tolerated and the trailing CR,
    /// when present, is stripped. Fails with `LineTooLong` without consuming
    /// anything when the line exceeds `MAX_LINE`; `discard_line` then
    /// resynchronises the stream.
    pub(crate) async fn read_line(
        &mut self,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        out.clear();

        loop {
            if let Some(eol) = memchr::memchr(b'\n', self.buffered()) {
                if eol > MAX_LINE {
                    return Err(Error::LineTooLong);
                }

                let mut line = &self.buffered()[..eol];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                out.extend_from_slice(line);

                self.rpos += eol + 1;
                self.compact();
                return Ok(());
            }

            if self.buffered().len() > MAX_LINE {
                return Err(Error::LineTooLong);
            }

            if 0 == self.fill().await? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Consumes input up to and including the next LF.
    pub(crate) async fn discard_line(&mut self) -> Result<(), Error> {
        loop {
            if let Some(eol) = memchr::memchr(b'\n', self.buffered()) {
                self.rpos += eol + 1;
                self.compact();
                return Ok(());
            }

            self.rpos = self.rbuf.len();
            if 0 == self.fill().await? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Returns the next run of buffered payload bytes, reading if the buffer
    /// is empty.
    ///
    /// The returned slice is never empty and ends with the first LF when one
    /// is buffered, so a caller sees at most one line ending per chunk.
    pub(crate) async fn data_chunk(&mut self) -> Result<&[u8], Error> {
        if self.buffered().is_empty() && 0 == self.fill().await? {
            return Err(Error::ConnectionClosed);
        }

        let buffered = &self.rbuf[self.rpos..];
        Ok(match memchr::memchr(b'\n', buffered) {
            Some(eol) => &buffered[..=eol],
            None => buffered,
        })
    }

    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(self.rpos + n <= self.rbuf.len());
        self.rpos += n;
        self.compact();
    }

    pub(crate) async fn read_data_byte(&mut self) -> Result<u8, Error> {
        let byte = self.data_chunk().await?[0];
        self.consume(1);
        Ok(byte)
    }

    pub(crate) fn buffer_raw(&mut self, bytes: &[u8]) {
        self.wbuf.extend_from_slice(bytes);
    }

    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if !self.wbuf.is_empty() {
            self.stream.write_all(&self.wbuf).await?;
            self.wbuf.clear();
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Replaces the transport with the TLS stream produced by `wrapper`.
    ///
    /// Pending replies are flushed first. Any cleartext input buffered past
    /// the STARTTLS command line aborts the session instead of being carried
    /// into the TLS stream, which would let a man in the middle inject
    /// commands into the encrypted session.
    pub(crate) async fn upgrade_tls(
        &mut self,
        wrapper: &dyn TlsSocketWrapper,
    ) -> Result<(), Error> {
        self.flush().await?;

        if !self.buffered().is_empty() {
            return Err(Error::CleartextAfterStarttls);
        }

        let plain = mem::replace(&mut self.stream, Box::new(ClosedStream));
        let tls = tokio::time::timeout(self.timeout, wrapper.wrap(plain))
            .await
            .map_err(|_| Error::TlsHandshake(io::ErrorKind::TimedOut.into()))?
            .map_err(Error::TlsHandshake)?;

        self.stream = tls;
        Ok(())
    }
}

/// Stand-in transport installed while the real stream is lent to the TLS
/// wrapper. Reads EOF, writes fail.
struct ClosedStream;

impl AsyncRead for ClosedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ClosedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
        _buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        task::Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        task::Poll::Ready(Ok(()))
    }
}
