use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::frame::MAX_LENGTH_DIGITS;
use crate::network::RequestFrame;
use crate::AppResult;

/// How many maximum-size frames may be buffered ahead of the one being
/// processed.
const READ_AHEAD_FRAMES: usize = 16;

/// Read side of a client connection.
///
/// Bytes accumulate in `buffer` until at least one complete netstring is
/// available. Several requests in one read are handed out one by one, and a
/// request split across reads is reassembled.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
    read_ahead_limit: usize,
    eof: bool,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, buffer_size: usize, max_frame_size: usize) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            max_frame_size,
            read_ahead_limit: READ_AHEAD_FRAMES * (max_frame_size + MAX_LENGTH_DIGITS + 2),
            eof: false,
        }
    }

    /// Reads the next request from the connection.
    ///
    /// Returns `Ok(None)` when the client closed the connection between
    /// requests. A `MalformedProtocol` error leaves the connection usable: the
    /// bad bytes are already discarded and the caller should answer and read
    /// again. Any other error means the connection is gone.
    pub async fn read_frame(&mut self) -> AppResult<Option<RequestFrame>> {
        loop {
            if let Some(frame) = RequestFrame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if self.eof {
                return if self.buffer.is_empty() {
                    // client has closed the connection gracefully
                    Ok(None)
                } else {
                    // client closed the connection while sending a frame
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                self.eof = true;
            }
        }
    }

    /// Whether [`Connection::fill_buffer`] may be polled while a request is
    /// being processed.
    pub fn can_read_ahead(&self) -> bool {
        !self.eof && self.buffer.len() < self.read_ahead_limit
    }

    /// Reads whatever the client sent next into the buffer without parsing
    /// it. Used to notice a reset peer while a lookup is in flight.
    pub async fn fill_buffer(&mut self) -> AppResult<()> {
        if 0 == self.reader.read_buf(&mut self.buffer).await? {
            self.eof = true;
        }
        Ok(())
    }
}
