// Reply encoding module
//
// Builds RESP2 replies into an internal buffer; the dispatcher flushes
// explicitly, and only on the last command of a pipelined batch.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::super::error::Result;
use super::super::messages::Message;

/// Buffered RESP2 reply writer.
pub struct ReplyWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> ReplyWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Bulk string reply, e.g. `$4\r\nPONG\r\n`.
    pub fn write_bulk_string(&mut self, s: &str) {
        self.write_bulk(s.as_bytes());
    }

    /// Bulk bytes reply.
    pub fn write_bulk(&mut self, data: &[u8]) {
        self.buf
            .extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Nil bulk reply (`$-1\r\n`); BLPOP's timeout answer.
    pub fn write_nil_bulk(&mut self) {
        self.buf.extend_from_slice(b"$-1\r\n");
    }

    /// Error reply. Line breaks in the message would corrupt the frame and
    /// are replaced with spaces.
    pub fn write_error(&mut self, msg: &str) {
        self.buf.put_u8(b'-');
        for b in msg.bytes() {
            self.buf.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Integer reply (`:42\r\n`).
    pub fn write_integer(&mut self, n: i64) {
        self.buf.extend_from_slice(format!(":{n}\r\n").as_bytes());
    }

    /// Array header; the caller writes the elements.
    pub fn write_array_header(&mut self, len: usize) {
        self.buf.extend_from_slice(format!("*{len}\r\n").as_bytes());
    }

    /// The BLPOP delivery reply: an 8-element array alternating field names
    /// and values. Field names are byte strings, partition and offset are
    /// RESP integers, the value is bulk bytes.
    pub fn write_message(&mut self, msg: &Message) {
        self.write_array_header(8);
        self.write_bulk_string("topic");
        self.write_bulk_string(&msg.topic);
        self.write_bulk_string("partition");
        self.write_integer(i64::from(msg.partition));
        self.write_bulk_string("offset");
        self.write_integer(msg.offset);
        self.write_bulk_string("value");
        self.write_bulk(&msg.value);
    }

    /// Write everything buffered to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        self.buf.clear();
        Ok(())
    }
}
