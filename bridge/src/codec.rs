//! `Content-Length` framing for the engine's stdio channel.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by `N` bytes of
//! UTF-8 JSON. [`FrameReader`] and [`FrameWriter`] work over any tokio
//! reader/writer so the same code drives a child's pipes and in-memory
//! duplex streams in tests.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error while {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected EOF while reading headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(stage: &'static str) -> impl FnOnce(std::io::Error) -> CodecError {
    move |source| CodecError::Io { stage, source }
}

/// Reads framed JSON messages from the engine.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream ended cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(io_err("reading frame body"))?;

        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut saw_header_bytes = false;

        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(io_err("reading header line"))?;

            if n == 0 {
                // EOF is only clean before the first header byte.
                return if saw_header_bytes {
                    Err(CodecError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            saw_header_bytes = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }

            if let Some((key, value)) = header.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                let len = value
                    .parse::<usize>()
                    .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

/// Writes framed JSON messages to the engine.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(io_err("writing frame header"))?;
        self.writer
            .write_all(&body)
            .await
            .map_err(io_err("writing frame body"))?;
        self.writer
            .flush()
            .await
            .map_err(io_err("flushing frame"))?;
        Ok(())
    }

    /// Flush and close the underlying writer so the engine sees EOF on stdin.
    pub async fn close(mut self) -> Result<(), CodecError> {
        self.writer
            .shutdown()
            .await
            .map_err(io_err("closing writer"))
    }
}
