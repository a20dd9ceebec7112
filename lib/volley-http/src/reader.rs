/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{HttpBodyType, HttpChunkedLine, HttpHeaderLine, HttpReadError, HttpStatusLine};

const MIN_READ_SIZE: usize = 4096;

/// Status line and headers of a response.
#[derive(Debug)]
pub struct HttpResponseHead {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Buffered reader over a byte stream.
///
/// The buffer grows on demand, but a single fill never pushes it past twice
/// the configured limit, so a fast peer is held back by the transport while
/// the caller has not consumed what is already buffered.
pub struct HttpStreamReader<R> {
    inner: R,
    buf: BytesMut,
    limit: usize,
    read_total: u64,
}

impl<R> HttpStreamReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        let limit = limit.max(MIN_READ_SIZE);
        HttpStreamReader {
            inner,
            buf: BytesMut::with_capacity(limit),
            limit,
            read_total: 0,
        }
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether further transport reads are held back.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.buf.len() > self.limit * 2
    }

    /// Total bytes received from the transport.
    #[inline]
    pub fn read_total(&self) -> u64 {
        self.read_total
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Drop any buffered bytes and return the transport.
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn take_buffered(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<R> HttpStreamReader<R>
where
    R: AsyncRead + Unpin,
{
    async fn fill_more(&mut self, wanted: usize) -> Result<usize, HttpReadError> {
        let high_water = self.limit * 2;
        let room = high_water
            .saturating_sub(self.buf.len())
            .max(wanted)
            .max(MIN_READ_SIZE);
        let mut dst = (&mut self.buf).limit(room);
        let nr = self.inner.read_buf(&mut dst).await?;
        if nr == 0 {
            return Err(HttpReadError::ClosedByRemote);
        }
        self.read_total += nr as u64;
        Ok(nr)
    }

    /// Do one transport read and keep the data buffered.
    ///
    /// Dropping the returned future before it completes leaves the buffer
    /// untouched.
    pub async fn fill_buf(&mut self) -> Result<usize, HttpReadError> {
        self.fill_more(0).await
    }

    /// Return whatever is buffered, or the result of one transport read.
    pub async fn read_available(&mut self) -> Result<Bytes, HttpReadError> {
        if self.buf.is_empty() {
            self.fill_more(0).await?;
        }
        Ok(self.buf.split().freeze())
    }

    /// Read one line, including the line terminator.
    ///
    /// The line is split off the already filled buffer without copying
    /// whenever it is complete there.
    pub async fn read_line_fast(&mut self, max_len: usize) -> Result<Bytes, HttpReadError> {
        let mut searched = 0;
        loop {
            if let Some(p) = memchr::memchr(b'\n', &self.buf[searched..]) {
                let end = searched + p + 1;
                if end > max_len {
                    return Err(HttpReadError::LineTooLong(max_len));
                }
                return Ok(self.buf.split_to(end).freeze());
            }
            searched = self.buf.len();
            if searched >= max_len {
                return Err(HttpReadError::LineTooLong(max_len));
            }
            self.fill_more(0).await?;
        }
    }

    /// Read until `sep` is found. The separator is consumed but not returned.
    pub async fn read_until(&mut self, sep: &[u8], max_len: usize) -> Result<Bytes, HttpReadError> {
        if sep.is_empty() {
            return self.read_available().await;
        }
        let mut searched = 0;
        loop {
            if let Some(p) = memchr::memmem::find(&self.buf[searched..], sep) {
                let end = searched + p;
                let data = self.buf.split_to(end).freeze();
                let _ = self.buf.split_to(sep.len());
                return Ok(data);
            }
            if self.buf.len() > max_len {
                return Err(HttpReadError::LineTooLong(max_len));
            }
            // the separator may straddle two reads
            searched = self.buf.len().saturating_sub(sep.len() - 1);
            self.fill_more(0).await?;
        }
    }

    pub async fn read_exactly(&mut self, size: usize) -> Result<Bytes, HttpReadError> {
        while self.buf.len() < size {
            let wanted = size - self.buf.len();
            self.fill_more(wanted).await?;
        }
        Ok(self.buf.split_to(size).freeze())
    }

    /// Read header lines until an empty line.
    ///
    /// Names are stored lowercased, values keep their bytes. Repeated names
    /// are appended.
    pub async fn read_headers(&mut self, max_size: usize) -> Result<HeaderMap, HttpReadError> {
        let mut headers = HeaderMap::new();
        let mut total = 0usize;
        loop {
            let left = max_size.saturating_sub(total);
            if left == 0 {
                return Err(HttpReadError::HeadersTooLarge(max_size));
            }
            let line = match self.read_line_fast(left).await {
                Ok(line) => line,
                Err(HttpReadError::LineTooLong(_)) => {
                    return Err(HttpReadError::HeadersTooLarge(max_size));
                }
                Err(e) => return Err(e),
            };
            total += line.len();
            if is_empty_line(&line) {
                return Ok(headers);
            }

            let header = HttpHeaderLine::parse(&line)?;
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| HttpReadError::InvalidHeaderName(header.name.to_string()))?;
            let value = HeaderValue::from_str(header.value)
                .map_err(|_| HttpReadError::InvalidHeaderValue(header.name.to_string()))?;
            headers.append(name, value);
        }
    }

    pub async fn read_response_head(
        &mut self,
        max_header_size: usize,
    ) -> Result<HttpResponseHead, HttpReadError> {
        let line = self.read_line_fast(max_header_size).await?;
        let status = HttpStatusLine::parse(&line)?;
        let version = status.version;
        let code = status.code;
        let reason = status.reason.to_string();
        let headers = self
            .read_headers(max_header_size.saturating_sub(line.len()))
            .await?;
        Ok(HttpResponseHead {
            version,
            code,
            reason,
            headers,
        })
    }

    pub async fn read_body(
        &mut self,
        body_type: HttpBodyType,
        max_body_size: u64,
    ) -> Result<Bytes, HttpReadError> {
        match body_type {
            HttpBodyType::Empty => Ok(Bytes::new()),
            HttpBodyType::ContentLength(len) => {
                if len > max_body_size {
                    return Err(HttpReadError::BodyTooLarge(max_body_size));
                }
                self.read_exactly(len as usize).await
            }
            HttpBodyType::Chunked => self.read_chunked_body(max_body_size).await,
        }
    }

    /// Decode a chunked body: a hex size line, then size + 2 bytes, until the
    /// zero sized chunk. Trailer lines are read and dropped.
    pub async fn read_chunked_body(&mut self, max_body_size: u64) -> Result<Bytes, HttpReadError> {
        const CHUNK_LINE_MAX: usize = 1024;

        let mut body = BytesMut::new();
        loop {
            let line = self.read_line_fast(CHUNK_LINE_MAX).await?;
            let chunk = HttpChunkedLine::parse(&line)?;
            if chunk.chunk_size == 0 {
                break;
            }
            if body.len() as u64 + chunk.chunk_size > max_body_size {
                return Err(HttpReadError::BodyTooLarge(max_body_size));
            }

            let size = chunk.chunk_size as usize;
            let data = self.read_exactly(size + 2).await?;
            if &data[size..] != b"\r\n" {
                return Err(HttpReadError::InvalidChunkEnd);
            }
            body.extend_from_slice(&data[..size]);
        }

        loop {
            let line = self.read_line_fast(CHUNK_LINE_MAX).await?;
            if is_empty_line(&line) {
                break;
            }
        }
        Ok(body.freeze())
    }
}

#[inline]
fn is_empty_line(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn fill_keeps_data() {
        let stream = Builder::new().read(b"pushed").read(b" more").build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        assert_eq!(reader.fill_buf().await.unwrap(), 6);
        assert_eq!(reader.buffered(), 6);
        let data = reader.read_exactly(11).await.unwrap();
        assert_eq!(data.as_ref(), b"pushed more");
        assert_eq!(reader.read_total(), 11);
    }

    #[tokio::test]
    async fn response_with_length() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-")
            .read(b"Length: 4\r\nX-Test: a\r\nx-test: b\r\n\r\npo")
            .read(b"ng")
            .build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let head = reader.read_response_head(4096).await.unwrap();
        assert_eq!(head.code, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.headers.get_all("x-test").iter().count(), 2);

        let body_type = HttpBodyType::detect(head.code, false, &head.headers).unwrap();
        let body = reader.read_body(body_type, 1 << 20).await.unwrap();
        assert_eq!(body.as_ref(), b"pong");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn chunked_body() {
        let stream = Builder::new()
            .read(b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n")
            .read(b"0\r\nExpires: never\r\n\r\nNEXT")
            .build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let body = reader.read_chunked_body(1 << 20).await.unwrap();
        assert_eq!(body.as_ref(), b"Wikipedia");
        assert_eq!(reader.take_buffered().as_ref(), b"NEXT");
    }

    #[tokio::test]
    async fn bad_chunk_end() {
        let stream = Builder::new().read(b"2\r\nabXX0\r\n\r\n").build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let e = reader.read_chunked_body(1 << 20).await.unwrap_err();
        assert!(matches!(e, HttpReadError::InvalidChunkEnd));
        assert!(e.is_protocol());
    }

    #[tokio::test]
    async fn read_until_split_separator() {
        let stream = Builder::new().read(b"pong\r").read(b"\nrest").build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let data = reader.read_until(b"\r\n", 64).await.unwrap();
        assert_eq!(data.as_ref(), b"pong");
        assert_eq!(reader.read_exactly(4).await.unwrap().as_ref(), b"rest");
    }

    #[tokio::test]
    async fn closed_early() {
        let stream = Builder::new().read(b"HTTP/1.1 200 OK\r\n").build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let e = reader.read_response_head(4096).await.unwrap_err();
        assert!(matches!(e, HttpReadError::ClosedByRemote));
    }

    #[tokio::test]
    async fn header_limit() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n")
            .build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let e = reader.read_response_head(32).await.unwrap_err();
        assert!(matches!(e, HttpReadError::HeadersTooLarge(_)));
    }

    #[tokio::test]
    async fn lowercase_names() {
        let stream = Builder::new()
            .read(b"Upgrade: websocket\r\nCONNECTION: Upgrade\r\n\r\n")
            .build();
        let mut reader = HttpStreamReader::new(stream, 1024);
        let headers = reader.read_headers(4096).await.unwrap();
        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert!(headers.contains_key("connection"));
    }

    #[tokio::test]
    async fn pause_over_high_water() {
        let data = vec![b'a'; 2 * MIN_READ_SIZE];
        let stream = Builder::new().read(&data).build();
        let mut reader = HttpStreamReader::new(stream, MIN_READ_SIZE);
        let first = reader.read_exactly(1).await.unwrap();
        assert_eq!(first.as_ref(), b"a");
        assert!(reader.buffered() < 2 * MIN_READ_SIZE);
        assert!(!reader.is_paused());
    }
}
