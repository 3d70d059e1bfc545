//! Wire-format serializer for the request side of a connection
//!
//! The state machine enforces on the byte level what header negotiation
//! enforces on the header-map level: `Content-Length` and
//! `Transfer-Encoding` are mutually exclusive and must be added through
//! the dedicated methods, and a body may only be written after headers
//! are done.
use std::fmt::Display;
use std::io::Write;
#[allow(unused_imports)]
use std::ascii::AsciiExt;

use netbuf::Buf;

use version::Version;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
    }
}

/// State of a request message being written
///
/// Note: while we pass the buffer to each method, we expect that the same
/// buffer is passed each time
#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent.
    RequestStart,
    /// Request line is already in the buffer.
    Headers,
    /// The message contains a fixed size body.
    FixedHeaders { content_length: u64 },
    /// The message contains a chunked body.
    ChunkedHeaders,
    /// The message contains a body with the given number of bytes left.
    FixedBody { content_length: u64 },
    /// The message contains a chunked body.
    ChunkedBody,
    /// A message in the final state.
    Done,
}

fn invalid_header(value: &[u8]) -> bool {
    return value.iter().any(|&x| x == b'\r' || x == b'\n')
}

impl MessageState {
    /// Write the request line.
    ///
    /// This puts the request line into the buffer immediately.
    ///
    /// # Panics
    ///
    /// When the request line is already written. It's expected that your
    /// request handler state machine will never call the method twice.
    pub fn request_line(&mut self, buf: &mut Buf,
        method: &str, target: &str, version: Version)
    {
        use self::MessageState::*;
        match *self {
            RequestStart => {
                write!(buf, "{} {} {}\r\n",
                    method, target, version).unwrap();
                *self = Headers;
            }
            ref state => {
                panic!("Called request_line() method on request in state \
                    {:?}", state)
            }
        }
    }

    fn write_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        buf.write_all(value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    fn write_formatted<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        write!(buf, "{}", value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    /// Add a header to the message.
    ///
    /// The header is written into the buffer immediately.
    ///
    /// `Content-Length` must be set using the `add_length` method and
    /// `Transfer-Encoding: chunked` with the `add_chunked` method. These
    /// two headers are important for the security of HTTP.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut Buf, name: &str, value: &str)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers | FixedHeaders { .. } | ChunkedHeaders => {
                self.write_header(buf, name, value.as_bytes())
            }
            ref state => {
                panic!("Called add_header() method on a message in state \
                    {:?}", state)
            }
        }
    }

    /// Add a content length to the message.
    ///
    /// The `Content-Length` header is written to the buffer immediately.
    /// It is checked that no other body length header is present in the
    /// message, and the length is validated when the body is written.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Buf, n: u64)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        match *self {
            FixedHeaders { .. } => Err(DuplicateContentLength),
            ChunkedHeaders => Err(ContentLengthAfterTransferEncoding),
            Headers => {
                self.write_formatted(buf, "Content-Length", n)?;
                *self = FixedHeaders { content_length: n };
                Ok(())
            }
            ref state => {
                panic!("Called add_length() method on message in state \
                    {:?}", state)
            }
        }
    }

    /// Set the transfer encoding to chunked.
    ///
    /// Writes `Transfer-Encoding: chunked` to the buffer immediately. It
    /// is assured that only one body length header is present and the
    /// body will be written in chunked encoding.
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self, buf: &mut Buf)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        match *self {
            FixedHeaders { .. } => Err(TransferEncodingAfterContentLength),
            ChunkedHeaders => Err(DuplicateTransferEncoding),
            Headers => {
                self.write_header(buf, "Transfer-Encoding", b"chunked")?;
                *self = ChunkedHeaders;
                Ok(())
            }
            ref state => {
                panic!("Called add_chunked() method on message in state \
                    {:?}", state)
            }
        }
    }

    /// Closes the HTTP header
    ///
    /// A request without a `Content-Length` or `Transfer-Encoding` header
    /// contains no body, which is the same as a zero-length fixed body on
    /// the wire.
    ///
    /// # Panics
    ///
    /// Panics when the request is in the wrong state.
    pub fn done_headers(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            Headers => {
                *self = FixedBody { content_length: 0 };
            }
            FixedHeaders { content_length } => {
                *self = FixedBody { content_length: content_length };
            }
            ChunkedHeaders => {
                *self = ChunkedBody;
            }
            ref state => {
                panic!("Called done_headers() method on message in state \
                    {:?}", state)
            }
        }
        buf.write(b"\r\n").unwrap();
    }

    /// Write a chunk of the message body.
    ///
    /// Works both for fixed-size body and chunked body.
    ///
    /// For the chunked body each chunk is put into the buffer immediately
    /// prefixed by the chunk size. Empty chunks are ignored.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the chunk is longer than
    /// the remaining declared `Content-Length`.
    pub fn write_body(&mut self, buf: &mut Buf, data: &[u8]) {
        use self::MessageState::*;
        match *self {
            FixedBody { ref mut content_length } => {
                if data.len() as u64 > *content_length {
                    panic!("Fixed size request error. \
                        Bytes left {} but got additional {}",
                        content_length, data.len());
                }
                buf.write(data).unwrap();
                *content_length -= data.len() as u64;
            }
            ChunkedBody => if data.len() > 0 {
                write!(buf, "{:x}\r\n", data.len()).unwrap();
                buf.write(data).unwrap();
                buf.write(b"\r\n").unwrap();
            },
            ref state => {
                panic!("Called write_body() method on message \
                    in state {:?}", state)
            }
        }
    }

    /// Returns true if headers are already sent (buffered)
    pub fn is_after_headers(&self) -> bool {
        use self::MessageState::*;
        matches!(*self, Done | FixedBody {..} | ChunkedBody)
    }

    /// Returns true if the `done()` method has already been called
    pub fn is_complete(&self) -> bool {
        matches!(*self, MessageState::Done)
    }

    /// Writes the end-of-body marker and asserts that the message is in
    /// the appropriate state for that.
    ///
    /// The method may be called multiple times.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the fixed-size body is
    /// not finished.
    pub fn done(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            FixedBody { content_length: 0 } => *self = Done,
            FixedBody { content_length } =>
                panic!("Tried to close message with {} bytes remaining.",
                       content_length),
            ChunkedBody => {
                buf.write(b"0\r\n\r\n").unwrap();
                *self = Done;
            }
            Done => {}  // multiple invocations are okay.
            ref state => {
                panic!("Called done() method on request in state {:?}",
                       state);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use netbuf::Buf;

    use super::MessageState;
    use version::Version;

    fn do_request<F>(fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::RequestStart, &mut buf);
        buf
    }

    #[test]
    fn minimal_request() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "GET", "/", Version::Http11);
            assert!(!msg.is_after_headers());
            msg.done_headers(buf);
            assert!(msg.is_after_headers());
            assert!(!msg.is_complete());
            msg.done(buf);
            assert!(msg.is_complete());
        })[..], "GET / HTTP/1.1\r\n\r\n".as_bytes());
    }

    #[test]
    fn fixed_body_request() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/submit", Version::Http11);
            msg.add_length(buf, 5).unwrap();
            msg.done_headers(buf);
            msg.write_body(buf, b"Hello");
            msg.done(buf);
        })[..], "POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nHello"
            .as_bytes());
    }

    #[test]
    fn chunked_request() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "PUT", "/upload", Version::Http11);
            msg.add_chunked(buf).unwrap();
            msg.done_headers(buf);
            msg.write_body(buf, b"Hello");
            msg.write_body(buf, b"");
            msg.write_body(buf, b" world");
            msg.done(buf);
        })[..], concat!("PUT /upload HTTP/1.1\r\n",
            "Transfer-Encoding: chunked\r\n\r\n",
            "5\r\nHello\r\n6\r\n world\r\n0\r\n\r\n").as_bytes());
    }

    #[test]
    fn length_then_chunked_fails() {
        do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/", Version::Http11);
            msg.add_length(buf, 5).unwrap();
            msg.add_chunked(buf).unwrap_err();
        });
    }

    #[test]
    fn chunked_then_length_fails() {
        do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/", Version::Http11);
            msg.add_chunked(buf).unwrap();
            msg.add_length(buf, 5).unwrap_err();
        });
    }

    #[test]
    fn body_length_header_is_refused() {
        do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/", Version::Http11);
            msg.add_header(buf, "content-length", "5").unwrap_err();
            msg.add_header(buf, "Transfer-Encoding", "chunked").unwrap_err();
        });
    }

    #[test]
    fn invalid_header_is_refused_and_removed() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "GET", "/", Version::Http11);
            msg.add_header(buf, "X-Bad", "a\r\nEvil: yes").unwrap_err();
            msg.add_header(buf, "X-Bad\r\n", "a").unwrap_err();
            msg.add_header(buf, "X-Good", "fine").unwrap();
            msg.done_headers(buf);
        })[..], "GET / HTTP/1.1\r\nX-Good: fine\r\n\r\n".as_bytes());
    }

    #[test]
    #[should_panic(expected = "bytes remaining")]
    fn short_fixed_body_panics() {
        do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/", Version::Http11);
            msg.add_length(buf, 5).unwrap();
            msg.done_headers(buf);
            msg.write_body(buf, b"Hel");
            msg.done(buf);
        });
    }
}
