use std::io;
use std::fmt;
use std::net::SocketAddr;

use serde_json;
use url::Url;

use headers::Headers;
use request::RequestInfo;
use serializer::HeaderError;

/// Everything known about a response head that failed to process
///
/// The request info and redirect history survive the request object
/// itself, so the error stays useful after the request is torn down.
#[derive(Debug)]
pub struct ResponseFailure {
    pub request_info: RequestInfo,
    pub history: Vec<Url>,
    pub status: Option<u16>,
    pub message: String,
    pub headers: Option<Headers>,
}

impl fmt::Display for ResponseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{}, status: {}", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

quick_error! {
    #[derive(Debug)]
    /// Client request error
    pub enum Error {
        /// The URL has no host to connect to
        InvalidUrl(url: Url) {
            description("URL has no host")
            display("URL {:?} has no host", url.as_str())
        }
        /// Method contains non-token characters
        InvalidMethod(method: String) {
            description("method contains non-token characters")
            display("method {:?} contains non-token characters", method)
        }
        /// Both a compress flag and a `Content-Encoding` header are set
        CompressConflict {
            description("compress can not be set \
                if Content-Encoding header is set")
        }
        /// Both a chunked flag and a `Transfer-Encoding: chunked` header
        /// are set
        ChunkedConflict {
            description("chunked can not be set \
                if Transfer-Encoding: chunked header is set")
        }
        /// A chunked flag is set together with a `Content-Length` header
        ChunkedWithLength {
            description("chunked can not be set \
                if Content-Length header is set")
        }
        /// Fingerprint digest length matches no known algorithm
        FingerprintLength(len: usize) {
            description("fingerprint has invalid length")
            display("fingerprint length {} matches no known digest", len)
        }
        /// Fingerprint digest length maps to an insecure algorithm
        FingerprintInsecure {
            description("md5 and sha1 fingerprints are insecure \
                and not supported, use sha256")
        }
        /// Peer certificate digest differs from the pinned one
        FingerprintMismatch(expected: Vec<u8>, got: Vec<u8>,
                            peer: Option<SocketAddr>)
        {
            description("certificate fingerprint mismatch")
            display("certificate fingerprint mismatch for {:?}: \
                expected {}, got {}",
                peer, ::hex::encode(expected), ::hex::encode(got))
        }
        /// OS-level failure while writing the request body
        ConnectionWrite(url: Url, err: io::Error) {
            description("can not write request body")
            display("can not write request body for {}: {}",
                url.as_str(), err)
            cause(err)
        }
        /// Read from a released connection, or the content stream was
        /// failed by a release
        ConnectionClosed {
            description("connection closed")
        }
        /// Malformed response head reported by the protocol layer
        Process(err: Box<ResponseFailure>) {
            description("bad response from server")
            display("bad response from server: {}", err)
        }
        /// `json()` called on a response with an unexpected mimetype
        ContentType(mimetype: String) {
            description("unexpected mimetype")
            display("attempt to decode JSON with unexpected mimetype: {}",
                mimetype)
        }
        /// Response body can not be decoded with the resolved charset
        Decode(msg: String) {
            description("can not decode response body")
            display("can not decode response body: {}", msg)
        }
        /// Response body is not valid JSON
        Json(err: serde_json::Error) {
            description("invalid json")
            display("invalid json: {}", err)
            from()
            cause(err)
        }
        /// Header could not be serialized
        Serialize(err: HeaderError) {
            description("can not serialize headers")
            display("can not serialize headers: {}", err)
            from()
            cause(err)
        }
        /// I/O (basically networking) error occured during the request
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
            cause(err)
        }
    }
}
