//! Request/response engine of an asynchronous HTTP/1.x client
//!
//! This crate covers the layer between a logical request (method, url,
//! headers, body, auth, proxy, TLS policy) and an already-established
//! connection: it negotiates the outgoing header set, writes the request
//! onto the wire, owns the background task that streams the body, and
//! parses the response into a streaming object whose release/close
//! semantics are tied to connection pooling.
//!
//! Establishing connections, resolving names and pooling itself are out
//! of scope: a pool buckets connections by [`ConnectionKey`] and hands
//! back objects implementing the [`Connection`] trait.
extern crate base64;
extern crate encoding_rs;
extern crate futures;
extern crate hex;
extern crate netbuf;
extern crate serde;
extern crate serde_json;
extern crate sha2;
extern crate tokio_core;
extern crate url;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

mod connection;
mod cookies;
mod errors;
mod fingerprint;
mod headers;
mod helpers;
mod payload;
mod pool_key;
mod request;
mod response;
mod serializer;
mod trace;
mod version;
mod writer;

pub use connection::{Connection, Content, ProcessingError, Protocol};
pub use connection::ResponseHead;
pub use cookies::Cookie;
pub use errors::{Error, ResponseFailure};
pub use fingerprint::Fingerprint;
pub use headers::Headers;
pub use helpers::{BasicAuth, ContentDisposition};
pub use payload::{FormData, Payload};
pub use pool_key::{ConnectionKey, TlsPolicy};
pub use request::{ClientRequest, RequestClose, RequestInfo};
pub use request::RequestParams;
pub use response::{ClientResponse, ReadBody, ResponseStart, Session};
pub use response::WaitForClose;
pub use trace::Trace;
pub use version::Version;
pub use writer::WriterHandle;
