//! The response half of the engine
//!
//! A `ClientResponse` is created by `ClientRequest::send()` already
//! bound to its connection; `start()` reads the parsed head from the
//! protocol. From `Open` the response reaches one of two terminal
//! states: released (connection handed back to the pool alive) or
//! closed (connection terminated). Either way the connection is only
//! ever disposed of after the body-writer task stopped touching it.
use std::mem;
use std::cell::RefCell;
use std::rc::Rc;

use encoding_rs::{Encoding, UTF_8};
use futures::{Async, Future, Poll, Stream};
use futures::sync::oneshot;
use serde::de::DeserializeOwned;
use serde_json;
use tokio_core::reactor::Handle;
use url::Url;

use connection::{Connection, Content, ProcessingError, Protocol};
use connection::ResponseHead;
use cookies::{self, Cookie};
use errors::{Error, ResponseFailure};
use headers::{self, Headers};
use helpers::{self, ContentDisposition};
use request::RequestInfo;
use trace::Trace;
use version::Version;
use writer::{DeferredRelease, WriterHandle, WriterSlot};

/// Session-level collaborators of a response
///
/// Currently only the fallback charset resolver, consulted by
/// `get_encoding()` when neither the `Content-Type` header nor the
/// media type determine a charset.
pub struct Session {
    resolve_charset: Option<Box<Fn(&ClientResponse, &[u8]) -> String>>,
}

impl ::std::fmt::Debug for Session {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("Session")
            .field("resolve_charset", &self.resolve_charset.is_some())
            .finish()
    }
}

impl Session {
    pub fn new() -> Session {
        Session { resolve_charset: None }
    }

    /// Install a charset-sniffing callback `(response, body) -> label`
    pub fn charset_resolver<F>(mut self, resolver: F) -> Session
        where F: Fn(&ClientResponse, &[u8]) -> String + 'static,
    {
        self.resolve_charset = Some(Box::new(resolver));
        self
    }

    fn resolve(&self, response: &ClientResponse, body: &[u8])
        -> Option<String>
    {
        self.resolve_charset.as_ref()
            .map(|resolver| resolver(response, body))
    }
}

/// Constructor arguments of `ClientResponse`, filled in by `send()`
pub struct ResponseParts {
    pub method: String,
    pub url: Url,
    pub conn: Box<Connection>,
    pub proto: Rc<RefCell<Protocol>>,
    pub writer: WriterHandle,
    pub continue_tx: Option<oneshot::Sender<bool>>,
    pub request_info: RequestInfo,
    pub traces: Rc<Vec<Trace>>,
    pub session: Option<Rc<Session>>,
    pub handle: Handle,
}

struct ResponseInner {
    method: String,
    url: Url,
    real_url: Url,
    version: Option<Version>,
    status: Option<u16>,
    reason: Option<String>,
    headers: Headers,
    raw_headers: Vec<(Vec<u8>, Vec<u8>)>,
    cookies: Vec<Cookie>,
    content_disposition: Option<ContentDisposition>,
    content: Option<Content>,
    body: Option<Vec<u8>>,
    conn: Option<Box<Connection>>,
    proto: Rc<RefCell<Protocol>>,
    writer: WriterSlot,
    continue_tx: Option<oneshot::Sender<bool>>,
    closed: bool,
    released: bool,
    history: Vec<ClientResponse>,
    request_info: RequestInfo,
    traces: Rc<Vec<Trace>>,
    session: Option<Rc<Session>>,
    handle: Handle,
}

/// A streaming HTTP response bound to a pooled connection
///
/// The handle is cheaply cloneable and shares one underlying state;
/// redirect history holds such clones.
#[derive(Clone)]
pub struct ClientResponse {
    inner: Rc<RefCell<ResponseInner>>,
}

impl ClientResponse {
    pub fn new(parts: ResponseParts) -> ClientResponse {
        let mut url = parts.url.clone();
        url.set_fragment(None);
        let mut writer = WriterSlot::empty();
        writer.put(parts.writer);
        ClientResponse {
            inner: Rc::new(RefCell::new(ResponseInner {
                method: parts.method,
                url: url,
                real_url: parts.url,
                version: None,
                status: None,
                reason: None,
                headers: Headers::new(),
                raw_headers: Vec::new(),
                cookies: Vec::new(),
                content_disposition: None,
                content: None,
                body: None,
                conn: Some(parts.conn),
                proto: parts.proto,
                writer: writer,
                continue_tx: parts.continue_tx,
                closed: true,
                released: false,
                history: Vec::new(),
                request_info: parts.request_info,
                traces: parts.traces,
                session: parts.session,
                handle: parts.handle,
            })),
        }
    }

    /// Read the response head from the protocol
    ///
    /// Informational responses are discarded (resolving an armed
    /// continuation waiter on the first one), except 101 which is
    /// final: the connection is upgrading.
    pub fn start(self) -> ResponseStart {
        ResponseStart { resp: Some(self) }
    }

    pub fn method(&self) -> String {
        self.inner.borrow().method.clone()
    }

    pub fn url(&self) -> Url {
        self.inner.borrow().url.clone()
    }

    pub fn real_url(&self) -> Url {
        self.inner.borrow().real_url.clone()
    }

    /// Status code of a started response
    ///
    /// # Panics
    ///
    /// When the response has not been started yet.
    pub fn status(&self) -> u16 {
        self.inner.borrow().status.expect("response is started")
    }

    pub fn version(&self) -> Version {
        self.inner.borrow().version.expect("response is started")
    }

    pub fn reason(&self) -> String {
        self.inner.borrow().reason.clone().unwrap_or_default()
    }

    pub fn headers(&self) -> Headers {
        self.inner.borrow().headers.clone()
    }

    /// Raw header lines as received from the peer
    pub fn raw_headers(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner.borrow().raw_headers.clone()
    }

    /// Cookies from the `Set-Cookie` headers of this response
    pub fn cookies(&self) -> Vec<Cookie> {
        self.inner.borrow().cookies.clone()
    }

    pub fn content_disposition(&self) -> Option<ContentDisposition> {
        self.inner.borrow().content_disposition.clone()
    }

    pub fn request_info(&self) -> RequestInfo {
        self.inner.borrow().request_info.clone()
    }

    /// The payload stream, for progressive chunk-by-chunk reading
    pub fn content(&self) -> Option<Content> {
        self.inner.borrow().content.clone()
    }

    pub fn closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Prior responses of a redirect chain, oldest first
    pub fn history(&self) -> Vec<ClientResponse> {
        self.inner.borrow().history.clone()
    }

    /// Record the redirect chain
    ///
    /// Reserved for a redirect-following layer; must be set before the
    /// response is exposed to the caller.
    pub fn set_history(&self, history: Vec<ClientResponse>) {
        self.inner.borrow_mut().history = history;
    }

    /// Content type of the response, `application/octet-stream` when
    /// the header is missing
    pub fn content_type(&self) -> String {
        self.inner.borrow().headers.get(headers::CONTENT_TYPE)
            .unwrap_or("application/octet-stream").to_string()
    }

    /// True if the status is below 400
    pub fn ok(&self) -> bool {
        self.status() < 400
    }

    /// Turn an error status into an error, releasing the response
    pub fn error_for_status(&self) -> Result<(), Error> {
        if self.ok() {
            return Ok(());
        }
        let failure = {
            let inner = self.inner.borrow();
            Box::new(ResponseFailure {
                request_info: inner.request_info.clone(),
                history: inner.history.iter()
                    .map(|resp| resp.url()).collect(),
                status: inner.status,
                message: inner.reason.clone().unwrap_or_default(),
                headers: Some(inner.headers.clone()),
            })
        };
        self.release();
        Err(Error::Process(failure))
    }

    /// Hand the connection back to the pool alive
    ///
    /// A content stream that was not fully consumed is failed with a
    /// closed-connection error so that future reads fail predictably.
    /// The actual hand-back is deferred until the writer task (if any)
    /// reached a terminal state.
    pub fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.released {
            notify_content(&mut inner);
        }
        inner.closed = true;
        inner.writer.cancel();
        release_connection(&mut inner);
    }

    /// Tear the connection down instead of pooling it
    ///
    /// Used when the response must not be reused: protocol error,
    /// early abandonment.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.released {
            notify_content(&mut inner);
        }
        inner.closed = true;
        inner.writer.cancel();
        if let Some(conn) = inner.conn.take() {
            conn.close();
        }
    }

    /// Read the payload to the end, caching it
    ///
    /// The body is cached at most once; later calls return the cached
    /// bytes without touching the connection. Reading from a response
    /// that was released before anything was cached fails with a
    /// closed-connection error.
    pub fn read(&self) -> ReadBody {
        ReadBody {
            resp: self.clone(),
            buf: Vec::new(),
            checked: false,
        }
    }

    /// Resolve the encoding of the body
    ///
    /// Charset parameter of `Content-Type` when resolvable, UTF-8 for
    /// the JSON family, otherwise the session's charset resolver over
    /// the cached body.
    pub fn get_encoding(&self) -> Result<&'static Encoding, Error> {
        let (body, session) = {
            let inner = self.inner.borrow();
            let ctype = inner.headers.get(headers::CONTENT_TYPE)
                .unwrap_or("").to_lowercase();
            let mime = helpers::parse_mimetype(&ctype);
            let charset = mime.parameters.iter()
                .find(|&&(ref name, _)| name == "charset")
                .map(|&(_, ref value)| value.clone());
            if let Some(charset) = charset {
                if let Some(encoding) = Encoding::for_label(
                    charset.as_bytes())
                {
                    return Ok(encoding);
                }
            }
            if mime.mtype == "application"
                && (mime.subtype == "json" || mime.subtype == "rdap"
                    || mime.suffix == "json")
            {
                // the JSON family is UTF-8 by specification
                return Ok(UTF_8);
            }
            match inner.body {
                Some(ref body) => (body.clone(), inner.session.clone()),
                None => return Err(Error::Decode(
                    "can not guess the encoding of a not yet read body"
                    .to_string())),
            }
        };
        match session {
            Some(session) => match session.resolve(self, &body) {
                Some(label) => {
                    Encoding::for_label(label.as_bytes())
                        .ok_or_else(|| Error::Decode(format!(
                            "unknown charset {:?} from resolver", label)))
                }
                None => Ok(UTF_8),
            },
            None => Ok(UTF_8),
        }
    }

    /// Read the payload and decode it as text
    pub fn text(&self) -> Box<Future<Item=String, Error=Error>> {
        let resp = self.clone();
        Box::new(self.read().and_then(move |body| {
            let encoding = resp.get_encoding()?;
            decode_body(encoding, &body)
        }))
    }

    /// Read the payload and parse it as JSON
    ///
    /// The content type must belong to the `application/json` family;
    /// use `json_expecting(None)` to disable the check.
    pub fn json<T>(&self) -> Box<Future<Item=T, Error=Error>>
        where T: DeserializeOwned + 'static,
    {
        self.json_expecting(Some("application/json"))
    }

    pub fn json_expecting<T>(&self, content_type: Option<&str>)
        -> Box<Future<Item=T, Error=Error>>
        where T: DeserializeOwned + 'static,
    {
        let resp = self.clone();
        let expected = content_type.map(|ctype| ctype.to_string());
        Box::new(self.read().and_then(move |body| {
            if let Some(ref expected) = expected {
                let ctype = resp.content_type();
                if !helpers::is_expected_content_type(&ctype, expected) {
                    return Err(Error::ContentType(ctype));
                }
            }
            let encoding = resp.get_encoding()?;
            let text = decode_body(encoding, &body)?;
            Ok(serde_json::from_str(&text)?)
        }))
    }

    /// Wait for the writer task, then release the connection
    pub fn wait_for_close(&self) -> WaitForClose {
        WaitForClose { resp: self.clone() }
    }
}

fn decode_body(encoding: &'static Encoding, body: &[u8])
    -> Result<String, Error>
{
    let (text, _, malformed) = encoding.decode(body);
    if malformed {
        return Err(Error::Decode(format!(
            "body is not valid {}", encoding.name())));
    }
    Ok(text.into_owned())
}

/// Fail an unconsumed content stream and mark the response released
fn notify_content(inner: &mut ResponseInner) {
    if let Some(ref content) = inner.content {
        if !content.is_consumed() && !content.has_exception() {
            content.set_exception(Error::ConnectionClosed);
        }
    }
    inner.released = true;
}

/// Dispose of the connection towards the pool
///
/// When a writer task is still in flight the hand-back is chained on
/// its completion: the pool must never see a connection a body write
/// might still be touching.
fn release_connection(inner: &mut ResponseInner) {
    let conn = match inner.conn.take() {
        Some(conn) => conn,
        None => return,
    };
    match inner.writer.take() {
        None => conn.release(),
        Some(writer) => {
            inner.handle.spawn(
                DeferredRelease::new(writer, conn, false));
        }
    }
}

/// Natural end of the payload
///
/// Runs the same release path as an explicit `release()`, except that
/// an upgraded connection is left alone entirely: it has switched
/// protocols and must be neither pooled nor closed implicitly.
fn response_eof(cell: &Rc<RefCell<ResponseInner>>) {
    let mut inner = cell.borrow_mut();
    if inner.closed {
        return;
    }
    if inner.proto.borrow().upgraded() {
        return;
    }
    inner.closed = true;
    inner.writer.cancel();
    release_connection(&mut inner);
}

fn bind_head(resp: &ClientResponse, head: ResponseHead,
    content: Content)
{
    {
        let mut inner = resp.inner.borrow_mut();
        inner.closed = false;
        inner.version = Some(head.version);
        inner.status = Some(head.code);
        inner.reason = Some(head.reason);
        inner.raw_headers = head.raw_headers;
        for line in head.headers.get_all(headers::SET_COOKIE) {
            match cookies::parse_set_cookie(line) {
                Ok(cookie) => inner.cookies.push(cookie),
                Err(err) => {
                    warn!("can not load response cookies: {}", err);
                }
            }
        }
        inner.content_disposition = head.headers
            .get(headers::CONTENT_DISPOSITION)
            .map(helpers::parse_content_disposition);
        inner.headers = head.headers;
        inner.content = Some(content.clone());
    }
    // registered outside the borrow: a payload that already ended runs
    // the callback immediately
    let weak = Rc::downgrade(&resp.inner);
    content.on_eof(Box::new(move || {
        if let Some(cell) = weak.upgrade() {
            response_eof(&cell);
        }
    }));
}

/// Future returned by `ClientResponse::start()`
pub struct ResponseStart {
    resp: Option<ClientResponse>,
}

enum Step {
    Wait,
    Head(ResponseHead, Content),
    Failed(ProcessingError),
}

impl Future for ResponseStart {
    type Item = ClientResponse;
    type Error = Error;

    fn poll(&mut self) -> Poll<ClientResponse, Error> {
        let step = {
            let resp = self.resp.as_ref()
                .expect("start future polled after resolve");
            let mut inner = resp.inner.borrow_mut();
            let proto = inner.proto.clone();
            let mut step = Step::Wait;
            loop {
                let result = proto.borrow_mut().poll_read();
                match result {
                    Ok(Async::NotReady) => break,
                    Ok(Async::Ready((head, content))) => {
                        if head.code < 100 || head.code > 199
                            || head.code == 101
                        {
                            step = Step::Head(head, content);
                            break;
                        }
                        // informational response: resolve the armed
                        // continuation waiter and keep reading
                        if let Some(tx) = inner.continue_tx.take() {
                            let _ = tx.send(true);
                        }
                    }
                    Err(err) => {
                        step = Step::Failed(err);
                        break;
                    }
                }
            }
            step
        };
        match step {
            Step::Wait => Ok(Async::NotReady),
            Step::Head(head, content) => {
                let resp = self.resp.take().unwrap();
                bind_head(&resp, head, content);
                Ok(Async::Ready(resp))
            }
            Step::Failed(err) => {
                let resp = self.resp.take().unwrap();
                let failure = {
                    let inner = resp.inner.borrow();
                    Box::new(ResponseFailure {
                        request_info: inner.request_info.clone(),
                        history: inner.history.iter()
                            .map(|prior| prior.url()).collect(),
                        status: err.code,
                        message: err.message,
                        headers: err.headers,
                    })
                };
                // a half-read head leaves the connection in an unknown
                // state, it must not be reused
                resp.close();
                Err(Error::Process(failure))
            }
        }
    }
}

/// Future returned by `ClientResponse::read()`
pub struct ReadBody {
    resp: ClientResponse,
    buf: Vec<u8>,
    checked: bool,
}

impl Future for ReadBody {
    type Item = Vec<u8>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Vec<u8>, Error> {
        if !self.checked {
            self.checked = true;
            let released = {
                let inner = self.resp.inner.borrow();
                inner.body.is_some() && inner.released
            };
            if released {
                // a body can not be re-read from a released connection
                return Err(Error::ConnectionClosed);
            }
        }
        // fill the cache on first read
        let content = {
            let inner = self.resp.inner.borrow();
            match inner.body {
                Some(_) => None,
                None => {
                    let content = inner.content.as_ref()
                        .expect("response is started")
                        .clone();
                    Some(content)
                }
            }
        };
        if let Some(mut content) = content {
            loop {
                match content.poll() {
                    Ok(Async::NotReady) => return Ok(Async::NotReady),
                    Ok(Async::Ready(Some(chunk))) => {
                        {
                            let inner = self.resp.inner.borrow();
                            for trace in inner.traces.iter() {
                                trace.notify_chunk_received(
                                    &inner.method, &inner.url, &chunk);
                            }
                        }
                        self.buf.extend_from_slice(&chunk);
                    }
                    Ok(Async::Ready(None)) => {
                        let mut inner = self.resp.inner.borrow_mut();
                        inner.body = Some(
                            mem::replace(&mut self.buf, Vec::new()));
                        break;
                    }
                    Err(err) => {
                        self.resp.close();
                        return Err(err);
                    }
                }
            }
        }
        // wait for the writer, then let go of the connection, unless
        // it switched protocols
        let upgraded = {
            let inner = self.resp.inner.borrow();
            let upgraded = inner.proto.borrow().upgraded();
            upgraded
        };
        if !upgraded {
            let mut inner = self.resp.inner.borrow_mut();
            if let Async::NotReady = inner.writer.poll_done() {
                return Ok(Async::NotReady);
            }
            release_connection(&mut inner);
        }
        let body = self.resp.inner.borrow().body.clone()
            .expect("body cached by now");
        Ok(Async::Ready(body))
    }
}

/// Future returned by `ClientResponse::wait_for_close()`
pub struct WaitForClose {
    resp: ClientResponse,
}

impl Future for WaitForClose {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        {
            let mut inner = self.resp.inner.borrow_mut();
            if let Async::NotReady = inner.writer.poll_done() {
                return Ok(Async::NotReady);
            }
        }
        self.resp.release();
        Ok(Async::Ready(()))
    }
}

impl Drop for ResponseInner {
    fn drop(&mut self) {
        // a leak is diagnosed, not corrected: silently releasing here
        // would hide the missing release()/close() in the caller
        if !self.closed && self.conn.is_some() {
            warn!("unclosed response {} {} dropped, connection leaked",
                self.method, self.url);
        }
    }
}
