//! The request half of the engine
//!
//! `ClientRequest::new` runs header negotiation: it deterministically
//! builds the final outgoing header set from independent, possibly
//! conflicting inputs (caller headers, cookies, auth, body
//! characteristics, compression and chunking flags). `send()` then
//! emits the status line and headers synchronously and schedules the
//! body-writer task.
#[allow(unused_imports)]
use std::ascii::AsciiExt;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use netbuf::Buf;
use tokio_core::reactor::Handle;
use url::{Host, Url};

use connection::Connection;
use cookies::{self, Cookie};
use errors::Error;
use fingerprint::Fingerprint;
use headers::{self, Headers};
use helpers::{self, BasicAuth};
use payload::Payload;
use pool_key::{ConnectionKey, TlsPolicy, proxy_headers_hash};
use response::{ClientResponse, ResponseParts, Session};
use serializer::{HeaderError, MessageState};
use trace::Trace;
use version::Version;
use writer::{BodyWriter, WriterSlot};

const NO_BODY_METHODS: &'static [&'static str] =
    &["GET", "HEAD", "OPTIONS", "TRACE"];
const BODY_METHODS: &'static [&'static str] =
    &["PATCH", "POST", "PUT"];

const DEFAULT_ACCEPT: &'static str = "*/*";
const DEFAULT_ACCEPT_ENCODING: &'static str = "gzip, deflate";
const DEFAULT_AGENT: &'static str =
    concat!("tk-hclient/", env!("CARGO_PKG_VERSION"));

/// Immutable snapshot of a request, captured at send time
///
/// Survives the teardown of the request object itself, for error
/// reporting and redirect history.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub url: Url,
    pub method: String,
    pub headers: Headers,
    pub real_url: Url,
}

/// Everything that parametrizes a request besides method and url
///
/// All fields are optional; the builder methods may be chained in any
/// order.
pub struct RequestParams {
    headers: Vec<(String, String)>,
    skip_auto_headers: Vec<String>,
    cookies: Vec<Cookie>,
    data: Option<Payload>,
    auth: Option<BasicAuth>,
    version: Version,
    compress: Option<String>,
    chunked: Option<bool>,
    expect100: bool,
    proxy: Option<Url>,
    proxy_auth: Option<BasicAuth>,
    proxy_headers: Option<Headers>,
    ssl: TlsPolicy,
    trust_env: bool,
    traces: Vec<Trace>,
    session: Option<Rc<Session>>,
}

impl RequestParams {
    pub fn new() -> RequestParams {
        RequestParams {
            headers: Vec::new(),
            skip_auto_headers: Vec::new(),
            cookies: Vec::new(),
            data: None,
            auth: None,
            version: Version::Http11,
            compress: None,
            chunked: None,
            expect100: false,
            proxy: None,
            proxy_auth: None,
            proxy_headers: None,
            ssl: TlsPolicy::Default,
            trust_env: false,
            traces: Vec::new(),
            session: None,
        }
    }

    pub fn header<N, V>(mut self, name: N, value: V) -> RequestParams
        where N: Into<String>, V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Suppress an automatically added header
    pub fn skip_auto_header<N: Into<String>>(mut self, name: N)
        -> RequestParams
    {
        self.skip_auto_headers.push(name.into());
        self
    }

    pub fn cookie<N, V>(mut self, name: N, value: V) -> RequestParams
        where N: Into<String>, V: Into<String>,
    {
        self.cookies.push(Cookie::new(name, value));
        self
    }

    pub fn data<P: Into<Payload>>(mut self, data: P) -> RequestParams {
        self.data = Some(data.into());
        self
    }

    pub fn auth(mut self, auth: BasicAuth) -> RequestParams {
        self.auth = Some(auth);
        self
    }

    pub fn version(mut self, version: Version) -> RequestParams {
        self.version = version;
        self
    }

    /// Compress the body with the given content coding
    ///
    /// Forces chunked transfer: the compressed size is generally not
    /// known before encoding.
    pub fn compress<S: Into<String>>(mut self, coding: S)
        -> RequestParams
    {
        self.compress = Some(coding.into());
        self
    }

    pub fn chunked(mut self, chunked: bool) -> RequestParams {
        self.chunked = Some(chunked);
        self
    }

    pub fn expect100(mut self) -> RequestParams {
        self.expect100 = true;
        self
    }

    pub fn proxy(mut self, proxy: Url) -> RequestParams {
        self.proxy = Some(proxy);
        self
    }

    pub fn proxy_auth(mut self, auth: BasicAuth) -> RequestParams {
        self.proxy_auth = Some(auth);
        self
    }

    pub fn proxy_header<N, V>(mut self, name: N, value: V)
        -> RequestParams
        where N: Into<String>, V: Into<String>,
    {
        {
            let headers = self.proxy_headers
                .get_or_insert_with(Headers::new);
            let name = name.into();
            let value = value.into();
            headers.add(&name, &value);
        }
        self
    }

    pub fn ssl(mut self, policy: TlsPolicy) -> RequestParams {
        self.ssl = policy;
        self
    }

    pub fn fingerprint(self, fingerprint: Fingerprint) -> RequestParams {
        self.ssl(TlsPolicy::Pinned(fingerprint))
    }

    /// Allow environment-derived configuration (netrc credentials)
    pub fn trust_env(mut self) -> RequestParams {
        self.trust_env = true;
        self
    }

    pub fn trace(mut self, trace: Trace) -> RequestParams {
        self.traces.push(trace);
        self
    }

    pub fn session(mut self, session: Rc<Session>) -> RequestParams {
        self.session = Some(session);
        self
    }
}

/// A request being prepared and sent over a single connection
///
/// Mutable during the negotiation phase only; `send()` freezes it,
/// emits the head and schedules the body writer.
#[derive(Debug)]
pub struct ClientRequest {
    method: String,
    url: Url,
    original_url: Url,
    version: Version,
    headers: Headers,
    skip_auto_headers: Vec<String>,
    compress: Option<String>,
    chunked: Option<bool>,
    body: Option<Payload>,
    ssl: TlsPolicy,
    proxy: Option<Url>,
    proxy_auth: Option<BasicAuth>,
    proxy_headers: Option<Headers>,
    continue_tx: Option<oneshot::Sender<bool>>,
    continue_rx: Option<oneshot::Receiver<bool>>,
    writer: WriterSlot,
    traces: Rc<Vec<Trace>>,
    session: Option<Rc<Session>>,
    sent: bool,
}

impl ClientRequest {
    pub fn new(method: &str, url: Url, params: RequestParams)
        -> Result<ClientRequest, Error>
    {
        if !headers::is_token(method) {
            return Err(Error::InvalidMethod(method.to_string()));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidUrl(url));
        }
        let original_url = url.clone();
        let mut url = url;
        url.set_fragment(None);

        let mut req = ClientRequest {
            method: method.to_uppercase(),
            url: url,
            original_url: original_url,
            version: params.version,
            headers: Headers::new(),
            skip_auto_headers: params.skip_auto_headers,
            compress: params.compress,
            chunked: params.chunked,
            body: None,
            ssl: params.ssl,
            proxy: params.proxy,
            proxy_auth: params.proxy_auth,
            proxy_headers: params.proxy_headers,
            continue_tx: None,
            continue_rx: None,
            writer: WriterSlot::empty(),
            traces: Rc::new(params.traces),
            session: params.session,
            sent: false,
        };
        req.update_headers(&params.headers);
        req.update_auto_headers();
        req.update_cookies(params.cookies);
        req.update_content_encoding(params.data.is_some())?;
        req.update_auth(params.auth, params.trust_env);
        req.update_body_from_data(params.data);
        if req.body.is_some()
            || !NO_BODY_METHODS.contains(&&req.method[..])
        {
            req.update_transfer_encoding()?;
        }
        req.update_expect_continue(params.expect100);
        Ok(req)
    }

    /// Destination host, as it appears in the URL
    pub fn host(&self) -> &str {
        self.url.host_str().expect("request url has a host")
    }

    /// Destination port, default-resolved for the scheme
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn is_ssl(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    pub fn ssl(&self) -> &TlsPolicy {
        &self.ssl
    }

    /// The pool bucket this request's connection must come from
    ///
    /// A pure function of request state. Two requests that would
    /// negotiate incompatible TLS or proxy configurations never
    /// produce equal keys.
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            host: self.host().to_string(),
            port: self.port(),
            is_ssl: self.is_ssl(),
            ssl: self.ssl.clone(),
            proxy: self.proxy.clone(),
            proxy_auth: self.proxy_auth.clone(),
            proxy_headers_hash: self.proxy_headers.as_ref()
                .and_then(proxy_headers_hash),
        }
    }

    pub fn request_info(&self) -> RequestInfo {
        RequestInfo {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            real_url: self.original_url.clone(),
        }
    }

    /// Whether the connection may be reused after this request
    ///
    /// Below HTTP/1.0 there is no reuse. HTTP/1.0 keeps alive only on
    /// an explicit `Connection: keep-alive`, HTTP/1.1 unless an
    /// explicit `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        if self.version < Version::Http10 {
            return false;
        }
        if self.version == Version::Http10 {
            return self.headers.get(headers::CONNECTION)
                .map(headers::is_keep_alive).unwrap_or(false);
        }
        !self.headers.get(headers::CONNECTION)
            .map(headers::is_close).unwrap_or(false)
    }

    fn skipped(&self, name: &str) -> bool {
        self.skip_auto_headers.iter()
            .any(|skip| skip.eq_ignore_ascii_case(name))
    }

    /// Host header plus caller headers, `Host` overriding not adding
    fn update_headers(&mut self, caller: &[(String, String)]) {
        let netloc = {
            let mut netloc = match self.url.host() {
                Some(Host::Domain(domain)) =>
                    domain.trim_right_matches('.').to_string(),
                Some(Host::Ipv4(addr)) => addr.to_string(),
                Some(Host::Ipv6(addr)) => format!("[{}]", addr),
                None => unreachable!("checked in new()"),
            };
            // the url crate strips default ports while parsing
            if let Some(port) = self.url.port() {
                netloc.push_str(&format!(":{}", port));
            }
            netloc
        };
        self.headers.set(headers::HOST, &netloc);

        for &(ref name, ref value) in caller {
            if name.eq_ignore_ascii_case(headers::HOST) {
                self.headers.set(name, value);
            } else {
                self.headers.add(name, value);
            }
        }
    }

    /// Default headers, unless present or suppressed by the skip list
    fn update_auto_headers(&mut self) {
        let defaults = [
            (headers::ACCEPT, DEFAULT_ACCEPT),
            (headers::ACCEPT_ENCODING, DEFAULT_ACCEPT_ENCODING),
            (headers::USER_AGENT, DEFAULT_AGENT),
        ];
        for &(name, value) in defaults.iter() {
            if !self.headers.contains(name) && !self.skipped(name) {
                self.headers.add(name, value);
            }
        }
    }

    /// Merge caller cookies into an already-present `Cookie` header
    fn update_cookies(&mut self, cookies: Vec<Cookie>) {
        if cookies.is_empty() {
            return;
        }
        let mut jar = match self.headers.remove(headers::COOKIE) {
            Some(existing) => cookies::parse_cookie_header(&existing),
            None => Vec::new(),
        };
        cookies::merge(&mut jar, cookies);
        let serialized = cookies::cookie_header(&jar);
        self.headers.set(headers::COOKIE, &serialized);
    }

    /// Compress flag vs explicit `Content-Encoding` header
    fn update_content_encoding(&mut self, has_data: bool)
        -> Result<(), Error>
    {
        if !has_data {
            return Ok(());
        }
        let explicit = self.headers.get(headers::CONTENT_ENCODING)
            .map(|enc| !enc.is_empty()).unwrap_or(false);
        if explicit {
            if self.compress.is_some() {
                return Err(Error::CompressConflict);
            }
        } else if let Some(coding) = self.compress.clone() {
            self.headers.set(headers::CONTENT_ENCODING, &coding);
            // compressed size is unknown before encoding
            self.chunked = Some(true);
        }
        Ok(())
    }

    /// Explicit auth beats URL credentials beats netrc
    fn update_auth(&mut self, auth: Option<BasicAuth>, trust_env: bool) {
        let auth = auth
            .or_else(|| BasicAuth::from_url(&self.url))
            .or_else(|| if trust_env {
                helpers::netrc_auth(self.host())
            } else {
                None
            });
        if let Some(auth) = auth {
            self.headers.set(headers::AUTHORIZATION, &auth.encode());
        }
    }

    /// Resolve the body variant and its length implications
    fn update_body_from_data(&mut self, data: Option<Payload>) {
        let body = match data {
            Some(body) => body,
            None => return,
        };
        if self.chunked != Some(true)
            && !self.headers.contains(headers::CONTENT_LENGTH)
        {
            match body.size() {
                Some(size) => {
                    self.headers.set(headers::CONTENT_LENGTH,
                        &format!("{}", size));
                }
                None => self.chunked = Some(true),
            }
        }
        for &(name, value) in body.headers().iter() {
            if self.headers.contains(name) || self.skipped(name) {
                continue;
            }
            self.headers.set(name, value);
        }
        self.body = Some(body);
    }

    /// The Content-Length / Transfer-Encoding mutual exclusion rules
    fn update_transfer_encoding(&mut self) -> Result<(), Error> {
        let te_chunked = self.headers.get(headers::TRANSFER_ENCODING)
            .map(headers::is_chunked).unwrap_or(false);
        if te_chunked {
            if self.chunked == Some(true) {
                return Err(Error::ChunkedConflict);
            }
        } else if self.chunked == Some(true) {
            if self.headers.contains(headers::CONTENT_LENGTH) {
                return Err(Error::ChunkedWithLength);
            }
            self.headers.set(headers::TRANSFER_ENCODING, "chunked");
        } else if !self.headers.contains(headers::CONTENT_LENGTH) {
            let size = self.body.as_ref()
                .and_then(|body| body.size()).unwrap_or(0);
            self.headers.set(headers::CONTENT_LENGTH,
                &format!("{}", size));
        }
        Ok(())
    }

    /// Arm the continuation waiter when 100-continue is requested
    fn update_expect_continue(&mut self, explicit: bool) {
        let mut expect = explicit;
        if explicit {
            self.headers.set(headers::EXPECT, "100-continue");
        } else {
            expect = self.headers.get(headers::EXPECT)
                .map(headers::is_continue).unwrap_or(false);
        }
        if expect {
            let (tx, rx) = oneshot::channel();
            self.continue_tx = Some(tx);
            self.continue_rx = Some(rx);
        }
    }

    /// The request target for the status line
    ///
    /// CONNECT uses authority form, a plaintext proxied request uses
    /// absolute form, everything else origin form.
    fn request_target(&self) -> String {
        if self.method == "CONNECT" {
            let host = match self.url.host() {
                Some(Host::Ipv6(addr)) => format!("[{}]", addr),
                _ => self.host().to_string(),
            };
            let port = self.port()
                .expect("CONNECT url has a resolvable port");
            return format!("{}:{}", host, port);
        }
        if self.proxy.is_some() && !self.is_ssl() {
            return self.url.as_str().to_string();
        }
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    /// Write the request head and schedule the body-writer task
    ///
    /// The status line and headers are buffered synchronously; the
    /// body (if any) is streamed by a task spawned on `handle`. The
    /// returned response is bound to the connection and must be
    /// started to read the head.
    ///
    /// # Panics
    ///
    /// When called a second time on the same request.
    pub fn send(&mut self, conn: Box<Connection>, handle: &Handle)
        -> Result<ClientResponse, Error>
    {
        if self.sent {
            panic!("send() called twice on the same request");
        }
        self.sent = true;

        // set the default content-type for body-carrying methods
        if BODY_METHODS.contains(&&self.method[..])
            && !self.skipped(headers::CONTENT_TYPE)
            && !self.headers.contains(headers::CONTENT_TYPE)
        {
            self.headers.set(headers::CONTENT_TYPE,
                "application/octet-stream");
        }

        // set the connection header unless the caller chose one
        if self.headers.get(headers::CONNECTION).is_none() {
            if self.keep_alive() {
                if self.version == Version::Http10 {
                    self.headers.set(headers::CONNECTION, "keep-alive");
                }
            } else {
                if self.version == Version::Http11 {
                    self.headers.set(headers::CONNECTION, "close");
                }
            }
        }

        let target = self.request_target();
        let mut buf = Buf::new();
        let mut message = MessageState::RequestStart;
        message.request_line(&mut buf, &self.method, &target,
            self.version);
        for &(ref name, ref value) in &self.headers {
            if name.eq_ignore_ascii_case(headers::CONTENT_LENGTH) {
                let length = value.trim().parse().map_err(|_| {
                    Error::Serialize(HeaderError::InvalidHeaderValue)
                })?;
                message.add_length(&mut buf, length)?;
            } else if name.eq_ignore_ascii_case(
                headers::TRANSFER_ENCODING)
            {
                message.add_chunked(&mut buf)?;
            } else {
                message.add_header(&mut buf, name, value)?;
            }
        }
        message.done_headers(&mut buf);

        let proto = conn.protocol();
        proto.borrow_mut().write(&buf[..])?;
        for trace in self.traces.iter() {
            trace.notify_headers_sent(&self.method, &self.url,
                &self.headers);
        }

        let request_info = self.request_info();
        let writer = BodyWriter::new(
            proto.clone(),
            message,
            self.body.take(),
            self.continue_rx.take(),
            self.method.clone(),
            self.url.clone(),
            self.traces.clone(),
        ).spawn(handle);
        self.writer.put(writer.clone());

        Ok(ClientResponse::new(ResponseParts {
            method: self.method.clone(),
            url: self.original_url.clone(),
            conn: conn,
            proto: proto,
            writer: writer,
            continue_tx: self.continue_tx.take(),
            request_info: request_info,
            traces: self.traces.clone(),
            session: self.session.clone(),
            handle: handle.clone(),
        }))
    }

    /// Wait until body writing has stopped
    ///
    /// Resolves immediately when no writer task is in flight.
    pub fn close(&mut self) -> RequestClose {
        RequestClose {
            writer: self.writer.current(),
        }
    }

    /// Cancel the writer task and detach from it without waiting
    ///
    /// Used on forced connection teardown.
    pub fn terminate(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.cancel();
        }
    }
}

/// Future returned by `ClientRequest::close()`
pub struct RequestClose {
    writer: Option<::writer::WriterHandle>,
}

impl Future for RequestClose {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        match self.writer {
            Some(ref writer) => Ok(writer.poll_done()),
            None => Ok(Async::Ready(())),
        }
    }
}
