//! Instrumentation hooks
//!
//! Callbacks are observation only: nothing in the engine branches on
//! them and a hook must not assume any particular ordering beyond the
//! point it is attached to.
use url::Url;

use headers::Headers;

/// A set of observer callbacks for one request
pub struct Trace {
    on_headers_sent: Option<Box<Fn(&str, &Url, &Headers)>>,
    on_chunk_sent: Option<Box<Fn(&str, &Url, &[u8])>>,
    on_chunk_received: Option<Box<Fn(&str, &Url, &[u8])>>,
}

impl ::std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("Trace")
            .field("on_headers_sent", &self.on_headers_sent.is_some())
            .field("on_chunk_sent", &self.on_chunk_sent.is_some())
            .field("on_chunk_received", &self.on_chunk_received.is_some())
            .finish()
    }
}

impl Trace {
    pub fn new() -> Trace {
        Trace {
            on_headers_sent: None,
            on_chunk_sent: None,
            on_chunk_received: None,
        }
    }

    /// Called once after the status line and headers are buffered
    pub fn headers_sent<F>(mut self, hook: F) -> Trace
        where F: Fn(&str, &Url, &Headers) + 'static,
    {
        self.on_headers_sent = Some(Box::new(hook));
        self
    }

    /// Called before each request body chunk is written
    pub fn chunk_sent<F>(mut self, hook: F) -> Trace
        where F: Fn(&str, &Url, &[u8]) + 'static,
    {
        self.on_chunk_sent = Some(Box::new(hook));
        self
    }

    /// Called after each response body chunk is received
    pub fn chunk_received<F>(mut self, hook: F) -> Trace
        where F: Fn(&str, &Url, &[u8]) + 'static,
    {
        self.on_chunk_received = Some(Box::new(hook));
        self
    }

    pub fn notify_headers_sent(&self, method: &str, url: &Url,
        headers: &Headers)
    {
        if let Some(ref hook) = self.on_headers_sent {
            hook(method, url, headers);
        }
    }

    pub fn notify_chunk_sent(&self, method: &str, url: &Url,
        chunk: &[u8])
    {
        if let Some(ref hook) = self.on_chunk_sent {
            hook(method, url, chunk);
        }
    }

    pub fn notify_chunk_received(&self, method: &str, url: &Url,
        chunk: &[u8])
    {
        if let Some(ref hook) = self.on_chunk_received {
            hook(method, url, chunk);
        }
    }
}
