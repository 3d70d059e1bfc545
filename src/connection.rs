//! Interfaces of the collaborators this engine drives
//!
//! A connector establishes connections and pools them by
//! `ConnectionKey` equality; the protocol splits the socket stream
//! into parsed heads and payload bytes. Neither is implemented here:
//! this module only fixes the boundary the request and response
//! engines are written against.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::{Async, Poll, Stream};
use futures::task::{self, Task};

use errors::Error;
use headers::Headers;
use version::Version;

/// A parsed response head handed back by the protocol layer
#[derive(Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    /// Raw header lines as received, name/value byte pairs
    pub raw_headers: Vec<(Vec<u8>, Vec<u8>)>,
}

/// A head-processing failure reported by the protocol layer
///
/// Whatever was parsed before the failure is carried along so that the
/// response error can show it.
#[derive(Debug)]
pub struct ProcessingError {
    pub code: Option<u16>,
    pub message: String,
    pub headers: Option<Headers>,
}

impl ProcessingError {
    pub fn new<S: Into<String>>(message: S) -> ProcessingError {
        ProcessingError {
            code: None,
            message: message.into(),
            headers: None,
        }
    }
}

/// The HTTP/1.x protocol state bound to a single connection
///
/// `poll_read` drives head parsing, the write half accepts serialized
/// bytes. `set_exception` is the deferred error slot: a failure of the
/// background body writer is parked here (routed to the payload stream)
/// instead of being raised out of the writer task.
pub trait Protocol {
    /// Poll for the next parsed head plus its payload stream
    fn poll_read(&mut self)
        -> Poll<(ResponseHead, Content), ProcessingError>;

    /// Put a serialized chunk into the output buffer
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Mark the end of the request on the output
    fn write_eof(&mut self) -> io::Result<()>;

    /// Wait until buffered output is flushed to the transport
    fn poll_drain(&mut self) -> Poll<(), io::Error>;

    /// Start the response timeout timer
    fn start_timeout(&mut self);

    /// True once the connection has switched protocols (e.g. 101)
    fn upgraded(&self) -> bool;

    /// Park a writer-side failure for the reader to discover
    fn set_exception(&mut self, err: Error);

    /// DER certificate of the peer, `None` over plaintext transports
    fn tls_certificate(&self) -> Option<Vec<u8>>;

    /// Address of the peer, when known
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// A pooled connection reservation
///
/// Exactly one request/response pair is bound to a reservation at a
/// time. `release` hands the connection back to the pool alive, `close`
/// terminates it. Both consume the reservation: a second disposal is a
/// type error, not a runtime bug.
pub trait Connection {
    /// The protocol handle, shared between the body writer and the
    /// response
    fn protocol(&self) -> Rc<RefCell<Protocol>>;

    /// Return the connection to the pool for reuse
    fn release(self: Box<Self>);

    /// Terminate the connection
    fn close(self: Box<Self>);
}

struct ContentInner {
    chunks: VecDeque<Vec<u8>>,
    eof: bool,
    error: Option<Error>,
    failed: bool,
    on_eof: Option<Box<FnMut()>>,
    task: Option<Task>,
}

/// The streaming body of a response
///
/// The protocol side feeds parsed body bytes in, the response side
/// reads them out as a `futures::Stream`. The handle is shared: the
/// release path uses its own clone to fail a stream that is dropped
/// before being fully consumed.
#[derive(Clone)]
pub struct Content {
    inner: Rc<RefCell<ContentInner>>,
}

impl Content {
    pub fn new() -> Content {
        Content {
            inner: Rc::new(RefCell::new(ContentInner {
                chunks: VecDeque::new(),
                eof: false,
                error: None,
                failed: false,
                on_eof: None,
                task: None,
            })),
        }
    }

    /// Feed a chunk of parsed body bytes
    ///
    /// # Panics
    ///
    /// When called after `feed_eof()`.
    pub fn feed_data(&self, data: Vec<u8>) {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.eof, "data fed after eof");
        inner.chunks.push_back(data);
        if let Some(task) = inner.task.take() {
            task.notify();
        }
    }

    /// Mark the natural end of the payload
    ///
    /// Runs the end-of-payload callback, if one is registered.
    pub fn feed_eof(&self) {
        let callback = {
            let mut inner = self.inner.borrow_mut();
            inner.eof = true;
            if let Some(task) = inner.task.take() {
                task.notify();
            }
            inner.on_eof.take()
        };
        if let Some(mut callback) = callback {
            callback();
        }
    }

    /// Fail the stream: pending and future reads return the error
    pub fn set_exception(&self, err: Error) {
        let mut inner = self.inner.borrow_mut();
        if inner.failed {
            // first failure wins
            return;
        }
        inner.failed = true;
        inner.error = Some(err);
        if let Some(task) = inner.task.take() {
            task.notify();
        }
    }

    /// True if the stream was failed with `set_exception`
    pub fn has_exception(&self) -> bool {
        self.inner.borrow().failed
    }

    pub fn is_eof(&self) -> bool {
        self.inner.borrow().eof
    }

    /// True once the payload ended and every chunk has been read out
    pub fn is_consumed(&self) -> bool {
        let inner = self.inner.borrow();
        inner.eof && inner.chunks.is_empty()
    }

    /// Register the end-of-payload callback
    ///
    /// The callback runs immediately if the payload already ended. Only
    /// one callback is kept.
    pub fn on_eof(&self, callback: Box<FnMut()>) {
        let mut callback = callback;
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.eof {
                inner.on_eof = Some(callback);
                return;
            }
        }
        callback();
    }
}

impl Stream for Content {
    type Item = Vec<u8>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Option<Vec<u8>>, Error> {
        let mut inner = self.inner.borrow_mut();
        if let Some(chunk) = inner.chunks.pop_front() {
            return Ok(Async::Ready(Some(chunk)));
        }
        if let Some(err) = inner.error.take() {
            return Err(err);
        }
        if inner.failed {
            return Err(Error::ConnectionClosed);
        }
        if inner.eof {
            return Ok(Async::Ready(None));
        }
        inner.task = Some(task::current());
        Ok(Async::NotReady)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use futures::{Async, Stream};
    use futures::future::{Future, lazy};

    use errors::Error;
    use super::Content;

    fn poll_once(content: &Content)
        -> Result<Async<Option<Vec<u8>>>, Error>
    {
        let mut stream = content.clone();
        lazy(move || stream.poll()).wait()
    }

    #[test]
    fn chunks_then_eof() {
        let content = Content::new();
        content.feed_data(b"hello".to_vec());
        content.feed_eof();
        assert_eq!(poll_once(&content).unwrap(),
            Async::Ready(Some(b"hello".to_vec())));
        assert_eq!(poll_once(&content).unwrap(), Async::Ready(None));
        assert!(content.is_consumed());
    }

    #[test]
    fn exception_fails_pending_reads() {
        let content = Content::new();
        content.set_exception(Error::ConnectionClosed);
        assert!(matches!(poll_once(&content),
            Err(Error::ConnectionClosed)));
        // and stays failed
        assert!(matches!(poll_once(&content),
            Err(Error::ConnectionClosed)));
    }

    #[test]
    fn buffered_chunks_win_over_late_exception() {
        let content = Content::new();
        content.feed_data(b"data".to_vec());
        content.set_exception(Error::ConnectionClosed);
        assert_eq!(poll_once(&content).unwrap(),
            Async::Ready(Some(b"data".to_vec())));
        assert!(matches!(poll_once(&content),
            Err(Error::ConnectionClosed)));
    }

    #[test]
    fn eof_callback_runs_once() {
        let content = Content::new();
        let fired = Rc::new(Cell::new(0));
        let flag = fired.clone();
        content.on_eof(Box::new(move || flag.set(flag.get() + 1)));
        content.feed_eof();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn eof_callback_runs_immediately_when_late() {
        let content = Content::new();
        content.feed_eof();
        let fired = Rc::new(Cell::new(0));
        let flag = fired.clone();
        content.on_eof(Box::new(move || flag.set(flag.get() + 1)));
        assert_eq!(fired.get(), 1);
    }
}
