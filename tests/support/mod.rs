//! Scripted in-memory protocol and connection for lifecycle tests
#![allow(dead_code)]
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::Poll;
use futures::Async;
use futures::task::{self, Task};
use tk_hclient::{Connection, Content, Error, Headers, ProcessingError,
    Protocol, ResponseHead, Version};

struct MockState {
    script: VecDeque<(ResponseHead, Content)>,
    written: Vec<u8>,
    eof_written: bool,
    drain_open: bool,
    fail_writes_after: Option<usize>,
    writes: usize,
    timeout_started: bool,
    upgraded: bool,
    tls_cert: Option<Vec<u8>>,
    peer: Option<SocketAddr>,
    handed: Vec<Content>,
    pending_error: Option<Error>,
    read_task: Option<Task>,
    drain_task: Option<Task>,
}

pub struct MockProtocol {
    state: Rc<RefCell<MockState>>,
}

impl Protocol for MockProtocol {
    fn poll_read(&mut self)
        -> Poll<(ResponseHead, Content), ProcessingError>
    {
        let mut state = self.state.borrow_mut();
        match state.script.pop_front() {
            Some((head, content)) => {
                if let Some(err) = state.pending_error.take() {
                    content.set_exception(err);
                }
                state.handed.push(content.clone());
                Ok(Async::Ready((head, content)))
            }
            None => {
                state.read_task = Some(task::current());
                Ok(Async::NotReady)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.writes += 1;
        if let Some(limit) = state.fail_writes_after {
            if state.writes > limit {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe, "mock write failure"));
            }
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn write_eof(&mut self) -> io::Result<()> {
        self.state.borrow_mut().eof_written = true;
        Ok(())
    }

    fn poll_drain(&mut self) -> Poll<(), io::Error> {
        let mut state = self.state.borrow_mut();
        if state.drain_open {
            Ok(Async::Ready(()))
        } else {
            state.drain_task = Some(task::current());
            Ok(Async::NotReady)
        }
    }

    fn start_timeout(&mut self) {
        self.state.borrow_mut().timeout_started = true;
    }

    fn upgraded(&self) -> bool {
        self.state.borrow().upgraded
    }

    fn set_exception(&mut self, err: Error) {
        let mut state = self.state.borrow_mut();
        match state.handed.last() {
            Some(content) => content.set_exception(err),
            None => state.pending_error = Some(err),
        }
    }

    fn tls_certificate(&self) -> Option<Vec<u8>> {
        self.state.borrow().tls_cert.clone()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.state.borrow().peer
    }
}

pub struct MockConnection {
    proto: Rc<RefCell<MockProtocol>>,
    released: Rc<Cell<bool>>,
    closed: Rc<Cell<bool>>,
}

impl Connection for MockConnection {
    fn protocol(&self) -> Rc<RefCell<Protocol>> {
        self.proto.clone()
    }

    fn release(self: Box<Self>) {
        self.released.set(true);
    }

    fn close(self: Box<Self>) {
        self.closed.set(true);
    }
}

/// Test-side view of the mock: inspect wire bytes, feed responses
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
    released: Rc<Cell<bool>>,
    closed: Rc<Cell<bool>>,
}

impl MockHandle {
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn written_str(&self) -> String {
        String::from_utf8(self.written()).expect("written utf-8")
    }

    /// Queue a head for `poll_read`, waking a parked reader
    pub fn push(&self, head: ResponseHead, content: Content) {
        let task = {
            let mut state = self.state.borrow_mut();
            state.script.push_back((head, content));
            state.read_task.take()
        };
        if let Some(task) = task {
            task.notify();
        }
    }

    /// Open or close the output drain gate, waking a parked writer
    pub fn set_drain_open(&self, open: bool) {
        let task = {
            let mut state = self.state.borrow_mut();
            state.drain_open = open;
            state.drain_task.take()
        };
        if open {
            if let Some(task) = task {
                task.notify();
            }
        }
    }

    /// Make `write()` fail after the first `limit` calls
    pub fn fail_writes_after(&self, limit: usize) {
        self.state.borrow_mut().fail_writes_after = Some(limit);
    }

    pub fn set_upgraded(&self) {
        self.state.borrow_mut().upgraded = true;
    }

    pub fn set_tls_certificate(&self, cert: Vec<u8>) {
        let mut state = self.state.borrow_mut();
        state.tls_cert = Some(cert);
        state.peer = Some("127.0.0.1:443".parse().unwrap());
    }

    pub fn eof_written(&self) -> bool {
        self.state.borrow().eof_written
    }

    pub fn timeout_started(&self) -> bool {
        self.state.borrow().timeout_started
    }

    pub fn released(&self) -> bool {
        self.released.get()
    }

    pub fn closed(&self) -> bool {
        self.closed.get()
    }

    pub fn protocol(&self) -> Rc<RefCell<Protocol>> {
        let proto = MockProtocol { state: self.state.clone() };
        Rc::new(RefCell::new(proto))
    }
}

/// A fresh connection plus its test-side handle
pub fn connection() -> (Box<Connection>, MockHandle) {
    let state = Rc::new(RefCell::new(MockState {
        script: VecDeque::new(),
        written: Vec::new(),
        eof_written: false,
        drain_open: true,
        fail_writes_after: None,
        writes: 0,
        timeout_started: false,
        upgraded: false,
        tls_cert: None,
        peer: None,
        handed: Vec::new(),
        pending_error: None,
        read_task: None,
        drain_task: None,
    }));
    let released = Rc::new(Cell::new(false));
    let closed = Rc::new(Cell::new(false));
    let conn = MockConnection {
        proto: Rc::new(RefCell::new(MockProtocol {
            state: state.clone(),
        })),
        released: released.clone(),
        closed: closed.clone(),
    };
    let handle = MockHandle {
        state: state,
        released: released,
        closed: closed,
    };
    (Box::new(conn), handle)
}

pub fn head(code: u16) -> ResponseHead {
    head_with(code, &[])
}

pub fn head_with(code: u16, header_pairs: &[(&str, &str)])
    -> ResponseHead
{
    let mut headers = Headers::new();
    let mut raw = Vec::new();
    for &(name, value) in header_pairs {
        headers.add(name, value);
        raw.push((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
    }
    let reason = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        404 => "Not Found",
        _ => "Unknown",
    };
    ResponseHead {
        version: Version::Http11,
        code: code,
        reason: reason.to_string(),
        headers: headers,
        raw_headers: raw,
    }
}

/// A payload stream that already ended
pub fn body_content(data: &[u8]) -> Content {
    let content = Content::new();
    if !data.is_empty() {
        content.feed_data(data.to_vec());
    }
    content.feed_eof();
    content
}

/// A payload stream that is still open
pub fn open_content(data: &[u8]) -> Content {
    let content = Content::new();
    if !data.is_empty() {
        content.feed_data(data.to_vec());
    }
    content
}
