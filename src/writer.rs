//! The background task that streams a request body
//!
//! The writer is spawned on the reactor right after the status line and
//! headers are buffered. It is owned through `WriterSlot`: a handle
//! slot that observes completion and clears itself, so that a finished
//! writer never shows up as "in flight" to lifecycle checks. The
//! connection is never releasable to the pool while the slot still
//! holds a live handle.
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use futures::task::{self, Task};
use netbuf::Buf;
use url::Url;

use connection::{Connection, Protocol};
use errors::Error;
use payload::Payload;
use serializer::MessageState;
use trace::Trace;

const RUNNING: usize = 0;
const DONE: usize = 1;

/// State shared between the writer task and its handles
pub struct WriterShared {
    state: Cell<usize>,
    cancel: Cell<bool>,
    // the writer's own task, to wake on cancellation
    writer_task: RefCell<Option<Task>>,
    // tasks waiting for the writer to reach a terminal state
    blocked: RefCell<Vec<Task>>,
}

impl WriterShared {
    fn finish(&self) {
        self.state.set(DONE);
        for task in self.blocked.borrow_mut().drain(..) {
            task.notify();
        }
    }
}

/// A cloneable handle to the writer task
#[derive(Clone)]
pub struct WriterHandle {
    shared: Rc<WriterShared>,
}

impl WriterHandle {
    pub fn is_done(&self) -> bool {
        self.shared.state.get() == DONE
    }

    /// Request cooperative cancellation
    ///
    /// Observed by the writer at its next suspension point.
    pub fn cancel(&self) {
        self.shared.cancel.set(true);
        let task = self.shared.writer_task.borrow_mut().take();
        if let Some(task) = task {
            task.notify();
        }
    }

    /// Wait until the task reaches a terminal state
    ///
    /// Must be called from a task context.
    pub fn poll_done(&self) -> Async<()> {
        if self.is_done() {
            return Async::Ready(());
        }
        self.shared.blocked.borrow_mut().push(task::current());
        Async::NotReady
    }
}

/// The self-clearing slot holding an in-flight writer handle
///
/// Registering an already-finished handle clears synchronously; a
/// handle that finishes later is dropped by the next observation. This
/// is what guarantees liveness checks never see a stale "in flight"
/// task.
pub struct WriterSlot {
    handle: Option<WriterHandle>,
}

impl ::std::fmt::Debug for WriterSlot {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("WriterSlot")
            .field("handle", &self.handle.is_some())
            .finish()
    }
}

impl WriterSlot {
    pub fn empty() -> WriterSlot {
        WriterSlot { handle: None }
    }

    pub fn put(&mut self, handle: WriterHandle) {
        if handle.is_done() {
            self.handle = None;
        } else {
            self.handle = Some(handle);
        }
    }

    fn clear_stale(&mut self) {
        let stale = match self.handle {
            Some(ref handle) => handle.is_done(),
            None => false,
        };
        if stale {
            self.handle = None;
        }
    }

    /// Takes the live handle out, if the task is still running
    pub fn take(&mut self) -> Option<WriterHandle> {
        self.clear_stale();
        self.handle.take()
    }

    /// A clone of the live handle, if the task is still running
    pub fn current(&mut self) -> Option<WriterHandle> {
        self.clear_stale();
        self.handle.clone()
    }

    /// Request cancellation of the task, keeping the handle
    pub fn cancel(&mut self) {
        self.clear_stale();
        if let Some(ref handle) = self.handle {
            handle.cancel();
        }
    }

    /// Wait for a terminal state; an empty slot is already terminal
    pub fn poll_done(&mut self) -> Async<()> {
        self.clear_stale();
        match self.handle {
            Some(ref handle) => {
                if let Async::NotReady = handle.poll_done() {
                    return Async::NotReady;
                }
            }
            None => return Async::Ready(()),
        }
        self.handle = None;
        Async::Ready(())
    }
}

enum WriteState {
    /// Flush buffered headers before waiting for the server
    Drain,
    /// Wait for `100 Continue`
    WaitContinue,
    /// Stream payload chunks
    Streaming,
    /// Terminal
    Done,
}

/// The future that streams the request body onto the connection
///
/// Spawned on the reactor handle by `ClientRequest::send()`. All
/// failures are parked in the protocol's deferred error slot; the
/// future itself never errors, so the reactor never sees a failed
/// task.
pub struct BodyWriter {
    proto: Rc<RefCell<Protocol>>,
    message: MessageState,
    buf: Buf,
    body: Option<Payload>,
    continue_rx: Option<oneshot::Receiver<bool>>,
    shared: Rc<WriterShared>,
    state: WriteState,
    method: String,
    url: Url,
    traces: Rc<Vec<Trace>>,
}

impl BodyWriter {
    pub fn new(proto: Rc<RefCell<Protocol>>, message: MessageState,
        body: Option<Payload>, continue_rx: Option<oneshot::Receiver<bool>>,
        method: String, url: Url, traces: Rc<Vec<Trace>>)
        -> BodyWriter
    {
        let state = if continue_rx.is_some() {
            WriteState::Drain
        } else {
            WriteState::Streaming
        };
        BodyWriter {
            proto: proto,
            message: message,
            buf: Buf::new(),
            body: body,
            continue_rx: continue_rx,
            shared: Rc::new(WriterShared {
                state: Cell::new(RUNNING),
                cancel: Cell::new(false),
                writer_task: RefCell::new(None),
                blocked: RefCell::new(Vec::new()),
            }),
            state: state,
            method: method,
            url: url,
            traces: traces,
        }
    }

    /// Spawn the writer and return the handle to it
    pub fn spawn(self, handle: &::tokio_core::reactor::Handle)
        -> WriterHandle
    {
        let writer_handle = WriterHandle { shared: self.shared.clone() };
        handle.spawn(self);
        writer_handle
    }

    fn write_out(&mut self, data: &[u8]) -> io::Result<()> {
        self.message.write_body(&mut self.buf, data);
        let result = self.proto.borrow_mut().write(&self.buf[..]);
        let len = self.buf.len();
        self.buf.consume(len);
        result
    }

    /// End-of-body marker plus the protocol-level end of request
    fn write_eof(&mut self) -> io::Result<()> {
        self.message.done(&mut self.buf);
        let mut proto = self.proto.borrow_mut();
        if self.buf.len() > 0 {
            proto.write(&self.buf[..])?;
            let len = self.buf.len();
            self.buf.consume(len);
        }
        proto.write_eof()
    }

    /// Classify an I/O failure the way the reader expects to see it
    ///
    /// Timeout-flavoured errors pass through as-is, anything else is
    /// wrapped with the target URL.
    fn fail(&mut self, err: io::Error) {
        let err = if err.kind() == io::ErrorKind::TimedOut {
            Error::Io(err)
        } else {
            Error::ConnectionWrite(self.url.clone(), err)
        };
        self.proto.borrow_mut().set_exception(err);
    }
}

impl Future for BodyWriter {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        *self.shared.writer_task.borrow_mut() = Some(task::current());
        loop {
            match self.state {
                WriteState::Drain => {
                    // cancelled before any body bytes were sent: clean
                    // abort, no end-of-body marker
                    if self.shared.cancel.get() {
                        self.state = WriteState::Done;
                        self.shared.finish();
                        return Ok(Async::Ready(()));
                    }
                    let drained = self.proto.borrow_mut().poll_drain();
                    match drained {
                        Ok(Async::Ready(())) => {
                            self.state = WriteState::WaitContinue;
                        }
                        Ok(Async::NotReady) => {
                            return Ok(Async::NotReady);
                        }
                        Err(err) => {
                            self.fail(err);
                            self.state = WriteState::Done;
                            self.shared.finish();
                            return Ok(Async::Ready(()));
                        }
                    }
                }
                WriteState::WaitContinue => {
                    if self.shared.cancel.get() {
                        self.state = WriteState::Done;
                        self.shared.finish();
                        return Ok(Async::Ready(()));
                    }
                    match self.continue_rx.as_mut()
                        .expect("continue receiver in WaitContinue")
                        .poll()
                    {
                        Ok(Async::Ready(_)) => {
                            self.state = WriteState::Streaming;
                        }
                        Ok(Async::NotReady) => return Ok(Async::NotReady),
                        // waiter dropped: same as cancellation before
                        // body bytes
                        Err(_) => {
                            self.state = WriteState::Done;
                            self.shared.finish();
                            return Ok(Async::Ready(()));
                        }
                    }
                }
                WriteState::Streaming => {
                    if self.shared.cancel.get() {
                        // best-effort drain: leave the stream framed
                        // rather than truncated
                        let _ = self.write_eof();
                        self.state = WriteState::Done;
                        self.shared.finish();
                        return Ok(Async::Ready(()));
                    }
                    let chunk = match self.body {
                        Some(ref mut body) => body.next_chunk(),
                        None => None,
                    };
                    match chunk {
                        Some(chunk) => {
                            for trace in self.traces.iter() {
                                trace.notify_chunk_sent(
                                    &self.method, &self.url, &chunk);
                            }
                            if let Err(err) = self.write_out(&chunk) {
                                self.fail(err);
                                self.state = WriteState::Done;
                                self.shared.finish();
                                return Ok(Async::Ready(()));
                            }
                            // yield between chunks, large bodies must
                            // not starve other I/O
                            task::current().notify();
                            return Ok(Async::NotReady);
                        }
                        None => {
                            match self.write_eof() {
                                Ok(()) => {
                                    self.proto.borrow_mut()
                                        .start_timeout();
                                }
                                Err(err) => self.fail(err),
                            }
                            self.state = WriteState::Done;
                            self.shared.finish();
                            return Ok(Async::Ready(()));
                        }
                    }
                }
                WriteState::Done => return Ok(Async::Ready(())),
            }
        }
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        // a dropped reactor must not leave release paths waiting
        if self.shared.state.get() != DONE {
            self.shared.finish();
        }
    }
}

/// Hands the connection back only after the writer task finished
///
/// Spawned by the response release path when a writer is still in
/// flight: the pool must never see a connection a body write might
/// still be touching.
pub struct DeferredRelease {
    writer: WriterHandle,
    conn: Option<Box<Connection>>,
    close: bool,
}

impl DeferredRelease {
    pub fn new(writer: WriterHandle, conn: Box<Connection>, close: bool)
        -> DeferredRelease
    {
        DeferredRelease {
            writer: writer,
            conn: Some(conn),
            close: close,
        }
    }
}

impl Future for DeferredRelease {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        if let Async::NotReady = self.writer.poll_done() {
            return Ok(Async::NotReady);
        }
        if let Some(conn) = self.conn.take() {
            if self.close {
                conn.close();
            } else {
                conn.release();
            }
        }
        Ok(Async::Ready(()))
    }
}
