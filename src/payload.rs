//! Request body representations
//!
//! The body is resolved into one of a small fixed set of variants at
//! assignment time; afterwards the writer only ever asks three
//! questions: the known size, the header contributions, and the next
//! chunk to put on the wire.
use std::collections::VecDeque;
use std::mem;

use url::form_urlencoded;

use headers::CONTENT_TYPE;

/// A request body with optional known length and chunked delivery
#[derive(Debug)]
pub enum Payload {
    /// A fully buffered in-memory body
    Buffer(Vec<u8>),
    /// A sequence of chunks of unknown total length
    ///
    /// Chunks force `Transfer-Encoding: chunked` unless the caller set
    /// an explicit `Content-Length`.
    Chunks(VecDeque<Vec<u8>>),
    /// An urlencoded form, serialized once at assignment time
    Form(FormPayload),
}

impl Payload {
    /// Body length when known ahead of time
    pub fn size(&self) -> Option<u64> {
        match *self {
            Payload::Buffer(ref data) => Some(data.len() as u64),
            Payload::Chunks(..) => None,
            Payload::Form(ref form) => Some(form.body.len() as u64),
        }
    }

    /// Headers this body contributes to the request
    ///
    /// These are merged last and never overwrite caller-set headers.
    pub fn headers(&self) -> Vec<(&'static str, &'static str)> {
        match *self {
            Payload::Buffer(..) | Payload::Chunks(..) => Vec::new(),
            Payload::Form(..) => vec![
                (CONTENT_TYPE, "application/x-www-form-urlencoded"),
            ],
        }
    }

    /// Takes the next chunk to write, yielding between calls
    ///
    /// Empty chunks are skipped; `None` means the body is finished.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        match *self {
            Payload::Buffer(ref mut data) => {
                if data.is_empty() {
                    None
                } else {
                    Some(mem::replace(data, Vec::new()))
                }
            }
            Payload::Chunks(ref mut chunks) => {
                while let Some(chunk) = chunks.pop_front() {
                    if !chunk.is_empty() {
                        return Some(chunk);
                    }
                }
                None
            }
            Payload::Form(ref mut form) => {
                if form.body.is_empty() {
                    None
                } else {
                    Some(mem::replace(&mut form.body, Vec::new()))
                }
            }
        }
    }

    pub fn chunks(chunks: Vec<Vec<u8>>) -> Payload {
        Payload::Chunks(chunks.into_iter().collect())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Payload {
        Payload::Buffer(data)
    }
}

impl<'a> From<&'a [u8]> for Payload {
    fn from(data: &[u8]) -> Payload {
        Payload::Buffer(data.to_vec())
    }
}

impl<'a> From<&'a str> for Payload {
    fn from(data: &str) -> Payload {
        Payload::Buffer(data.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(data: String) -> Payload {
        Payload::Buffer(data.into_bytes())
    }
}

impl From<FormData> for Payload {
    fn from(form: FormData) -> Payload {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for &(ref name, ref value) in &form.fields {
            ser.append_pair(name, value);
        }
        Payload::Form(FormPayload {
            body: ser.finish().into_bytes(),
        })
    }
}

/// The serialized form body
#[derive(Debug)]
pub struct FormPayload {
    body: Vec<u8>,
}

/// Builder for an `application/x-www-form-urlencoded` body
#[derive(Debug, Clone)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> FormData {
        FormData { fields: Vec::new() }
    }

    pub fn field<N, V>(mut self, name: N, value: V) -> FormData
        where N: Into<String>, V: Into<String>,
    {
        self.fields.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod test {
    use super::{FormData, Payload};

    #[test]
    fn buffer_size_and_single_chunk() {
        let mut body = Payload::from("hello world");
        assert_eq!(body.size(), Some(11));
        assert_eq!(body.next_chunk(), Some(b"hello world".to_vec()));
        assert_eq!(body.next_chunk(), None);
    }

    #[test]
    fn empty_buffer_has_no_chunks() {
        let mut body = Payload::from(Vec::new());
        assert_eq!(body.size(), Some(0));
        assert_eq!(body.next_chunk(), None);
    }

    #[test]
    fn chunks_have_no_size_and_skip_empty() {
        let mut body = Payload::chunks(vec![
            b"one".to_vec(), Vec::new(), b"two".to_vec()]);
        assert_eq!(body.size(), None);
        assert_eq!(body.next_chunk(), Some(b"one".to_vec()));
        assert_eq!(body.next_chunk(), Some(b"two".to_vec()));
        assert_eq!(body.next_chunk(), None);
    }

    #[test]
    fn form_is_serialized_once() {
        let mut body = Payload::from(FormData::new()
            .field("name", "John Doe")
            .field("lang", "fr"));
        assert_eq!(body.size(), Some(21));
        assert_eq!(body.headers(), vec![
            ("Content-Type", "application/x-www-form-urlencoded")]);
        assert_eq!(body.next_chunk(),
            Some(b"name=John+Doe&lang=fr".to_vec()));
    }
}
