//! # Wirepack
//!
//! A small, bounded, self-describing serialization format for framing messages
//! that cross a process or worker boundary.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! A `Map` holds only `Field` items. A `Field` is a named container holding
//! exactly one value, which lets a reader skip fields it does not know about.
//! All integers are Little-Endian.


/// Wirepack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// Expected one tag, found another.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Bytes remained after the top-level item was read.
    TrailingBytes(usize),
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// Closing a scope that is not the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// Attempted to write more than one value into a `Field` or `Some`.
    TooManyItems(Scope),
    /// Closed a `Field` or `Some` without writing its value.
    EmptyScope(Scope),
    /// Attempted to write a non-`Field` item directly into a `Map`.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Self::UnexpectedTag { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after item", n),
            Self::TooLarge(n) => write!(f, "length {} exceeds u32::MAX", n),
            Self::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for wirepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    True = 0x02,
    False = 0x03,
    U64 = 0x04,
    I64 = 0x05,
    None = 0x06,

    // Blobs (Tag + u32 Len + Bytes)
    Str = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Some = 0x22,
    Field = 0x23,
}

impl Tag {
    /// Returns the tag for a byte, or `None` if the byte is not a tag.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Unit),
            0x02 => Some(Tag::True),
            0x03 => Some(Tag::False),
            0x04 => Some(Tag::U64),
            0x05 => Some(Tag::I64),
            0x06 => Some(Tag::None),
            0x10 => Some(Tag::Str),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x22 => Some(Tag::Some),
            0x23 => Some(Tag::Field),
            _ => None,
        }
    }
}

/// The kind of container currently open on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any number of items.
    Root,
    /// Ordered sequence; allows any number of items.
    List,
    /// Only `Field` items are allowed.
    Map,
    /// Exactly one item.
    Some,
    /// Exactly one item after the name.
    Field,
}

struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A scope-tracking encoder.
///
/// Open containers are kept on a stack so length headers can be back-patched
/// when the container closes, and so structurally invalid writes are rejected
/// instead of producing bytes no decoder could read.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if any container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        match frame.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Field => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            Scope::Some | Scope::Field if frame.count >= 1 => Err(Error::TooManyItems(frame.scope)),
            Scope::Some | Scope::Field => Ok(()),
        }
    }

    fn written(&mut self) {
        self.top().count += 1;
    }

    fn scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.written();
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::TooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.written();
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0; 4]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }
        let frame = self.top();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if matches!(frame.scope, Scope::Some | Scope::Field) && frame.count == 0 {
            return Err(Error::EmptyScope(frame.scope));
        }

        let start = frame.start;
        self.stack.pop();

        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::TooLarge(body_len))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());
        self.written();
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.scalar(Tag::Unit, &[]) }
    pub fn bool(&mut self, v: bool) -> Result<()> { self.scalar(if v { Tag::True } else { Tag::False }, &[]) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn i64(&mut self, v: i64) -> Result<()> { self.scalar(Tag::I64, &v.to_le_bytes()) }
    pub fn none(&mut self) -> Result<()> { self.scalar(Tag::None, &[]) }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::Str, v.as_bytes()) }
    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a Map. Only `field_begin` may be called directly inside it.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    /// Begins an `Option::Some`; exactly one item must follow.
    pub fn some_begin(&mut self) -> Result<()> { self.begin(Tag::Some, Scope::Some) }
    pub fn some_end(&mut self) -> Result<()> { self.end(Scope::Some) }

    /// Begins a named field; exactly one item (the value) must follow.
    pub fn field_begin(&mut self, name: &str) -> Result<()> {
        self.begin(Tag::Field, Scope::Field)?;
        self.str(name)?;
        // The name is metadata, not the value.
        self.top().count = 0;
        Ok(())
    }
    pub fn field_end(&mut self) -> Result<()> { self.end(Scope::Field) }

    /// Writes a complete `str` field.
    pub fn field_str(&mut self, name: &str, v: &str) -> Result<()> {
        self.field_begin(name)?;
        self.str(v)?;
        self.field_end()
    }

    /// Writes a complete `u64` field.
    pub fn field_u64(&mut self, name: &str, v: u64) -> Result<()> {
        self.field_begin(name)?;
        self.u64(v)?;
        self.field_end()
    }

    /// Writes a complete `i64` field.
    pub fn field_i64(&mut self, name: &str, v: i64) -> Result<()> {
        self.field_begin(name)?;
        self.i64(v)?;
        self.field_end()
    }

    /// Writes a complete `bytes` field.
    pub fn field_bytes(&mut self, name: &str, v: &[u8]) -> Result<()> {
        self.field_begin(name)?;
        self.bytes(v)?;
        self.field_end()
    }

    /// Writes an optional `bytes` field as `Some(bytes)` or `None`.
    pub fn field_opt_bytes(&mut self, name: &str, v: Option<&[u8]>) -> Result<()> {
        self.field_begin(name)?;
        match v {
            Some(v) => {
                self.some_begin()?;
                self.bytes(v)?;
                self.some_end()?;
            }
            None => self.none()?,
        }
        self.field_end()
    }
}

/// A zero-copy, bounds-checked view over encoded bytes.
///
/// Reading advances the view. Container reads return a new `Decoder`
/// restricted to the container body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails with `TrailingBytes` unless the view is fully consumed.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take(N)?.try_into().map_err(|_| Error::UnexpectedEnd)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect(expected)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Skips the next item, including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag {
            Tag::Unit | Tag::True | Tag::False | Tag::None => {}
            Tag::U64 | Tag::I64 => {
                self.take(8)?;
            }
            Tag::Str | Tag::Bytes | Tag::List | Tag::Map | Tag::Some | Tag::Field => {
                let len = self.take_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.expect(Tag::U64)?;
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.expect(Tag::I64)?;
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::Str)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take(len)
    }

    /// Decodes an option, returning the payload decoder for `Some`.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::None => { self.take(1)?; Ok(None) }
            Tag::Some => Ok(Some(self.enter(Tag::Some)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::Some, found }),
        }
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes a field, returning `(name, value decoder)`.
    pub fn field(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Field)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a List.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a decoder for the next item, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut ahead = self.dec.clone();
        ahead.skip()?;
        let len = self.dec.remaining() - ahead.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterator over the fields of a Map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(name, value decoder)` for the next field, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.field().map(Some)
    }
}
