//! # Snapshot: Lazily Serialized Workflow State
//!
//! A [`Snapshot`] is an opaque byte blob whose bytes are computed on first
//! read and cached afterwards. A [`TreeSnapshot`] combines one node's blob
//! with the blobs of its direct children.
//!
//! ## Tree wire format
//!
//! All integers are big-endian `u32`.
//!
//! ```text
//! root_len | root bytes | child_count |
//!     ( type_len | type utf8 | key_len | key utf8 | blob_len | blob )*
//! ```
//!
//! Children appear in declaration order. Each child blob is itself a tree
//! snapshot. An empty root blob means the node had no state to persist.

use crate::error::SnapshotError;
use crate::identity::SnapshotKey;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Producer = Box<dyn FnOnce() -> Bytes + Send>;

#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    bytes: OnceLock<Bytes>,
    producer: Mutex<Option<Producer>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::of(Bytes::new())
    }

    pub fn of(bytes: impl Into<Bytes>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes.into());
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: cell,
                producer: Mutex::new(None),
            }),
        }
    }

    pub fn of_str(value: &str) -> Self {
        Self::of(Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn of_u32(value: u32) -> Self {
        Self::of(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    pub fn of_i64(value: i64) -> Self {
        Self::of(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Defers byte production until [`Snapshot::bytes`] is first called.
    pub fn lazy<F>(producer: F) -> Self
    where
        F: FnOnce() -> Bytes + Send + 'static,
    {
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: OnceLock::new(),
                producer: Mutex::new(Some(Box::new(producer))),
            }),
        }
    }

    /// Lazy snapshot built by writing into a buffer.
    pub fn write<F>(writer: F) -> Self
    where
        F: FnOnce(&mut BytesMut) + Send + 'static,
    {
        Self::lazy(move || {
            let mut buf = BytesMut::new();
            writer(&mut buf);
            buf.freeze()
        })
    }

    pub fn bytes(&self) -> Bytes {
        self.inner
            .bytes
            .get_or_init(|| match self.inner.producer.lock().take() {
                Some(producer) => producer(),
                None => Bytes::new(),
            })
            .clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.inner.bytes.get().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(self.bytes())
    }

    pub fn to_utf8(&self) -> Result<String, SnapshotError> {
        String::from_utf8(self.bytes().to_vec()).map_err(|_| SnapshotError::InvalidUtf8 { offset: 0 })
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.bytes.get() {
            Some(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
            None => f.write_str("Snapshot(<lazy>)"),
        }
    }
}

impl From<Bytes> for Snapshot {
    fn from(bytes: Bytes) -> Self {
        Self::of(bytes)
    }
}

/// Length-prefixed encodings for use inside workflow snapshots.
pub trait SnapshotBufMutExt: BufMut {
    fn put_bytes_with_length(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_slice(bytes);
    }

    fn put_utf8_with_length(&mut self, value: &str) {
        self.put_bytes_with_length(value.as_bytes());
    }

    fn put_bool_as_u32(&mut self, value: bool) {
        self.put_u32(u32::from(value));
    }

    fn put_list<T, F>(&mut self, items: &[T], mut write_item: F)
    where
        Self: Sized,
        F: FnMut(&mut Self, &T),
    {
        self.put_u32(items.len() as u32);
        for item in items {
            write_item(self, item);
        }
    }
}

impl<B: BufMut + ?Sized> SnapshotBufMutExt for B {}

/// Bounds-checked reader over snapshot bytes.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    buf: Bytes,
    offset: usize,
}

impl SnapshotReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<(), SnapshotError> {
        if self.buf.remaining() < needed {
            return Err(SnapshotError::Truncated {
                offset: self.offset,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        self.ensure(4)?;
        self.offset += 4;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32, SnapshotError> {
        self.ensure(4)?;
        self.offset += 4;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, SnapshotError> {
        self.ensure(8)?;
        self.offset += 8;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u32()? != 0)
    }

    pub fn read_bytes_with_length(&mut self) -> Result<Bytes, SnapshotError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        self.offset += len;
        Ok(self.buf.split_to(len))
    }

    pub fn read_utf8_with_length(&mut self) -> Result<String, SnapshotError> {
        let start = self.offset;
        let bytes = self.read_bytes_with_length()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::InvalidUtf8 { offset: start })
    }

    pub fn read_list<T, F>(&mut self, mut read_item: F) -> Result<Vec<T>, SnapshotError>
    where
        F: FnMut(&mut Self) -> Result<T, SnapshotError>,
    {
        let count = self.read_u32()? as usize;
        // Each item occupies at least one byte; cap the allocation on corrupt counts.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }

    /// Fails if unread bytes remain.
    pub fn finish(self) -> Result<(), SnapshotError> {
        match self.buf.remaining() {
            0 => Ok(()),
            trailing => Err(SnapshotError::TrailingBytes(trailing)),
        }
    }
}

/// One node's blob plus the snapshots of its direct children.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    root: Snapshot,
    children: Vec<(SnapshotKey, Snapshot)>,
}

impl TreeSnapshot {
    pub fn new(root: Snapshot, children: Vec<(SnapshotKey, Snapshot)>) -> Self {
        Self { root, children }
    }

    pub fn leaf(root: Snapshot) -> Self {
        Self::new(root, Vec::new())
    }

    pub fn root(&self) -> &Snapshot {
        &self.root
    }

    pub fn children(&self) -> &[(SnapshotKey, Snapshot)] {
        &self.children
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_bytes_with_length(&self.root.bytes());
        buf.put_list(&self.children, |buf, (key, snapshot)| {
            buf.put_utf8_with_length(&key.workflow_type);
            buf.put_utf8_with_length(&key.key);
            buf.put_bytes_with_length(&snapshot.bytes());
        });
        buf.freeze()
    }

    /// Wraps the tree in a lazy snapshot: neither this node's nor any
    /// child's bytes are produced until the result is read.
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot::lazy(move || self.encode())
    }

    pub fn parse(bytes: Bytes) -> Result<ParsedTreeSnapshot, SnapshotError> {
        if bytes.is_empty() {
            return Ok(ParsedTreeSnapshot::default());
        }
        let mut reader = SnapshotReader::new(bytes);
        let root = reader.read_bytes_with_length()?;
        let children = reader.read_list(|reader| {
            let workflow_type = reader.read_utf8_with_length()?;
            let key = reader.read_utf8_with_length()?;
            let blob = reader.read_bytes_with_length()?;
            Ok((SnapshotKey { workflow_type, key }, blob))
        })?;
        reader.finish()?;
        Ok(ParsedTreeSnapshot {
            root: (!root.is_empty()).then_some(root),
            children,
        })
    }
}

/// A decoded tree snapshot. `root` is `None` when no state was persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTreeSnapshot {
    pub root: Option<Bytes>,
    pub children: Vec<(SnapshotKey, Bytes)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(workflow_type: &str, key: &str) -> SnapshotKey {
        SnapshotKey::new(workflow_type, key)
    }

    #[test]
    fn test_lazy_snapshot_produces_once_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let snapshot = Snapshot::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Bytes::from_static(b"state")
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!snapshot.is_materialized());

        let copy = snapshot.clone();
        assert_eq!(snapshot.bytes(), Bytes::from_static(b"state"));
        assert_eq!(copy.bytes(), Bytes::from_static(b"state"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tree_without_children() {
        let tree = TreeSnapshot::leaf(Snapshot::of_str("root"));
        let parsed = TreeSnapshot::parse(tree.encode()).unwrap();
        assert_eq!(parsed.root, Some(Bytes::from_static(b"root")));
        assert!(parsed.children.is_empty());
    }

    #[test]
    fn test_tree_wire_layout() {
        let tree = TreeSnapshot::new(
            Snapshot::of_str("r"),
            vec![(key("T", "k"), Snapshot::of_str("c"))],
        );
        let expected: &[u8] = &[
            0, 0, 0, 1, b'r', // root
            0, 0, 0, 1, // child count
            0, 0, 0, 1, b'T', // type
            0, 0, 0, 1, b'k', // key
            0, 0, 0, 1, b'c', // blob
        ];
        assert_eq!(tree.encode().as_ref(), expected);
    }

    #[test]
    fn test_tree_with_same_type_children_distinct_keys() {
        let children = (0..3)
            .map(|i| (key("Counter", &format!("c{i}")), Snapshot::of_u32(i)))
            .collect();
        let tree = TreeSnapshot::new(Snapshot::empty(), children);
        let parsed = TreeSnapshot::parse(tree.into_snapshot().bytes()).unwrap();

        assert_eq!(parsed.root, None);
        let keys: Vec<_> = parsed.children.iter().map(|(k, _)| k.key.as_str()).collect();
        assert_eq!(keys, vec!["c0", "c1", "c2"]);
        let mut reader = SnapshotReader::new(parsed.children[2].1.clone());
        assert_eq!(reader.read_u32().unwrap(), 2);
    }

    #[test]
    fn test_empty_buffer_means_no_state() {
        let parsed = TreeSnapshot::parse(Bytes::new()).unwrap();
        assert_eq!(parsed, ParsedTreeSnapshot::default());
    }

    #[test]
    fn test_malformed_snapshots_are_rejected() {
        let truncated = Bytes::from_static(&[0, 0, 0, 5, b'a']);
        assert!(matches!(
            TreeSnapshot::parse(truncated),
            Err(SnapshotError::Truncated { needed: 5, .. })
        ));

        let mut bad_utf8 = BytesMut::new();
        bad_utf8.put_bytes_with_length(b"");
        bad_utf8.put_u32(1);
        bad_utf8.put_bytes_with_length(&[0xff, 0xfe]);
        assert!(matches!(
            TreeSnapshot::parse(bad_utf8.freeze()),
            Err(SnapshotError::InvalidUtf8 { offset: 8 })
        ));

        let mut trailing = BytesMut::from(&TreeSnapshot::leaf(Snapshot::of_str("x")).encode()[..]);
        trailing.put_u8(7);
        assert_eq!(
            TreeSnapshot::parse(trailing.freeze()),
            Err(SnapshotError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_reader_helpers() {
        let snapshot = Snapshot::write(|buf| {
            buf.put_utf8_with_length("name");
            buf.put_bool_as_u32(true);
            buf.put_list(&[3i64, -4], |buf, n| buf.put_i64(*n));
        });
        let mut reader = snapshot.reader();
        assert_eq!(reader.read_utf8_with_length().unwrap(), "name");
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_list(|r| r.read_i64()).unwrap(), vec![3, -4]);
        reader.finish().unwrap();
    }

    proptest! {
        #[test]
        fn test_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = TreeSnapshot::parse(Bytes::from(data));
        }
    }
}
