//! ISO 7816 flavoured BER-TLV (Tag-Length-Value) trees.
//!
//! BER is an ASN.1 encoding, originally documented in ISO 8825; the subset
//! used by smartcards is the slightly odd dialect of ISO 7816-6, also
//! documented in EMV Book 3, Annex B. Tags are referred to by their hex
//! values (0x6F rather than Application 15), `0x00` filler bytes may occur
//! before, between and after data objects, and indefinite lengths are not
//! allowed.
//!
//! A [`Tlv`] owns a whole tree — or forest, since a buffer may hold several
//! top-level fields in a sibling chain. Nodes live in an arena and are
//! addressed by copyable [`NodeId`] handles, which stay valid across
//! mutation; the doubly linked parent/child/next/prev relations are kept
//! consistent by the mutation primitives ([`Tlv::unlink`],
//! [`Tlv::insert_after`], [`Tlv::insert_below`], [`Tlv::set_value`]).

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;

use crate::{Error, Result};

/// Longest DER tag we accept, in bytes.
pub const MAX_TAG_LEN: usize = 8;

const TAG_NUMBER_MASK: u8 = 0b0001_1111;
const TAG_CONSTRUCTED_MASK: u8 = 0b0010_0000;
const TAG_CLASS_MASK: u8 = 0b1100_0000;

/// Tag class from bits 8-7 of the leading identifier octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

/// A DER-encoded tag, stored verbatim (1-8 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    bytes: [u8; MAX_TAG_LEN],
    len: u8,
}

impl Tag {
    /// Parses `bytes` as a single complete DER tag.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let (rest, tag) = take_tag(bytes)?;
        if !rest.is_empty() {
            return Err(Error::InvalidArg("trailing bytes after tag"));
        }
        Ok(tag)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Does this tag mark a constructed value?
    ///
    /// A constructed value contains further TLV tuples; a primitive value is
    /// a value in itself (a string, number, etc. depending on context).
    pub fn is_constructed(&self) -> bool {
        self.bytes[0] & TAG_CONSTRUCTED_MASK != 0
    }

    pub fn class(&self) -> Class {
        match self.bytes[0] & TAG_CLASS_MASK {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::ContextSpecific,
            _ => Class::Private,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.as_bytes()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.as_bytes()))
    }
}

/// Takes a tag off the front of `input`.
///
/// If bits 1-5 of the first byte are all set, the tag number continues: each
/// subsequent byte carries 7 bits, with bit 8 flagging more bytes to come.
/// See EMV Book 3, Annex B1.
pub(crate) fn take_tag(input: &[u8]) -> Result<(&[u8], Tag)> {
    let (mut rest, first) =
        be_u8::<_, nom::error::Error<&[u8]>>(input).map_err(|_| Error::UnexpectedEndOfStream)?;

    let mut bytes = [0u8; MAX_TAG_LEN];
    bytes[0] = first;
    if first & TAG_NUMBER_MASK != TAG_NUMBER_MASK {
        return Ok((rest, Tag { bytes, len: 1 }));
    }

    let mut len = 1usize;
    loop {
        if len == MAX_TAG_LEN {
            return Err(Error::TagNumberTooLarge);
        }
        let (r, b) =
            be_u8::<_, nom::error::Error<&[u8]>>(rest).map_err(|_| Error::UnexpectedEndOfStream)?;
        bytes[len] = b;
        len += 1;
        rest = r;
        if b & 0x80 == 0 {
            break;
        }
    }

    Ok((rest, Tag { bytes, len: len as u8 }))
}

/// Takes a length field off the front of `input`.
///
/// Top bit clear is the short form (0-127). Top bit set makes the low 7 bits
/// the count of big-endian length bytes that follow; `0x80` alone would be
/// an indefinite length, which ISO 7816 and EMV forbid.
pub(crate) fn take_len(input: &[u8]) -> Result<(&[u8], usize)> {
    let (rest, first) =
        be_u8::<_, nom::error::Error<&[u8]>>(input).map_err(|_| Error::UnexpectedEndOfStream)?;

    if first == 0x80 {
        return Err(Error::IndefiniteLengthNotSupported);
    }
    if first & 0x80 == 0 {
        return Ok((rest, first as usize));
    }

    let n = (first & 0x7f) as usize;
    if n > std::mem::size_of::<usize>() {
        return Err(Error::ValueLengthTooLarge);
    }
    let (rest, raw) =
        take::<_, _, nom::error::Error<&[u8]>>(n)(rest).map_err(|_| Error::UnexpectedEndOfStream)?;
    Ok((rest, BigEndian::read_uint(raw, n) as usize))
}

/// Appends a DER length field for `len`: short form below 0x80, otherwise
/// the minimal number of big-endian length bytes (up to four).
pub(crate) fn put_len(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x100 {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len < 0x1_0000 {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    } else if len < 0x100_0000 {
        out.extend_from_slice(&[0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]);
    } else {
        out.extend_from_slice(&[
            0x84,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]);
    }
}

fn len_field_size(len: usize) -> usize {
    match len {
        0..=0x7f => 1,
        0x80..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xff_ffff => 4,
        _ => 5,
    }
}

/// Handle to a node inside a [`Tlv`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    tag: Tag,
    value: Vec<u8>,
    parent: Option<NodeId>,
    child: Option<NodeId>,
    next: Option<NodeId>,
    prev: Option<NodeId>,
}

/// An owned BER-TLV tree (or forest of sibling trees).
#[derive(Debug, Clone, Default)]
pub struct Tlv {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<NodeId>,
}

impl Tlv {
    fn empty() -> Self {
        Self::default()
    }

    /// Parses a BER-TLV byte stream into a tree. `0x00` filler bytes before,
    /// between and after data objects are skipped; a buffer that is empty or
    /// all filler yields an empty tree.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        let mut tree = Tlv::empty();
        tree.head = tree.parse_list(buffer, None, true)?;
        Ok(tree)
    }

    /// Like [`Tlv::parse`], but treats every tag as primitive.
    ///
    /// This violates the EMV parsing rules; it exists for reading message
    /// templates whose nested fields may be arbitrary bytes. Think twice
    /// before using it.
    pub fn shallow_parse(buffer: &[u8]) -> Result<Self> {
        let mut tree = Tlv::empty();
        tree.head = tree.parse_list(buffer, None, false)?;
        Ok(tree)
    }

    /// Builds a single-node tree. A constructed tag with a non-empty value
    /// has the value parsed into child nodes.
    pub fn new(tag: &[u8], value: &[u8]) -> Result<Self> {
        let tag = Tag::new(tag)?;
        let mut tree = Tlv::empty();
        let id = tree.alloc(Node {
            tag,
            value: Vec::new(),
            parent: None,
            child: None,
            next: None,
            prev: None,
        });
        if tag.is_constructed() && !value.is_empty() {
            let child = tree.parse_list(value, Some(id), true)?;
            tree.node_mut(id).child = child;
        } else {
            tree.node_mut(id).value = value.to_vec();
        }
        tree.head = Some(id);
        Ok(tree)
    }

    fn parse_list(
        &mut self,
        mut input: &[u8],
        parent: Option<NodeId>,
        deep: bool,
    ) -> Result<Option<NodeId>> {
        let mut head = None;
        let mut prev: Option<NodeId> = None;

        loop {
            while let [0x00, rest @ ..] = input {
                input = rest;
            }
            if input.is_empty() {
                break;
            }

            let (rest, tag) = take_tag(input)?;
            let (rest, len) = take_len(rest)?;
            if rest.len() < len {
                return Err(Error::UnexpectedEndOfStream);
            }
            let (contents, rest) = rest.split_at(len);

            let id = self.alloc(Node {
                tag,
                value: Vec::new(),
                parent,
                child: None,
                next: None,
                prev,
            });
            if deep && tag.is_constructed() {
                let child = self.parse_list(contents, Some(id), deep)?;
                self.node_mut(id).child = child;
            } else {
                self.node_mut(id).value = contents.to_vec();
            }

            if let Some(p) = prev {
                self.node_mut(p).next = Some(id);
            }
            head.get_or_insert(id);
            prev = Some(id);
            input = rest;
        }

        Ok(head)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(node);
                NodeId(i)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots[id.0].as_ref().expect("stale TLV node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0].as_mut().expect("stale TLV node id")
    }

    /// First node of the top-level sibling chain, if any.
    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn tag(&self, id: NodeId) -> Tag {
        self.node(id).tag
    }

    /// Value bytes of a primitive node; empty for nodes carrying children.
    pub fn value(&self, id: NodeId) -> &[u8] {
        &self.node(id).value
    }

    /// A node is constructed once it carries children. Parsing only ever
    /// gives children to tags whose constructed bit is set.
    pub fn is_constructed(&self, id: NodeId) -> bool {
        self.node(id).child.is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).child
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    /// Number of ancestors between `id` and its root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
            depth += 1;
        }
        depth
    }

    /// Shallow search: `from` and its next-siblings, children not descended
    /// into.
    pub fn find(&self, from: Option<NodeId>, tag: &[u8]) -> Option<NodeId> {
        let want = Tag::new(tag).ok()?;
        let mut cur = from;
        while let Some(id) = cur {
            if self.node(id).tag == want {
                return Some(id);
            }
            cur = self.node(id).next;
        }
        None
    }

    /// Next node in depth-first order: first child, else next sibling, else
    /// the next sibling of the closest ancestor that has one.
    pub fn iterate(&self, id: NodeId) -> Option<NodeId> {
        if let Some(child) = self.child(id) {
            return Some(child);
        }
        if let Some(next) = self.next(id) {
            return Some(next);
        }
        let mut cur = id;
        while let Some(parent) = self.parent(cur) {
            if let Some(next) = self.next(parent) {
                return Some(next);
            }
            cur = parent;
        }
        None
    }

    /// Depth-first search across the whole subtree rooted in the chain at
    /// `from` (including `from` itself).
    pub fn deep_find(&self, from: Option<NodeId>, tag: &[u8]) -> Option<NodeId> {
        let want = Tag::new(tag).ok()?;
        let mut cur = from;
        while let Some(id) = cur {
            if self.node(id).tag == want {
                return Some(id);
            }
            cur = self.iterate(id);
        }
        None
    }

    /// All nodes, depth-first from the head.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.iterate(id);
            Some(id)
        })
    }

    /// Encoded size of a node's content: value bytes for a primitive, the
    /// summed encoded lengths of the children for a constructed node.
    fn content_len(&self, id: NodeId) -> usize {
        match self.node(id).child {
            Some(child) => self.chain_encoded_len(Some(child)),
            None => self.node(id).value.len(),
        }
    }

    fn node_encoded_len(&self, id: NodeId) -> usize {
        let content = self.content_len(id);
        self.node(id).tag.len() + len_field_size(content) + content
    }

    fn chain_encoded_len(&self, mut cur: Option<NodeId>) -> usize {
        let mut total = 0;
        while let Some(id) = cur {
            total += self.node_encoded_len(id);
            cur = self.node(id).next;
        }
        total
    }

    /// Size of the full encoding, without encoding it.
    pub fn encoded_len(&self) -> usize {
        self.chain_encoded_len(self.head)
    }

    /// Encodes the whole tree back into DER bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_chain(self.head, &mut out);
        out
    }

    pub(crate) fn encode_chain(&self, mut cur: Option<NodeId>, out: &mut Vec<u8>) {
        while let Some(id) = cur {
            let node = self.node(id);
            out.extend_from_slice(node.tag.as_bytes());
            put_len(self.content_len(id), out);
            match node.child {
                Some(child) => self.encode_chain(Some(child), out),
                None => out.extend_from_slice(&node.value),
            }
            cur = node.next;
        }
    }

    /// The DER identifier octets of a node.
    pub fn encode_identifier(&self, id: NodeId) -> &[u8] {
        self.node(id).tag.as_bytes()
    }

    /// The DER length octets of a node.
    pub fn encode_length(&self, id: NodeId) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        put_len(self.content_len(id), &mut out);
        out
    }

    /// The value octets of a primitive node; empty for a constructed one.
    pub fn encode_value(&self, id: NodeId) -> Vec<u8> {
        self.node(id).value.clone()
    }

    /// Deep copy of one node and its descendants, without its siblings.
    pub fn copy_node(&self, id: NodeId) -> Tlv {
        let mut out = Tlv::empty();
        let new = out.clone_subtree(self, id, None);
        out.head = Some(new);
        out
    }

    fn clone_subtree(&mut self, src: &Tlv, id: NodeId, parent: Option<NodeId>) -> NodeId {
        let node = src.node(id);
        let new = self.alloc(Node {
            tag: node.tag,
            value: node.value.clone(),
            parent,
            child: None,
            next: None,
            prev: None,
        });

        let mut cur = node.child;
        let mut prev: Option<NodeId> = None;
        while let Some(child) = cur {
            let copied = self.clone_subtree(src, child, Some(new));
            match prev {
                Some(p) => {
                    self.node_mut(p).next = Some(copied);
                    self.node_mut(copied).prev = Some(p);
                }
                None => self.node_mut(new).child = Some(copied),
            }
            prev = Some(copied);
            cur = src.node(child).next;
        }

        new
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut cur = self.node(id).child;
        while let Some(child) = cur {
            cur = self.node(child).next;
            self.free_subtree(child);
        }
        self.slots[id.0] = None;
        self.free.push(id.0);
    }

    /// Overwrites the value of a primitive node. Fails on a constructed one.
    ///
    /// Unlike a pointer-based tree there is nothing to re-link here: the
    /// node id stays valid and all relations are untouched.
    pub fn set_value(&mut self, id: NodeId, value: &[u8]) -> Result<()> {
        if self.is_constructed(id) {
            return Err(Error::InvalidArg("set_value on constructed node"));
        }
        self.node_mut(id).value = value.to_vec();
        Ok(())
    }

    /// Overwrites the identifier of a node.
    pub fn set_identifier(&mut self, id: NodeId, tag: &[u8]) -> Result<()> {
        self.node_mut(id).tag = Tag::new(tag)?;
        Ok(())
    }

    /// Detaches the subtree rooted at `id` into a tree of its own, leaving
    /// the remaining tree consistent. Unlinking the only top-level node
    /// leaves this tree empty.
    pub fn unlink(&mut self, id: NodeId) -> Tlv {
        let (parent, prev, next) = {
            let node = self.node(id);
            (node.parent, node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => {
                if let Some(parent) = parent {
                    self.node_mut(parent).child = next;
                }
            }
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        if self.head == Some(id) {
            self.head = next;
        }

        let mut out = Tlv::empty();
        let new = out.clone_subtree(self, id, None);
        out.head = Some(new);
        self.free_subtree(id);
        out
    }

    /// Grafts the top-level chain of `src` into this arena below `parent`,
    /// returning the head and tail of the copied chain.
    fn graft(&mut self, src: &Tlv, parent: Option<NodeId>) -> Option<(NodeId, NodeId)> {
        let mut cur = src.head;
        let mut head: Option<NodeId> = None;
        let mut prev: Option<NodeId> = None;
        while let Some(id) = cur {
            let copied = self.clone_subtree(src, id, parent);
            if let Some(p) = prev {
                self.node_mut(p).next = Some(copied);
                self.node_mut(copied).prev = Some(p);
            }
            head.get_or_insert(copied);
            prev = Some(copied);
            cur = src.node(id).next;
        }
        Some((head?, prev?))
    }

    /// Inserts the chain of `other` after the node `at`. Anything that
    /// followed `at` ends up after the inserted chain's tail.
    pub fn insert_after(&mut self, at: NodeId, other: &Tlv) -> Result<NodeId> {
        let parent = self.node(at).parent;
        let (head, tail) = self
            .graft(other, parent)
            .ok_or(Error::InvalidArg("insert of empty tree"))?;

        let old_next = self.node(at).next;
        self.node_mut(tail).next = old_next;
        if let Some(n) = old_next {
            self.node_mut(n).prev = Some(tail);
        }
        self.node_mut(at).next = Some(head);
        self.node_mut(head).prev = Some(at);
        Ok(head)
    }

    /// Inserts the chain of `other` as children of `parent`, prepended at
    /// the head of any existing child list. A primitive node holding a
    /// non-empty value cannot take children.
    pub fn insert_below(&mut self, parent: NodeId, other: &Tlv) -> Result<NodeId> {
        if !self.node(parent).value.is_empty() {
            return Err(Error::InvalidArg("insert below primitive node with value"));
        }
        let (head, tail) = self
            .graft(other, Some(parent))
            .ok_or(Error::InvalidArg("insert of empty tree"))?;

        let old_child = self.node(parent).child;
        self.node_mut(tail).next = old_child;
        if let Some(c) = old_child {
            self.node_mut(c).prev = Some(tail);
        }
        self.node_mut(parent).child = Some(head);
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_constructed_bit() {
        assert!(Tag::new(&[0x6F]).unwrap().is_constructed()); // FCI Template.
        assert!(Tag::new(&[0xBF, 0x0C]).unwrap().is_constructed()); // FCI Issuer Discretionary Data.
        assert!(!Tag::new(&[0x84]).unwrap().is_constructed()); // DF Name.
        assert!(!Tag::new(&[0x9F, 0x2A]).unwrap().is_constructed()); // Kernel Identifier.
    }

    #[test]
    fn test_take_tag_single_byte() {
        let (rest, tag) = take_tag(&[0x6F, 0xFF]).unwrap();
        assert_eq!(tag.as_bytes(), &[0x6F]);
        assert_eq!(rest, &[0xFF]);
    }

    #[test]
    fn test_take_tag_multi_byte() {
        let (rest, tag) = take_tag(&[0x9F, 0x2A, 0x00]).unwrap();
        assert_eq!(tag.as_bytes(), &[0x9F, 0x2A]);
        assert_eq!(rest, &[0x00]);

        let (rest, tag) = take_tag(&[0xDF, 0x85, 0xE3, 0x71, 0x07]).unwrap();
        assert_eq!(tag.as_bytes(), &[0xDF, 0x85, 0xE3, 0x71]);
        assert_eq!(rest, &[0x07]);
    }

    #[test]
    fn test_take_tag_truncated() {
        assert_eq!(take_tag(&[]).unwrap_err(), Error::UnexpectedEndOfStream);
        assert_eq!(
            take_tag(&[0x9F]).unwrap_err(),
            Error::UnexpectedEndOfStream
        );
        assert_eq!(
            take_tag(&[0xDF, 0x85, 0xE3]).unwrap_err(),
            Error::UnexpectedEndOfStream
        );
    }

    #[test]
    fn test_take_tag_number_too_large() {
        // Eight continuation octets would require a ninth tag byte.
        let tag = [0x1F, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x01];
        assert_eq!(take_tag(&tag).unwrap_err(), Error::TagNumberTooLarge);
    }

    #[test]
    fn test_take_len_short_form() {
        assert_eq!(take_len(&[0x00, 0xED]).unwrap(), (&[0xED][..], 0));
        assert_eq!(take_len(&[0x7F, 0xED]).unwrap(), (&[0xED][..], 127));
    }

    #[test]
    fn test_take_len_long_form() {
        assert_eq!(take_len(&[0x81, 0xC8, 0xED]).unwrap(), (&[0xED][..], 200));
        assert_eq!(
            take_len(&[0x82, 0x12, 0x34, 0xED]).unwrap(),
            (&[0xED][..], 0x1234)
        );
        assert_eq!(
            take_len(&[0x83, 0x12, 0x34, 0x56, 0xED]).unwrap(),
            (&[0xED][..], 0x123456)
        );
    }

    #[test]
    fn test_take_len_indefinite() {
        assert_eq!(
            take_len(&[0x80, 0xED]).unwrap_err(),
            Error::IndefiniteLengthNotSupported
        );
    }

    #[test]
    fn test_take_len_too_large() {
        // Nine length bytes cannot fit a 64-bit usize.
        let buf = [0x89, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        assert_eq!(take_len(&buf).unwrap_err(), Error::ValueLengthTooLarge);
    }

    #[test]
    fn test_take_len_truncated() {
        assert_eq!(
            take_len(&[0x82, 0x01]).unwrap_err(),
            Error::UnexpectedEndOfStream
        );
    }

    #[test]
    fn test_parse_primitive() {
        let tree = Tlv::parse(&[0x84, 0x03, 0x01, 0x02, 0x03]).unwrap();
        let id = tree.head().unwrap();
        assert_eq!(tree.tag(id).as_bytes(), &[0x84]);
        assert!(!tree.is_constructed(id));
        assert_eq!(tree.value(id), &[0x01, 0x02, 0x03]);
        assert_eq!(tree.next(id), None);
    }

    #[test]
    fn test_parse_constructed() {
        // One constructed node with four primitive children.
        let buf = [
            0x70, 0x11, 0x0C, 0x06, 0x4D, 0x7E, 0x6C, 0x6C, 0x65, 0x72, 0x02, 0x01, 0x1E, 0x01,
            0x01, 0x00, 0x80, 0x01, 0x00,
        ];
        let tree = Tlv::parse(&buf).unwrap();
        let root = tree.head().unwrap();
        assert_eq!(tree.tag(root).as_bytes(), &[0x70]);
        assert!(tree.is_constructed(root));
        assert!(tree.value(root).is_empty());

        let mut children = Vec::new();
        let mut cur = tree.child(root);
        while let Some(id) = cur {
            assert_eq!(tree.parent(id), Some(root));
            assert!(!tree.is_constructed(id));
            children.push(tree.tag(id).as_bytes().to_vec());
            cur = tree.next(id);
        }
        assert_eq!(
            children,
            vec![vec![0x0C], vec![0x02], vec![0x01], vec![0x80]]
        );

        assert_eq!(tree.encode(), &buf);
    }

    #[test]
    fn test_parse_sibling_chain() {
        let tree = Tlv::parse(&[0x81, 0x01, 0xAA, 0x82, 0x01, 0xBB]).unwrap();
        let first = tree.head().unwrap();
        let second = tree.next(first).unwrap();
        assert_eq!(tree.prev(second), Some(first));
        assert_eq!(tree.value(second), &[0xBB]);
        assert_eq!(tree.next(second), None);
    }

    #[test]
    fn test_parse_skips_filler() {
        let padded = [0x00, 0x00, 0x84, 0x01, 0xAA, 0x00, 0x85, 0x01, 0xBB, 0x00, 0x00];
        let tree = Tlv::parse(&padded).unwrap();
        let first = tree.head().unwrap();
        assert_eq!(tree.tag(first).as_bytes(), &[0x84]);
        let second = tree.next(first).unwrap();
        assert_eq!(tree.tag(second).as_bytes(), &[0x85]);
        // Re-encoding drops the filler.
        assert_eq!(tree.encode(), &[0x84, 0x01, 0xAA, 0x85, 0x01, 0xBB]);
    }

    #[test]
    fn test_parse_empty_and_filler_only() {
        assert!(Tlv::parse(&[]).unwrap().is_empty());
        assert!(Tlv::parse(&[0x00, 0x00, 0x00]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_truncated_value() {
        assert_eq!(
            Tlv::parse(&[0x84, 0x05, 0x01, 0x02]).unwrap_err(),
            Error::UnexpectedEndOfStream
        );
    }

    #[test]
    fn test_shallow_parse_keeps_constructed_opaque() {
        let buf = [0x70, 0x03, 0x80, 0x01, 0xAA];
        let tree = Tlv::shallow_parse(&buf).unwrap();
        let root = tree.head().unwrap();
        assert!(!tree.is_constructed(root));
        assert_eq!(tree.value(root), &[0x80, 0x01, 0xAA]);
        assert_eq!(tree.encode(), &buf);
    }

    #[test]
    fn test_encode_long_form_length() {
        let value = vec![0xA5; 200];
        let tree = Tlv::new(&[0x84], &value).unwrap();
        let encoded = tree.encode();
        assert_eq!(&encoded[..3], &[0x84, 0x81, 0xC8]);
        assert_eq!(encoded.len(), tree.encoded_len());
        assert_eq!(Tlv::parse(&encoded).unwrap().encode(), encoded);
    }

    #[test]
    fn test_encoded_len_constructed() {
        let buf = [
            0x70, 0x11, 0x0C, 0x06, 0x4D, 0x7E, 0x6C, 0x6C, 0x65, 0x72, 0x02, 0x01, 0x1E, 0x01,
            0x01, 0x00, 0x80, 0x01, 0x00,
        ];
        let tree = Tlv::parse(&buf).unwrap();
        let root = tree.head().unwrap();
        // id + length field + sum of child encodings
        let child_sum: usize = {
            let mut sum = 0;
            let mut cur = tree.child(root);
            while let Some(id) = cur {
                sum += tree.encode_identifier(id).len()
                    + tree.encode_length(id).len()
                    + tree.value(id).len();
                cur = tree.next(id);
            }
            sum
        };
        assert_eq!(tree.encoded_len(), 1 + 1 + child_sum);
        assert_eq!(tree.encoded_len(), buf.len());
    }

    #[test]
    fn test_new_constructed_parses_value() {
        let tree = Tlv::new(&[0x61], &[0x4F, 0x02, 0xA0, 0x00]).unwrap();
        let root = tree.head().unwrap();
        assert!(tree.is_constructed(root));
        let adf = tree.child(root).unwrap();
        assert_eq!(tree.tag(adf).as_bytes(), &[0x4F]);
        assert_eq!(tree.value(adf), &[0xA0, 0x00]);
    }

    #[test]
    fn test_find_and_deep_find() {
        let buf = [
            0x6F, 0x0F, //
            0x84, 0x02, 0xAA, 0xBB, //
            0xA5, 0x09, //
            0xBF, 0x0C, 0x06, //
            0x61, 0x04, 0x4F, 0x02, 0xA0, 0x00,
        ];
        let tree = Tlv::parse(&buf).unwrap();
        let fci = tree.find(tree.head(), &[0x6F]).unwrap();
        assert!(tree.find(tree.head(), &[0x84]).is_none()); // shallow only
        assert!(tree.find(tree.child(fci), &[0x84]).is_some());

        let adf = tree.deep_find(tree.head(), &[0x4F]).unwrap();
        assert_eq!(tree.value(adf), &[0xA0, 0x00]);
        assert_eq!(tree.depth(adf), 4);
    }

    #[test]
    fn test_iterate_depth_first() {
        let buf = [
            0x6F, 0x08, 0x84, 0x01, 0xAA, 0xA5, 0x03, 0x50, 0x01, 0xBB,
        ];
        let tree = Tlv::parse(&buf).unwrap();
        let order: Vec<Vec<u8>> = tree
            .nodes()
            .map(|id| tree.tag(id).as_bytes().to_vec())
            .collect();
        assert_eq!(
            order,
            vec![vec![0x6F], vec![0x84], vec![0xA5], vec![0x50]]
        );
    }

    #[test]
    fn test_set_value_reencodes_outer_lengths() {
        // Growing the application label must grow every enclosing template.
        let label = b"SomeLongApplicationLabel";
        let ppse = [
            0x6F, 0x2F, //
            0x84, 0x0E, 0x32, 0x50, 0x41, 0x59, 0x2E, 0x53, 0x59, 0x53, 0x2E, 0x44, 0x44, 0x46,
            0x30, 0x31, //
            0xA5, 0x1D, //
            0xBF, 0x0C, 0x1A, //
            0x61, 0x18, //
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10, //
            0x50, 0x0A, 0x4D, 0x61, 0x73, 0x74, 0x65, 0x72, 0x43, 0x61, 0x72, 0x64, //
            0x87, 0x01, 0x01,
        ];
        let modified = [
            0x6F, 0x3D, //
            0x84, 0x0E, 0x32, 0x50, 0x41, 0x59, 0x2E, 0x53, 0x59, 0x53, 0x2E, 0x44, 0x44, 0x46,
            0x30, 0x31, //
            0xA5, 0x2B, //
            0xBF, 0x0C, 0x28, //
            0x61, 0x26, //
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10, //
            0x50, 0x18, 0x53, 0x6F, 0x6D, 0x65, 0x4C, 0x6F, 0x6E, 0x67, 0x41, 0x70, 0x70, 0x6C,
            0x69, 0x63, 0x61, 0x74, 0x69, 0x6F, 0x6E, 0x4C, 0x61, 0x62, 0x65, 0x6C, //
            0x87, 0x01, 0x01,
        ];

        let mut tree = Tlv::parse(&ppse).unwrap();
        let app_label = tree.deep_find(tree.head(), &[0x50]).unwrap();
        tree.set_value(app_label, label).unwrap();
        assert_eq!(tree.encode(), &modified);
    }

    #[test]
    fn test_set_value_on_constructed_fails() {
        let mut tree = Tlv::parse(&[0x70, 0x03, 0x80, 0x01, 0xAA]).unwrap();
        let root = tree.head().unwrap();
        assert!(tree.set_value(root, &[0x00]).is_err());
    }

    #[test]
    fn test_set_identifier() {
        let mut tree = Tlv::parse(&[0x84, 0x01, 0xAA]).unwrap();
        let id = tree.head().unwrap();
        tree.set_identifier(id, &[0x9F, 0x2A]).unwrap();
        assert_eq!(tree.encode(), &[0x9F, 0x2A, 0x01, 0xAA]);
    }

    #[test]
    fn test_unlink_middle_child() {
        let buf = [
            0x70, 0x09, 0x81, 0x01, 0xAA, 0x82, 0x01, 0xBB, 0x83, 0x01, 0xCC,
        ];
        let mut tree = Tlv::parse(&buf).unwrap();
        let middle = tree.deep_find(tree.head(), &[0x82]).unwrap();
        let detached = tree.unlink(middle);

        assert_eq!(detached.encode(), &[0x82, 0x01, 0xBB]);
        assert_eq!(
            tree.encode(),
            &[0x70, 0x06, 0x81, 0x01, 0xAA, 0x83, 0x01, 0xCC]
        );
        // The detached subtree keeps only its siblings' relations severed.
        let head = detached.head().unwrap();
        assert_eq!(detached.parent(head), None);
        assert_eq!(detached.prev(head), None);
        assert_eq!(detached.next(head), None);
    }

    #[test]
    fn test_unlink_head() {
        let mut tree = Tlv::parse(&[0x81, 0x01, 0xAA, 0x82, 0x01, 0xBB]).unwrap();
        let head = tree.head().unwrap();
        let detached = tree.unlink(head);
        assert_eq!(detached.encode(), &[0x81, 0x01, 0xAA]);
        assert_eq!(tree.encode(), &[0x82, 0x01, 0xBB]);

        let last = tree.head().unwrap();
        let detached = tree.unlink(last);
        assert_eq!(detached.encode(), &[0x82, 0x01, 0xBB]);
        assert!(tree.is_empty());
        assert_eq!(tree.encode(), &[] as &[u8]);
    }

    #[test]
    fn test_insert_after_splices() {
        let mut tree = Tlv::parse(&[0x81, 0x01, 0xAA, 0x83, 0x01, 0xCC]).unwrap();
        let first = tree.head().unwrap();
        let insert = Tlv::new(&[0x82], &[0xBB]).unwrap();
        tree.insert_after(first, &insert).unwrap();
        assert_eq!(
            tree.encode(),
            &[0x81, 0x01, 0xAA, 0x82, 0x01, 0xBB, 0x83, 0x01, 0xCC]
        );
    }

    #[test]
    fn test_insert_below_prepends() {
        let mut tree = Tlv::new(&[0x70], &[]).unwrap();
        let root = tree.head().unwrap();
        tree.insert_below(root, &Tlv::new(&[0x82], &[0xBB]).unwrap())
            .unwrap();
        tree.insert_below(root, &Tlv::new(&[0x81], &[0xAA]).unwrap())
            .unwrap();
        assert_eq!(
            tree.encode(),
            &[0x70, 0x06, 0x81, 0x01, 0xAA, 0x82, 0x01, 0xBB]
        );
    }

    #[test]
    fn test_insert_below_primitive_with_value_fails() {
        let mut tree = Tlv::parse(&[0x84, 0x01, 0xAA]).unwrap();
        let root = tree.head().unwrap();
        let child = Tlv::new(&[0x81], &[0xBB]).unwrap();
        assert!(tree.insert_below(root, &child).is_err());
    }

    #[test]
    fn test_copy_node_drops_siblings() {
        let tree = Tlv::parse(&[0x70, 0x03, 0x80, 0x01, 0xAA, 0x84, 0x01, 0xBB]).unwrap();
        let copy = tree.copy_node(tree.head().unwrap());
        assert_eq!(copy.encode(), &[0x70, 0x03, 0x80, 0x01, 0xAA]);
    }

    #[test]
    fn test_roundtrip_ppse() {
        // SELECT '2PAY.SYS.DDF01' response with two directory entries.
        let fci = [
            0x6F, 0x3B, //
            0x84, 0x0E, 0x32, 0x50, 0x41, 0x59, 0x2E, 0x53, 0x59, 0x53, 0x2E, 0x44, 0x44, 0x46,
            0x30, 0x31, //
            0xA5, 0x29, //
            0xBF, 0x0C, 0x26, //
            0x61, 0x11, //
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10, //
            0x50, 0x03, 0x4D, 0x43, 0x31, //
            0x87, 0x01, 0x01, //
            0x61, 0x11, //
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, //
            0x50, 0x03, 0x56, 0x49, 0x31, //
            0x87, 0x01, 0x02,
        ];
        let tree = Tlv::parse(&fci).unwrap();
        assert_eq!(tree.encode(), &fci);
        assert_eq!(tree.encoded_len(), fci.len());
    }
}
