//! SPEAD endpoint core.
//!
//! SPEAD (Streaming Protocol for Exchange of Astronomical Data) moves
//! self-describing data blobs — *heaps* — over UDP-style datagrams at
//! telescope-backend rates. This crate is the transport-agnostic core
//! of an endpoint: it turns datagrams back into heaps and heaps into
//! datagrams, and nothing else.
//!
//! # Receive
//!
//! Bytes go through the packet codec into a [`recv::Stream`], which
//! assembles them into heaps — tolerating reordering, duplication, and
//! loss — and delivers each finished (or aged-out) heap exactly once
//! as a [`recv::FrozenHeap`] through a [`recv::HeapSink`], typically
//! onto a [`ring::Ringbuffer`] for a consumer thread:
//!
//! ```
//! use spead::recv::{decode_buffer, FrozenHeap, Stream};
//!
//! let mut heaps = Vec::new();
//! let mut stream = Stream::new(|heap: FrozenHeap| heaps.push(heap));
//! let wire: &[u8] = &[];  // packets from a transport
//! decode_buffer(&mut stream, wire);
//! ```
//!
//! # Send
//!
//! A [`send::SendHeap`] collects items and descriptors; its
//! [`packets`](send::SendHeap::packets) iterator yields byte-exact
//! wire packets for a transport to ship.
//!
//! Transports, executors, and the value-adaptation layer live outside
//! this crate: the core consumes byte buffers and produces structured
//! packets, nothing more.

pub mod defs;
pub mod descriptor;
pub mod error;
pub mod flavour;
pub mod packet;
pub mod pool;
pub mod recv;
pub mod ring;
pub mod send;

pub use defs::BugCompat;
pub use descriptor::Descriptor;
pub use error::{Error, ErrorKind, Result};
pub use flavour::{Flavour, ItemPointer};
pub use packet::PacketHeader;
pub use pool::MemoryPool;
