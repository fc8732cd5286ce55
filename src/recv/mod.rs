//! Receive path: heap assembly from decoded packets.

mod frozen;
mod heap;
mod stream;

pub use frozen::{FrozenHeap, Item, ItemValue};
pub use heap::Heap;
pub use stream::{decode_buffer, HeapSink, RingSink, Stream, DEFAULT_MAX_HEAPS};
