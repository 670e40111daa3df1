use crate::{Header, HeaderFlags, Value};

/// Size of one reference slot.
pub const SLOT_SIZE: usize = size_of::<Value>();

/// Bytes every heap object spends on its header and class pointer.
pub const OBJECT_HEADER_SIZE: usize = size_of::<u64>() + SLOT_SIZE;

/// Round a byte count up to the slot alignment.
#[inline(always)]
pub const fn align_to_slot(bytes: usize) -> usize {
    (bytes + SLOT_SIZE - 1) & !(SLOT_SIZE - 1)
}

/// The contract every heap-resident entity honours so that a moving collector
/// can relocate it.
///
/// The collector never interprets object contents itself: it asks the object
/// for its size, and asks it to enumerate every outgoing reference through a
/// visitor that may rewrite the reference in place.
pub trait Managed {
    fn header(&self) -> &Header;

    fn header_mut(&mut self) -> &mut Header;

    /// Class of the object.
    fn class(&self) -> Value;

    /// Self-reported size in bytes. Objects are variable-length.
    fn byte_size(&self) -> usize;

    /// Call `visitor` for every outgoing reference, including the class.
    /// The visitor may overwrite the reference (relocation).
    fn walk_references(&mut self, visitor: &mut dyn FnMut(&mut Value));

    fn mark_invalid(&mut self) {
        self.header_mut().add_flag(HeaderFlags::INVALIDATED);
    }

    fn is_marked_invalid(&self) -> bool {
        self.header().has_flag(HeaderFlags::INVALIDATED)
    }
}
