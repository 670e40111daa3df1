mod frame;
mod header;
mod managed;
mod objects;
mod special;
mod value;

pub use frame::{FRAME_HEADER_SIZE, Frame, FrameError};
pub use header::{Header, HeaderFlags, ObjectType};
pub use managed::{Managed, OBJECT_HEADER_SIZE, SLOT_SIZE, align_to_slot};
pub use objects::{
    Association, Block, Body, Class, Method, Object, Primitive, Symbol, selector_arity,
};
pub use special::SpecialObjects;
pub use value::{FIXNUM_MAX, FIXNUM_MIN, Value};
