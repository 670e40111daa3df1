/// Object type tag stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Instance = 0,
    Array,
    Integer,
    Double,
    Str,
    Symbol,
    Association,
    Method,
    Primitive,
    Block,
    Frame,
    Class,
}

impl ObjectType {
    pub const COUNT: usize = Self::Class as usize + 1;

    /// Whether objects of this type can be invoked as the target of a send.
    pub const fn is_invokable(self) -> bool {
        matches!(self, Self::Method | Self::Primitive)
    }
}

/// GC / bookkeeping flags stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    pub const NONE: Self = Self(0);
    /// The object is in the remembered set of the current cycle.
    pub const REMEMBERED: Self = Self(1 << 0);
    /// The object was abandoned or superseded and must not be reused.
    pub const INVALIDATED: Self = Self(1 << 1);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline(always)]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline(always)]
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }
}

/// The header at the start of every heap object.
///
/// ```text
/// byte 0:    object_type
/// byte 1:    flags: Remembered | Invalidated
/// byte 2:    age:   number of collections survived
/// ```
#[derive(Clone, Copy)]
pub struct Header {
    object_type: ObjectType,
    flags: HeaderFlags,
    age: u8,
}

impl Header {
    pub const fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            flags: HeaderFlags::NONE,
            age: 0,
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&mut self, flag: HeaderFlags) {
        self.flags = self.flags.with(flag);
    }

    #[inline(always)]
    pub fn remove_flag(&mut self, flag: HeaderFlags) {
        self.flags = self.flags.without(flag);
    }

    // ── age ────────────────────────────────────────────────────────

    /// Bump the age, saturating. Returns the previous age.
    #[inline(always)]
    pub fn increment_age(&mut self) -> u8 {
        let prev = self.age;
        self.age = self.age.saturating_add(1);
        prev
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.object_type())
            .field("flags", &self.flags())
            .field("age", &self.age)
            .finish()
    }
}
