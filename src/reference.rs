use std::fmt;

/// An indirect object reference: `(object number, generation)`.
///
/// `num` is `i64` rather than `u32` so that the detached placeholder
/// `(-1, 0)` — used by the field layer for widgets discovered via
/// whole-file scanning without a resolvable xref entry — is representable.
/// The core never manufactures that sentinel itself; it only needs to
/// treat it like any other reference that happens to be absent from the
/// index (a `MissingObject` error, not a panic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub num: i64,
    pub generation: u16,
}

impl ObjRef {
    pub const fn new(num: i64, generation: u16) -> Self {
        ObjRef { num, generation }
    }

    /// The reserved "detached" placeholder for unresolvable field refs.
    pub const DETACHED: ObjRef = ObjRef::new(-1, 0);

    pub fn is_detached(&self) -> bool {
        self.num < 0
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// Where an object's body lives: directly in the file, packed inside
/// an object stream, or freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// A byte offset at which `num gen obj … endobj` appears.
    InFile { offset: u64 },

    /// Packed inside an object stream: container reference plus index.
    InObjStm { container: ObjRef, index: u32 },

    /// An explicit free entry; ignored at lookup time.
    Free,
}
