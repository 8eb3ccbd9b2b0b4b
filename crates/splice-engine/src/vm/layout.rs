//! Method-metadata record layouts
//!
//! Each managed method is backed by a fixed-size record inside the VM. The byte
//! layout of that record differs per VM flavor and API level, so the engine only
//! operates on layouts it has been validated against. [`LAYOUTS`] is that
//! allow-list; [`layout_for`] returning `None` means "do not touch this VM".
//!
//! ```text
//! ART 7.x (API 24-25)
//! ┌──────────┬──────────┬──────────┬──────────┬──────┬──────┐
//! │ decl cls │ access   │ code item│ dex idx  │ midx │ hot  │  0..20
//! ├──────────┴──────────┴──────────┴──────────┴──────┴──────┤
//! │ resolved methods (8)     │ resolved types (8)           │ 20..36
//! ├──────────────────────────┼──────────────────────────────┤
//! │ jni entry (8)            │ quick compiled entry (8)     │ 36..52
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! All multi-byte slots are little-endian.

/// Flavor of the managed runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFlavor {
    /// Register-based interpreter/JIT VM (major version 1)
    Dalvik,
    /// Ahead-of-time compiling runtime (major version 2 and later)
    Art,
    /// Version string could not be classified
    Unknown,
}

impl RuntimeFlavor {
    /// Classify a VM version string by its major component
    pub fn from_vm_version(version: &str) -> Self {
        let major = version
            .trim()
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok());
        match major {
            Some(1) => RuntimeFlavor::Dalvik,
            Some(m) if m >= 2 => RuntimeFlavor::Art,
            _ => RuntimeFlavor::Unknown,
        }
    }
}

/// A byte range inside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset from the start of the record
    pub offset: usize,
    /// Width in bytes: 2, 4 or 8
    pub width: usize,
}

impl Slot {
    pub const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Check whether two slots share any byte
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Byte layout of one validated method-record format
#[derive(Debug, PartialEq, Eq)]
pub struct RecordLayout {
    /// Human-readable layout name
    pub name: &'static str,
    /// VM flavor this layout belongs to
    pub flavor: RuntimeFlavor,
    /// Lowest API level (inclusive)
    pub min_api: u32,
    /// Highest API level (inclusive)
    pub max_api: u32,
    /// Record size in bytes
    pub size: usize,
    /// Pointer to the declaring class
    pub declaring_class: Slot,
    /// Access flags word
    pub access_flags: Slot,
    /// Vtable / method index
    pub method_index: Slot,
    /// Entry used when the method is interpreted
    pub interpreter_entry: Slot,
    /// Entry used when the method runs compiled code
    pub compiled_entry: Slot,
}

/// Validated record layouts
pub static LAYOUTS: &[RecordLayout] = &[
    RecordLayout {
        name: "dalvik-4.x",
        flavor: RuntimeFlavor::Dalvik,
        min_api: 14,
        max_api: 19,
        size: 56,
        declaring_class: Slot::new(0, 4),
        access_flags: Slot::new(4, 4),
        method_index: Slot::new(8, 2),
        interpreter_entry: Slot::new(32, 4),
        compiled_entry: Slot::new(40, 4),
    },
    RecordLayout {
        name: "art-5.0",
        flavor: RuntimeFlavor::Art,
        min_api: 21,
        max_api: 21,
        size: 80,
        declaring_class: Slot::new(8, 4),
        access_flags: Slot::new(64, 4),
        method_index: Slot::new(76, 4),
        interpreter_entry: Slot::new(24, 8),
        compiled_entry: Slot::new(48, 8),
    },
    RecordLayout {
        name: "art-5.1",
        flavor: RuntimeFlavor::Art,
        min_api: 22,
        max_api: 22,
        size: 60,
        declaring_class: Slot::new(8, 4),
        access_flags: Slot::new(20, 4),
        method_index: Slot::new(32, 4),
        interpreter_entry: Slot::new(36, 8),
        compiled_entry: Slot::new(52, 8),
    },
    RecordLayout {
        name: "art-6.0",
        flavor: RuntimeFlavor::Art,
        min_api: 23,
        max_api: 23,
        size: 52,
        declaring_class: Slot::new(0, 4),
        access_flags: Slot::new(12, 4),
        method_index: Slot::new(24, 4),
        interpreter_entry: Slot::new(28, 8),
        compiled_entry: Slot::new(44, 8),
    },
    RecordLayout {
        name: "art-7.x",
        flavor: RuntimeFlavor::Art,
        min_api: 24,
        max_api: 25,
        size: 52,
        declaring_class: Slot::new(0, 4),
        access_flags: Slot::new(4, 4),
        method_index: Slot::new(16, 2),
        // 7.x interprets straight from the code item
        interpreter_entry: Slot::new(8, 4),
        compiled_entry: Slot::new(44, 8),
    },
];

/// Look up the validated layout for a flavor and API level
pub fn layout_for(flavor: RuntimeFlavor, api_level: u32) -> Option<&'static RecordLayout> {
    LAYOUTS
        .iter()
        .find(|l| l.flavor == flavor && (l.min_api..=l.max_api).contains(&api_level))
}

impl RecordLayout {
    /// All named slots
    pub fn slots(&self) -> [Slot; 5] {
        [
            self.declaring_class,
            self.access_flags,
            self.method_index,
            self.interpreter_entry,
            self.compiled_entry,
        ]
    }

    /// A zeroed record
    pub fn blank(&self) -> Vec<u8> {
        vec![0u8; self.size]
    }

    /// Read a slot as an unsigned little-endian integer
    ///
    /// Panics if the slot lies outside `record`; callers check the record size
    /// against [`RecordLayout::size`] first.
    pub fn read(&self, record: &[u8], slot: Slot) -> u64 {
        let mut buf = [0u8; 8];
        buf[..slot.width].copy_from_slice(&record[slot.offset..slot.end()]);
        u64::from_le_bytes(buf)
    }

    /// Write a slot as an unsigned little-endian integer, truncating to its width
    pub fn write(&self, record: &mut [u8], slot: Slot, value: u64) {
        let bytes = value.to_le_bytes();
        record[slot.offset..slot.end()].copy_from_slice(&bytes[..slot.width]);
    }

    /// Largest value the slot can hold
    pub fn max_value(slot: Slot) -> u64 {
        if slot.width >= 8 {
            u64::MAX
        } else {
            (1u64 << (slot.width * 8)) - 1
        }
    }
}
