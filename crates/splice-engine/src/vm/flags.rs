//! Member access flags

use std::ops::{BitAnd, BitOr, Not};

/// Access flags of a method or field, bit-compatible with the class-file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u32);

impl AccessFlags {
    /// No flags
    pub const NONE: Self = Self(0x0000);
    /// Visible everywhere
    pub const PUBLIC: Self = Self(0x0001);
    /// Visible only inside the declaring class
    pub const PRIVATE: Self = Self(0x0002);
    /// Visible to subclasses and the package
    pub const PROTECTED: Self = Self(0x0004);
    /// Class-level member
    pub const STATIC: Self = Self(0x0008);
    /// Cannot be reassigned or overridden
    pub const FINAL: Self = Self(0x0010);

    /// Raw bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether every bit of `other` is set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Promote to unrestricted access: drop PRIVATE and PROTECTED, set PUBLIC
    pub fn promoted(self) -> Self {
        (self & !(Self::PRIVATE | Self::PROTECTED)) | Self::PUBLIC
    }
}

impl BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for AccessFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for AccessFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}
