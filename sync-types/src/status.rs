//! Module status bits reported in `SetStatus` messages.

/// Module status flags (1 byte).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StatusBits(pub u8);

impl StatusBits {
    /// No bits set.
    pub const NONE: StatusBits = StatusBits(0);

    /// Settings values arrived with a contract id the module does not have.
    pub const CONTRACT_MISMATCH_SETTINGS: u8 = 0b0000_0001;
    /// Input values arrived with a contract id the module does not have.
    pub const CONTRACT_MISMATCH_INPUTS: u8 = 0b0000_0010;
    /// Module has not yet received a full set of settings.
    pub const MISSING_SETTINGS: u8 = 0b0000_0100;
    /// Module has not yet received a full set of inputs.
    pub const MISSING_INPUTS: u8 = 0b0000_1000;
    /// Settings were changed locally on the module.
    pub const MODIFIED_SETTINGS: u8 = 0b0001_0000;
    /// Module has no recent time sync.
    pub const MISSING_TIME: u8 = 0b0010_0000;

    /// Wrap raw bits.
    #[inline]
    pub fn new(bits: u8) -> Self {
        StatusBits(bits)
    }

    /// Raw byte.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit in `mask` is set.
    #[inline]
    pub fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Whether any bit in `mask` is set.
    #[inline]
    pub fn intersects(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    /// Set or clear the bits in `mask`.
    #[inline]
    pub fn set(&mut self, mask: u8, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    /// Whether the contract mismatch settings bit is set.
    #[inline]
    pub fn is_contract_mismatch_settings(self) -> bool {
        self.intersects(Self::CONTRACT_MISMATCH_SETTINGS)
    }

    /// Whether the contract mismatch inputs bit is set.
    #[inline]
    pub fn is_contract_mismatch_inputs(self) -> bool {
        self.intersects(Self::CONTRACT_MISMATCH_INPUTS)
    }

    /// Whether the missing settings bit is set.
    #[inline]
    pub fn is_missing_settings(self) -> bool {
        self.intersects(Self::MISSING_SETTINGS)
    }

    /// Whether the missing inputs bit is set.
    #[inline]
    pub fn is_missing_inputs(self) -> bool {
        self.intersects(Self::MISSING_INPUTS)
    }

    /// Whether the modified settings bit is set.
    #[inline]
    pub fn is_modified_settings(self) -> bool {
        self.intersects(Self::MODIFIED_SETTINGS)
    }

    /// Whether the missing time bit is set.
    #[inline]
    pub fn is_missing_time(self) -> bool {
        self.intersects(Self::MISSING_TIME)
    }
}

impl From<u8> for StatusBits {
    fn from(bits: u8) -> Self {
        StatusBits(bits)
    }
}
