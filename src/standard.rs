//! Machine data standards and alignments
//!
//! A [`NumericStandard`] describes how one machine lays out its primitive
//! numbers: byte sizes, byte orders (including arbitrary permutations for
//! floats, which some historical machines stored mid-endian), and a generic
//! bit-level float descriptor. An [`Alignment`] describes the padding rules
//! the same machine applies inside structs.
//!
//! Every open file carries two of each: the standard/alignment the file was
//! written under and the fixed host standard this crate lays host buffers
//! out in. Whether any given type needs conversion is decided by comparing
//! the two, field by field.
//!
//! ## Float Format Descriptor
//!
//! ```text
//! bits       total bits per number
//! expn_bits  bits in the exponent
//! mant_bits  bits in the mantissa
//! sign_pos   start bit of the sign
//! expn_pos   start bit of the exponent
//! mant_pos   start bit of the mantissa
//! guard_bit  1 if the high mantissa bit is explicit (CRAY), else 0
//! bias       exponent bias
//! ```
//!
//! Bit positions count from the most significant bit of the (permutation-
//! corrected) big-endian word, zero based.

use serde::{Deserialize, Serialize};

/// Byte order of an integral type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Big-endian (most significant byte first)
    Normal,
    /// Little-endian
    Reverse,
}

impl ByteOrder {
    /// Wire code used in the file header's format block.
    pub fn code(self) -> u8 {
        match self {
            ByteOrder::Normal => 1,
            ByteOrder::Reverse => 2,
        }
    }

    pub fn from_code(c: u8) -> Option<ByteOrder> {
        match c {
            1 => Some(ByteOrder::Normal),
            2 => Some(ByteOrder::Reverse),
            _ => None,
        }
    }
}

/// Storage order for multi-dimensional entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MajorOrder {
    Row,
    Column,
}

impl MajorOrder {
    /// Wire code in the extras table ("Major-Order:<n>").
    pub fn code(self) -> u32 {
        match self {
            MajorOrder::Row => 101,
            MajorOrder::Column => 102,
        }
    }

    pub fn from_code(c: u32) -> Option<MajorOrder> {
        match c {
            101 => Some(MajorOrder::Row),
            102 => Some(MajorOrder::Column),
            _ => None,
        }
    }
}

/// Generic bit-level floating point layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatFormat {
    pub bits: u32,
    pub expn_bits: u32,
    pub mant_bits: u32,
    pub sign_pos: u32,
    pub expn_pos: u32,
    pub mant_pos: u32,
    pub guard_bit: u32,
    pub bias: i64,
}

impl FloatFormat {
    pub const IEEE_FLOAT: FloatFormat = FloatFormat {
        bits: 32,
        expn_bits: 8,
        mant_bits: 23,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 9,
        guard_bit: 0,
        bias: 0x7f,
    };

    pub const IEEE_DOUBLE: FloatFormat = FloatFormat {
        bits: 64,
        expn_bits: 11,
        mant_bits: 52,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 12,
        guard_bit: 0,
        bias: 0x3ff,
    };

    /// 96-bit extended double (68k-style, explicit integer bit).
    pub const IEEE_96: FloatFormat = FloatFormat {
        bits: 96,
        expn_bits: 15,
        mant_bits: 64,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 32,
        guard_bit: 1,
        bias: 0x3ffe,
    };

    /// CRAY single/double word format, explicit high mantissa bit.
    pub const CRAY: FloatFormat = FloatFormat {
        bits: 64,
        expn_bits: 15,
        mant_bits: 48,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 16,
        guard_bit: 1,
        bias: 0x4000,
    };

    pub const VAX_FLOAT: FloatFormat = FloatFormat {
        bits: 32,
        expn_bits: 8,
        mant_bits: 23,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 9,
        guard_bit: 0,
        bias: 0x81,
    };

    pub const VAX_DOUBLE: FloatFormat = FloatFormat {
        bits: 64,
        expn_bits: 8,
        mant_bits: 55,
        sign_pos: 0,
        expn_pos: 1,
        mant_pos: 9,
        guard_bit: 0,
        bias: 0x81,
    };

    /// Bytes occupied by one number.
    pub fn byte_len(&self) -> usize {
        ((self.bits + 7) / 8) as usize
    }
}

/// How one machine represents its primitive numeric types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericStandard {
    pub ptr_bytes: usize,
    pub short_bytes: usize,
    pub short_order: ByteOrder,
    pub int_bytes: usize,
    pub int_order: ByteOrder,
    pub long_bytes: usize,
    pub long_order: ByteOrder,
    pub longlong_bytes: usize,
    pub longlong_order: ByteOrder,
    pub float_bytes: usize,
    pub float_format: FloatFormat,
    /// 1-based byte positions, most significant first; identity for
    /// big-endian, reversed for little-endian, interleaved for mid-endian.
    pub float_order: Vec<u8>,
    pub double_bytes: usize,
    pub double_format: FloatFormat,
    pub double_order: Vec<u8>,
}

fn normal_order(n: usize) -> Vec<u8> {
    (1..=n as u8).collect()
}

fn reverse_order(n: usize) -> Vec<u8> {
    (1..=n as u8).rev().collect()
}

impl NumericStandard {
    /// Big-endian 32-bit machine with IEEE 32/64 floats (68000-class).
    pub fn ieee_a() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 4,
            short_bytes: 2,
            short_order: ByteOrder::Normal,
            int_bytes: 4,
            int_order: ByteOrder::Normal,
            long_bytes: 4,
            long_order: ByteOrder::Normal,
            longlong_bytes: 8,
            longlong_order: ByteOrder::Normal,
            float_bytes: 4,
            float_format: FloatFormat::IEEE_FLOAT,
            float_order: normal_order(4),
            double_bytes: 8,
            double_format: FloatFormat::IEEE_DOUBLE,
            double_order: normal_order(8),
        }
    }

    /// Big-endian with 96-bit extended doubles.
    pub fn ieee_b() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 4,
            short_bytes: 2,
            short_order: ByteOrder::Normal,
            int_bytes: 2,
            int_order: ByteOrder::Normal,
            long_bytes: 4,
            long_order: ByteOrder::Normal,
            longlong_bytes: 4,
            longlong_order: ByteOrder::Normal,
            float_bytes: 4,
            float_format: FloatFormat::IEEE_FLOAT,
            float_order: normal_order(4),
            double_bytes: 12,
            double_format: FloatFormat::IEEE_96,
            double_order: normal_order(12),
        }
    }

    /// Little-endian 16/32-bit x86.
    pub fn intel_a() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 4,
            short_bytes: 2,
            short_order: ByteOrder::Reverse,
            int_bytes: 2,
            int_order: ByteOrder::Reverse,
            long_bytes: 4,
            long_order: ByteOrder::Reverse,
            longlong_bytes: 4,
            longlong_order: ByteOrder::Reverse,
            float_bytes: 4,
            float_format: FloatFormat::IEEE_FLOAT,
            float_order: reverse_order(4),
            double_bytes: 8,
            double_format: FloatFormat::IEEE_DOUBLE,
            double_order: reverse_order(8),
        }
    }

    /// VAX-11, mid-endian float byte permutations.
    pub fn vax() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 4,
            short_bytes: 2,
            short_order: ByteOrder::Reverse,
            int_bytes: 4,
            int_order: ByteOrder::Reverse,
            long_bytes: 4,
            long_order: ByteOrder::Reverse,
            longlong_bytes: 4,
            longlong_order: ByteOrder::Reverse,
            float_bytes: 4,
            float_format: FloatFormat::VAX_FLOAT,
            float_order: vec![2, 1, 4, 3],
            double_bytes: 8,
            double_format: FloatFormat::VAX_DOUBLE,
            double_order: vec![2, 1, 4, 3, 6, 5, 8, 7],
        }
    }

    /// CRAY: 8-byte words throughout, explicit high mantissa bit.
    pub fn cray() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 8,
            short_bytes: 8,
            short_order: ByteOrder::Normal,
            int_bytes: 8,
            int_order: ByteOrder::Normal,
            long_bytes: 8,
            long_order: ByteOrder::Normal,
            longlong_bytes: 8,
            longlong_order: ByteOrder::Normal,
            float_bytes: 8,
            float_format: FloatFormat::CRAY,
            float_order: normal_order(8),
            double_bytes: 8,
            double_format: FloatFormat::CRAY,
            double_order: normal_order(8),
        }
    }

    /// Conservative default used for unrecognized legacy profiles.
    pub fn def() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 4,
            short_bytes: 2,
            short_order: ByteOrder::Normal,
            int_bytes: 4,
            int_order: ByteOrder::Normal,
            long_bytes: 4,
            long_order: ByteOrder::Normal,
            longlong_bytes: 4,
            longlong_order: ByteOrder::Normal,
            float_bytes: 4,
            float_format: FloatFormat::IEEE_FLOAT,
            float_order: normal_order(4),
            double_bytes: 8,
            double_format: FloatFormat::IEEE_DOUBLE,
            double_order: normal_order(8),
        }
    }

    /// The fixed layout of host buffers: little-endian x86-64 shaped.
    ///
    /// Host buffers are laid out under this standard on every platform so
    /// the bytes a caller hands in (and gets back) are deterministic; the
    /// conversion engine absorbs any difference from the file standard.
    pub fn host() -> NumericStandard {
        NumericStandard {
            ptr_bytes: 8,
            short_bytes: 2,
            short_order: ByteOrder::Reverse,
            int_bytes: 4,
            int_order: ByteOrder::Reverse,
            long_bytes: 8,
            long_order: ByteOrder::Reverse,
            longlong_bytes: 8,
            longlong_order: ByteOrder::Reverse,
            float_bytes: 4,
            float_format: FloatFormat::IEEE_FLOAT,
            float_order: reverse_order(4),
            double_bytes: 8,
            double_format: FloatFormat::IEEE_DOUBLE,
            double_order: reverse_order(8),
        }
    }
}

/// Struct padding rules of one machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    pub char_align: usize,
    pub ptr_align: usize,
    pub short_align: usize,
    pub int_align: usize,
    pub long_align: usize,
    pub longlong_align: usize,
    pub float_align: usize,
    pub double_align: usize,
    pub struct_align: usize,
}

impl Alignment {
    pub const RS6000: Alignment = Alignment {
        char_align: 1,
        ptr_align: 4,
        short_align: 2,
        int_align: 4,
        long_align: 4,
        longlong_align: 4,
        float_align: 8,
        double_align: 4,
        struct_align: 0,
    };

    pub const SPARC: Alignment = Alignment {
        char_align: 1,
        ptr_align: 4,
        short_align: 2,
        int_align: 4,
        long_align: 4,
        longlong_align: 4,
        float_align: 4,
        double_align: 8,
        struct_align: 0,
    };

    pub const MIPS: Alignment = Alignment {
        char_align: 1,
        ptr_align: 4,
        short_align: 2,
        int_align: 4,
        long_align: 4,
        longlong_align: 4,
        float_align: 4,
        double_align: 8,
        struct_align: 0,
    };

    pub const M68000: Alignment = Alignment {
        char_align: 1,
        ptr_align: 2,
        short_align: 2,
        int_align: 2,
        long_align: 2,
        longlong_align: 2,
        float_align: 2,
        double_align: 2,
        struct_align: 0,
    };

    pub const INTELA: Alignment = Alignment {
        char_align: 1,
        ptr_align: 2,
        short_align: 2,
        int_align: 2,
        long_align: 2,
        longlong_align: 2,
        float_align: 2,
        double_align: 2,
        struct_align: 0,
    };

    pub const UNICOS: Alignment = Alignment {
        char_align: 4,
        ptr_align: 8,
        short_align: 8,
        int_align: 8,
        long_align: 8,
        longlong_align: 8,
        float_align: 8,
        double_align: 8,
        struct_align: 8,
    };

    pub const DEF: Alignment = Alignment {
        char_align: 1,
        ptr_align: 4,
        short_align: 4,
        int_align: 4,
        long_align: 4,
        longlong_align: 4,
        float_align: 4,
        double_align: 4,
        struct_align: 0,
    };

    /// Alignment of host buffers (x86-64).
    pub const HOST: Alignment = Alignment {
        char_align: 1,
        ptr_align: 8,
        short_align: 2,
        int_align: 4,
        long_align: 8,
        longlong_align: 8,
        float_align: 4,
        double_align: 8,
        struct_align: 0,
    };
}

/// Historical machine profiles named by the legacy header variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineProfile {
    Ieee3264,
    Intel86,
    Cray64,
    Vax11,
    Ieee3296,
}

impl MachineProfile {
    pub fn from_code(c: i64) -> Option<MachineProfile> {
        match c {
            1 => Some(MachineProfile::Ieee3264),
            2 => Some(MachineProfile::Intel86),
            3 => Some(MachineProfile::Cray64),
            4 => Some(MachineProfile::Vax11),
            5 => Some(MachineProfile::Ieee3296),
            _ => None,
        }
    }

    /// The standard and alignment this profile historically implied.
    pub fn standard(self) -> (NumericStandard, Alignment) {
        match self {
            MachineProfile::Ieee3264 => (NumericStandard::ieee_a(), Alignment::M68000),
            MachineProfile::Ieee3296 => (NumericStandard::ieee_b(), Alignment::M68000),
            MachineProfile::Intel86 => (NumericStandard::intel_a(), Alignment::INTELA),
            MachineProfile::Cray64 => (NumericStandard::cray(), Alignment::UNICOS),
            MachineProfile::Vax11 => (NumericStandard::vax(), Alignment::DEF),
        }
    }
}

/// True when two standard/alignment pairs are identical in every field,
/// including each slot of the float byte permutations. Anything less than
/// exact equality means conversion is required somewhere.
pub fn standards_match(
    a: &NumericStandard,
    b: &NumericStandard,
    aa: &Alignment,
    ba: &Alignment,
) -> bool {
    a == b && aa == ba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_standards_match() {
        assert!(standards_match(
            &NumericStandard::host(),
            &NumericStandard::host(),
            &Alignment::HOST,
            &Alignment::HOST,
        ));
    }

    #[test]
    fn byte_permutation_differences_break_equality() {
        let a = NumericStandard::ieee_a();
        let mut b = NumericStandard::ieee_a();
        b.double_order.swap(0, 1);
        assert!(!standards_match(&a, &b, &Alignment::SPARC, &Alignment::SPARC));
    }

    #[test]
    fn alignment_differences_break_equality() {
        let s = NumericStandard::cray();
        assert!(!standards_match(&s, &s.clone(), &Alignment::UNICOS, &Alignment::DEF));
    }

    #[test]
    fn legacy_profiles_map_to_fixed_standards() {
        let (std, align) = MachineProfile::from_code(3).unwrap().standard();
        assert_eq!(std.ptr_bytes, 8);
        assert_eq!(std.float_format.guard_bit, 1);
        assert_eq!(align.char_align, 4);
    }

    #[test]
    fn host_standard_is_little_endian() {
        let h = NumericStandard::host();
        assert_eq!(h.int_order, ByteOrder::Reverse);
        assert_eq!(h.float_order, vec![4, 3, 2, 1]);
        assert_eq!(h.double_format, FloatFormat::IEEE_DOUBLE);
    }
}
