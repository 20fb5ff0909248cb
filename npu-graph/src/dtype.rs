use half::{bf16, f16};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    I8,
    I32,
    I64,
    U8,
    Bool,
}

/// Physical memory layout of a tensor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    /// Plain row-major layout.
    Nd,
    /// Column-panel layout: the last axis is split into panels of [NZ_BLOCK] elements,
    /// each panel stored contiguously for all rows.
    Nz,
}

pub const NZ_BLOCK: usize = 16;

impl DType {
    pub const ALL: [DType; 8] = [
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::I8,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::Bool,
    ];

    pub fn size_bytes(self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::I64 => 8,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::Bool => "bool",
        }
    }

    /// Stable numeric code, used to pass dtypes through kernel tiling data.
    pub fn code(self) -> u32 {
        match self {
            DType::F16 => 0,
            DType::BF16 => 1,
            DType::F32 => 2,
            DType::I8 => 3,
            DType::I32 => 4,
            DType::I64 => 5,
            DType::U8 => 6,
            DType::Bool => 7,
        }
    }

    pub fn from_code(code: u32) -> Option<DType> {
        DType::ALL.into_iter().find(|d| d.code() == code)
    }

    /// Decode element `index` of the little-endian buffer `bytes` as `f32`.
    ///
    /// Panics if `index` is out of bounds, like slice indexing.
    pub fn read_f32(self, bytes: &[u8], index: usize) -> f32 {
        let size = self.size_bytes();
        let b = &bytes[index * size..(index + 1) * size];

        match self {
            DType::F16 => f16::from_le_bytes([b[0], b[1]]).to_f32(),
            DType::BF16 => bf16::from_le_bytes([b[0], b[1]]).to_f32(),
            DType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            DType::I8 => b[0] as i8 as f32,
            DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            DType::I64 => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32,
            DType::U8 => b[0] as f32,
            DType::Bool => (b[0] != 0) as u8 as f32,
        }
    }

    /// Encode `value` into element `index` of the little-endian buffer `bytes`,
    /// rounding and saturating for non-float types.
    pub fn write_f32(self, bytes: &mut [u8], index: usize, value: f32) {
        let size = self.size_bytes();
        let b = &mut bytes[index * size..(index + 1) * size];

        match self {
            DType::F16 => b.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
            DType::BF16 => b.copy_from_slice(&bf16::from_f32(value).to_le_bytes()),
            DType::F32 => b.copy_from_slice(&value.to_le_bytes()),
            DType::I8 => b[0] = value.round() as i8 as u8,
            DType::I32 => b.copy_from_slice(&(value.round() as i32).to_le_bytes()),
            DType::I64 => b.copy_from_slice(&(value.round() as i64).to_le_bytes()),
            DType::U8 => b[0] = value.round() as u8,
            DType::Bool => b[0] = (value != 0.0) as u8,
        }
    }

    /// Encode the integer `value` into element `index`, wrapping for narrow integer types.
    pub fn write_i64(self, bytes: &mut [u8], index: usize, value: i64) {
        if self.is_float() {
            return self.write_f32(bytes, index, value as f32);
        }

        let size = self.size_bytes();
        let b = &mut bytes[index * size..(index + 1) * size];

        match self {
            DType::I32 => b.copy_from_slice(&(value as i32).to_le_bytes()),
            DType::I64 => b.copy_from_slice(&value.to_le_bytes()),
            DType::I8 | DType::U8 => b[0] = value as u8,
            DType::Bool => b[0] = (value != 0) as u8,
            DType::F16 | DType::BF16 | DType::F32 => unreachable!(),
        }
    }

    /// Integer view of element `index`, exact for the integer types.
    pub fn read_i64(self, bytes: &[u8], index: usize) -> i64 {
        let size = self.size_bytes();
        let b = &bytes[index * size..(index + 1) * size];

        match self {
            DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
            DType::I64 => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            DType::I8 => b[0] as i8 as i64,
            DType::U8 | DType::Bool => b[0] as i64,
            DType::F16 | DType::BF16 | DType::F32 => self.read_f32(bytes, index) as i64,
        }
    }
}
