/// Accelerator generation, the only hardware query that operation lowering and kernel selection depend on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SocGeneration {
    /// Older generation: no bf16 arithmetic, no fused swiglu or fused matmul bias.
    Gen1,
    /// Newer generation.
    Gen2,
}

impl SocGeneration {
    pub const ALL: [SocGeneration; 2] = [SocGeneration::Gen1, SocGeneration::Gen2];

    pub fn is_gen2(self) -> bool {
        self == SocGeneration::Gen2
    }

    pub fn supports_bf16(self) -> bool {
        self.is_gen2()
    }

    pub fn default_core_count(self) -> u32 {
        match self {
            SocGeneration::Gen1 => 8,
            SocGeneration::Gen2 => 20,
        }
    }
}
