//! Target environment configuration.
//!
//! A compiler instance is bound to one (client version, SPIR-V version) pair
//! for its lifetime. This replaces a compile-time version matrix with a
//! runtime configuration struct.

use serde::Serialize;
use std::fmt;

/// Client API the module is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ClientVersion {
    Vulkan1_0,
    Vulkan1_1,
    Vulkan1_2,
    Vulkan1_3,
}

impl ClientVersion {
    /// Highest SPIR-V version the client is required to accept.
    pub fn max_spirv(self) -> SpirvVersion {
        match self {
            ClientVersion::Vulkan1_0 => SpirvVersion::V1_0,
            ClientVersion::Vulkan1_1 => SpirvVersion::V1_3,
            ClientVersion::Vulkan1_2 => SpirvVersion::V1_5,
            ClientVersion::Vulkan1_3 => SpirvVersion::V1_6,
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientVersion::Vulkan1_0 => "Vulkan 1.0",
            ClientVersion::Vulkan1_1 => "Vulkan 1.1",
            ClientVersion::Vulkan1_2 => "Vulkan 1.2",
            ClientVersion::Vulkan1_3 => "Vulkan 1.3",
        };
        write!(f, "{}", s)
    }
}

/// Version of the emitted binary module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SpirvVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
}

impl SpirvVersion {
    /// The version word for the module header: `(major << 16) | (minor << 8)`.
    pub fn word(self) -> u32 {
        let (major, minor) = self.major_minor();
        (major << 16) | (minor << 8)
    }

    pub fn major_minor(self) -> (u32, u32) {
        match self {
            SpirvVersion::V1_0 => (1, 0),
            SpirvVersion::V1_1 => (1, 1),
            SpirvVersion::V1_2 => (1, 2),
            SpirvVersion::V1_3 => (1, 3),
            SpirvVersion::V1_4 => (1, 4),
            SpirvVersion::V1_5 => (1, 5),
            SpirvVersion::V1_6 => (1, 6),
        }
    }
}

impl fmt::Display for SpirvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.major_minor();
        write!(f, "SPIR-V {}.{}", major, minor)
    }
}

/// The (client, target format) pair a compiler instance is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetEnv {
    pub client: ClientVersion,
    pub spirv: SpirvVersion,
}

impl TargetEnv {
    pub fn new(client: ClientVersion, spirv: SpirvVersion) -> Self {
        Self { client, spirv }
    }

    /// Whether the configured SPIR-V version is acceptable for the client.
    pub fn is_consistent(self) -> bool {
        self.spirv <= self.client.max_spirv()
    }
}

impl Default for TargetEnv {
    fn default() -> Self {
        Self {
            client: ClientVersion::Vulkan1_0,
            spirv: SpirvVersion::V1_0,
        }
    }
}

impl fmt::Display for TargetEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.client, self.spirv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_words() {
        assert_eq!(SpirvVersion::V1_0.word(), 0x0001_0000);
        assert_eq!(SpirvVersion::V1_3.word(), 0x0001_0300);
        assert_eq!(SpirvVersion::V1_6.word(), 0x0001_0600);
    }

    #[test]
    fn test_consistency() {
        assert!(TargetEnv::default().is_consistent());
        assert!(TargetEnv::new(ClientVersion::Vulkan1_1, SpirvVersion::V1_3).is_consistent());
        assert!(!TargetEnv::new(ClientVersion::Vulkan1_0, SpirvVersion::V1_4).is_consistent());
        assert!(TargetEnv::new(ClientVersion::Vulkan1_3, SpirvVersion::V1_6).is_consistent());
    }
}
