/// The kernel's unified error taxonomy.
///
/// Every subsystem (address space, registers, CPU integration, board
/// composition) funnels into this one enum so that a debug session can
/// uniformly turn any failure into either a `fault` stop reason or a
/// protocol error response, per the variant.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] vhsim_target::ConfigError),

    #[error("memory access error at {address:#010x}: {detail}")]
    MemoryAccess { address: u32, detail: String },

    #[error("memory alignment error: address {address:#010x} is not aligned to {size} bytes")]
    MemoryAlignment { address: u32, size: u8 },

    #[error("memory bounds error: {detail}")]
    MemoryBounds { detail: String },

    #[error("memory permission error: write to read-only region at {address:#010x}")]
    MemoryPermission { address: u32 },

    #[error("programming error: {0}")]
    Programming(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn access(address: u32, detail: impl Into<String>) -> Self {
        Error::MemoryAccess {
            address,
            detail: detail.into(),
        }
    }

    pub fn bounds(detail: impl Into<String>) -> Self {
        Error::MemoryBounds {
            detail: detail.into(),
        }
    }

    /// Whether this error represents a fault encountered while executing
    /// target code (as opposed to a configuration or protocol problem),
    /// i.e. whether it should surface to a debugger as a `fault` stop.
    pub fn is_target_fault(&self) -> bool {
        matches!(
            self,
            Error::MemoryAccess { .. }
                | Error::MemoryAlignment { .. }
                | Error::MemoryBounds { .. }
                | Error::MemoryPermission { .. }
                | Error::Runtime(_)
        )
    }
}
