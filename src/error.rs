//! Stack definition error types.

use thiserror::Error;

/// Errors that make a stack impossible to render.
///
/// Everything else (missing images, capacity, zone mismatches) is reported by
/// the provisioning engine at deploy time and never surfaces here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("duplicate construct id: {0}")]
    DuplicateId(String),

    #[error("config set '{set}' references undefined init config '{config}'")]
    UnknownInitConfig { set: String, config: String },

    #[error("init options select undefined config set '{0}'")]
    UnknownConfigSet(String),

    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("address space {cidr} cannot hold {count} subnets of /{prefix}")]
    AddressSpaceExhausted { cidr: String, count: usize, prefix: u8 },

    #[error("invalid port range: {from}-{to}")]
    InvalidPortRange { from: u16, to: u16 },

    #[error("no {0} subnets declared in network")]
    NoSubnets(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

pub type StackResult<T> = Result<T, StackError>;
