//! Strongly-typed identifiers.
//!
//! Names are validated at construction time (including deserialization) and
//! implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::Error;

/// Macro to define a strongly-typed name newtype wrapper.
///
/// Generates: struct, `parse()`, `as_str()`, Display, TryFrom<String>, and
/// Serialize/Deserialize that reject empty strings.
macro_rules! define_name {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: impl Into<String>) -> Result<Self, Error> {
                let s = s.into();
                if s.trim().is_empty() {
                    return Err(Error::validation(concat!(
                        stringify!($name),
                        " cannot be empty"
                    )));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> String {
                name.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_name!(ClusterName);
define_name!(ToolName);

/// Identifier of one background lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
