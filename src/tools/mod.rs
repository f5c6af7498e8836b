//! Tool metadata: records, static descriptors and the install catalog.
//!
//! Records are the persisted per-(cluster, tool) state, descriptors say which
//! workload and service back a tool, and the catalog holds installable
//! (name, version) details.

pub mod catalog;
pub mod descriptor;
pub mod record;

pub use catalog::{InMemoryToolCatalog, ToolDetail, ToolDetailCatalog};
pub use descriptor::{ToolDescriptor, ToolDescriptorTable, WorkloadKind};
pub use record::{StoredToolRecord, ToolRecord, ToolRequest, ToolStatus, ToolVars};
