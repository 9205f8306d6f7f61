//! cpi-bridge: serve BOSH CPI calls by running one plugin process per call.

mod version;

pub mod bridge;
pub mod context;
pub mod executor;
pub mod methods;
pub mod plugin;
pub mod service;
pub mod transport;
pub mod value;

#[cfg(test)]
mod test_support;

pub use bridge::protocol::{CpiMethod, ExecError, ExecRequest, ExecResponse, RequestId};
pub use executor::{CommandRunner, ExecutorError, PluginExecutor};
pub use plugin::{PluginResolver, ResolveError};
pub use service::{CpiRequest, CpiResponse, CpiService, DispatchError};
pub use value::{ConversionError, GenericMap, GenericValue, Kind, Struct, Value};
pub use version::{CPI_BRIDGE_VERSION, VersionInfo};
