//! Background sync agent: a versioned asset cache that intercepts page
//! requests and runs on its own task.

mod assets;
mod protocol;
mod registry;
mod worker;

pub use assets::{url_hash, AssetCaches, SqliteAssetCaches, ASSET_STORE_NAME};
pub use protocol::{ControlMessage, Intercepted};
pub use registry::AgentRegistry;
pub use worker::{AgentHandle, AgentState, InterceptPolicy, SyncAgent};
