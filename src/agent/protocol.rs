//! Messages between pages and the sync agent.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::cache::CacheSource;
use crate::error::Result;
use crate::origin::FetchResponse;

/// Control messages, in the JSON shape `{"action": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
  /// Page → agent: delete every cache
  ClearCaches,
  /// Agent → page: reply to `ClearCaches`
  CachesCleared,
  /// Page → agent: fetch and store these files (fire-and-forget)
  CacheAudioFiles { files: Vec<String> },
  /// Agent → pages: an audio caching batch finished
  CacheAudioFilesComplete,
}

/// A response produced by the interception policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intercepted {
  pub response: FetchResponse,
  pub source: CacheSource,
}

/// Requests carried over the agent's mailbox.
pub(crate) enum AgentRequest {
  Install(oneshot::Sender<Result<()>>),
  Activate(oneshot::Sender<Result<Vec<String>>>),
  Fetch {
    url: String,
    reply: oneshot::Sender<Result<Intercepted>>,
  },
  Message {
    message: ControlMessage,
    reply: Option<oneshot::Sender<ControlMessage>>,
  },
  Retire,
}
