//! Server-assigned client identity.

use crate::{ClouseauError, FrameStage, Result};
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

/// Holds the ephemeral id the server pushes on the `id` channel.
#[derive(Debug)]
pub struct ClientIdentity {
    id: watch::Sender<Option<String>>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientIdentity {
    pub fn new() -> Self {
        let (id, _) = watch::channel(None);
        Self { id }
    }

    /// Take the id from an identity frame payload. The payload must be a string.
    pub fn assign_from(&self, payload: &Value) -> Result<()> {
        let Value::String(id) = payload else {
            return Err(ClouseauError::malformed(
                FrameStage::Identity,
                format!("expected string client id, got {}", payload),
            ));
        };
        self.assign(id.clone());
        Ok(())
    }

    pub fn assign(&self, id: String) {
        let previous = self.id.send_replace(Some(id.clone()));
        match previous {
            Some(old) if old != id => {
                info!(target: "clouseau::identity", "Client id replaced: {} -> {}", old, id)
            }
            Some(_) => {}
            None => info!(target: "clouseau::identity", "New client id {}", id),
        }
    }

    /// The assigned id, if the server has sent one yet.
    pub fn get(&self) -> Option<String> {
        self.id.borrow().clone()
    }

    /// Wait until the server has assigned an id.
    pub async fn wait(&self) -> Result<String> {
        let mut rx = self.id.subscribe();
        let id = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClouseauError::Closed)?;
        Ok(id.clone().unwrap_or_default())
    }
}
