//! The Activity Tracker's upstream-facing side (spec §4.3): querying
//! terminal state for pending activity ids. The actual upstream REST client
//! is out of scope — this port is the narrow seam the tracker polls through.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::models::ActivityResult;

#[async_trait]
pub trait ActivityStatusSource: Send + Sync {
    /// Queries terminal state for a batch of pending activity ids in as few
    /// round trips as the upstream allows. Ids with no entry in the
    /// returned map are still pending.
    async fn poll(&self, activity_ids: &[String]) -> HashMap<String, ActivityResult>;
}
