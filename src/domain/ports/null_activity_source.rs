//! Null [`ActivityStatusSource`] implementation.
//!
//! The upstream controller REST client is out of scope for this crate (spec
//! §1) — a host application wires in its own [`ActivityStatusSource`]
//! against whatever cloud controller it targets. This no-op stands in where
//! the type system requires one (the binary entry point, tests) without
//! pretending to poll anything real.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::models::ActivityResult;

use super::ActivityStatusSource;

#[derive(Debug, Clone, Default)]
pub struct NullActivityStatusSource;

impl NullActivityStatusSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActivityStatusSource for NullActivityStatusSource {
    async fn poll(&self, _activity_ids: &[String]) -> HashMap<String, ActivityResult> {
        HashMap::new()
    }
}
