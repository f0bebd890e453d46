// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document session → owning user lookup.
//!
//! Sessions are created by the document flow, which lives outside this
//! service. The payment flow only needs the owner to attribute audit events.
//! Nothing registers sessions in the standalone server, so owners resolve to
//! `None` there unless the embedding code supplies its own directory.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait SessionDirectory: Send + Sync {
    fn owner_of(&self, session_id: &str) -> Option<String>;
}

/// Process-local directory.
#[derive(Default)]
pub struct InMemorySessionDirectory {
    owners: RwLock<HashMap<String, String>>,
}

impl InMemorySessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: impl Into<String>, owner: impl Into<String>) {
        let mut owners = self
            .owners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        owners.insert(session_id.into(), owner.into());
    }
}

impl SessionDirectory for InMemorySessionDirectory {
    fn owner_of(&self, session_id: &str) -> Option<String> {
        self.owners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }
}
