//! Database handle and per-workspace connection resolution.
//!
//! Workspace-scoped collections (prompts, brands, batches, answer records —
//! each carrying its own embedded sentiment analysis, listener rules) live
//! in a database named `workspace_<id>`; shared collections (billing
//! profiles, job history)
//! live in a single `airank_shared` database. Workspace connections are
//! opened for the duration of a single job handler invocation rather than
//! held on [`crate::app::Application`] indefinitely.

pub mod collections;

use mongodb::{options::ClientOptions, Client, Database as MongoDatabase};

use crate::error::{CoreError, CoreResult};

const SHARED_DB_NAME: &str = "airank_shared";

/// Thin wrapper around a [`mongodb::Client`] that resolves per-workspace and
/// shared database handles.
#[derive(Clone)]
pub struct Database {
    client: Client,
}

impl Database {
    pub async fn connect(connection_string: &str) -> CoreResult<Self> {
        let options = ClientOptions::parse(connection_string)
            .await
            .map_err(CoreError::from)?;
        let client = Client::with_options(options).map_err(CoreError::from)?;
        Ok(Self { client })
    }

    /// Handle to the database holding this workspace's domain documents.
    pub fn for_workspace(&self, workspace_id: &bson::oid::ObjectId) -> MongoDatabase {
        self.client.database(&format!("workspace_{workspace_id}"))
    }

    /// Handle to the database holding cross-workspace documents (billing
    /// profiles, job history).
    pub fn shared(&self) -> MongoDatabase {
        self.client.database(SHARED_DB_NAME)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}
