//! Bulk upload of Redis commands from a text stream
//!
//! Every non-blank line is one command, tokenized with shell quoting rules.
//! Invalid UTF-8 is decoded lossily.
//!
//! ```text
//! SET foo bar
//! HSET "user:1" name "John Doe"
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use redscope_connection::RedisClientProvider;
use redscope_core::{ClientMetadata, ConnectionType, RedscopeError, Result};
use redscope_driver_redis::{RedisClient, RedisCommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;

use crate::{
    BulkActionOverview, BulkActionStatus, BulkActionSummary, BulkActionType, BulkActionsConfig,
};

const DATA_FILE_NOT_FOUND: &str = "Data file was not found";

/// Id reported by upload overviews, which are never registered
const UPLOAD_ACTION_ID: &str = "empty";

pub struct BulkImportService {
    clients: Arc<RedisClientProvider>,
    config: BulkActionsConfig,
}

impl BulkImportService {
    pub fn new(clients: Arc<RedisClientProvider>, config: BulkActionsConfig) -> Self {
        Self { clients, config }
    }

    /// Execute every command read from `reader` against the database of
    /// `metadata`, on a dedicated connection closed afterwards
    #[tracing::instrument(skip_all, fields(database_id = %metadata.database_id))]
    pub async fn import<R>(
        &self,
        metadata: &ClientMetadata,
        reader: R,
    ) -> Result<BulkActionOverview>
    where
        R: AsyncRead + Unpin + Send,
    {
        let started = Instant::now();
        let client = self.clients.create_client(metadata).await?;

        let result = self.import_with(client.as_ref(), reader).await;
        if let Err(err) = client.disconnect().await {
            tracing::warn!(client_id = %client.id(), error = %err, "unable to close upload connection");
        }
        let summary = result?;

        let overview = BulkActionOverview {
            id: UPLOAD_ACTION_ID.to_string(),
            database_id: metadata.database_id.clone(),
            action_type: BulkActionType::Upload,
            duration_ms: started.elapsed().as_millis() as u64,
            status: BulkActionStatus::Completed,
            filter: None,
            progress: None,
            summary: summary.view(),
        };
        tracing::info!(
            duration_ms = overview.duration_ms,
            processed = summary.processed,
            succeed = summary.succeed,
            failed = summary.failed,
            "bulk upload finished"
        );
        Ok(overview)
    }

    /// Import a file located under `base_dir`.
    ///
    /// Absolute paths are taken relative to `base_dir`; relative paths may
    /// not leave it.
    pub async fn import_from_path(
        &self,
        metadata: &ClientMetadata,
        base_dir: &Path,
        path: &str,
    ) -> Result<BulkActionOverview> {
        let not_found = || RedscopeError::NotFound(DATA_FILE_NOT_FOUND.to_string());

        let resolved = resolve_within(base_dir, path).ok_or_else(not_found)?;
        match tokio::fs::metadata(&resolved).await {
            Ok(info) if info.is_file() => {}
            _ => {
                tracing::debug!(path = %resolved.display(), "upload file missing");
                return Err(not_found());
            }
        }

        let file = tokio::fs::File::open(&resolved).await?;
        self.import(metadata, file).await
    }

    async fn import_with<R>(
        &self,
        client: &dyn RedisClient,
        reader: R,
    ) -> Result<BulkActionSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        let batch_size = self.config.import_batch_size();
        let mut summary = BulkActionSummary::default();
        let mut batch = Vec::with_capacity(batch_size);
        let mut lines = BufReader::new(reader).split(b'\n');

        while let Some(raw) = lines.next_segment().await? {
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_command(line) {
                Some(command) => batch.push(command),
                None => {
                    summary.add_processed(1);
                    summary.add_failed(1);
                }
            }

            if batch.len() >= batch_size {
                let commands = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                summary.merge(&execute_batch(client, commands).await);
            }
        }

        if !batch.is_empty() {
            summary.merge(&execute_batch(client, batch).await);
        }
        Ok(summary)
    }
}

fn parse_command(line: &str) -> Option<RedisCommand> {
    let parts = shlex::split(line)?;
    RedisCommand::from_parts(parts).ok()
}

/// Run one batch. Cluster clients get the commands one at a time since a
/// batch may span slots; other clients get one pipeline.
async fn execute_batch(
    client: &dyn RedisClient,
    commands: Vec<RedisCommand>,
) -> BulkActionSummary {
    let mut summary = BulkActionSummary::default();
    let count = commands.len() as u64;
    summary.add_processed(count);

    if client.connection_type() == ConnectionType::Cluster {
        for command in commands {
            match client.send_command(command).await {
                Ok(_) => summary.add_success(1),
                Err(_) => summary.add_failed(1),
            }
        }
        return summary;
    }

    match client.send_pipeline(commands).await {
        Ok(replies) => {
            for reply in replies {
                match reply {
                    Ok(_) => summary.add_success(1),
                    Err(_) => summary.add_failed(1),
                }
            }
        }
        Err(err) => {
            tracing::warn!(commands = count, error = %err, "upload batch failed");
            summary.add_failed(count);
        }
    }
    summary
}

/// Lexically resolve `path` inside `base_dir`
fn resolve_within(base_dir: &Path, path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    let rooted = path.has_root();
    let mut parts = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && !rooted {
                    return None;
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.into_iter().fold(base_dir.to_path_buf(), |dir, part| dir.join(part)))
}
