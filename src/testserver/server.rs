//! Fixture server: command dispatch and the TCP accept loop
//!
//! Write path ordering is the whole point: resolve the request against the
//! current state, append the resulting operation to the commit log, fsync,
//! apply in memory, then acknowledge. A hard kill can therefore land before
//! the fsync (operation lost wholesale) or after it (operation durable
//! wholesale), but never in between.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::protocol::{Request, Response};

use super::commitlog::CommitLog;
use super::store::{LogOp, Store};
use super::{EngineError, EngineResult};

/// Commit log plus derived in-memory state.
pub struct Engine {
    store: Store,
    log: CommitLog,
}

impl Engine {
    /// Open the data directory, replaying whatever the previous instance
    /// left behind. Non-tail log damage halts startup.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let ops = CommitLog::replay(data_dir)?;
        let store = Store::replay(&ops)?;
        let log = CommitLog::open(data_dir)?;
        info!(replayed = ops.len(), data_dir = %data_dir.display(), "engine recovered");
        Ok(Engine { store, log })
    }

    /// Commit one state transition: log first, then apply.
    fn commit(&mut self, op: LogOp) -> EngineResult<()> {
        self.log.append(&op)?;
        self.store.apply(&op)
    }

    /// Execute one request. Mutations go through `commit`; reads never touch
    /// the log.
    pub fn execute(&mut self, request: Request) -> EngineResult<Response> {
        match request {
            Request::Ping | Request::Shutdown => Ok(Response::ok()),
            Request::DropCollection { collection } => {
                if self.store.collection_exists(&collection) {
                    self.commit(LogOp::DropCollection { collection })?;
                }
                Ok(Response::ok())
            }
            Request::CreateCollection { collection, capped } => {
                if self.store.collection_exists(&collection) {
                    return Err(EngineError::CollectionExists(collection));
                }
                self.commit(LogOp::CreateCollection { collection, capped })?;
                Ok(Response::ok())
            }
            Request::CreateIndexes {
                collection,
                indexes,
            } => {
                if !self.store.collection_exists(&collection) {
                    return Err(EngineError::UnknownCollection(collection));
                }
                self.commit(LogOp::CreateIndexes {
                    collection,
                    indexes,
                })?;
                Ok(Response::ok())
            }
            Request::InsertOne {
                collection,
                document,
            } => {
                let ids = self.store.allocate_ids(1);
                self.commit(LogOp::Insert {
                    collection,
                    docs: vec![(ids[0], document)],
                })?;
                Ok(Response::ok())
            }
            Request::InsertMany {
                collection,
                documents,
            } => {
                let ids = self.store.allocate_ids(documents.len());
                self.commit(LogOp::Insert {
                    collection,
                    docs: ids.into_iter().zip(documents).collect(),
                })?;
                Ok(Response::ok())
            }
            Request::UpdateOne {
                collection,
                filter,
                set,
            } => {
                match self.store.find_first(&collection, &filter) {
                    Some(id) => self.commit(LogOp::Update {
                        collection,
                        id,
                        set,
                    })?,
                    None => debug!(collection = %collection, "update_one matched nothing"),
                }
                Ok(Response::ok())
            }
            Request::DeleteOne { collection, filter } => {
                match self.store.find_first(&collection, &filter) {
                    Some(id) => self.commit(LogOp::Delete {
                        collection,
                        ids: vec![id],
                    })?,
                    None => debug!(collection = %collection, "delete_one matched nothing"),
                }
                Ok(Response::ok())
            }
            Request::DeleteMany { collection, filter } => {
                let ids = self.store.find_all(&collection, &filter);
                if !ids.is_empty() {
                    self.commit(LogOp::Delete { collection, ids })?;
                }
                Ok(Response::ok())
            }
            Request::Count {
                collection,
                filter,
                hint,
            } => {
                let n = self
                    .store
                    .count(&collection, filter.as_ref(), hint.as_deref())?;
                Ok(Response::count(n))
            }
            Request::Validate { collection } => {
                let (valid, details) = self.store.validate(&collection);
                Ok(Response::validation(valid, details))
            }
        }
    }
}

/// Serve the data plane until a shutdown command arrives.
pub async fn serve(data_dir: &Path, port: u16) -> EngineResult<()> {
    let engine = Arc::new(Mutex::new(Engine::open(data_dir)?));
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let shutdown = Arc::new(Notify::new());
    info!(port, "fixture server listening");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!(port, "shutdown requested, exiting");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "connection accepted");
                let engine = Arc::clone(&engine);
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, engine, shutdown).await {
                        debug!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    engine: Arc<Mutex<Engine>>,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let (response, stop) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let stop = matches!(request, Request::Shutdown);
                let response = {
                    let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
                    engine.execute(request).unwrap_or_else(|e| {
                        warn!(error = %e, "request failed");
                        Response::error(e.to_string())
                    })
                };
                (response, stop)
            }
            Err(e) => (Response::error(format!("bad request: {}", e)), false),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write_half.write_all(&out).await?;
        write_half.flush().await?;

        if stop {
            // Ack is on the wire; let the accept loop wind down.
            shutdown.notify_one();
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Document, IndexSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn setup(engine: &mut Engine) {
        engine
            .execute(Request::CreateCollection {
                collection: "testt".to_string(),
                capped: None,
            })
            .unwrap();
        engine
            .execute(Request::CreateIndexes {
                collection: "testt".to_string(),
                indexes: vec![IndexSpec::ascending("a", "a")],
            })
            .unwrap();
    }

    #[test]
    fn committed_operations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut engine = Engine::open(dir.path()).unwrap();
            setup(&mut engine);
            engine
                .execute(Request::InsertOne {
                    collection: "testt".to_string(),
                    document: doc(json!({"a": "a"})),
                })
                .unwrap();
        }

        // Dropping the engine without a shutdown models an abrupt exit after
        // the fsync.
        let mut engine = Engine::open(dir.path()).unwrap();
        let count = engine
            .execute(Request::Count {
                collection: "testt".to_string(),
                filter: None,
                hint: Some("a".to_string()),
            })
            .unwrap();
        assert_eq!(count.count, Some(1));

        let validation = engine
            .execute(Request::Validate {
                collection: "testt".to_string(),
            })
            .unwrap();
        assert_eq!(validation.valid, Some(true));
    }

    #[test]
    fn duplicate_create_collection_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::open(dir.path()).unwrap();
        setup(&mut engine);
        let result = engine.execute(Request::CreateCollection {
            collection: "testt".to_string(),
            capped: None,
        });
        assert!(matches!(result, Err(EngineError::CollectionExists(_))));
    }

    #[test]
    fn drop_collection_erases_state_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut engine = Engine::open(dir.path()).unwrap();
            setup(&mut engine);
            engine
                .execute(Request::InsertOne {
                    collection: "testt".to_string(),
                    document: doc(json!({"a": "a"})),
                })
                .unwrap();
            engine
                .execute(Request::DropCollection {
                    collection: "testt".to_string(),
                })
                .unwrap();
        }

        let mut engine = Engine::open(dir.path()).unwrap();
        let count = engine
            .execute(Request::Count {
                collection: "testt".to_string(),
                filter: None,
                hint: None,
            })
            .unwrap();
        assert_eq!(count.count, Some(0));
    }

    #[test]
    fn no_op_mutations_write_nothing_to_the_log() {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::open(dir.path()).unwrap();
        setup(&mut engine);
        let log_len = std::fs::read(dir.path().join(super::super::commitlog::LOG_FILE))
            .unwrap()
            .len();

        engine
            .execute(Request::DeleteOne {
                collection: "testt".to_string(),
                filter: doc(json!({"a": "missing"})).into_iter().collect(),
            })
            .unwrap();

        let after = std::fs::read(dir.path().join(super::super::commitlog::LOG_FILE))
            .unwrap()
            .len();
        assert_eq!(log_len, after);
    }
}
