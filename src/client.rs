//! Data-plane client
//!
//! Thin typed wrapper over the newline-delimited JSON protocol. One request,
//! one response, no retries: in a crash scenario a failed call is an expected
//! outcome, and retrying would mask it.

use std::net::{Ipv4Addr, SocketAddr};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::protocol::{CappedSpec, Document, Filter, IndexSpec, Request, Response};

/// Client-level failure. The workload driver swallows these; the verifier
/// surfaces them as harness errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A single connection to the target server's data plane.
pub struct DbClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DbClient {
    /// Connect to a server on localhost.
    pub async fn connect(port: u16) -> ClientResult<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(DbClient {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Issue one request and read one response line.
    pub async fn request(&mut self, request: &Request) -> ClientResult<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let n = self.reader.read_line(&mut reply).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(serde_json::from_str(&reply)?)
    }

    /// Issue a request and fail on an application-level error response.
    async fn expect_ok(&mut self, request: &Request) -> ClientResult<Response> {
        let response = self.request(request).await?;
        if response.ok {
            Ok(response)
        } else {
            Err(ClientError::Server(
                response.error.unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }

    pub async fn ping(&mut self) -> ClientResult<()> {
        self.expect_ok(&Request::Ping).await.map(|_| ())
    }

    /// Request an orderly shutdown. The server acknowledges and then exits.
    pub async fn shutdown(&mut self) -> ClientResult<()> {
        self.expect_ok(&Request::Shutdown).await.map(|_| ())
    }

    pub async fn drop_collection(&mut self, collection: &str) -> ClientResult<()> {
        self.expect_ok(&Request::DropCollection {
            collection: collection.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn create_collection(
        &mut self,
        collection: &str,
        capped: Option<CappedSpec>,
    ) -> ClientResult<()> {
        self.expect_ok(&Request::CreateCollection {
            collection: collection.to_string(),
            capped,
        })
        .await
        .map(|_| ())
    }

    pub async fn create_indexes(
        &mut self,
        collection: &str,
        indexes: &[IndexSpec],
    ) -> ClientResult<()> {
        self.expect_ok(&Request::CreateIndexes {
            collection: collection.to_string(),
            indexes: indexes.to_vec(),
        })
        .await
        .map(|_| ())
    }

    pub async fn insert_one(&mut self, collection: &str, document: Document) -> ClientResult<()> {
        self.expect_ok(&Request::InsertOne {
            collection: collection.to_string(),
            document,
        })
        .await
        .map(|_| ())
    }

    pub async fn insert_many(
        &mut self,
        collection: &str,
        documents: Vec<Document>,
    ) -> ClientResult<()> {
        self.expect_ok(&Request::InsertMany {
            collection: collection.to_string(),
            documents,
        })
        .await
        .map(|_| ())
    }

    pub async fn update_one(
        &mut self,
        collection: &str,
        filter: Filter,
        set: Document,
    ) -> ClientResult<()> {
        self.expect_ok(&Request::UpdateOne {
            collection: collection.to_string(),
            filter,
            set,
        })
        .await
        .map(|_| ())
    }

    pub async fn delete_one(&mut self, collection: &str, filter: Filter) -> ClientResult<()> {
        self.expect_ok(&Request::DeleteOne {
            collection: collection.to_string(),
            filter,
        })
        .await
        .map(|_| ())
    }

    pub async fn delete_many(&mut self, collection: &str, filter: Filter) -> ClientResult<()> {
        self.expect_ok(&Request::DeleteMany {
            collection: collection.to_string(),
            filter,
        })
        .await
        .map(|_| ())
    }

    /// Count matching records, optionally forcing a named index as the access
    /// path so the planner cannot substitute a different one.
    pub async fn count(
        &mut self,
        collection: &str,
        filter: Option<Filter>,
        hint: Option<&str>,
    ) -> ClientResult<u64> {
        let response = self
            .expect_ok(&Request::Count {
                collection: collection.to_string(),
                filter,
                hint: hint.map(str::to_string),
            })
            .await?;
        response
            .count
            .ok_or_else(|| ClientError::Server("count response missing count".to_string()))
    }

    /// Run the engine's structural self-check.
    pub async fn validate(&mut self, collection: &str) -> ClientResult<(bool, Value)> {
        let response = self
            .expect_ok(&Request::Validate {
                collection: collection.to_string(),
            })
            .await?;
        let valid = response
            .valid
            .ok_or_else(|| ClientError::Server("validate response missing flag".to_string()))?;
        Ok((valid, response.details.unwrap_or(Value::Null)))
    }
}
