//! In-memory `GraphSession` used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::client::{GraphSession, Params, Record};

/// A query seen by the session.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub query: String,
    pub params: Params,
}

type Reply = std::result::Result<Vec<Record>, String>;

/// Records every query and replays scripted replies.
///
/// Replies are matched on a substring of the query and consumed in order;
/// queries with no scripted reply succeed with no rows.
#[derive(Default)]
pub struct RecordingSession {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` the next time a query containing `needle` runs.
    pub fn reply(&self, needle: &str, rows: Vec<Value>) -> &Self {
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => map,
                other => panic!("scripted rows must be objects, got {}", other),
            })
            .collect();
        self.push(needle, Ok(rows));
        self
    }

    /// Fail the next query containing `needle`.
    pub fn fail(&self, needle: &str, message: &str) -> &Self {
        self.push(needle, Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose query contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.query.contains(needle))
            .collect()
    }

    fn push(&self, needle: &str, reply: Reply) {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(n, _)| n == needle) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((needle.to_string(), VecDeque::from([reply]))),
        }
    }

    fn respond(&self, query: &str, params: &Params) -> Result<Vec<Record>> {
        self.calls.lock().unwrap().push(RecordedCall {
            query: query.to_string(),
            params: params.clone(),
        });

        let mut replies = self.replies.lock().unwrap();
        let reply = replies
            .iter_mut()
            .find(|(needle, queue)| query.contains(needle.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());

        match reply {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl GraphSession for RecordingSession {
    async fn run(&self, query: &str, params: &Params) -> Result<()> {
        self.respond(query, params).map(|_| ())
    }

    async fn fetch(&self, query: &str, params: &Params, columns: &[&str]) -> Result<Vec<Record>> {
        let rows = self.respond(query, params)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect())
    }
}
