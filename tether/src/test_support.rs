//! Test-only helpers: scratch workspaces and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::cancel::CancelToken;
use crate::core::conversation::Message;
use crate::io::config::ToolsConfig;
use crate::io::context::IgnoreList;
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::io::snapshot::{Snapshot, Snapshotter};
use crate::io::tools::ToolContext;

/// Scratch workspace rooted in a temporary directory.
pub struct ToolFixture {
    _temp: TempDir,
    root: PathBuf,
    pub config: ToolsConfig,
    pub ignore: IgnoreList,
    pub cancel: CancelToken,
}

impl Default for ToolFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolFixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonical tempdir");
        Self {
            _temp: temp,
            root,
            config: ToolsConfig::default(),
            ignore: IgnoreList::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_ignore(mut self, contents: &str) -> Self {
        self.ignore = IgnoreList::parse(contents);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn file(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write fixture file");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).expect("read fixture file")
    }

    pub fn ctx(&self) -> ToolContext<'_> {
        ToolContext {
            root: &self.root,
            config: &self.config,
            ignore: &self.ignore,
            cancel: &self.cancel,
        }
    }
}

/// One canned model response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(ModelError),
}

impl ScriptedReply {
    /// A reply containing `value` serialized as JSON.
    pub fn json(value: Value) -> Self {
        ScriptedReply::Text(value.to_string())
    }
}

/// Model client that replays a fixed script.
///
/// Once the script runs out, the last reply repeats forever.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ScriptedReply>>,
    last: RefCell<Option<ScriptedReply>>,
    requests: RefCell<Vec<Vec<Message>>>,
    cancel_after: Cell<Option<usize>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            last: RefCell::new(None),
            requests: RefCell::new(Vec::new()),
            cancel_after: Cell::new(None),
        }
    }

    /// Cancel the run's token once `calls` requests have been answered.
    pub fn cancel_after(self, calls: usize) -> Self {
        self.cancel_after.set(Some(calls));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Messages sent with each request, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(
        &self,
        request: &ModelRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<String, ModelError> {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        self.requests.borrow_mut().push(request.messages.to_vec());
        let next = self.replies.borrow_mut().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.borrow_mut() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .borrow()
                .clone()
                .ok_or_else(|| ModelError::FatalTransport {
                    attempts: 1,
                    last_error: "scripted model has no replies".to_string(),
                })?,
        };
        if self.cancel_after.get() == Some(self.calls()) {
            cancel.cancel();
        }
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Error(err) => Err(err),
        }
    }
}

/// Snapshotter that records requests instead of touching git.
#[derive(Default)]
pub struct RecordingSnapshotter {
    messages: RefCell<Vec<String>>,
    paths: RefCell<Vec<Vec<String>>>,
    fail: bool,
}

impl RecordingSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot attempt fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    /// Forced paths passed with each snapshot, in request order.
    pub fn paths(&self) -> Vec<Vec<String>> {
        self.paths.borrow().clone()
    }
}

impl Snapshotter for RecordingSnapshotter {
    fn snapshot(&self, message: &str, paths: &[String]) -> Result<Snapshot> {
        if self.fail {
            return Err(anyhow!("snapshot storage unavailable"));
        }
        self.paths.borrow_mut().push(paths.to_vec());
        let mut messages = self.messages.borrow_mut();
        messages.push(message.to_string());
        Ok(Snapshot {
            id: format!("snap{}", messages.len()),
            message: message.to_string(),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            reference: format!("refs/test/{}", messages.len()),
        })
    }

    fn undo(&self) -> Result<Snapshot> {
        Err(anyhow!("recording snapshotter cannot restore"))
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        Ok(Vec::new())
    }

    fn clear(&self) -> Result<usize> {
        self.paths.borrow_mut().clear();
        Ok(self.messages.borrow_mut().drain(..).count())
    }
}

/// Local HTTP endpoint answering every request with one fixed response.
pub struct MockEndpoint {
    url: String,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl MockEndpoint {
    pub fn serve(status_line: &str, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock endpoint");
        let addr = listener.local_addr().expect("mock endpoint addr");
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&bodies);
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let request = read_request_body(&stream);
                seen.lock().expect("mock endpoint lock").push(request);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Self {
            url: format!("http://{addr}/v1/decide"),
            bodies,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Requests received so far.
    pub fn hits(&self) -> usize {
        self.bodies.lock().expect("mock endpoint lock").len()
    }

    /// Raw request bodies, in arrival order.
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().expect("mock endpoint lock").clone()
    }
}

fn read_request_body(stream: &std::net::TcpStream) -> String {
    let Ok(clone) = stream.try_clone() else {
        return String::new();
    };
    let mut reader = BufReader::new(clone);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);
    String::from_utf8_lossy(&body).into_owned()
}
