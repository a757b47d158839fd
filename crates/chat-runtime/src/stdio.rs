//! Stdio Tool-Server Session
//!
//! Spawns the tool server as a child process and speaks line-delimited
//! JSON-RPC over its stdin/stdout, with messages typed by `rust-mcp-schema`.
//! Responses are correlated by id through a pending-request map, so
//! concurrent calls on one session are safe.
//!
//! The session is a scoped value: [`StdioSession::close`] is idempotent and
//! releases the process and pipes, and dropping an unclosed session kills
//! the child. [`with_session`] wraps open, work and close in one call.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::catalog::{PromptDescriptor, ResourceDescriptor};
use chat_core::error::{AgentError, Result};
use chat_core::session::{PromptPayload, ResourceContent, ToolSession};
use chat_core::tool::{ToolDescriptor, ToolOutput};
use futures::future::BoxFuture;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, GetPromptRequestParams,
    GetPromptResult, Implementation, InitializeRequestParams, ListPromptsResult,
    ListResourcesResult, ListToolsResult, PaginatedRequestParams, ReadResourceRequestParams,
    ReadResourceResult, RequestId, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol;

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Upper bounds on one paginated listing
const MAX_LIST_PAGES: usize = 100;
const MAX_LIST_ITEMS: usize = 1_000;

type Reply = std::result::Result<ServerMessage, AgentError>;
type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>>;
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// How to launch the tool server
#[derive(Clone, Debug)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,

    /// Bound on spawn-to-initialized
    pub handshake_timeout: Duration,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn from_env() -> Self {
        let program =
            std::env::var("TOOL_SERVER_COMMAND").unwrap_or_else(|_| "uv".into());
        let args = std::env::var("TOOL_SERVER_ARGS").unwrap_or_else(|_| "run server.py".into());

        let mut command = Self::new(program).args(args.split_whitespace());
        if let Ok(dir) = std::env::var("TOOL_SERVER_CWD") {
            command = command.cwd(dir);
        }
        command
    }
}

impl std::fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}


/// Live stdio connection to one tool server process
pub struct StdioSession {
    stdin: SharedStdin,
    child: Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicI64,
    ready: AtomicBool,
    closed: Arc<AtomicBool>,
    server_info: Option<Implementation>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioSession {
    /// Spawn the server and complete the initialize handshake.
    ///
    /// Fails with [`AgentError::Connection`] if the executable cannot be
    /// started, the process exits early, or the handshake reply is malformed.
    pub async fn open(command: &ServerCommand) -> Result<Self> {
        debug!(command = %command, "Starting tool server");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::Connection(format!("failed to start '{}': {e}", command.program))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Connection("unable to open tool server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Connection("unable to open tool server stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Connection("unable to open tool server stderr".into()))?;

        let stdin: SharedStdin = Arc::new(Mutex::new(Some(stdin)));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = Self::spawn_stdout_reader(
            stdout,
            pending.clone(),
            stdin.clone(),
            closed.clone(),
        );
        let drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "tool_server", "{}", line);
            }
        });

        let mut session = Self {
            stdin,
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicI64::new(0),
            ready: AtomicBool::new(false),
            closed,
            server_info: None,
            tasks: vec![reader, drain],
        };

        let handshake = tokio::time::timeout(command.handshake_timeout, session.initialize()).await;
        match handshake {
            Ok(Ok(server_info)) => {
                info!(
                    server = %server_info.name,
                    version = %server_info.version,
                    "Tool server session ready"
                );
                session.server_info = Some(server_info);
                session.ready.store(true, Ordering::SeqCst);
                Ok(session)
            }
            Ok(Err(e)) => {
                session.close().await;
                Err(AgentError::Connection(format!("handshake failed: {e}")))
            }
            Err(_) => {
                session.close().await;
                Err(AgentError::Connection(format!(
                    "handshake timed out after {}s",
                    command.handshake_timeout.as_secs()
                )))
            }
        }
    }

    fn spawn_stdout_reader(
        stdout: ChildStdout,
        pending: Pending,
        stdin: SharedStdin,
        closed: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let value = match serde_json::from_str::<Value>(&line) {
                    Ok(value) => value,
                    Err(_) => {
                        debug!(target: "tool_server", "non-protocol output: {}", line);
                        continue;
                    }
                };

                match serde_json::from_value::<ServerMessage>(value.clone()) {
                    Ok(message) => Self::dispatch_message(&pending, &stdin, message).await,
                    Err(e) => Self::reject_malformed(&pending, &value, e).await,
                }
            }

            // EOF: wake every waiter with a closed channel
            closed.store(true, Ordering::SeqCst);
            pending.lock().await.clear();
            debug!("Tool server stdout closed");
        })
    }

    async fn dispatch_message(pending: &Pending, stdin: &SharedStdin, message: ServerMessage) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(id = ?response.id, "Received tool server response");
                let id = response.id.clone();
                deliver(pending, &id, Ok(message)).await;
            }
            ServerMessage::Error(error) => {
                debug!(
                    id = ?error.id,
                    code = error.error.code,
                    "Received tool server error"
                );
                match error.id.clone() {
                    Some(id) => deliver(pending, &id, Ok(message)).await,
                    None => warn!(
                        code = error.error.code,
                        "Tool server error without a request id: {}", error.error.message
                    ),
                }
            }
            ServerMessage::Request(request) => {
                let method = request.method().to_string();
                let id = request.request_id().clone();
                debug!(%method, id = ?id, "Received tool server request");

                let answered = if method == "ping" {
                    write_line(stdin, &json!({"jsonrpc": "2.0", "id": id, "result": {}})).await
                } else {
                    let reason = format!("Method not supported: {method}");
                    let error = RpcError::method_not_found().with_message(&reason);
                    match ClientMessage::from_message(MessageFromClient::Error(error), Some(id)) {
                        Ok(reply) => write_line(stdin, &reply).await,
                        Err(e) => Err(AgentError::Protocol(e.to_string())),
                    }
                };
                if let Err(e) = answered {
                    warn!("Failed to answer tool server request: {}", e);
                }
            }
            ServerMessage::Notification(_) => {
                debug!("Received tool server notification");
            }
        }
    }

    /// A reply that does not fit the schema still fails its caller
    async fn reject_malformed(pending: &Pending, value: &Value, error: serde_json::Error) {
        let is_reply = value.get("result").is_some() || value.get("error").is_some();
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

        match id {
            Some(id) if is_reply => {
                warn!(id = ?id, "Malformed tool server reply: {}", error);
                deliver(
                    pending,
                    &id,
                    Err(AgentError::Protocol(format!("malformed reply: {error}"))),
                )
                .await;
            }
            _ => debug!(target: "tool_server", "unrecognized message: {}", value),
        }
    }

    async fn initialize(&self) -> Result<Implementation> {
        let request = RequestFromClient::InitializeRequest(InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                description: None,
                icons: Vec::new(),
                website_url: None,
            },
            meta: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        });

        let reply = self.request("initialize", request).await?;
        let init = protocol::parse_initialize_result(reply)?;
        if init.protocol_version != LATEST_PROTOCOL_VERSION {
            debug!(
                server = %init.protocol_version,
                client = LATEST_PROTOCOL_VERSION,
                "Tool server negotiated a different protocol version"
            );
        }

        self.notify(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(init.server_info)
    }

    /// One request/response round-trip
    async fn request(&self, what: &str, request: RequestFromClient) -> Result<ServerMessage> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::Transport("session is closed".into()));
        }

        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::SeqCst));
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(id.clone()),
        )
        .map_err(|e| AgentError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // the reader may have hit EOF before the insert
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::Transport("tool server has exited".into()));
        }

        debug!(id = ?id, %what, "Sending tool server request");
        if let Err(e) = write_line(&self.stdin, &message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(AgentError::Transport(format!(
                "tool server closed before answering '{what}'"
            ))),
        }
    }

    async fn notify(&self, notification: NotificationFromClient) -> Result<()> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|e| AgentError::Protocol(e.to_string()))?;
        write_line(&self.stdin, &message).await
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        what: &str,
        request: RequestFromClient,
    ) -> Result<T> {
        let reply = self.request(what, request).await?;
        protocol::parse_response(reply).map_err(|e| match e {
            AgentError::Protocol(msg) => {
                AgentError::Protocol(format!("malformed '{what}' result: {msg}"))
            }
            other => other,
        })
    }

    /// Follow `nextCursor` until the listing is exhausted.
    ///
    /// A cursor seen twice, or a listing past the page or item bounds, is a
    /// protocol error rather than an endless loop.
    async fn list_all<P, T, R, S>(&self, what: &str, request: R, split: S) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        R: Fn(Option<PaginatedRequestParams>) -> RequestFromClient,
        S: Fn(P) -> (Vec<T>, Option<String>),
    {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let (page, next) = split(self.request_as(what, request(params)).await?);
            items.extend(page);

            if items.len() > MAX_LIST_ITEMS {
                return Err(AgentError::Protocol(format!(
                    "{what} returned more than {MAX_LIST_ITEMS} items"
                )));
            }

            match next.filter(|next| !next.is_empty()) {
                None => return Ok(items),
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(AgentError::Protocol(format!(
                        "{what} repeated cursor '{next}'"
                    )));
                }
                Some(next) => cursor = Some(next),
            }
        }

        Err(AgentError::Protocol(format!(
            "{what} did not finish within {MAX_LIST_PAGES} pages"
        )))
    }

    /// Name and version the server reported
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Release the process and pipes. Calling it again does nothing.
    ///
    /// Outstanding calls fail with a transport error.
    pub async fn close(&self) {
        let already_closed = self.closed.swap(true, Ordering::SeqCst);
        let was_ready = self.ready.swap(false, Ordering::SeqCst);

        self.stdin.lock().await.take();
        self.pending.lock().await.clear();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!("Tool server already exited: {}", e);
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Tool server exited"),
                Err(e) => warn!("Failed to reap tool server: {}", e),
            }
        }

        for task in &self.tasks {
            task.abort();
        }

        if was_ready || !already_closed {
            info!("Tool server session closed");
        }
    }
}

impl Drop for StdioSession {
    fn drop(&mut self) {
        // kill_on_drop takes care of the child
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn deliver(pending: &Pending, id: &RequestId, reply: Reply) {
    match pending.lock().await.remove(id) {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => warn!(id = ?id, "Reply for unknown request id"),
    }
}

async fn write_line<M: Serialize>(stdin: &SharedStdin, message: &M) -> Result<()> {
    let mut payload = serde_json::to_string(message)?;
    payload.push('\n');

    let mut guard = stdin.lock().await;
    let pipe = guard
        .as_mut()
        .ok_or_else(|| AgentError::Transport("session is closed".into()))?;
    pipe.write_all(payload.as_bytes())
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
    pipe.flush()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))
}

#[async_trait]
impl ToolSession for StdioSession {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn supports_multiplexing(&self) -> bool {
        true
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .list_all(
                "tools/list",
                RequestFromClient::ListToolsRequest,
                |page: ListToolsResult| (page.tools, page.next_cursor),
            )
            .await?;
        Ok(tools.into_iter().map(protocol::tool_descriptor).collect())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>> {
        let prompts = self
            .list_all(
                "prompts/list",
                RequestFromClient::ListPromptsRequest,
                |page: ListPromptsResult| (page.prompts, page.next_cursor),
            )
            .await?;
        Ok(prompts.into_iter().map(protocol::prompt_descriptor).collect())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let resources = self
            .list_all(
                "resources/list",
                RequestFromClient::ListResourcesRequest,
                |page: ListResourcesResult| (page.resources, page.next_cursor),
            )
            .await?;
        Ok(resources
            .into_iter()
            .map(protocol::resource_descriptor)
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(AgentError::tool(
                    name,
                    format!("arguments must be a JSON object, got {other}"),
                ))
            }
        };
        let params = CallToolRequestParams::new(name).with_arguments(arguments);
        let result: CallToolResult = self
            .request_as("tools/call", RequestFromClient::CallToolRequest(params))
            .await?;
        Ok(protocol::tool_output(result))
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptPayload> {
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments: (!arguments.is_empty()).then(|| arguments.clone()),
            meta: None,
        };
        let result: GetPromptResult = self
            .request_as("prompts/get", RequestFromClient::GetPromptRequest(params))
            .await?;
        Ok(protocol::prompt_payload(result))
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let result: ReadResourceResult = self
            .request_as(
                "resources/read",
                RequestFromClient::ReadResourceRequest(params),
            )
            .await?;
        Ok(protocol::resource_contents(result))
    }
}

/// Open a session, run `work` against it, and close it on every exit path.
///
/// ```rust,ignore
/// let catalog = with_session(&command, |session| {
///     Box::pin(async move { Ok(Catalog::fetch(session).await) })
/// })
/// .await?;
/// ```
pub async fn with_session<T, F>(command: &ServerCommand, work: F) -> Result<T>
where
    F: for<'s> FnOnce(&'s StdioSession) -> BoxFuture<'s, Result<T>>,
{
    let session = StdioSession::open(command).await?;
    let result = work(&session).await;
    session.close().await;
    result
}
