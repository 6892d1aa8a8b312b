use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        signed_url::UrlSigner,
        types::{
            chat::{derive_title, Chat},
            collection::ChatCollection,
            message::{Message, MessageRole},
            rag_settings::RagSettings,
        },
    },
    utils::config::AppConfig,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    accumulator::ToolCallAccumulator,
    error::ProviderError,
    prompt::{build_messages, build_system_prompt, resolve_model, ConversationTurn},
    retrieval::{retrieve_context, SourceDocument},
    tools::{definitions, ToolAvailability, ToolExecutor},
    transport::{open_stream, CompletionTarget, FrameStream},
};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub chat_id: String,
    pub message: String,
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
    #[serde(default)]
    pub web_search_enabled: bool,
}

/// One frame of the client-facing chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Sources(Vec<SourceDocument>),
    /// A provider frame, forwarded unchanged.
    Delta(String),
    ToolCall { tool: String, args: Value },
    ToolResult { tool: String, result: String },
}

impl ChatEvent {
    /// The JSON carried in the SSE `data:` field.
    pub fn to_sse_data(&self) -> String {
        match self {
            Self::Sources(sources) => json!({"type": "sources", "sources": sources}).to_string(),
            Self::Delta(raw) => raw.clone(),
            Self::ToolCall { tool, args } => {
                json!({"type": "tool_call", "tool": tool, "args": args}).to_string()
            }
            Self::ToolResult { tool, result } => {
                json!({"type": "tool_result", "tool": tool, "result": result}).to_string()
            }
        }
    }
}

pub type ChatEvents = Receiver<Result<ChatEvent, ProviderError>>;

/// Answers chat messages with retrieval, tool calls and a streamed completion.
#[derive(Clone)]
pub struct ChatOrchestrator {
    db: Arc<SurrealDbClient>,
    config: Arc<AppConfig>,
    signer: UrlSigner,
    http: reqwest::Client,
}

impl ChatOrchestrator {
    pub fn new(db: Arc<SurrealDbClient>, config: Arc<AppConfig>, signer: UrlSigner) -> Self {
        Self {
            db,
            config,
            signer,
            http: reqwest::Client::new(),
        }
    }

    /// Prepare the request and open the first completion stream.
    ///
    /// Errors returned here happen before any event exists and are answered as plain JSON.
    /// Once the receiver is handed out, the rest of the exchange runs in a background task
    /// that finishes and persists the assistant message even if the receiver is dropped.
    #[instrument(skip_all, fields(chat_id = %request.chat_id))]
    pub async fn start(&self, request: ChatRequest) -> Result<ChatEvents, ProviderError> {
        let chat = Chat::get(&request.chat_id, &self.db).await?;
        let user_id = chat.user_id.clone();

        let model = resolve_model(&user_id, &self.config, &self.db).await?;
        let settings = RagSettings::for_user(&user_id, &self.db).await?;
        let collection_ids = ChatCollection::collection_ids_for_chat(&chat.id, &self.db).await?;
        let availability = ToolAvailability {
            documents: !collection_ids.is_empty(),
            web_search: request.web_search_enabled,
        };

        let context = retrieve_context(
            &request.message,
            &user_id,
            &collection_ids,
            &settings,
            &self.config,
            &self.db,
            &self.signer,
        )
        .await?;
        info!(
            model = %model.model_id,
            context_chunks = context.chunks.len(),
            sources = context.sources.len(),
            web_search = request.web_search_enabled,
            "Chat request prepared"
        );

        let system_prompt = build_system_prompt(
            &self.config.assistant_name,
            &model.display_name,
            availability,
            &context.chunks,
        );
        let messages = build_messages(system_prompt, &request.messages, &request.message);
        let target = CompletionTarget::resolve(&model, &self.config, &self.db).await?;

        self.save_user_message(&chat, &request.message).await;

        let tools = definitions(availability);
        let first = open_stream(&self.http, &target, &messages, Some(&tools)).await?;

        let executor = ToolExecutor {
            db: Arc::clone(&self.db),
            config: Arc::clone(&self.config),
            http: self.http.clone(),
            user_id,
            chat_id: chat.id.clone(),
            web_search_enabled: request.web_search_enabled,
            settings,
        };
        let exchange = Exchange {
            db: Arc::clone(&self.db),
            http: self.http.clone(),
            target,
            executor,
            messages,
            chat_id: chat.id,
        };

        let (tx, rx) = channel(EVENT_BUFFER);
        tokio::spawn(exchange.run(first, context.sources, tx));
        Ok(rx)
    }

    async fn save_user_message(&self, chat: &Chat, content: &str) {
        let prior = match Message::count_for_chat(&chat.id, &self.db).await {
            Ok(count) => count,
            Err(err) => {
                warn!(chat_id = %chat.id, error = %err, "Failed to count chat messages");
                1
            }
        };

        let message = Message::new(chat.id.clone(), MessageRole::User, content.to_string());
        if let Err(err) = self.db.store_item(message).await {
            warn!(chat_id = %chat.id, error = %err, "Failed to persist user message");
        }

        if prior == 0 {
            let title = derive_title(content);
            if let Err(err) = Chat::update_title(&chat.id, &title, &self.db).await {
                warn!(chat_id = %chat.id, error = %err, "Failed to set chat title");
            }
        }
    }
}

/// What a provider frame carries.
enum Frame {
    ToolCalls(Value),
    Content(Option<String>),
}

fn classify(payload: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return Frame::Content(None);
    };
    let delta = &value["choices"][0]["delta"];
    match delta.get("tool_calls") {
        Some(tool_calls) if !tool_calls.is_null() => Frame::ToolCalls(tool_calls.clone()),
        _ => Frame::Content(delta["content"].as_str().map(str::to_string)),
    }
}

/// The background half of a chat request.
struct Exchange {
    db: Arc<SurrealDbClient>,
    http: reqwest::Client,
    target: CompletionTarget,
    executor: ToolExecutor,
    messages: Vec<Value>,
    chat_id: String,
}

/// Delivers events while the client listens; afterwards the exchange keeps draining.
struct Outbox {
    tx: Sender<Result<ChatEvent, ProviderError>>,
    connected: bool,
}

impl Outbox {
    async fn send(&mut self, item: Result<ChatEvent, ProviderError>) {
        if self.connected && self.tx.send(item).await.is_err() {
            debug!("Chat client disconnected; finishing in background");
            self.connected = false;
        }
    }
}

impl Exchange {
    async fn run(
        mut self,
        first: FrameStream,
        sources: Vec<SourceDocument>,
        tx: Sender<Result<ChatEvent, ProviderError>>,
    ) {
        let mut outbox = Outbox {
            tx,
            connected: true,
        };
        let mut transcript = String::new();

        if !sources.is_empty() {
            outbox.send(Ok(ChatEvent::Sources(sources))).await;
        }

        let mut accumulator = ToolCallAccumulator::new();
        let completed = self
            .forward(first, &mut outbox, &mut transcript, Some(&mut accumulator))
            .await;

        let calls = accumulator.finish();
        if completed && !calls.is_empty() {
            info!(chat_id = %self.chat_id, tool_calls = calls.len(), "Executing tool calls");

            for call in &calls {
                outbox
                    .send(Ok(ChatEvent::ToolCall {
                        tool: call.name.clone(),
                        args: call.parsed_arguments(),
                    }))
                    .await;
                transcript.push_str(&format!("\n\n🔧 Using {}...\n\n", call.name));

                let result = self.executor.execute(call).await;

                outbox
                    .send(Ok(ChatEvent::ToolResult {
                        tool: call.name.clone(),
                        result: result.clone(),
                    }))
                    .await;
                transcript.push_str(&format!("**{} result:**\n{result}\n\n", call.name));

                self.messages.push(json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [call.to_request_json()],
                }));
                self.messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result,
                }));
            }

            match open_stream(&self.http, &self.target, &self.messages, None).await {
                Ok(follow_up) => {
                    self.forward(follow_up, &mut outbox, &mut transcript, None)
                        .await;
                }
                Err(err) => {
                    warn!(chat_id = %self.chat_id, error = %err, "Follow-up completion failed");
                }
            }
        }

        self.persist(&transcript).await;
    }

    /// Proxy a provider stream. Tool-call frames go to `accumulator` when one is given.
    /// Returns false if the stream broke off.
    async fn forward(
        &self,
        mut frames: FrameStream,
        outbox: &mut Outbox,
        transcript: &mut String,
        mut accumulator: Option<&mut ToolCallAccumulator>,
    ) -> bool {
        while let Some(frame) = frames.next().await {
            let payload = match frame {
                Ok(payload) => payload,
                Err(err) => {
                    error!(chat_id = %self.chat_id, error = %err, "Completion stream failed");
                    outbox.send(Err(err)).await;
                    return false;
                }
            };

            match (classify(&payload), accumulator.as_deref_mut()) {
                (Frame::ToolCalls(tool_calls), Some(accumulator)) => {
                    accumulator.push_json(&tool_calls);
                }
                (Frame::ToolCalls(_), None) => {
                    outbox.send(Ok(ChatEvent::Delta(payload))).await;
                }
                (Frame::Content(content), _) => {
                    if let Some(content) = content {
                        transcript.push_str(&content);
                    }
                    outbox.send(Ok(ChatEvent::Delta(payload))).await;
                }
            }
        }
        true
    }

    async fn persist(&self, transcript: &str) {
        if transcript.trim().is_empty() {
            debug!(chat_id = %self.chat_id, "No assistant content to persist");
            return;
        }
        let message = Message::new(
            self.chat_id.clone(),
            MessageRole::Assistant,
            transcript.to_string(),
        );
        if let Err(err) = self.db.store_item(message).await {
            warn!(chat_id = %self.chat_id, error = %err, "Failed to persist assistant message");
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::State,
        http::{header, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use common::{
        storage::types::{
            chunk::Chunk,
            collection::Collection,
            document::Document,
            user_settings::UserSettings,
        },
        utils::{config::EmbeddingBackend, embedding::EmbeddingClient},
    };
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::tools::web_search;

    const DIM: usize = 64;

    const CONTENT_STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"The sky \"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"is blue.\"}}]}\n\ndata: [DONE]\n\n";

    const TOOL_STREAM: &str = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"web_search\",\"arguments\":\"\"}}]}}]}\n\ndata: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\":\"}}]}}]}\n\ndata: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"weather today\\\"}\"}}]}}]}\n\ndata: [DONE]\n\n";

    const FOLLOW_UP_STREAM: &str =
        "data: {\"choices\":[{\"delta\":{\"content\":\"Search is off.\"}}]}\n\ndata: [DONE]\n\n";

    #[derive(Clone)]
    struct Upstream {
        requests: Arc<Mutex<Vec<Value>>>,
        first: &'static str,
        follow_up: &'static str,
        status: StatusCode,
    }

    async fn completions(State(upstream): State<Upstream>, Json(body): Json<Value>) -> Response {
        let has_tools = body.get("tools").is_some();
        upstream.requests.lock().await.push(body);
        if upstream.status != StatusCode::OK {
            return (upstream.status, "upstream refused").into_response();
        }
        let sse = if has_tools {
            upstream.first
        } else {
            upstream.follow_up
        };
        Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from(sse))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }

    async fn spawn_upstream(
        first: &'static str,
        follow_up: &'static str,
        status: StatusCode,
    ) -> (String, Arc<Mutex<Vec<Value>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(Upstream {
                requests: Arc::clone(&requests),
                first,
                follow_up,
                status,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{addr}/v1/chat/completions"), requests)
    }

    async fn orchestrator(gateway_url: String) -> (ChatOrchestrator, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let config = Arc::new(AppConfig {
            chat_completions_url: Some(gateway_url),
            chat_api_key: Some("gw-key".into()),
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_dimensions: u32::try_from(DIM).expect("dimension fits"),
            assistant_name: "Atlas".into(),
            ..Default::default()
        });
        let signer = UrlSigner::new("secret", 60, "http://files.test");
        (
            ChatOrchestrator::new(Arc::clone(&db), config, signer),
            db,
        )
    }

    async fn new_chat(db: &SurrealDbClient) -> Chat {
        let chat = Chat::new("user-1".into(), "New Chat".into());
        db.store_item(chat.clone()).await.expect("store chat");
        chat
    }

    async fn link_sky_collection(db: &SurrealDbClient, chat: &Chat) {
        let collection = Collection::new("user-1".into(), "Weather".into());
        db.store_item(collection.clone()).await.expect("store collection");
        db.store_item(ChatCollection::new(chat.id.clone(), collection.id.clone()))
            .await
            .expect("link");

        let document = Document::new(
            collection.id.clone(),
            "user-1".into(),
            "sky.txt".into(),
            "user-1/weather/sky.txt".into(),
            15,
            "text/plain".into(),
        );
        db.store_item(document.clone()).await.expect("store document");

        let mut chunk = Chunk::new(
            document.id.clone(),
            collection.id,
            "user-1".into(),
            0,
            "The sky is blue".into(),
        );
        chunk.embedding = EmbeddingClient::new_hashed(DIM)
            .embed("The sky is blue")
            .await
            .expect("embed");
        Chunk::replace_for_document(&document.id, vec![chunk], db)
            .await
            .expect("store chunk");
    }

    fn request(chat: &Chat, message: &str, web_search_enabled: bool) -> ChatRequest {
        ChatRequest {
            chat_id: chat.id.clone(),
            message: message.into(),
            messages: Vec::new(),
            web_search_enabled,
        }
    }

    async fn drain(mut events: ChatEvents) -> Vec<ChatEvent> {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event.expect("stream event"));
        }
        collected
    }

    async fn assistant_messages(db: &SurrealDbClient, chat: &Chat) -> Vec<Message> {
        Message::history_for_chat(&chat.id, db)
            .await
            .expect("history")
            .into_iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect()
    }

    #[tokio::test]
    async fn sources_precede_content_and_answer_is_persisted() {
        let (url, requests) = spawn_upstream(CONTENT_STREAM, "", StatusCode::OK).await;
        let (orchestrator, db) = orchestrator(url).await;
        let chat = new_chat(&db).await;
        link_sky_collection(&db, &chat).await;

        let events = orchestrator
            .start(request(&chat, "what color is the sky", false))
            .await
            .expect("stream starts");
        let events = drain(events).await;

        let ChatEvent::Sources(sources) = &events[0] else {
            panic!("first event must be sources, got {:?}", events[0]);
        };
        assert_eq!(sources[0].name, "sky.txt");
        assert!(events[1..]
            .iter()
            .all(|event| matches!(event, ChatEvent::Delta(_))));
        assert_eq!(events.len(), 3);

        let sent = requests.lock().await;
        assert_eq!(sent.len(), 1);
        let system = sent[0]["messages"][0]["content"].as_str().unwrap_or_default();
        assert!(system.starts_with("You are Atlas"));
        assert!(system.contains("**Document Context:**\nThe sky is blue"));
        let tool_names: Vec<&str> = sent[0]["tools"]
            .as_array()
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t["function"]["name"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(
            tool_names,
            vec!["search_documents", "calculator", "get_current_date"]
        );
        assert_eq!(sent[0]["messages"][1]["content"], "what color is the sky");

        let stored = assistant_messages(&db, &chat).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "The sky is blue.");

        let chat = Chat::get(&chat.id, &db).await.expect("chat");
        assert_eq!(chat.title, "what color is the sky");
    }

    #[tokio::test]
    async fn disabled_web_search_tool_call_gets_fixed_result() {
        let (url, requests) =
            spawn_upstream(TOOL_STREAM, FOLLOW_UP_STREAM, StatusCode::OK).await;
        let (orchestrator, db) = orchestrator(url).await;
        let chat = new_chat(&db).await;

        let events = orchestrator
            .start(request(&chat, "what is the weather today", false))
            .await
            .expect("stream starts");
        let events = drain(events).await;

        assert_eq!(
            events[0],
            ChatEvent::ToolCall {
                tool: "web_search".into(),
                args: json!({"query": "weather today"}),
            }
        );
        assert_eq!(
            events[1],
            ChatEvent::ToolResult {
                tool: "web_search".into(),
                result: web_search::DISABLED.into(),
            }
        );
        assert!(matches!(&events[2], ChatEvent::Delta(raw) if raw.contains("Search is off.")));
        assert_eq!(events.len(), 3);

        let sent = requests.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[1].get("tools").is_none());
        let follow_up = sent[1]["messages"].as_array().expect("messages");
        let tool_message = follow_up.last().expect("tool message");
        assert_eq!(tool_message["role"], "tool");
        assert_eq!(tool_message["tool_call_id"], "call_1");
        assert_eq!(
            follow_up[follow_up.len() - 2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"weather today\"}"
        );

        let stored = assistant_messages(&db, &chat).await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.contains("🔧 Using web_search..."));
        assert!(stored[0].content.contains(web_search::DISABLED));
        assert!(stored[0].content.ends_with("Search is off."));
    }

    #[tokio::test]
    async fn events_serialize_to_wire_frames() {
        let frame = ChatEvent::ToolResult {
            tool: "calculator".into(),
            result: "2 + 2 = 4".into(),
        }
        .to_sse_data();
        let value: Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value, json!({"type": "tool_result", "tool": "calculator", "result": "2 + 2 = 4"}));

        let raw = "{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}";
        assert_eq!(ChatEvent::Delta(raw.into()).to_sse_data(), raw);
    }

    #[tokio::test]
    async fn missing_custom_provider_fails_before_streaming() {
        let (url, requests) = spawn_upstream(CONTENT_STREAM, "", StatusCode::OK).await;
        let (orchestrator, db) = orchestrator(url).await;
        let chat = new_chat(&db).await;
        db.store_item(UserSettings::new("user-1".into(), Some("custom:missing".into())))
            .await
            .expect("store settings");

        let Err(err) = orchestrator.start(request(&chat, "hello", false)).await else {
            panic!("expected custom provider error");
        };
        assert!(matches!(err, ProviderError::CustomProviderNotFound));
        assert_eq!(err.status_code(), 404);
        assert!(requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn upstream_rate_limits_surface_as_429() {
        let (url, _) = spawn_upstream("", "", StatusCode::TOO_MANY_REQUESTS).await;
        let (orchestrator, db) = orchestrator(url).await;
        let chat = new_chat(&db).await;

        let Err(err) = orchestrator.start(request(&chat, "hello", false)).await else {
            panic!("expected rate limit error");
        };
        assert_eq!(err.status_code(), 429);
        assert!(assistant_messages(&db, &chat).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_chats_are_not_found() {
        let (url, _) = spawn_upstream(CONTENT_STREAM, "", StatusCode::OK).await;
        let (orchestrator, _db) = orchestrator(url).await;

        let Err(err) = orchestrator
            .start(ChatRequest {
                chat_id: "missing".into(),
                message: "hello".into(),
                messages: Vec::new(),
                web_search_enabled: false,
            })
            .await
        else {
            panic!("expected not found");
        };
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn answer_is_persisted_after_client_disconnects() {
        let (url, _) = spawn_upstream(CONTENT_STREAM, "", StatusCode::OK).await;
        let (orchestrator, db) = orchestrator(url).await;
        let chat = new_chat(&db).await;

        let events = orchestrator
            .start(request(&chat, "hi", false))
            .await
            .expect("stream starts");
        drop(events);

        let mut stored = Vec::new();
        for _ in 0..50 {
            stored = assistant_messages(&db, &chat).await;
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "The sky is blue.");
    }
}
