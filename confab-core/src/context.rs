// ABOUTME: Handler-facing surface bound to one task's context record.
// ABOUTME: Field accessors, reply/final_reply, suspended waits, and argument helpers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::args::{self, ArgMode};
use crate::error::EngineError;
use crate::event::{target_id_field, ConnectionId, InboundEvent};
use crate::matcher::WaitRegistry;
use crate::pipeline::Flow;
use crate::store::{ContextStore, TaskId};
use crate::traits::{MessageCodec, OutboundCaller};

/// Cache key for the argument token buffer.
pub const CACHE_MATCH: &str = "match";
/// Cache flag set when a handler wants the pipeline stopped after it returns.
pub const CACHE_BLOCK_CONTINUE: &str = "block_continue";
/// Cache flag set once a handler has replied to the current event.
pub const CACHE_HAS_REPLY: &str = "has_reply";

/// Tunables the surface inherits from gateway configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Timeout applied when a wait does not specify its own
    pub default_wait_timeout: Duration,
    /// Whether message accessors render segment arrays as display strings
    pub message_as_string: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_wait_timeout: Duration::from_secs(600),
            message_as_string: true,
        }
    }
}

/// A handler's view of one live task.
///
/// Cheap to clone; all state lives in the store record keyed by the task id.
/// Every accessor is synchronous — the only suspension points are `reply`
/// delivery and the wait family.
#[derive(Clone)]
pub struct Context {
    task: TaskId,
    store: ContextStore,
    waits: WaitRegistry,
    outbound: Arc<dyn OutboundCaller>,
    codec: Arc<dyn MessageCodec>,
    config: ContextConfig,
}

impl Context {
    pub fn new(
        task: TaskId,
        store: ContextStore,
        waits: WaitRegistry,
        outbound: Arc<dyn OutboundCaller>,
        codec: Arc<dyn MessageCodec>,
        config: ContextConfig,
    ) -> Self {
        Self {
            task,
            store,
            waits,
            outbound,
            codec,
            config,
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn connection(&self) -> Result<ConnectionId, EngineError> {
        self.store.with_record(self.task, |record| record.connection)
    }

    /// The raw event that created this task.
    pub fn inbound(&self) -> Result<InboundEvent, EngineError> {
        self.store
            .with_record(self.task, |record| record.inbound().clone())
    }

    /// Snapshot of the mutable data map.
    pub fn data(&self) -> Result<Map<String, Value>, EngineError> {
        self.store.with_record(self.task, |record| record.data.clone())
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.store
            .with_record(self.task, |record| record.data.get(name).cloned())
            .ok()
            .flatten()
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), EngineError> {
        self.store.with_record(self.task, |record| {
            record.data.insert(name.to_string(), value);
        })
    }

    pub fn user_id(&self) -> Option<i64> {
        self.get_field("user_id").and_then(|v| v.as_i64())
    }

    pub fn group_id(&self) -> Option<i64> {
        self.get_field("group_id").and_then(|v| v.as_i64())
    }

    pub fn discuss_id(&self) -> Option<i64> {
        self.get_field("discuss_id").and_then(|v| v.as_i64())
    }

    /// The bot account this event belongs to.
    pub fn self_id(&self) -> Option<i64> {
        self.get_field("self_id").and_then(|v| v.as_i64())
    }

    pub fn message_type(&self) -> Option<String> {
        self.get_field("message_type")
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// The message field as stored (string or segment array).
    pub fn message(&self) -> Option<Value> {
        self.get_field("message")
    }

    /// The message rendered as display text.
    pub fn message_text(&self) -> Option<String> {
        let message = self.message()?;
        Some(self.render_message(&message))
    }

    /// Replace the message field, keeping the stored shape: if the current
    /// value is a segment array the new text is parsed to canonical form.
    pub fn set_message(&self, text: &str) -> Result<(), EngineError> {
        let keep_canonical = matches!(self.message(), Some(Value::Array(_)));
        let value = if keep_canonical {
            self.codec.to_canonical(&Value::String(text.to_string()))
        } else {
            Value::String(text.to_string())
        };
        self.set_field("message", value)
    }

    pub fn get_cache(&self, key: &str) -> Option<Value> {
        self.store
            .with_record(self.task, |record| record.cache.get(key).cloned())
            .ok()
            .flatten()
    }

    pub fn set_cache(&self, key: &str, value: Value) -> Result<(), EngineError> {
        self.store.with_record(self.task, |record| {
            record.cache.insert(key.to_string(), value);
        })
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.store
            .with_record(self.task, |record| record.parent)
            .ok()
            .flatten()
    }

    /// Send a quick-operation reply to the event this context was created
    /// from. Only message events can be replied to this way.
    pub async fn reply(&self, message: &str) -> Result<Value> {
        match self.message_type().as_deref() {
            Some("private") | Some("group") | Some("discuss") => {}
            other => anyhow::bail!(
                "reply requires a message event context (message_type: {:?})",
                other
            ),
        }
        self.set_cache(CACHE_HAS_REPLY, Value::Bool(true))?;
        let operation = json!({ "reply": message, "at_sender": false });
        self.reply_operation(operation).await
    }

    /// Send an arbitrary quick operation against the event's data.
    pub async fn reply_operation(&self, operation: Value) -> Result<Value> {
        let record = self.store.snapshot(self.task)?;
        self.outbound
            .quick_operation(record.connection, &record.data, operation)
            .await
    }

    /// Reply (if `message` is non-empty), then signal the pipeline to stop
    /// invoking further handlers for this event. The returned `Flow` must be
    /// propagated out of the handler.
    pub async fn final_reply(&self, message: &str) -> Result<Flow> {
        self.set_cache(CACHE_BLOCK_CONTINUE, Value::Bool(true))?;
        if !message.is_empty() {
            self.reply(message).await?;
        }
        Ok(Flow::Interrupt)
    }

    /// Park this task until the same conversation sends its next message.
    ///
    /// Sends `prompt` first when non-empty. The correlation key is
    /// `user_id`, `self_id`, `message_type`, and the target-id field for the
    /// current message type, all captured from this context's data. On
    /// expiry the error carries `timeout_prompt` (when non-empty) for the
    /// handler to forward to the user.
    pub async fn wait_message(
        &self,
        prompt: &str,
        timeout: Option<Duration>,
        timeout_prompt: &str,
    ) -> Result<String> {
        let data = self.data()?;

        let mut missing: Vec<String> = ["user_id", "message", "self_id"]
            .iter()
            .filter(|field| !data.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        let message_type = data.get("message_type").and_then(Value::as_str);
        let target = message_type.and_then(target_id_field);
        match (message_type, target) {
            (None, _) => missing.push("message_type".to_string()),
            (Some(kind), None) => missing.push(format!("target id field for {kind:?}")),
            _ => {}
        }
        if !missing.is_empty() {
            return Err(EngineError::MissingCorrelationFields { missing }.into());
        }
        let target = target.expect("target checked above");

        if !prompt.is_empty() {
            self.reply(prompt).await?;
        }

        let fields: Vec<String> = ["user_id", "self_id", "message_type", target]
            .iter()
            .map(|field| field.to_string())
            .collect();
        let timeout = timeout.unwrap_or(self.config.default_wait_timeout);
        match self.waits.wait(self.task, &data, &fields, timeout).await {
            Ok(matched) => {
                let message = matched.get("message").cloned().unwrap_or_default();
                Ok(self.render_message(&message))
            }
            Err(EngineError::WaitTimeout { .. }) if !timeout_prompt.is_empty() => {
                Err(EngineError::WaitTimeout {
                    timeout_prompt: Some(timeout_prompt.to_string()),
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Consume the next buffered argument token, waiting for input if the
    /// buffer is empty.
    pub async fn next_arg(&self, prompt: &str) -> Result<Value> {
        args::take(self, ArgMode::First, prompt).await
    }

    /// Consume the first buffered token that parses as a number.
    pub async fn num_arg(&self, prompt: &str) -> Result<Value> {
        args::take(self, ArgMode::Numeric, prompt).await
    }

    /// All remaining buffered tokens as one string.
    pub async fn full_arg(&self, prompt: &str) -> Result<Value> {
        args::take(self, ArgMode::All, prompt).await
    }

    /// Mode-by-name variant of the argument helpers.
    pub async fn get_args(&self, mode: &str, prompt: &str) -> Result<Value> {
        let mode: ArgMode = mode.parse()?;
        args::take(self, mode, prompt).await
    }

    /// Fork a child context inheriting this one's current state.
    ///
    /// The child must be destroyed by whoever drives it; the pipeline only
    /// tears down contexts it created itself.
    pub fn fork(&self) -> Result<Context, EngineError> {
        let child = self.store.fork(self.task)?;
        let mut context = self.clone();
        context.task = child;
        Ok(context)
    }

    /// Release this task's record. Idempotent.
    pub fn destroy(&self) {
        self.store.destroy(self.task);
    }

    fn render_message(&self, message: &Value) -> String {
        match message {
            Value::String(text) => text.clone(),
            other if self.config.message_as_string => self.codec.to_display(other),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventClass;
    use crate::testing::{NullCodec, RecordingCaller};

    fn context_with(payload: Value) -> (Context, Arc<RecordingCaller>) {
        let store = ContextStore::new();
        let waits = WaitRegistry::new();
        let outbound = Arc::new(RecordingCaller::new());
        let task = store.allocate_id();
        store
            .create(
                task,
                InboundEvent::new(ConnectionId(1), EventClass::Message, payload),
            )
            .unwrap();
        let context = Context::new(
            task,
            store,
            waits,
            outbound.clone(),
            Arc::new(NullCodec),
            ContextConfig::default(),
        );
        (context, outbound)
    }

    fn private_message(text: &str) -> Value {
        json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 100,
            "self_id": 9,
            "message": text
        })
    }

    #[test]
    fn test_field_accessors() {
        let (context, _) = context_with(private_message("hi"));
        assert_eq!(context.user_id(), Some(100));
        assert_eq!(context.self_id(), Some(9));
        assert_eq!(context.message_type().as_deref(), Some("private"));
        assert_eq!(context.group_id(), None);
        assert_eq!(context.message_text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_set_field_visible_in_data() {
        let (context, _) = context_with(private_message("hi"));
        context.set_field("group_id", Value::from(55)).unwrap();
        assert_eq!(context.group_id(), Some(55));
        assert_eq!(context.data().unwrap().get("group_id"), Some(&Value::from(55)));
    }

    #[tokio::test]
    async fn test_reply_marks_cache_and_calls_outbound() {
        let (context, outbound) = context_with(private_message("hi"));
        context.reply("hello back").await.unwrap();

        assert_eq!(context.get_cache(CACHE_HAS_REPLY), Some(Value::Bool(true)));
        let ops = outbound.quick_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].1.get("reply"), Some(&Value::from("hello back")));
    }

    #[tokio::test]
    async fn test_reply_rejected_for_non_message_context() {
        let (context, outbound) = context_with(json!({
            "post_type": "notice",
            "notice_type": "group_increase",
            "self_id": 9
        }));
        assert!(context.reply("nope").await.is_err());
        assert!(outbound.quick_operations().is_empty());
    }

    #[tokio::test]
    async fn test_final_reply_sets_block_flag_and_interrupts() {
        let (context, _) = context_with(private_message("hi"));
        let flow = context.final_reply("done").await.unwrap();
        assert_eq!(flow, Flow::Interrupt);
        assert_eq!(
            context.get_cache(CACHE_BLOCK_CONTINUE),
            Some(Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_final_reply_with_empty_message_skips_reply() {
        let (context, outbound) = context_with(private_message("hi"));
        let flow = context.final_reply("").await.unwrap();
        assert_eq!(flow, Flow::Interrupt);
        assert!(outbound.quick_operations().is_empty());
    }

    #[tokio::test]
    async fn test_wait_message_missing_fields_is_contract_error() {
        let (context, _) = context_with(json!({
            "post_type": "message",
            "message_type": "private",
            "self_id": 9,
            "message": "hi"
        }));
        let err = context.wait_message("", None, "").await.unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(
            engine_err,
            EngineError::MissingCorrelationFields { missing } if missing == &vec!["user_id".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_wait_message_unknown_target_type_is_contract_error() {
        let (context, _) = context_with(json!({
            "post_type": "message",
            "message_type": "channel",
            "user_id": 1,
            "self_id": 9,
            "message": "hi"
        }));
        let err = context.wait_message("", None, "").await.unwrap_err();
        assert!(err
            .downcast_ref::<EngineError>()
            .is_some_and(|e| matches!(e, EngineError::MissingCorrelationFields { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_message_timeout_carries_prompt() {
        let (context, _) = context_with(private_message("hi"));
        let err = context
            .wait_message("", Some(Duration::from_secs(1)), "took too long")
            .await
            .unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(
            engine_err,
            EngineError::WaitTimeout { timeout_prompt: Some(p) } if p == "took too long"
        ));
    }

    #[test]
    fn test_fork_creates_independent_context() {
        let (context, _) = context_with(private_message("hi"));
        context.set_cache("note", Value::from("parent")).unwrap();

        let child = context.fork().unwrap();
        assert_eq!(child.parent(), Some(context.task()));
        assert_eq!(child.get_cache("note"), Some(Value::from("parent")));

        child.set_field("user_id", Value::from(777)).unwrap();
        assert_eq!(context.user_id(), Some(100));

        child.destroy();
        assert_eq!(context.user_id(), Some(100));
    }
}
