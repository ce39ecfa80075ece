// ABOUTME: Event dispatch pipeline: ordered handler invocation with interrupt short-circuit.
// ABOUTME: Offers each event to the wait table first, then runs handlers under fresh task contexts.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::Value;

use crate::context::{Context, ContextConfig, CACHE_BLOCK_CONTINUE};
use crate::error::EngineError;
use crate::event::{EventClass, InboundEvent};
use crate::matcher::WaitRegistry;
use crate::metrics;
use crate::store::{ContextStore, TaskId};
use crate::traits::{MessageCodec, OutboundCaller};

/// What a handler tells the pipeline to do after it returns.
///
/// `Interrupt` is the expected, handler-triggered stop signal; it is a value
/// flowing through the return path, never an error, and it never escapes the
/// pipeline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Let the remaining handlers run
    Continue,
    /// Stop dispatching this event after the current handler
    Interrupt,
}

/// Terminal state of one event's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Every registered handler ran
    Completed,
    /// A handler short-circuited the rest
    Interrupted,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Flow>> + Send>>;
type HandlerFn = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

struct RegisteredHandler {
    name: String,
    class: EventClass,
    func: HandlerFn,
}

/// Dispatches inbound events to registered handlers in registration order.
///
/// Clone-able handle over shared interior state. Each handler runs under its
/// own freshly created task context, which is destroyed when the handler
/// returns. A handler parked in a conversation wait simply hasn't returned
/// yet; its context persists until the wait resolves or expires and the
/// handler finishes.
#[derive(Clone)]
pub struct Dispatcher {
    store: ContextStore,
    waits: WaitRegistry,
    outbound: Arc<dyn OutboundCaller>,
    codec: Arc<dyn MessageCodec>,
    config: ContextConfig,
    handlers: Arc<Mutex<Vec<RegisteredHandler>>>,
}

impl Dispatcher {
    pub fn new(
        outbound: Arc<dyn OutboundCaller>,
        codec: Arc<dyn MessageCodec>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store: ContextStore::new(),
            waits: WaitRegistry::new(),
            outbound,
            codec,
            config,
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> ContextStore {
        self.store.clone()
    }

    pub fn waits(&self) -> WaitRegistry {
        self.waits.clone()
    }

    /// Register a handler for one event class. Handlers run in registration
    /// order, which is the only ordering guarantee they get.
    pub fn register<F, Fut>(&self, class: EventClass, name: impl Into<String>, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        let func: HandlerFn = Arc::new(move |context| Box::pin(handler(context)));
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .push(RegisteredHandler {
                name: name.into(),
                class,
                func,
            });
    }

    pub fn on_message<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        self.register(EventClass::Message, name, handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .len()
    }

    /// Build the handler surface for an existing task.
    pub fn context_for(&self, task: TaskId) -> Context {
        Context::new(
            task,
            self.store.clone(),
            self.waits.clone(),
            self.outbound.clone(),
            self.codec.clone(),
            self.config.clone(),
        )
    }

    /// Process one inbound event to its terminal state.
    ///
    /// The event is first offered to the wait table (possibly resuming a
    /// parked conversation), then dispatched to handlers regardless — a
    /// reply that resumes a conversation is also a new message in the
    /// stream.
    pub async fn dispatch(&self, event: InboundEvent) -> EventOutcome {
        self.offer(&event);
        self.run_handlers(event).await
    }

    /// Offer-then-spawn variant for transport read loops: the wait table
    /// sees events strictly in arrival order, while handler execution (which
    /// may park for minutes) proceeds off the loop.
    pub fn dispatch_detached(&self, event: InboundEvent) {
        self.offer(&event);
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run_handlers(event).await;
        });
    }

    /// Resolve the earliest pending wait matching this event, if any.
    pub fn offer(&self, event: &InboundEvent) -> Option<TaskId> {
        metrics::record_event(event.class);
        let data = event.extract_data();
        let resumed = self.waits.offer(&data);
        if let Some(task) = resumed {
            tracing::debug!(event_id = %event.id, %task, "Event resumed a parked conversation");
        }
        resumed
    }

    async fn run_handlers(&self, event: InboundEvent) -> EventOutcome {
        let handlers: Vec<(String, HandlerFn)> = {
            let registry = self.handlers.lock().expect("handler registry lock poisoned");
            registry
                .iter()
                .filter(|handler| handler.class == event.class)
                .map(|handler| (handler.name.clone(), handler.func.clone()))
                .collect()
        };
        tracing::trace!(
            event_id = %event.id,
            class = %event.class,
            handlers = handlers.len(),
            "Dispatching event"
        );

        for (name, func) in handlers {
            let task = self.store.allocate_id();
            if let Err(err) = self.store.create(task, event.clone()) {
                tracing::error!(event_id = %event.id, error = %err, "Context allocation defect; dropping event");
                return EventOutcome::Completed;
            }
            metrics::record_handler(&name);

            let context = self.context_for(task);
            let result = func(context.clone()).await;
            let blocked = matches!(
                context.get_cache(CACHE_BLOCK_CONTINUE),
                Some(Value::Bool(true))
            );
            self.store.destroy(task);

            match result {
                Ok(Flow::Interrupt) => {
                    metrics::record_interrupt();
                    tracing::debug!(event_id = %event.id, handler = %name, "Pipeline interrupted");
                    return EventOutcome::Interrupted;
                }
                Ok(Flow::Continue) if blocked => {
                    metrics::record_interrupt();
                    tracing::debug!(event_id = %event.id, handler = %name, "Pipeline interrupted via block flag");
                    return EventOutcome::Interrupted;
                }
                Ok(Flow::Continue) => {}
                Err(err) => {
                    let defect = err
                        .downcast_ref::<EngineError>()
                        .is_some_and(EngineError::is_store_defect);
                    if defect {
                        tracing::error!(
                            event_id = %event.id,
                            handler = %name,
                            error = %err,
                            "Store consistency defect; dropping this event's remaining handlers"
                        );
                        return EventOutcome::Completed;
                    }
                    tracing::warn!(
                        event_id = %event.id,
                        handler = %name,
                        error = %err,
                        "Handler failed; continuing with next handler"
                    );
                }
            }
        }
        EventOutcome::Completed
    }

    /// Abrupt teardown: drop all pending waits and live contexts without
    /// resuming anything.
    pub fn shutdown(&self) {
        let waits = self.waits.drain();
        let contexts = self.store.clear();
        tracing::info!(
            pending_waits = waits,
            live_contexts = contexts,
            "Engine state drained"
        );
    }
}
