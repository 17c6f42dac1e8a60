//! The orchestrator: workers, per-channel leases, and the stage sequence.

use super::{Stage, prompt, validate};
use crate::bus::{MessageBus, NackDisposition};
use crate::compaction::{CompactionEngine, CompactionStrategy};
use crate::config::Config;
use crate::context::{ContextStore, ConversationTurn, Role};
use crate::directives;
use crate::error::{Error, PipelineError};
use crate::gateway::{ApprovalBroker, GatewayRegistry, ProviderRegistry};
use crate::policy::{Requester, ToolPolicyEngine, ToolRegistry};
use crate::reasoning::{Reasoner, Summarizer};
use crate::security::{SecurityGate, Verdict};
use crate::skills::{SkillMatcher, SkillRegistry};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::{ChannelId, InboundMessage, MessageStatus, OutboundMessage};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Generic internal-error text. Sent exactly once, when a message is
/// dead-lettered; transient failures before that stay invisible.
const INTERNAL_ERROR_TEXT: &str =
    "Something went wrong while processing your message. Please try again.";

/// Generic reply for structurally invalid messages. Detail (which limit was
/// breached) stays in telemetry and logs.
const INVALID_MESSAGE_TEXT: &str = "That message can't be processed.";

/// The injected seams: everything the engine talks to but does not own.
pub struct Collaborators {
    pub store: Arc<dyn ContextStore>,
    pub reasoner: Arc<dyn Reasoner>,
    pub summarizer: Arc<dyn Summarizer>,
    pub providers: Arc<dyn ProviderRegistry>,
    pub approvals: Arc<dyn ApprovalBroker>,
    pub gateways: Arc<GatewayRegistry>,
}

struct Inner {
    config: Config,
    bus: Arc<MessageBus>,
    gate: SecurityGate,
    policy: ToolPolicyEngine,
    tools: ToolRegistry,
    skills: Arc<SkillRegistry>,
    matcher: SkillMatcher,
    compactor: CompactionEngine,
    collaborators: Collaborators,
    telemetry: TelemetrySink,
    /// One mutex per channel. Held from context load through persistence so
    /// a channel's messages are strictly serialized.
    leases: Mutex<HashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Drives messages from the bus through the pipeline stages.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        tools: ToolRegistry,
        skills: Arc<SkillRegistry>,
        collaborators: Collaborators,
        telemetry: TelemetrySink,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus.clone(), telemetry.clone()));
        Self {
            inner: Arc::new(Inner {
                gate: SecurityGate::new(&config.security),
                policy: ToolPolicyEngine::new(&config.policy),
                matcher: SkillMatcher::new(&config.skills),
                compactor: CompactionEngine::new(config.compaction.clone()),
                config,
                bus,
                tools,
                skills,
                collaborators,
                telemetry,
                leases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The bus gateways enqueue into.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.inner.bus
    }

    /// Spawn the worker tasks. Each pulls from the bus until it closes.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.inner.config.pipeline.workers)
            .map(|worker| {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "pipeline worker started");
                    worker_loop(inner).await;
                    tracing::debug!(worker, "pipeline worker stopped");
                })
            })
            .collect()
    }

    /// Stop accepting messages; workers exit once the bus drains.
    pub fn shutdown(&self) {
        self.inner.bus.close();
    }

    /// Run one message through the pipeline directly, bypassing the bus.
    pub async fn process(&self, message: &InboundMessage) -> Result<OutboundMessage, Error> {
        self.inner.process(message).await
    }

    #[cfg(test)]
    fn lease_count(&self) -> usize {
        match self.inner.leases.lock() {
            Ok(leases) => leases.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    while let Some(entry) = inner.bus.dequeue().await {
        let mut message = entry.message.clone();
        message.status.advance(MessageStatus::Processing);
        match inner.process(&message).await {
            Ok(outbound) => {
                message.status.advance(MessageStatus::Done);
                inner.deliver(outbound).await;
                if let Err(error) = inner.bus.ack(entry.token) {
                    tracing::warn!(%error, "failed to ack settled message");
                }
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(message_id = %message.id, %error, "transient failure");
                match inner.bus.nack(entry.token, &error.to_string()) {
                    Ok(NackDisposition::Requeued { .. }) => {}
                    Ok(NackDisposition::DeadLettered { attempts }) => {
                        // The one and only failure response for this message.
                        message.status.advance(MessageStatus::DeadLettered);
                        inner.stage(&message, Stage::Failed);
                        tracing::error!(
                            message_id = %message.id,
                            attempts,
                            "message dead-lettered"
                        );
                        inner
                            .deliver(OutboundMessage::reply_to(&message, INTERNAL_ERROR_TEXT))
                            .await;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to nack message");
                    }
                }
            }
            Err(error) => {
                // Terminal: nothing to retry. A structurally invalid message
                // still gets a generic error reply; detail stays in the log.
                message.status.advance(MessageStatus::Failed);
                inner.stage(&message, Stage::Failed);
                tracing::warn!(message_id = %message.id, %error, "message failed terminally");
                if matches!(
                    error,
                    Error::Pipeline(PipelineError::InvalidMessage(_))
                ) {
                    inner
                        .deliver(OutboundMessage::reply_to(&message, INVALID_MESSAGE_TEXT))
                        .await;
                }
                if let Err(error) = inner.bus.ack(entry.token) {
                    tracing::warn!(%error, "failed to ack failed message");
                }
            }
        }
    }
}

impl Inner {
    async fn process(&self, message: &InboundMessage) -> Result<OutboundMessage, Error> {
        self.stage(message, Stage::Received);

        validate(message, &self.config.pipeline, &self.config.security)
            .map_err(Error::Pipeline)?;
        self.stage(message, Stage::Validated);

        let (directives, cleaned) = directives::parse(&message.text);
        self.stage(message, Stage::DirectivesParsed);

        // The gate sees the cleaned text and runs before any state is
        // touched: a rejected message leaves no trace in the context store.
        if let Verdict::Reject(kind) = self.gate.inspect(&cleaned) {
            self.telemetry.record(TelemetryEvent::SecurityRejected {
                correlation_id: message.correlation_id,
                kind,
            });
            self.stage(message, Stage::Rejected);
            tracing::warn!(
                message_id = %message.id,
                violation = %kind,
                "message rejected by security gate"
            );
            return Ok(OutboundMessage::reply_to(
                message,
                self.gate.rejection_message(),
            ));
        }
        self.stage(message, Stage::SecurityCleared);

        // Per-channel serialization starts here and covers everything up to
        // and including the save.
        let lease = self.channel_lease(&message.channel_id);
        let _guard = lease.lock().await;

        let mut context = self
            .collaborators
            .store
            .load(&message.channel_id)
            .await
            .map_err(Error::Store)?;
        self.stage(message, Stage::ContextLoaded);

        let strategy = if context.needs_summarization {
            CompactionStrategy::Progressive
        } else {
            self.compactor.strategy()
        };
        let outcome = self
            .compactor
            .compact(&context, strategy, self.collaborators.summarizer.as_ref())
            .await
            .map_err(Error::Pipeline)?;
        self.telemetry.record(TelemetryEvent::CompactionApplied {
            correlation_id: message.correlation_id,
            strategy,
            tokens_before: outcome.tokens_before,
            tokens_after: outcome.tokens_after,
            turns_dropped: outcome.turns_dropped,
            degraded: outcome.degraded,
        });
        if outcome.degraded {
            tracing::warn!(
                channel_id = %message.channel_id,
                tokens = outcome.tokens_after,
                "history exceeds budget even at the minimum turn floor"
            );
        }
        self.stage(message, Stage::Compacted);

        let requester = Requester {
            admin: self.config.policy.is_admin(message.user_id.as_deref()),
        };
        let toolset = self.policy.resolve(
            &self.tools,
            &self.gate,
            &directives,
            requester,
            self.collaborators.approvals.as_ref(),
            message.correlation_id,
            &self.telemetry,
        );
        self.stage(message, Stage::ToolsResolved);

        let snapshot = self.skills.snapshot();
        let matched = self.matcher.match_skills(
            &snapshot,
            &cleaned,
            self.collaborators.providers.as_ref(),
            message.correlation_id,
            &self.telemetry,
        );
        self.stage(message, Stage::SkillsMatched);

        let payload = prompt::assemble(
            &directives,
            &context.combined_summary(),
            outcome.turns.clone(),
            &matched,
            toolset.tools,
            &cleaned,
        );
        self.stage(message, Stage::PromptAssembled);

        let timeout = Duration::from_secs(self.config.pipeline.reasoning_timeout_secs);
        let reply = match tokio::time::timeout(
            timeout,
            self.collaborators.reasoner.invoke(&payload),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                return Err(PipelineError::Reasoning(error.to_string()).into());
            }
            Err(_elapsed) => {
                return Err(PipelineError::ReasoningTimeout {
                    timeout_secs: self.config.pipeline.reasoning_timeout_secs,
                }
                .into());
            }
        };
        self.stage(message, Stage::Dispatched);

        // Persist the compacted history plus this exchange. The user turn is
        // stored cleaned: directives are transient and never replayed.
        context.turns = outcome.turns;
        context.conversation_summary = outcome.conversation_summary;
        context.push_turn(ConversationTurn::new(Role::User, cleaned));
        context.push_turn(ConversationTurn::new(Role::Assistant, reply.text.clone()));
        context.recompute_tokens();
        context.needs_summarization =
            context.total_tokens > self.config.compaction.summary_threshold_tokens;
        self.collaborators
            .store
            .save(&context)
            .await
            .map_err(Error::Store)?;
        self.stage(message, Stage::Persisted);

        self.stage(message, Stage::Responded);
        Ok(OutboundMessage::reply_to(message, reply.text))
    }

    async fn deliver(&self, outbound: OutboundMessage) {
        let delivered = self.collaborators.gateways.deliver(&outbound).await;
        self.telemetry.record(TelemetryEvent::ResponseSent {
            correlation_id: outbound.correlation_id,
            gateway: outbound.gateway,
            delivered,
        });
    }

    fn channel_lease(&self, channel_id: &ChannelId) -> Arc<tokio::sync::Mutex<()>> {
        let mut leases = match self.leases.lock() {
            Ok(leases) => leases,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Evict leases nobody holds so the map tracks active channels, not
        // every channel ever seen.
        leases.retain(|_, lease| Arc::strong_count(lease) > 1);
        leases.entry(channel_id.clone()).or_default().clone()
    }

    fn stage(&self, message: &InboundMessage, stage: Stage) {
        self.telemetry.record(TelemetryEvent::StageReached {
            correlation_id: message.correlation_id,
            channel_id: message.channel_id.to_string(),
            stage,
        });
    }
}
