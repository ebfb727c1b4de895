//! Callee module - registration and invocation bookkeeping for one session.
//!
//! [`Callee`] correlates outgoing REGISTER/UNREGISTER requests with the
//! router's acknowledgements, routes INVOCATION and INTERRUPT messages to
//! the registered operations, and tears everything down in one pass when the
//! connection goes away.
//!
//! Shared state lives in four independently synchronized tables:
//! - pending REGISTER requests ([`CorrelationTable`])
//! - pending UNREGISTER requests ([`CorrelationTable`])
//! - active registrations ([`RegistrationRegistry`])
//! - cancellable in-flight invocations ([`InvocationTracker`])

mod invocations;
mod pending;
mod proxy;
mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

pub use invocations::InvocationTracker;
pub use pending::{Completion, CorrelationTable, PendingRequest, PendingResponse};
pub(crate) use proxy::encode_message;
pub use proxy::{MessageProxy, ServerProxy};
pub use registry::RegistrationRegistry;

use crate::error::{
    CalleeError, CloseInfo, ConnectionLoss, Result, WampError, NO_SUCH_REGISTRATION,
};
use crate::handler::{InvocationCallback, RpcOperation};
use crate::protocol::{
    codes, Dict, InterruptDetails, InvocationDetails, RegisterOptions, RegistrationId, RequestId,
    WampMessage,
};
use crate::session::{ConnectionListener, ConnectionMonitor};
use crate::uri::{UriMode, UriValidator};

/// Callee behaviour switches.
#[derive(Debug, Clone)]
pub struct CalleeConfig {
    /// Validate procedure URIs with the strict grammar (`[0-9a-z_]` components).
    pub strict_uris: bool,
    /// Answer invocations for unknown registrations with
    /// `wamp.error.no_such_registration` instead of dropping them.
    pub reply_to_unknown_invocations: bool,
}

impl Default for CalleeConfig {
    fn default() -> Self {
        Self {
            strict_uris: true,
            reply_to_unknown_invocations: false,
        }
    }
}

/// Callee side of one WAMP session.
pub struct Callee {
    proxy: Arc<dyn ServerProxy>,
    monitor: Arc<ConnectionMonitor>,
    config: CalleeConfig,
    uris: UriValidator,
    pending_registers: CorrelationTable<Arc<dyn RpcOperation>, Registration>,
    pending_unregisters: CorrelationTable<RegistrationId, ()>,
    registrations: RegistrationRegistry,
    invocations: Arc<InvocationTracker>,
}

impl Callee {
    /// Create a callee with the default config and subscribe it to `monitor`.
    pub fn new(proxy: Arc<dyn ServerProxy>, monitor: Arc<ConnectionMonitor>) -> Arc<Self> {
        Self::with_config(proxy, monitor, CalleeConfig::default())
    }

    /// Create a callee and subscribe it to `monitor`.
    pub fn with_config(
        proxy: Arc<dyn ServerProxy>,
        monitor: Arc<ConnectionMonitor>,
        config: CalleeConfig,
    ) -> Arc<Self> {
        let uris = if config.strict_uris {
            UriValidator::strict()
        } else {
            UriValidator::loose()
        };

        let callee = Arc::new(Self {
            proxy,
            monitor: monitor.clone(),
            config,
            uris,
            pending_registers: CorrelationTable::new(),
            pending_unregisters: CorrelationTable::new(),
            registrations: RegistrationRegistry::new(),
            invocations: Arc::new(InvocationTracker::new()),
        });

        let listener: Weak<dyn ConnectionListener> = Arc::downgrade(&callee) as _;
        monitor.subscribe(listener);
        callee
    }

    /// Register `operation` under its procedure URI.
    ///
    /// Fails immediately with `SessionNotEstablished` when disconnected and
    /// with `InvalidUri` when the procedure doesn't match the grammar chosen
    /// by `options.match_policy`. Otherwise returns a future resolving to the
    /// [`Registration`] once the router acknowledges.
    pub fn register<O: RpcOperation>(
        &self,
        operation: O,
        options: RegisterOptions,
    ) -> Result<PendingResponse<Registration>> {
        self.register_operation(Arc::new(operation), options)
    }

    /// [`register`](Self::register) for an already shared operation.
    pub fn register_operation(
        &self,
        operation: Arc<dyn RpcOperation>,
        options: RegisterOptions,
    ) -> Result<PendingResponse<Registration>> {
        if !self.monitor.is_connected() {
            return Err(CalleeError::SessionNotEstablished);
        }

        let procedure = operation.procedure().to_owned();
        let mode = UriMode::for_match_policy(options.match_policy.as_deref());
        if !self.uris.is_valid(&procedure, mode) {
            return Err(CalleeError::InvalidUri(procedure));
        }

        let (request_id, response) = self.pending_registers.allocate(operation);
        if let Err(e) = self.proxy.register(request_id, &options, &procedure) {
            self.pending_registers.resolve(request_id);
            return Err(e);
        }

        // A sweep may have run before the entry was inserted.
        if !self.monitor.is_connected() {
            if let Some(entry) = self.pending_registers.resolve(request_id) {
                entry.fail(CalleeError::SessionNotEstablished);
            }
        }

        tracing::debug!(request_id, procedure = %procedure, "REGISTER sent");
        Ok(response)
    }

    /// Router acknowledged REGISTER `request_id`.
    pub fn on_registered(self: &Arc<Self>, request_id: RequestId, registration_id: RegistrationId) {
        let Some(entry) = self.pending_registers.resolve(request_id) else {
            tracing::debug!(request_id, "Ignoring REGISTERED for unknown request");
            return;
        };

        let (operation, completion) = entry.into_parts();
        let procedure = operation.procedure().to_owned();
        self.registrations.put(registration_id, operation);

        if !self.monitor.is_connected() {
            self.registrations.remove(registration_id);
            completion.fail(CalleeError::ConnectionLost(ConnectionLoss::Error(
                "connection lost while registering".into(),
            )));
            return;
        }

        tracing::debug!(request_id, registration_id, procedure = %procedure, "Registered");
        completion.complete(Registration {
            id: registration_id,
            procedure,
            callee: self.clone(),
        });
    }

    /// Router rejected REGISTER `request_id`.
    pub fn on_register_error(
        &self,
        request_id: RequestId,
        details: Dict,
        error: &str,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) {
        match self.pending_registers.resolve(request_id) {
            Some(entry) => {
                tracing::debug!(request_id, error, "REGISTER rejected");
                entry.fail(CalleeError::Protocol(WampError::from_parts(
                    details,
                    error,
                    arguments,
                    arguments_kw,
                )));
            }
            None => tracing::debug!(request_id, "Ignoring REGISTER error for unknown request"),
        }
    }

    /// Send UNREGISTER for `registration_id`.
    pub(crate) fn unregister(&self, registration_id: RegistrationId) -> Result<PendingResponse<()>> {
        if !self.monitor.is_connected() {
            return Err(CalleeError::SessionNotEstablished);
        }

        let (request_id, response) = self.pending_unregisters.allocate(registration_id);
        if let Err(e) = self.proxy.unregister(request_id, registration_id) {
            self.pending_unregisters.resolve(request_id);
            return Err(e);
        }

        if !self.monitor.is_connected() {
            if let Some(entry) = self.pending_unregisters.resolve(request_id) {
                entry.fail(CalleeError::SessionNotEstablished);
            }
        }

        tracing::debug!(request_id, registration_id, "UNREGISTER sent");
        Ok(response)
    }

    /// Router acknowledged UNREGISTER `request_id`.
    ///
    /// Invocations still running for the registration are forgotten; their
    /// replies are still sent but nothing tracks them.
    pub fn on_unregistered(&self, request_id: RequestId) {
        let Some(entry) = self.pending_unregisters.resolve(request_id) else {
            tracing::debug!(request_id, "Ignoring UNREGISTERED for unknown request");
            return;
        };

        let registration_id = *entry.payload();
        self.registrations.remove(registration_id);
        let dropped = self.invocations.remove_all_for_registration(registration_id);
        tracing::debug!(
            request_id,
            registration_id,
            dropped_invocations = dropped.len(),
            "Unregistered"
        );
        entry.complete(());
    }

    /// Router rejected UNREGISTER `request_id`. The registration stays active.
    pub fn on_unregister_error(
        &self,
        request_id: RequestId,
        details: Dict,
        error: &str,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) {
        match self.pending_unregisters.resolve(request_id) {
            Some(entry) => {
                tracing::debug!(request_id, error, "UNREGISTER rejected");
                entry.fail(CalleeError::Protocol(WampError::from_parts(
                    details,
                    error,
                    arguments,
                    arguments_kw,
                )));
            }
            None => tracing::debug!(request_id, "Ignoring UNREGISTER error for unknown request"),
        }
    }

    /// Dispatch INVOCATION `request_id` to the operation behind `registration_id`.
    ///
    /// Returns once the operation has been started. Cancellable invocations
    /// are tracked until they reply or are interrupted.
    pub fn on_invocation(
        &self,
        request_id: RequestId,
        registration_id: RegistrationId,
        mut details: InvocationDetails,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) {
        let Some(operation) = self.registrations.get(registration_id) else {
            self.unknown_invocation(request_id, registration_id);
            return;
        };

        if details.procedure.is_none() {
            details.procedure = Some(operation.procedure().to_owned());
        }

        let callback =
            InvocationCallback::tracked(request_id, self.proxy.clone(), self.invocations.clone());
        let Some(handle) = operation.invoke(callback.clone(), details, arguments, arguments_kw)
        else {
            return;
        };

        self.invocations.track(request_id, registration_id, handle);

        // The reply or an unregister may have landed before `track`.
        if callback.is_finished() || !self.registrations.contains(registration_id) {
            self.invocations.complete(request_id);
        }
    }

    fn unknown_invocation(&self, request_id: RequestId, registration_id: RegistrationId) {
        if !self.config.reply_to_unknown_invocations {
            tracing::debug!(
                request_id,
                registration_id,
                "Dropping INVOCATION for unknown registration"
            );
            return;
        }

        tracing::debug!(
            request_id,
            registration_id,
            "Rejecting INVOCATION for unknown registration"
        );
        let sent = self.proxy.invocation_error(
            request_id,
            &Dict::new(),
            NO_SUCH_REGISTRATION,
            None,
            None,
        );
        if let Err(e) = sent {
            tracing::warn!(request_id, "Failed to send invocation error: {}", e);
        }
    }

    /// Router interrupted invocation `request_id`.
    pub fn on_interrupt(&self, request_id: RequestId, details: InterruptDetails) {
        match self.invocations.cancel(request_id) {
            Some(handle) => handle.cancel(&details),
            None => tracing::debug!(request_id, "Ignoring INTERRUPT for inactive invocation"),
        }
    }

    /// Route an inbound message to the matching handler.
    ///
    /// Returns `false` for messages that are not callee traffic.
    pub fn handle_message(self: &Arc<Self>, message: WampMessage) -> bool {
        match message {
            WampMessage::Registered {
                request,
                registration,
            } => self.on_registered(request, registration),
            WampMessage::Unregistered { request } => self.on_unregistered(request),
            WampMessage::Invocation {
                request,
                registration,
                details,
                arguments,
                arguments_kw,
            } => self.on_invocation(request, registration, details, arguments, arguments_kw),
            WampMessage::Interrupt { request, options } => self.on_interrupt(request, options),
            WampMessage::Error {
                request_type,
                request,
                details,
                error,
                arguments,
                arguments_kw,
            } => match request_type {
                codes::REGISTER => {
                    self.on_register_error(request, details, &error, arguments, arguments_kw)
                }
                codes::UNREGISTER => {
                    self.on_unregister_error(request, details, &error, arguments, arguments_kw)
                }
                _ => return false,
            },
            _ => return false,
        }
        true
    }

    fn cleanup(&self, loss: ConnectionLoss) {
        let registers = self.pending_registers.fail_all(&loss);
        let unregisters = self.pending_unregisters.fail_all(&loss);
        let registrations = self.registrations.len();
        let invocations = self.invocations.len();

        self.registrations.clear();
        self.invocations.clear();

        tracing::debug!(
            registers,
            unregisters,
            registrations,
            invocations,
            "Callee state cleared: {}",
            loss
        );
    }

    /// Number of active registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Whether `registration_id` is active.
    pub fn has_registration(&self, registration_id: RegistrationId) -> bool {
        self.registrations.contains(registration_id)
    }

    /// Number of tracked (cancellable, still running) invocations.
    pub fn tracked_invocation_count(&self) -> usize {
        self.invocations.len()
    }

    /// Whether invocation `request_id` is tracked.
    pub fn is_tracking(&self, request_id: RequestId) -> bool {
        self.invocations.contains(request_id)
    }

    /// Number of REGISTER requests awaiting a reply.
    pub fn pending_register_count(&self) -> usize {
        self.pending_registers.len()
    }

    /// Number of UNREGISTER requests awaiting a reply.
    pub fn pending_unregister_count(&self) -> usize {
        self.pending_unregisters.len()
    }
}

impl ConnectionListener for Callee {
    fn connection_broken(&self, info: &CloseInfo) {
        self.cleanup(ConnectionLoss::Broken(info.clone()));
    }

    fn connection_error(&self, message: &str) {
        self.cleanup(ConnectionLoss::Error(message.to_owned()));
    }
}

/// An acknowledged registration.
///
/// Dropping it does not unregister; call [`unregister`](Self::unregister).
pub struct Registration {
    id: RegistrationId,
    procedure: String,
    callee: Arc<Callee>,
}

impl Registration {
    /// Router-assigned registration id.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Registered procedure URI.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Send UNREGISTER; the future resolves when the router acknowledges.
    pub fn unregister(self) -> Result<PendingResponse<()>> {
        self.callee.unregister(self.id)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("procedure", &self.procedure)
            .finish()
    }
}
