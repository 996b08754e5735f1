//! Lifecycle hooks bound to transaction phases.
//!
//! # Invariants
//! - Hooks of one phase run in registration order.
//! - A failing hook is logged and ignored unless it opted into
//!   [`LifecycleHook::propagate_failures`].

use crate::context::OperationId;
use crate::error::CrudResult;
use crate::model::method::Method;
use crate::model::record::Record;
use log::warn;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Transaction phase a hook fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the transaction begins.
    BeforeTransaction,
    /// After persist/flush, before commit.
    DuringTransaction,
    /// After commit.
    AfterTransaction,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeTransaction => "before_transaction",
            Self::DuringTransaction => "during_transaction",
            Self::AfterTransaction => "after_transaction",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook sees besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub phase: Phase,
    pub method: Method,
    pub type_name: &'a str,
    pub operation_id: OperationId,
}

type HookFn = dyn Fn(&HookContext<'_>, &mut Record) -> CrudResult<()> + Send + Sync;

/// Callback registered on a record type for one phase.
#[derive(Clone)]
pub struct LifecycleHook {
    name: String,
    phase: Phase,
    methods: Option<BTreeSet<Method>>,
    propagate: bool,
    callback: Arc<HookFn>,
}

impl LifecycleHook {
    pub fn new<F>(name: impl Into<String>, phase: Phase, callback: F) -> Self
    where
        F: Fn(&HookContext<'_>, &mut Record) -> CrudResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            phase,
            methods: None,
            propagate: false,
            callback: Arc::new(callback),
        }
    }

    /// Restricts the hook to the given methods.
    pub fn only_on(mut self, methods: &[Method]) -> Self {
        self.methods = Some(methods.iter().copied().collect());
        self
    }

    /// Makes a hook failure fail the surrounding operation.
    pub fn propagate_failures(mut self) -> Self {
        self.propagate = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn propagates(&self) -> bool {
        self.propagate
    }

    pub fn applies_to(&self, phase: Phase, method: Method) -> bool {
        self.phase == phase
            && self
                .methods
                .as_ref()
                .map_or(true, |methods| methods.contains(&method))
    }
}

impl Debug for LifecycleHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHook")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("methods", &self.methods)
            .field("propagate", &self.propagate)
            .finish()
    }
}

/// Runs every hook matching `ctx.phase` and `ctx.method`.
pub fn dispatch(hooks: &[LifecycleHook], ctx: &HookContext<'_>, record: &mut Record) -> CrudResult<()> {
    for hook in hooks
        .iter()
        .filter(|hook| hook.applies_to(ctx.phase, ctx.method))
    {
        if let Err(err) = (hook.callback)(ctx, record) {
            if hook.propagates() {
                return Err(err);
            }
            warn!(
                "event=hook_failed module=service status=ignored hook={} phase={} type={} operation_id={} error={}",
                hook.name, ctx.phase, ctx.type_name, ctx.operation_id, err
            );
        }
    }
    Ok(())
}
