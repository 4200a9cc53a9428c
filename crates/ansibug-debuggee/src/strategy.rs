//! The seam between the debugger and the live Ansible runtime.

use std::sync::Arc;

use ansibug_dap::types::{
    ContinueArguments, ContinueResponseBody, EvaluateArguments, EvaluateResponseBody,
    NextArguments, ScopesArguments, ScopesResponseBody, SetVariableArguments,
    SetVariableResponseBody, StackTraceArguments, StackTraceResponseBody, StepInArguments,
    StepOutArguments, ThreadsResponseBody, VariablesArguments, VariablesResponseBody,
};
use parking_lot::{Condvar, Mutex};

/// Runtime engine that answers the requests needing live playbook state.
///
/// Methods are called from the receive thread while the runtime keeps
/// running on its own threads, so implementations synchronise internally.
/// An `Err` is reported to the client as a failed response.
pub trait DebugStrategy: Send + Sync {
    fn evaluate(&self, args: &EvaluateArguments) -> anyhow::Result<EvaluateResponseBody>;

    fn continue_request(&self, args: &ContinueArguments) -> anyhow::Result<ContinueResponseBody>;

    fn get_scopes(&self, args: &ScopesArguments) -> anyhow::Result<ScopesResponseBody>;

    fn get_stacktrace(&self, args: &StackTraceArguments)
        -> anyhow::Result<StackTraceResponseBody>;

    fn get_threads(&self) -> anyhow::Result<ThreadsResponseBody>;

    fn get_variables(&self, args: &VariablesArguments) -> anyhow::Result<VariablesResponseBody>;

    fn set_variable(&self, args: &SetVariableArguments)
        -> anyhow::Result<SetVariableResponseBody>;

    fn step_in(&self, args: &StepInArguments) -> anyhow::Result<()>;

    fn step_out(&self, args: &StepOutArguments) -> anyhow::Result<()>;

    fn step_over(&self, args: &NextArguments) -> anyhow::Result<()>;

    /// The strategy was detached or the debugger shut down. May be called
    /// more than once.
    fn ended(&self);
}

#[derive(Default)]
struct HandoffState {
    strategy: Option<Arc<dyn DebugStrategy>>,
    session_ending: bool,
}

/// Slot for the attached strategy plus the threads waiting on it.
#[derive(Default)]
pub(crate) struct StrategyHandoff {
    state: Mutex<HandoffState>,
    changed: Condvar,
}

impl StrategyHandoff {
    /// Attach `strategy`, waiting for any previously attached one to detach.
    pub(crate) fn publish(&self, strategy: Arc<dyn DebugStrategy>) {
        let mut state = self.state.lock();
        self.changed
            .wait_while(&mut state, |state| state.strategy.is_some());
        state.strategy = Some(strategy);
        self.changed.notify_all();
    }

    pub(crate) fn unpublish(&self) -> Option<Arc<dyn DebugStrategy>> {
        let mut state = self.state.lock();
        let strategy = state.strategy.take();
        self.changed.notify_all();
        strategy
    }

    pub(crate) fn current(&self) -> Option<Arc<dyn DebugStrategy>> {
        self.state.lock().strategy.clone()
    }

    /// Block until a strategy is attached.
    ///
    /// Returns `None` if the session ends first.
    pub(crate) fn wait_for_strategy(&self) -> Option<Arc<dyn DebugStrategy>> {
        let mut state = self.state.lock();
        self.changed.wait_while(&mut state, |state| {
            state.strategy.is_none() && !state.session_ending
        });
        state.strategy.clone()
    }

    pub(crate) fn begin_session(&self) {
        self.state.lock().session_ending = false;
    }

    /// Release everyone blocked in [`Self::wait_for_strategy`].
    pub(crate) fn end_session(&self) {
        let mut state = self.state.lock();
        state.session_ending = true;
        self.changed.notify_all();
    }
}
