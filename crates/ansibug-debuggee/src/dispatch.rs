use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ansibug_dap::types::{OutputEventBody, SetBreakpointsArguments, SetBreakpointsResponseBody};
use ansibug_dap::{ClientMessage, Command, Request, Response};
use anyhow::anyhow;

use crate::debugger::Shared;
use crate::path_mapping::DebugConfiguration;
use crate::strategy::DebugStrategy;

impl Shared {
    /// Handle one client message. Failures are reported to the client when
    /// the message was a request and logged otherwise.
    pub(crate) fn dispatch(&self, message: ClientMessage) {
        let request = match &message {
            ClientMessage::Request(request) => Some((request.seq, request.command.name())),
            ClientMessage::Output(_) => None,
        };
        tracing::debug!(target: "ansibug.dap", ?request, "processing message");

        let error = match panic::catch_unwind(AssertUnwindSafe(|| self.handle(message))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
        };

        match request {
            Some((seq, command)) => {
                tracing::error!(target: "ansibug.dap", seq, command, error = %error, "request failed");
                self.send(Response::error(seq, command, error));
            }
            None => {
                tracing::error!(target: "ansibug.dap", error = %error, "failed to process event");
            }
        }
    }

    fn handle(&self, message: ClientMessage) -> anyhow::Result<()> {
        match message {
            ClientMessage::Request(request) => self.handle_request(request),
            ClientMessage::Output(body) => {
                self.apply_debug_configuration(&body);
                Ok(())
            }
        }
    }

    fn handle_request(&self, Request { seq, command }: Request) -> anyhow::Result<()> {
        let name = command.name();
        let response = match command {
            Command::ConfigurationDone => {
                self.send(Response::success(seq, name, None));
                self.connection.mark_configured();
                return Ok(());
            }
            Command::SetBreakpoints(args) => {
                Response::with_body(seq, name, &self.set_breakpoints(&args))?
            }
            Command::Continue(args) => {
                Response::with_body(seq, name, &self.strategy()?.continue_request(&args)?)?
            }
            Command::Evaluate(args) => {
                Response::with_body(seq, name, &self.strategy()?.evaluate(&args)?)?
            }
            Command::Next(args) => {
                self.strategy()?.step_over(&args)?;
                Response::success(seq, name, None)
            }
            Command::Scopes(args) => {
                Response::with_body(seq, name, &self.strategy()?.get_scopes(&args)?)?
            }
            Command::SetVariable(args) => {
                Response::with_body(seq, name, &self.strategy()?.set_variable(&args)?)?
            }
            Command::StackTrace(args) => {
                Response::with_body(seq, name, &self.strategy()?.get_stacktrace(&args)?)?
            }
            Command::StepIn(args) => {
                self.strategy()?.step_in(&args)?;
                Response::success(seq, name, None)
            }
            Command::StepOut(args) => {
                self.strategy()?.step_out(&args)?;
                Response::success(seq, name, None)
            }
            Command::Threads => Response::with_body(seq, name, &self.strategy()?.get_threads()?)?,
            Command::Variables(args) => {
                Response::with_body(seq, name, &self.strategy()?.get_variables(&args)?)?
            }
        };
        self.send(response);
        Ok(())
    }

    fn strategy(&self) -> anyhow::Result<Arc<dyn DebugStrategy>> {
        self.handoff
            .wait_for_strategy()
            .ok_or_else(|| anyhow!("debug session ended before Ansible attached"))
    }

    fn set_breakpoints(&self, args: &SetBreakpointsArguments) -> SetBreakpointsResponseBody {
        let client_path = args.source.path.clone().unwrap_or_default();
        let runtime_path = self.debug_config.read().to_runtime_path(&client_path);
        let breakpoints = self.breakpoints.set_breakpoints(
            &client_path,
            &runtime_path,
            &args.source,
            &args.requested_breakpoints(),
            args.source_modified,
        );
        SetBreakpointsResponseBody { breakpoints }
    }

    fn apply_debug_configuration(&self, body: &OutputEventBody) {
        let Some(config) = DebugConfiguration::from_output_event(body) else {
            tracing::debug!(
                target: "ansibug.dap",
                category = ?body.category,
                "ignoring output event"
            );
            return;
        };
        tracing::info!(
            target: "ansibug.debuggee",
            path_mappings = config.path_mappings.len(),
            "received debug configuration"
        );
        *self.debug_config.write() = config;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
