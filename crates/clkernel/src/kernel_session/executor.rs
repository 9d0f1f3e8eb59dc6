//
// executor.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! The shell executor: runs `execute_request`s strictly one at a time, in
//! arrival order.

use std::panic::AssertUnwindSafe;

use async_channel::Receiver;
use clshared::jupyter_message::JupyterMessageHeader;
use clshared::kernel_status::{ExecutionState, KernelStatus};
use clshared::message_content::{
    DisplayData, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest, ExecuteResult,
    StreamContent,
};
use futures::FutureExt;
use serde_json::{json, Map, Value};

use super::KernelSession;
use crate::backend::{OutputEvent, OutputSink};
use crate::error::EvaluationError;
use crate::wire_message::WireMessage;

/// Where the output of one execution goes.
struct OutputTarget<'a> {
    session: &'a str,
    parent: &'a JupyterMessageHeader,
    execution_count: u32,
    silent: bool,
}

impl KernelSession {
    pub(super) async fn run_executor(&self, requests: Receiver<WireMessage>) {
        loop {
            let request = tokio::select! {
                _ = self.shutdown.wait() => break,
                request = requests.recv() => match request {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };

            // Run this request and everything that queued up behind it
            let mut next = Some(request);
            while let Some(request) = next {
                if !self.wait_until_running().await {
                    log::debug!("Shell executor stopped");
                    return;
                }
                self.execute(request).await;
                next = self.state.lock().await.execution_queue.next_request();
            }
        }
        log::debug!("Shell executor stopped");
    }

    /// Wait while a restart or shutdown is tearing the backend down. Returns
    /// false if the kernel shuts down instead.
    async fn wait_until_running(&self) -> bool {
        let mut running = self.state.lock().await.watch_running();
        tokio::select! {
            _ = self.shutdown.wait() => false,
            opened = running.wait_for(|running| *running) => opened.is_ok(),
        }
    }

    /// Run one `execute_request`: busy, input, output, idle, then the reply.
    async fn execute(&self, msg: WireMessage) {
        let content: ExecuteRequest = match serde_json::from_value(msg.content.clone()) {
            Ok(content) => content,
            Err(err) => {
                // Content was checked before queueing; this can't happen
                log::error!("Dropping malformed execute_request: {}", err);
                return;
            }
        };

        let (session, execution_count) = {
            let mut state = self.state.lock().await;
            state.set_status(KernelStatus::Busy, Some(format!("executing {}", msg.header.msg_id)));
            state.begin_evaluation(&msg.header.msg_id);
            let count = if content.counts() {
                state.take_execution_count()
            } else {
                state.last_execution_count()
            };
            (state.session_id.clone(), count)
        };

        self.iopub
            .status(&session, Some(&msg.header), ExecutionState::Busy);

        let target = OutputTarget {
            session: &session,
            parent: &msg.header,
            execution_count,
            silent: content.silent,
        };

        if !content.silent {
            self.iopub.publish(
                &session,
                Some(&msg.header),
                "execute_input",
                &ExecuteInput {
                    code: content.code.clone(),
                    execution_count,
                },
            );
        }

        let outcome = if content.code.trim().is_empty() {
            Ok(())
        } else {
            self.run_backend(&content.code, &target).await
        };

        let mut aborted = vec![];
        let reply = match outcome {
            Ok(()) => {
                let expressions = self.evaluate_expressions(&content.user_expressions).await;
                ExecuteReply::ok(execution_count, expressions)
            }
            Err(err) => {
                log::info!(
                    "[session {}] Execution {} failed: {}: {}",
                    session,
                    msg.header.msg_id,
                    err.ename,
                    err.evalue
                );
                let error = ErrorContent::from(err);
                if !content.silent {
                    self.iopub.publish(&session, Some(&msg.header), "error", &error);
                }
                if content.stop_on_error {
                    aborted = self.state.lock().await.execution_queue.drain_pending();
                }
                ExecuteReply::error(execution_count, error)
            }
        };

        self.iopub
            .status(&session, Some(&msg.header), ExecutionState::Idle);
        self.finish(&session, &msg, &reply).await;

        for request in aborted {
            self.abort(&session, &request, execution_count).await;
        }
    }

    /// Answer a request that was queued behind a failed execution without
    /// running it.
    async fn abort(&self, session: &str, msg: &WireMessage, execution_count: u32) {
        log::debug!(
            "[session {}] Aborting request {}",
            session,
            msg.header.msg_id
        );
        self.iopub
            .status(session, Some(&msg.header), ExecutionState::Busy);
        self.iopub
            .status(session, Some(&msg.header), ExecutionState::Idle);
        self.finish(session, msg, &ExecuteReply::aborted(execution_count))
            .await;
    }

    async fn finish(&self, session: &str, msg: &WireMessage, reply: &ExecuteReply) {
        {
            let mut state = self.state.lock().await;
            state.end_evaluation();
            if state.status == KernelStatus::Busy {
                state.set_status(KernelStatus::Idle, None);
            }
        }
        if let Err(err) = self.reply(&self.shell, session, msg, "execute_reply", reply) {
            log::error!("[session {}] Cannot send execute_reply: {}", session, err);
        }
    }

    /// Run code in the backend, forwarding its output to iopub as it is
    /// produced.
    async fn run_backend(&self, code: &str, target: &OutputTarget<'_>) -> Result<(), EvaluationError> {
        let (sink, events) = OutputSink::channel();
        let execution = AssertUnwindSafe(self.backend.execute(code, &sink)).catch_unwind();
        tokio::pin!(execution);

        let result = loop {
            tokio::select! {
                biased;
                event = events.recv() => {
                    if let Ok(event) = event {
                        self.forward(event, target);
                    }
                }
                result = &mut execution => break result,
            }
        };

        // Output pushed just before the backend returned
        while let Ok(event) = events.try_recv() {
            self.forward(event, target);
        }

        match result {
            Ok(result) => result,
            Err(_) => {
                log::error!("[session {}] Execution backend panicked", target.session);
                Err(EvaluationError::new(
                    "BackendPanic",
                    "the execution backend panicked",
                ))
            }
        }
    }

    /// Publish one output event.
    fn forward(&self, event: OutputEvent, target: &OutputTarget<'_>) {
        if target.silent {
            return;
        }
        let parent = Some(target.parent);
        match event {
            OutputEvent::Stream { name, text } => {
                self.iopub
                    .publish(target.session, parent, "stream", &StreamContent { name, text });
            }
            OutputEvent::Display(object) => {
                let bundle = self.renderers.render(&object);
                self.iopub.publish(
                    target.session,
                    parent,
                    "display_data",
                    &DisplayData {
                        data: bundle.data,
                        metadata: bundle.metadata,
                    },
                );
            }
            OutputEvent::Result(object) => {
                let bundle = self.renderers.render(&object);
                self.iopub.publish(
                    target.session,
                    parent,
                    "execute_result",
                    &ExecuteResult {
                        execution_count: target.execution_count,
                        data: bundle.data,
                        metadata: bundle.metadata,
                    },
                );
            }
        }
    }

    /// Evaluate the `user_expressions` of a successful request.
    async fn evaluate_expressions(&self, expressions: &Map<String, Value>) -> Map<String, Value> {
        let mut results = Map::new();
        for (name, expression) in expressions {
            let result = match expression.as_str() {
                Some(expression) => match self.backend.evaluate(expression).await {
                    Ok(object) => {
                        let bundle = self.renderers.render(&object);
                        json!({
                            "status": "ok",
                            "data": bundle.data,
                            "metadata": bundle.metadata,
                        })
                    }
                    Err(err) => json!({
                        "status": "error",
                        "ename": err.ename,
                        "evalue": err.evalue,
                        "traceback": err.traceback,
                    }),
                },
                None => json!({
                    "status": "error",
                    "ename": "TypeError",
                    "evalue": "user expressions must be strings",
                    "traceback": [],
                }),
            };
            results.insert(name.clone(), result);
        }
        results
    }
}
