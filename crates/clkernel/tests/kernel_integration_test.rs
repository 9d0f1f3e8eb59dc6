//
// kernel_integration_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! End-to-end tests: a kernel on local ports and a client talking to it
//! over ZeroMQ.

#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clkernel::backend::EchoBackend;
use clkernel::digester::Digester;
use clkernel::dispatcher::{BindState, Dispatcher, ShutdownSignal};
use clkernel::server::Kernel;
use clkernel::wire_message::WireMessage;
use clshared::jupyter_message::JupyterChannel;
use clshared::kernel_status::KernelStatus;
use common::{message_types, test_config, test_options, TestClient, TestKernel};
use serde_json::json;
use tokio::time::{timeout, Instant};
use zeromq::{SocketRecv, SocketSend};

#[tokio::test(flavor = "multi_thread")]
async fn test_kernel_info() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.request("kernel_info_request", json!({}));
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;

    assert_eq!(reply.header.msg_type, "kernel_info_reply");
    assert_eq!(reply.parent_id(), Some(request.header.msg_id.as_str()));
    assert_eq!(reply.content["status"], "ok");
    assert_eq!(reply.content["protocol_version"], "5.3");
    assert_eq!(reply.content["language_info"]["name"], "echo");

    // The same request works on control
    let request = client.request("kernel_info_request", json!({}));
    client.send_control(&request).await;
    let reply = client.recv_control().await;
    assert_eq!(reply.header.msg_type, "kernel_info_reply");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_publishes_output() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("display one\ndisplay two\n42");
    client.send_shell(&request).await;

    let reply = client.recv_shell().await;
    assert_eq!(reply.header.msg_type, "execute_reply");
    assert_eq!(reply.content["status"], "ok");
    assert_eq!(reply.content["execution_count"], 1);

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    assert_eq!(
        message_types(&published),
        vec![
            "status:busy",
            "execute_input",
            "display_data",
            "display_data",
            "execute_result",
            "status:idle"
        ]
    );
    assert_eq!(published[1].content["code"], "display one\ndisplay two\n42");
    assert_eq!(published[1].content["execution_count"], 1);
    assert_eq!(published[2].content["data"]["text/plain"], "one");
    assert_eq!(published[3].content["data"]["text/plain"], "two");
    assert_eq!(published[4].content["data"]["text/plain"], "42");
    assert_eq!(published[4].content["execution_count"], 1);

    // Every published message carries the kernel's topic
    for msg in &published {
        let topic = String::from_utf8_lossy(&msg.identities[0]).to_string();
        assert!(topic.starts_with("kernel.test-kernel."), "topic {}", topic);
    }

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_output() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("print hello\neprint oops");
    client.send_shell(&request).await;
    let _ = client.recv_shell().await;

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    let streams: Vec<_> = published
        .iter()
        .filter(|msg| msg.header.msg_type == "stream")
        .map(|msg| {
            (
                msg.content["name"].as_str().unwrap().to_string(),
                msg.content["text"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        streams,
        vec![
            (String::from("stdout"), String::from("hello\n")),
            (String::from("stderr"), String::from("oops\n"))
        ]
    );

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execution_count_and_restart() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    for expected in 1..=2 {
        let request = client.execute_request("x = 1");
        client.send_shell(&request).await;
        let reply = client.recv_shell().await;
        assert_eq!(reply.content["execution_count"], expected);
    }

    // Executions that don't store history don't advance the counter
    let mut request = client.execute_request("x");
    request.content["store_history"] = json!(false);
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["execution_count"], 2);

    let old_session = kernel.session.session_id().await;
    let request = client.request("shutdown_request", json!({ "restart": true }));
    client.send_control(&request).await;
    let reply = client.recv_control().await;
    assert_eq!(reply.header.msg_type, "shutdown_reply");
    assert_eq!(reply.content["status"], "ok");
    assert_eq!(reply.content["restart"], true);

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    assert_eq!(
        message_types(&published),
        vec!["status:starting", "status:idle"]
    );
    assert_ne!(kernel.session.session_id().await, old_session);

    // The counter starts over, and the variable is gone
    let request = client.execute_request("x");
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["execution_count"], 1);
    let published = client.iopub_until_idle(&request.header.msg_id).await;
    let result = published
        .iter()
        .find(|msg| msg.header.msg_type == "execute_result")
        .expect("no execute_result");
    assert_eq!(result.content["data"]["text/plain"], "x");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_echo() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let echo = client.heartbeat(b"ping").await;
    assert_eq!(echo, vec![Bytes::from_static(b"ping")]);

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupt_long_execution() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("sleep 5000\nprint never");
    client.send_shell(&request).await;

    // Wait until the execution is under way
    loop {
        let msg = client.recv_iopub().await;
        if msg.parent_id() == Some(request.header.msg_id.as_str())
            && msg.content["execution_state"] == "busy"
        {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let interrupt = client.request("interrupt_request", json!({}));
    client.send_control(&interrupt).await;
    let reply = client.recv_control().await;
    assert_eq!(reply.header.msg_type, "interrupt_reply");
    assert_eq!(reply.content["status"], "ok");

    let reply = client.recv_shell().await;
    assert_eq!(reply.header.msg_type, "execute_reply");
    assert_eq!(reply.content["status"], "error");
    assert_eq!(reply.content["ename"], "KeyboardInterrupt");

    // The kernel is usable afterwards
    let request = client.execute_request("print again");
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["status"], "ok");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_interrupts_end_execution_once() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("sleep 5000\nprint never");
    client.send_shell(&request).await;
    let mut published = client.iopub_until_busy(&request.header.msg_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first = client.request("interrupt_request", json!({}));
    let second = client.request("interrupt_request", json!({}));
    client.send_control(&first).await;
    client.send_control(&second).await;
    for _ in 0..2 {
        let reply = client.recv_control().await;
        assert_eq!(reply.header.msg_type, "interrupt_reply");
        assert_eq!(reply.content["status"], "ok");
    }

    let reply = client.recv_shell().await;
    assert_eq!(reply.parent_id(), Some(request.header.msg_id.as_str()));
    assert_eq!(reply.content["ename"], "KeyboardInterrupt");
    published.extend(client.iopub_until_idle(&request.header.msg_id).await);

    let types = message_types(&published);
    assert_eq!(types.iter().filter(|t| *t == "status:busy").count(), 1);
    assert_eq!(types.iter().filter(|t| *t == "status:idle").count(), 1);
    assert!(!types.contains(&String::from("stream")));

    // No second reply for the same request
    assert!(timeout(Duration::from_millis(500), client.shell.recv())
        .await
        .is_err());

    // A late interrupt doesn't carry over into the next execution
    let request = client.execute_request("sleep 200\nprint again");
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["status"], "ok");
    let published = client.iopub_until_idle(&request.header.msg_id).await;
    assert_eq!(
        message_types(&published),
        vec!["status:busy", "execute_input", "stream", "status:idle"]
    );

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_during_long_execution() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("sleep 2000");
    client.send_shell(&request).await;
    client.iopub_until_busy(&request.header.msg_id).await;

    for _ in 0..3 {
        let echo = timeout(
            test_options().poll_interval * 4,
            client.heartbeat(b"still there?"),
        )
        .await
        .expect("heartbeat blocked by execution");
        assert_eq!(echo, vec![Bytes::from_static(b"still there?")]);
    }

    // Still running
    assert!(kernel.session.state.lock().await.evaluating().is_some());

    let interrupt = client.request("interrupt_request", json!({}));
    client.send_control(&interrupt).await;
    client.recv_control().await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["ename"], "KeyboardInterrupt");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_interrupts_running_execution() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.execute_request("sleep 2500\ny = leaked\nprint after-restart");
    client.send_shell(&request).await;
    client.iopub_until_busy(&request.header.msg_id).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let restart = client.request("shutdown_request", json!({ "restart": true }));
    client.send_control(&restart).await;

    // The old execution ends with an interrupt instead of running on
    let reply = client.recv_shell().await;
    assert_eq!(reply.parent_id(), Some(request.header.msg_id.as_str()));
    assert_eq!(reply.content["status"], "error");
    assert_eq!(reply.content["ename"], "KeyboardInterrupt");
    assert!(started.elapsed() < Duration::from_millis(1500));

    let reply = client.recv_control().await;
    assert_eq!(reply.header.msg_type, "shutdown_reply");
    assert_eq!(reply.content["status"], "ok");

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    assert!(!message_types(&published).contains(&String::from("stream")));
    let published = client.iopub_until_idle(&restart.header.msg_id).await;
    assert_eq!(
        message_types(&published),
        vec!["status:starting", "status:idle"]
    );

    // Nothing from the old cell survives into the new session
    let mut request = client.execute_request("print fresh");
    request.content["user_expressions"] = json!({ "y": "y" });
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["status"], "ok");
    assert_eq!(reply.content["execution_count"], 1);
    assert_eq!(reply.content["user_expressions"]["y"]["status"], "error");
    assert_eq!(reply.content["user_expressions"]["y"]["ename"], "NameError");

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    let streams: Vec<_> = published
        .iter()
        .filter(|msg| msg.header.msg_type == "stream")
        .map(|msg| msg.content["text"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(streams, vec![String::from("fresh\n")]);

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_is_complete() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let cases = [
        ("print x", "complete"),
        ("json [1,", "incomplete"),
        ("json ]", "invalid"),
    ];
    for (code, expected) in cases {
        let request = client.request("is_complete_request", json!({ "code": code }));
        client.send_shell(&request).await;
        let reply = client.recv_shell().await;
        assert_eq!(reply.header.msg_type, "is_complete_reply");
        assert_eq!(reply.content["status"], expected, "code {:?}", code);
    }

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_request() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    // Interrupts belong on control, not shell
    let request = client.request("interrupt_request", json!({}));
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.header.msg_type, "interrupt_reply");
    assert_eq!(reply.content["status"], "error");
    assert_eq!(reply.content["ename"], "UnsupportedRequest");

    let request = client.request("frobnicate_request", json!({}));
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.header.msg_type, "frobnicate_reply");
    assert_eq!(reply.content["ename"], "UnsupportedRequest");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_aborts_queued_requests() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let failing = client.execute_request("sleep 300\nfail boom");
    let queued = client.execute_request("print queued");
    client.send_shell(&failing).await;
    client.send_shell(&queued).await;

    let reply = client.recv_shell().await;
    assert_eq!(reply.parent_id(), Some(failing.header.msg_id.as_str()));
    assert_eq!(reply.content["status"], "error");
    assert_eq!(reply.content["ename"], "EchoError");
    assert_eq!(reply.content["evalue"], "boom");

    let reply = client.recv_shell().await;
    assert_eq!(reply.parent_id(), Some(queued.header.msg_id.as_str()));
    assert_eq!(reply.content["status"], "aborted");

    let published = client.iopub_until_idle(&failing.header.msg_id).await;
    assert_eq!(
        message_types(&published),
        vec!["status:busy", "execute_input", "error", "status:idle"]
    );
    let published = client.iopub_until_idle(&queued.header.msg_id).await;
    assert_eq!(message_types(&published), vec!["status:busy", "status:idle"]);

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_signature_is_dropped() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    // Sign with the wrong key
    let forger = Digester::new("hmac-sha256", b"not-the-key").unwrap();
    let forged = client.request("kernel_info_request", json!({}));
    client
        .send_shell_frames(forged.encode(&forger).unwrap())
        .await;

    let genuine = client.request("kernel_info_request", json!({}));
    client.send_shell(&genuine).await;

    // Only the genuine request is answered
    let reply = client.recv_shell().await;
    assert_eq!(reply.parent_id(), Some(genuine.header.msg_id.as_str()));
    assert!(
        timeout(Duration::from_millis(500), client.shell.recv())
            .await
            .is_err(),
        "forged request was answered"
    );

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_silent_execution() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let mut request = client.execute_request("print hidden\n7");
    request.content["silent"] = json!(true);
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["status"], "ok");

    let published = client.iopub_until_idle(&request.header.msg_id).await;
    assert_eq!(message_types(&published), vec!["status:busy", "status:idle"]);

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_user_expressions() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let mut request = client.execute_request("answer = 42");
    request.content["user_expressions"] = json!({ "a": "answer", "b": "nope" });
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;

    let expressions = &reply.content["user_expressions"];
    assert_eq!(expressions["a"]["status"], "ok");
    assert_eq!(expressions["a"]["data"]["text/plain"], "42");
    assert_eq!(expressions["b"]["status"], "error");
    assert_eq!(expressions["b"]["ename"], "NameError");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_request() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let request = client.request("shutdown_request", json!({ "restart": false }));
    client.send_control(&request).await;
    let reply = client.recv_control().await;
    assert_eq!(reply.header.msg_type, "shutdown_reply");
    assert_eq!(reply.content["restart"], false);

    // The kernel winds down on its own
    timeout(Duration::from_secs(5), kernel.task)
        .await
        .expect("kernel did not stop")
        .unwrap();
    assert_eq!(
        kernel.session.state.lock().await.status,
        KernelStatus::Stopped
    );

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_without_request() {
    let kernel = Kernel::start(
        test_config("hmac-sha256", common::TEST_KEY),
        Arc::new(EchoBackend::new()),
        test_options(),
    )
    .unwrap();
    kernel
        .wait_until_bound(Duration::from_secs(10))
        .await
        .unwrap();

    let session = kernel.session().clone();
    kernel.stop().await;
    assert_eq!(
        session.state.lock().await.status,
        KernelStatus::ShuttingDown
    );

    timeout(Duration::from_secs(5), kernel.run())
        .await
        .expect("kernel did not stop");
    assert_eq!(session.state.lock().await.status, KernelStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsigned_kernel() {
    let kernel = TestKernel::start_with(test_config("", "")).await;
    let mut client = TestClient::connect(&kernel.config).await;
    assert!(!client.digester.is_enabled());

    let request = client.execute_request("1");
    client.send_shell(&request).await;
    let reply = client.recv_shell().await;
    assert_eq!(reply.content["status"], "ok");

    client.close().await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bind_retries_until_port_frees() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let endpoint = format!("tcp://127.0.0.1:{}", port);

    let shutdown = Arc::new(ShutdownSignal::new());
    let dispatcher = Dispatcher::new(
        JupyterChannel::Heartbeat,
        Arc::new(Digester::disabled()),
        test_options(),
        shutdown.clone(),
    );
    let handle = dispatcher.spawn(None);
    handle.request_bind(&endpoint).unwrap();

    match handle.wait_until_bound(Duration::from_millis(500)).await {
        BindState::Retrying { attempts, .. } => assert!(attempts >= 1),
        other => panic!("expected a retry, got {:?}", other),
    }

    assert!(matches!(handle.bind_state(), BindState::Retrying { .. }));

    drop(occupied);
    assert_eq!(
        handle.wait_until_bound(Duration::from_secs(10)).await,
        BindState::Bound(endpoint)
    );

    shutdown.trigger();
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("worker did not stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_on_stdin_are_ignored() {
    let kernel = TestKernel::start().await;
    let mut client = TestClient::connect(&kernel.config).await;

    let stray = client.request("input_reply", json!({ "value": "x" }));
    let frames = stray.encode(&client.digester).unwrap();
    client
        .stdin
        .send(clkernel::wire_message::frames_to_zmq(frames).unwrap())
        .await
        .unwrap();

    // The kernel keeps answering
    let request = client.request("kernel_info_request", json!({}));
    client.send_shell(&request).await;
    let reply: WireMessage = client.recv_shell().await;
    assert_eq!(reply.header.msg_type, "kernel_info_reply");

    client.close().await;
    kernel.stop().await;
}
