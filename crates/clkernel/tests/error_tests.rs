//
// error_tests.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use clkernel::error::{EvaluationError, KernelError};
use clshared::message_content::ErrorContent;

#[test]
fn test_error_reply_content() {
    let err = KernelError::State(String::from("the kernel is shutting down"));
    let content = err.to_content();
    assert_eq!(content["status"], "error");
    assert_eq!(content["ename"], "StateError");
    assert_eq!(
        content["evalue"],
        "Error KE-3: Invalid kernel state: the kernel is shutting down"
    );
    assert_eq!(content["traceback"].as_array().unwrap().len(), 1);
}

#[test]
fn test_codes_are_distinct() {
    let errors = [
        KernelError::MalformedConnection(String::from("x")),
        KernelError::Protocol(String::from("x")),
        KernelError::Transport {
            endpoint: String::from("tcp://127.0.0.1:1"),
            reason: String::from("x"),
        },
        KernelError::State(String::from("x")),
    ];
    let codes: Vec<u8> = errors.iter().map(|e| e.code()).collect();
    assert_eq!(codes, vec![0, 1, 2, 3]);
    assert_eq!(errors[1].ename(), "ProtocolError");
    assert_eq!(errors[2].ename(), "TransportError");
}

#[test]
fn test_evaluation_error_becomes_error_content() {
    let content = ErrorContent::from(EvaluationError::new("NameError", "name 'x' is not defined"));
    assert_eq!(content.ename, "NameError");
    assert_eq!(content.evalue, "name 'x' is not defined");
    assert_eq!(
        content.traceback,
        vec![String::from("NameError: name 'x' is not defined")]
    );
}
