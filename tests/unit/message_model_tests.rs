//! Unit tests for conversation and roundtable message models.

use serde_json::json;

use agent_console::models::message::{ConversationMessage, Role, ToolExecution, ToolStatus};
use agent_console::models::roundtable::{RoundtableMessage, Target};

#[test]
fn placeholder_is_streaming_assistant() {
    let message = ConversationMessage::placeholder();
    assert_eq!(message.role, Role::Assistant);
    assert!(message.is_streaming);
    assert!(message.content.is_empty());
    assert!(!message.cancelled);
}

#[test]
fn ids_are_unique() {
    let a = ConversationMessage::new(Role::User, "a");
    let b = ConversationMessage::new(Role::User, "a");
    assert_ne!(a.id, b.id);
}

#[test]
fn edit_keeps_every_prior_version() {
    let mut message = ConversationMessage::new(Role::Assistant, "one");
    message.edit("two");
    message.edit("three");

    assert_eq!(message.content, "three");
    assert_eq!(message.previous_versions, vec!["one", "two"]);
    assert!(message.edited);
}

#[test]
fn thinking_accumulates() {
    let mut message = ConversationMessage::placeholder();
    assert!(message.thinking.is_none());
    message.push_thinking("let me ");
    message.push_thinking("see");
    assert_eq!(message.thinking.as_deref(), Some("let me see"));
}

#[test]
fn tool_execution_finishes_in_place() {
    let mut message = ConversationMessage::placeholder();
    message.tool_executions.push(ToolExecution::running(
        "t1".into(),
        "read_file".into(),
        json!({"path": "a.rs"}),
    ));
    message.tool_executions.push(ToolExecution::running(
        "t2".into(),
        "shell".into(),
        json!({"cmd": "ls"}),
    ));

    message.tool_mut("t2").unwrap().finish(json!("denied"), true);
    message.tool_mut("t1").unwrap().finish(json!("fn main() {}"), false);

    assert_eq!(message.tool_executions[0].status, ToolStatus::Complete);
    assert_eq!(message.tool_executions[1].status, ToolStatus::Error);
    assert!(message.tool_executions[0].completed_at.is_some());
    assert_eq!(message.tool_executions[1].result, Some(json!("denied")));
    assert!(message.tool_mut("t3").is_none());
}

#[test]
fn role_serializes_lowercase() {
    assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), json!("assistant"));
}

#[test]
fn target_wire_forms() {
    assert_eq!(Target::Both.as_wire(), "both");
    assert_eq!(Target::All.as_wire(), "all");
    assert_eq!(Target::Agent("claude".into()).as_wire(), "claude");
    assert_eq!(Target::from_wire("both"), Target::Both);
    assert_eq!(Target::from_wire("gemini"), Target::Agent("gemini".into()));
}

#[test]
fn roundtable_user_message_records_target() {
    let message = RoundtableMessage::user("topic?", &Target::Both);
    assert_eq!(message.role, Role::User);
    assert_eq!(message.target.as_deref(), Some("both"));
    assert!(message.agent_type.is_none());
    assert!(!message.is_streaming);
}

#[test]
fn message_fields_serialize_under_their_own_names() {
    let message = ConversationMessage::new(Role::User, "hi");
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["role"], "user");
    assert_eq!(value["is_streaming"], false);
    assert_eq!(value["previous_versions"], json!([]));
    assert!(value.get("tool_executions").is_some());
}

#[test]
fn placeholder_has_no_output_until_something_arrives() {
    let mut message = ConversationMessage::placeholder();
    assert!(!message.has_output());
    message.content.push_str("x");
    assert!(message.has_output());
}
