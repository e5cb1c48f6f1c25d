mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assistant_with, MemoryTransport, RecordingHandlers, ScriptedBackend};
use relay_core::relay_persist::ThreadStore;
use relay_core::{
    AskOptions, AssistantConfig, AssistantError, DispatchKind, DispatchOptions, Dispatcher,
    FieldSpec, FieldValue, InboundMessage, MessageTemplate,
};
use serde_json::{json, Map};

fn order_template() -> MessageTemplate {
    MessageTemplate::new()
        .command("order")
        .field("item", FieldSpec::string().required())
        .field("quantity", FieldSpec::number().required())
}

#[tokio::test]
async fn test_plain_message_goes_to_assistant() {
    let backend = Arc::new(ScriptedBackend::new().then_text("Our store opens at 9."));
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);

    let result = dispatcher
        .process_message("chat-1", "When do you open?", &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Ai);
    assert_eq!(result.response.as_deref(), Some("Our store opens at 9."));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_user_tag_hands_off_with_reason() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());

    let result = dispatcher
        .process_message("chat-1", "#human please help me now", &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Handoff);
    assert_eq!(result.response, Some(assistant.config().handoff_message.clone()));
    let state = result.handoff_state.unwrap();
    assert_eq!(state.reason, "please help me now");
    assert_eq!(state.metadata["source"], json!("user"));
    assert!(assistant.is_in_human_mode("chat-1"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_user_tag_without_reason_uses_default() {
    let (assistant, _store) =
        assistant_with(Arc::new(ScriptedBackend::new()), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);

    let result = dispatcher
        .process_message("chat-1", "#agent", &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Handoff);
    assert_eq!(result.handoff_state.unwrap().reason, "User requested a human agent");
}

#[tokio::test]
async fn test_user_handoff_carries_contact_details() {
    let (assistant, _store) =
        assistant_with(Arc::new(ScriptedBackend::new()), AssistantConfig::default()).await;
    let transport = Arc::new(MemoryTransport::with_contact("Ana Souza", "+5511999990000"));
    let dispatcher = Dispatcher::new(assistant).with_transport(transport);

    let result = dispatcher
        .process_message("chat-1", "#handoff wrong charge", &DispatchOptions::default())
        .await
        .unwrap();

    let metadata = result.handoff_state.unwrap().metadata;
    assert_eq!(metadata["contact_name"], json!("Ana Souza"));
    assert_eq!(metadata["contact_number"], json!("+5511999990000"));
}

#[tokio::test]
async fn test_assistant_tag_hands_off() {
    let backend = Arc::new(ScriptedBackend::new().then_text("Sure! [handoff: billing issue]"));
    let (assistant, store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());

    let result = dispatcher
        .process_message("chat-1", "Why was I charged twice?", &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Handoff);
    assert_eq!(result.response.as_deref(), Some("Sure!"));
    let state = result.handoff_state.unwrap();
    assert_eq!(state.reason, "billing issue");
    assert_eq!(state.metadata["source"], json!("assistant"));
    assert!(assistant.is_in_human_mode("chat-1"));

    // The tagged reply itself stays in history as generated
    let history = store.get("chat-1").await.unwrap().unwrap().history;
    assert_eq!(history[1].content(), "Sure! [handoff: billing issue]");
}

#[tokio::test]
async fn test_bare_assistant_tag_uses_handoff_message() {
    let backend = Arc::new(ScriptedBackend::new().then_text("[human needed]"));
    let (assistant, _store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());

    let result = dispatcher
        .process_message("chat-1", "Cancel my contract", &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Handoff);
    assert_eq!(result.response, Some(assistant.config().handoff_message.clone()));
    assert_eq!(result.handoff_state.unwrap().reason, "Assistant requested a human agent");
}

#[tokio::test]
async fn test_human_mode_routes_to_operator() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let handlers = Arc::new(RecordingHandlers::replying("Maria is typing..."));
    assistant.register_human_handlers(handlers.clone());
    let dispatcher = Dispatcher::new(assistant.clone());

    dispatcher
        .process_message("chat-1", "#human", &DispatchOptions::default())
        .await
        .unwrap();

    // Tags and templates are not consulted once a human owns the chat
    let options = DispatchOptions::new().template(order_template());
    let result = dispatcher
        .process_message("chat-1", "!order item:pizza quantity:2", &options)
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Human);
    assert_eq!(result.response.as_deref(), Some("Maria is typing..."));
    assert_eq!(backend.calls(), 0);
    assert!(handlers
        .events()
        .contains(&"message:chat-1:!order item:pizza quantity:2".to_string()));
}

#[tokio::test]
async fn test_human_mode_without_handlers_has_no_response() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);

    dispatcher
        .process_message("chat-1", "#human", &DispatchOptions::default())
        .await
        .unwrap();
    let result = dispatcher
        .process_message("chat-1", "anyone there?", &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Human);
    assert!(result.response.is_none());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_template_match() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);
    let options = DispatchOptions::new().template(order_template());

    let result = dispatcher
        .process_message("chat-1", "!order item:pizza quantity:2", &options)
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Template);
    assert!(result.response.is_none());
    let data = result.data.unwrap();
    assert_eq!(data.command.as_deref(), Some("order"));
    assert_eq!(data.get("item"), Some(&FieldValue::Text("pizza".to_string())));
    assert_eq!(data.get("quantity").and_then(FieldValue::as_f64), Some(2.0));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_unmatched_without_fallback() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);
    let options = DispatchOptions::new()
        .template(order_template())
        .fallback_to_ai(false);

    let result = dispatcher
        .process_message("chat-1", "!order item:pizza", &options)
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Unmatched);
    assert!(result.response.is_none());
    let closest = result.data.unwrap();
    assert!(!closest.is_valid);
    assert_eq!(closest.errors, vec!["Required field \"quantity\" is missing".to_string()]);

    let result = dispatcher
        .process_message("chat-1", "just chatting", &options)
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Unmatched);
    assert!(result.data.is_none());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_invalid_template_falls_back_to_assistant() {
    let backend = Arc::new(ScriptedBackend::new().then_text("How many pizzas?"));
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);
    let options = DispatchOptions::new().template(order_template());

    let result = dispatcher
        .process_message("chat-1", "!order item:pizza", &options)
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Ai);
    assert_eq!(result.response.as_deref(), Some("How many pizzas?"));
}

#[tokio::test]
async fn test_ask_failure_hands_off_when_enabled() {
    let backend = Arc::new(ScriptedBackend::new().always_fail("upstream 503"));
    let (assistant, _store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());
    let options = DispatchOptions::new().handoff_on_error(true);

    let result = dispatcher
        .process_message("chat-1", "Hello", &options)
        .await
        .unwrap();

    assert_eq!(result.kind, DispatchKind::Handoff);
    assert_eq!(result.response, Some(assistant.config().error_handoff_message.clone()));
    assert!(result.error.unwrap().contains("upstream 503"));
    let state = result.handoff_state.unwrap();
    assert_eq!(state.reason, "processing error");
    assert_eq!(state.metadata["source"], json!("error"));
    assert!(assistant.is_in_human_mode("chat-1"));
}

#[tokio::test]
async fn test_handoff_committed_while_waiting_routes_to_operator() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(100)));
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let handlers = Arc::new(RecordingHandlers::default());
    assistant.register_human_handlers(handlers.clone());
    let dispatcher = Dispatcher::new(assistant.clone());

    // A slow ask holds the chat
    let in_flight = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.ask("c", "first", AskOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The operator's handoff queues behind it
    let handoff = {
        let assistant = assistant.clone();
        tokio::spawn(async move {
            assistant
                .handoff_to_human("c", "billing dispute", Map::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!assistant.is_in_human_mode("c"));

    let options = DispatchOptions::new().handoff_on_error(true);
    let result = dispatcher.process_message("c", "hello?", &options).await.unwrap();

    in_flight.await.unwrap().unwrap();
    handoff.await.unwrap().unwrap();

    assert_eq!(result.kind, DispatchKind::Human);
    assert!(result.error.is_none());
    assert_eq!(result.handoff_state.unwrap().reason, "billing dispute");
    assert_eq!(assistant.handoff_state("c").unwrap().reason, "billing dispute");
    assert_eq!(
        handlers.events(),
        vec!["handoff:c:billing dispute".to_string(), "message:c:hello?".to_string()]
    );
    assert_eq!(backend.calls(), 1);
    assert_eq!(assistant.stats().handoffs, 1);
}

#[tokio::test]
async fn test_handoff_committed_while_waiting_is_not_an_error() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(100)));
    let (assistant, _store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());

    let in_flight = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.ask("c", "first", AskOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let handoff = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.handoff_to_human("c", "vip", Map::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    let result = dispatcher
        .process_message("c", "hello?", &DispatchOptions::default())
        .await
        .unwrap();

    in_flight.await.unwrap().unwrap();
    handoff.await.unwrap().unwrap();
    assert_eq!(result.kind, DispatchKind::Human);
    assert!(result.response.is_none());
}

#[tokio::test]
async fn test_ask_failure_propagates_by_default() {
    let backend = Arc::new(ScriptedBackend::new().always_fail("upstream 503"));
    let (assistant, _store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant.clone());

    let err = dispatcher
        .process_message("chat-1", "Hello", &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AssistantError::Generation(_)));
    assert!(!assistant.is_in_human_mode("chat-1"));
}

#[tokio::test]
async fn test_ai_options_reach_the_assistant() {
    let backend = Arc::new(ScriptedBackend::new().always_fail("upstream 503"));
    let (assistant, _store) = assistant_with(backend, AssistantConfig::default()).await;
    let dispatcher = Dispatcher::new(assistant);
    let options = DispatchOptions::new()
        .ai_options(AskOptions::new().with_fallback_response("Please try again later."));

    let result = dispatcher
        .process_message("chat-1", "Hello", &options)
        .await
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Ai);
    assert_eq!(result.response.as_deref(), Some("Please try again later."));
}

#[tokio::test]
async fn test_handle_event_replies_through_transport() {
    let backend = Arc::new(ScriptedBackend::new().then_text("Hi there!"));
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let transport = Arc::new(MemoryTransport::default());
    let dispatcher = Dispatcher::new(assistant).with_transport(transport.clone());

    let result = dispatcher
        .handle_event(&InboundMessage::new("chat-1", "Hello"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.kind, DispatchKind::Ai);
    assert_eq!(
        transport.sent(),
        vec![("chat-1".to_string(), "Hi there!".to_string())]
    );

    // Own messages are ignored entirely
    let mut own = InboundMessage::new("chat-1", "Hi there!");
    own.from_self = true;
    assert!(dispatcher.handle_event(&own).await.unwrap().is_none());
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_handle_event_uses_configured_options() {
    let backend = Arc::new(ScriptedBackend::new());
    let (assistant, _store) = assistant_with(backend.clone(), AssistantConfig::default()).await;
    let transport = Arc::new(MemoryTransport::default());
    let dispatcher = Dispatcher::new(assistant)
        .with_transport(transport.clone())
        .with_options(DispatchOptions::new().template(order_template()));

    let result = dispatcher
        .handle_event(&InboundMessage::new("chat-1", "!order item:tea quantity:3"))
        .await
        .unwrap()
        .unwrap();

    // Templates produce data, not a reply to send
    assert_eq!(result.kind, DispatchKind::Template);
    assert!(transport.sent().is_empty());
    assert_eq!(backend.calls(), 0);
}
