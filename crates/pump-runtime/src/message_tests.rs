//! Tests for message types.

use super::*;
use chrono::Utc;

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();

    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn test_message_id_from_str() {
    let id: MessageId = "msg-123".parse().unwrap();
    assert_eq!(id.as_str(), "msg-123");

    let result: Result<MessageId, _> = "".parse();
    assert!(result.is_err());
}

#[test]
fn test_lock_token() {
    let token = LockToken::new("broker-token-1");
    assert_eq!(token.as_str(), "broker-token-1");
    assert_eq!(token.to_string(), "broker-token-1");
}

// ============================================================================
// SessionId Tests
// ============================================================================

#[test]
fn test_session_id_valid() {
    let session_id = SessionId::new("orders-session-42".to_string()).unwrap();
    assert_eq!(session_id.as_str(), "orders-session-42");
}

#[test]
fn test_session_id_empty() {
    let result = SessionId::new("".to_string());
    assert!(matches!(result, Err(ValidationError::Required { .. })));
}

#[test]
fn test_session_id_too_long() {
    let result = SessionId::new("a".repeat(129));
    assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));

    // 128 characters is the maximum allowed
    assert!(SessionId::new("a".repeat(128)).is_ok());
}

#[test]
fn test_session_id_control_characters() {
    let result = SessionId::new("session\n1".to_string());
    assert!(matches!(result, Err(ValidationError::InvalidFormat { .. })));
}

#[test]
fn test_session_id_ordering() {
    let a = SessionId::new("a".to_string()).unwrap();
    let b = SessionId::new("b".to_string()).unwrap();
    assert!(a < b);
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[test]
fn test_timestamp_from_now() {
    let ts = Timestamp::from_now(Duration::from_secs(60));

    assert!(!ts.is_past());
    let remaining = ts.duration_until();
    assert!(remaining > Duration::from_secs(55));
    assert!(remaining <= Duration::from_secs(60));
}

#[test]
fn test_timestamp_past() {
    let ts = Timestamp::from_datetime(Utc::now() - chrono::Duration::seconds(10));

    assert!(ts.is_past());
    assert_eq!(ts.duration_until(), Duration::ZERO);
}

#[test]
fn test_timestamp_far_future() {
    let far = Timestamp::far_future();
    assert!(!far.is_past());
    assert!(Timestamp::now() < far);
}

#[test]
fn test_timestamp_ordering() {
    let earlier = Timestamp::from_datetime(Utc::now() - chrono::Duration::seconds(1));
    let later = Timestamp::from_now(Duration::from_secs(1));
    assert!(earlier < later);
}

// ============================================================================
// Message Tests
// ============================================================================

#[test]
fn test_message_builder() {
    let session_id = SessionId::new("test-session".to_string()).unwrap();
    let message = Message::new(
        MessageId::new(),
        Bytes::from("test body"),
        LockToken::new("token-1"),
        Timestamp::from_now(Duration::from_secs(30)),
    )
    .with_session_id(session_id.clone())
    .with_attribute("key".to_string(), "value".to_string())
    .with_delivery_count(3);

    assert_eq!(message.session_id, Some(session_id));
    assert_eq!(message.attributes.get("key"), Some(&"value".to_string()));
    assert_eq!(message.delivery_count, 3);
    assert_eq!(message.body, Bytes::from("test body"));
}

#[test]
fn test_message_lock_expiry() {
    let live = Message::new(
        MessageId::new(),
        Bytes::from("body"),
        LockToken::new("token-1"),
        Timestamp::from_now(Duration::from_secs(30)),
    );
    assert!(!live.is_lock_expired());

    let expired = Message::new(
        MessageId::new(),
        Bytes::from("body"),
        LockToken::new("token-2"),
        Timestamp::from_datetime(Utc::now() - chrono::Duration::seconds(1)),
    );
    assert!(expired.is_lock_expired());
}

#[test]
fn test_message_serialization_round_trip() {
    let message = Message::new(
        MessageId::new(),
        Bytes::from(vec![0u8, 1, 2, 255]),
        LockToken::new("token-1"),
        Timestamp::from_now(Duration::from_secs(30)),
    )
    .with_attribute("source".to_string(), "test".to_string());

    let json = serde_json::to_string(&message).unwrap();
    let decoded: Message = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded.message_id, message.message_id);
    assert_eq!(decoded.body, message.body);
    assert_eq!(decoded.attributes, message.attributes);
    assert_eq!(decoded.lock_token, message.lock_token);
}

#[test]
fn test_message_body_serializes_as_base64() {
    let message = Message::new(
        MessageId::new(),
        Bytes::from("hello"),
        LockToken::new("token-1"),
        Timestamp::from_now(Duration::from_secs(30)),
    );

    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["body"], "aGVsbG8=");
}
