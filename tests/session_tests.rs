use finllm::client_wrapper::Role;
use finllm::SessionRegistry;
use std::sync::Arc;

#[tokio::test]
async fn test_anonymous_sessions_get_distinct_generated_ids() {
    let registry = SessionRegistry::new();

    let first = registry.get_or_create(None);
    let second = registry.get_or_create(None);

    assert_ne!(first.id(), second.id());
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_named_session_is_created_once_and_shared() {
    let registry = SessionRegistry::new();

    let first = registry.get_or_create(Some("desk-7"));
    let second = registry.get_or_create(Some("desk-7"));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.session_ids(), vec!["desk-7".to_string()]);
}

#[tokio::test]
async fn test_concurrent_turns_never_interleave_inside_a_pair() {
    let registry = Arc::new(SessionRegistry::new());

    let handles: Vec<_> = (0..16)
        .map(|turn| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let session = registry.get_or_create(Some("shared"));
                session.append_turn(
                    &format!("question {}", turn),
                    &format!("answer {}", turn),
                );
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let session = registry.get("shared").unwrap();
    let history = session.snapshot_history();
    assert_eq!(history.len(), 32);
    assert_eq!(session.turn_count(), 16);
    for pair in history.chunks(2) {
        assert!(matches!(pair[0].role, Role::User));
        assert!(matches!(pair[1].role, Role::Assistant));
        // Whatever the interleaving of tasks, the answer that landed next to
        // a question is the one from the same turn.
        let turn = pair[0].content.trim_start_matches("question ");
        assert_eq!(pair[1].content, format!("answer {}", turn));
    }
}

#[tokio::test]
async fn test_clearing_a_session_reports_whether_it_existed() {
    let registry = SessionRegistry::new();
    registry.get_or_create(Some("ephemeral"));

    assert!(registry.clear_session("ephemeral"));
    assert!(!registry.clear_session("ephemeral"));
    assert!(registry.get("ephemeral").is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_snapshots_are_point_in_time_copies() {
    let registry = SessionRegistry::new();
    let session = registry.get_or_create(Some("audit"));
    session.append_turn("first question", "first answer");

    let snapshot = session.snapshot_history();
    session.append_turn("second question", "second answer");

    assert_eq!(snapshot.len(), 2);
    assert_eq!(session.snapshot_history().len(), 4);
}
