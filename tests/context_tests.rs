use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use raven_pipeline::context::{
    ContextPersistence, ContextStore, MeetingContext, MemoryPersistence, SessionContext,
    MAX_HISTORY_TURNS,
};

fn store_with_memory() -> (Arc<MemoryPersistence>, ContextStore) {
    let persistence = Arc::new(MemoryPersistence::new());
    let store = ContextStore::new(persistence.clone());
    (persistence, store)
}

#[tokio::test]
async fn test_history_bounded_to_most_recent_turns() {
    let (_, store) = store_with_memory();

    for i in 0..15 {
        store
            .add_turn("sess-1", "meet-1", &format!("question {}", i), "answer", "")
            .await;
    }

    let session = store.session("sess-1", "meet-1").await;
    assert_eq!(session.conversation_history.len(), MAX_HISTORY_TURNS);
    // Oldest turns were dropped, most recent kept
    assert_eq!(session.conversation_history[0].question, "question 5");
    assert_eq!(
        session.conversation_history.last().unwrap().question,
        "question 14"
    );
}

#[tokio::test]
async fn test_session_survives_cache_loss_via_persistence() {
    let persistence = Arc::new(MemoryPersistence::new());

    {
        let store = ContextStore::new(persistence.clone());
        store.add_turn("sess-1", "meet-1", "q1", "a1", "").await;
    }

    // A fresh store with an empty cache reloads from persistence
    let store = ContextStore::new(persistence);
    let session = store.session("sess-1", "meet-1").await;
    assert_eq!(session.conversation_history.len(), 1);
    assert_eq!(session.conversation_history[0].question, "q1");
}

#[tokio::test]
async fn test_build_prompt_includes_history_and_meeting() {
    let (_, store) = store_with_memory();

    for i in 0..5 {
        store
            .add_turn(
                "sess-1",
                "meet-1",
                &format!("question {}", i),
                &format!("answer {}", i),
                "",
            )
            .await;
    }
    store
        .put_meeting(MeetingContext {
            meeting_id: "meet-1".to_string(),
            participants: vec!["Ada".to_string(), "Grace".to_string()],
            topic: Some("Release planning".to_string()),
            agenda_items: vec!["cutover date".to_string()],
            key_points: vec![],
            action_items: vec![],
        })
        .await
        .unwrap();

    let prompt = store
        .build_prompt("You are Raven.", "sess-1", "meet-1", "When do we ship?")
        .await;

    assert!(prompt.starts_with("You are Raven."));
    assert!(prompt.contains("Topic: Release planning"));
    assert!(prompt.contains("Participants: Ada, Grace"));
    assert!(prompt.contains("Agenda: cutover date"));
    assert!(prompt.contains("Current question: When do we ship?"));
    assert!(prompt.ends_with("Provide a helpful, concise response:"));

    // Only the last three turns make it into the prompt, oldest first
    assert!(!prompt.contains("Q: question 1"));
    assert!(prompt.contains("Q: question 2"));
    assert!(prompt.contains("Q: question 4"));
    let q2 = prompt.find("Q: question 2").unwrap();
    let q4 = prompt.find("Q: question 4").unwrap();
    assert!(q2 < q4);
}

#[tokio::test]
async fn test_build_prompt_without_context_is_personality_plus_question() {
    let (_, store) = store_with_memory();

    let prompt = store
        .build_prompt("You are Raven.", "fresh", "meet-1", "Hello?")
        .await;

    assert!(prompt.starts_with("You are Raven."));
    assert!(!prompt.contains("Recent conversation history"));
    assert!(!prompt.contains("Meeting context"));
    assert!(prompt.contains("Current question: Hello?"));
}

#[tokio::test]
async fn test_evicts_sessions_idle_past_ttl() {
    let (persistence, store) = store_with_memory();

    // Seed a persisted session last active 25 hours ago
    let mut stale = SessionContext::new("stale-sess", "meet-1");
    stale.last_activity = Utc::now() - ChronoDuration::hours(25);
    persistence
        .store(
            "session_context:stale-sess",
            &serde_json::to_string(&stale).unwrap(),
            std::time::Duration::from_secs(24 * 60 * 60),
        )
        .await
        .unwrap();

    // Load it into the cache, alongside a fresh session
    store.session("stale-sess", "meet-1").await;
    store.add_turn("fresh-sess", "meet-1", "q", "a", "").await;

    assert_eq!(store.evict_expired().await, 1);

    // Cache and persisted copy are both gone
    assert!(persistence
        .load("session_context:stale-sess")
        .await
        .unwrap()
        .is_none());
    let fresh = store.session("fresh-sess", "meet-1").await;
    assert_eq!(fresh.conversation_history.len(), 1);

    // Nothing left to evict
    assert_eq!(store.evict_expired().await, 0);
}

#[tokio::test]
async fn test_corrupt_persisted_session_degrades_to_fresh() {
    let (persistence, store) = store_with_memory();
    persistence
        .store(
            "session_context:sess-1",
            "{not valid json",
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();

    let session = store.session("sess-1", "meet-1").await;
    assert!(session.conversation_history.is_empty());
    assert_eq!(session.session_uid, "sess-1");
}
