//! End-to-end scenarios exercising the public `MemoryEngine` API across
//! adapters, rather than one module in isolation (spec §8).

use memoria::config::Config;
use memoria::engine::CancellationToken;
use memoria::lifecycle::{dedup, summarize};
use memoria::types::{
    reserved_metadata_keys, CreateMemoryInput, MemoryFilter, Requester, SharePolicy, UpdateMemoryInput,
};
use memoria::MemoryEngine;

fn add_input(text: &str, user_id: &str, agent_id: &str) -> CreateMemoryInput {
    CreateMemoryInput {
        text: text.to_string(),
        agent_id: agent_id.to_string(),
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn exact_duplicate_add_merges_facts_and_files_into_one_memory() {
    let engine = MemoryEngine::builder(Config::default()).build();

    let first = engine
        .add_memory(
            CreateMemoryInput {
                facts: Some(vec!["uses rotating refresh tokens".to_string()]),
                ..add_input("Use JWT tokens for session auth", "u1", "a1")
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let second = engine
        .add_memory(
            CreateMemoryInput {
                facts: Some(vec!["tokens expire after 15 minutes".to_string()]),
                files: Some(vec!["src/auth/jwt.rs".to_string()]),
                ..add_input("Use JWT tokens for session auth", "u1", "a1")
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id, "identical text collapses onto one memory");

    let stored = engine.record_store.get(first.id).await.unwrap().unwrap();
    assert!(stored.facts.contains(&"uses rotating refresh tokens".to_string()));
    assert!(stored.facts.contains(&"tokens expire after 15 minutes".to_string()));
    assert!(stored.files.contains(&"src/auth/jwt.rs".to_string()));
    let mention_count = stored
        .metadata
        .get(reserved_metadata_keys::MENTION_COUNT)
        .and_then(|v| v.as_i64())
        .unwrap();
    assert_eq!(mention_count, 2);
}

#[tokio::test]
async fn near_duplicate_add_links_a_sibling_edge_without_merging() {
    let mut config = Config::default();
    // Lower than the default 0.95 so two related-but-distinct sentences
    // land as siblings instead of as unrelated memories.
    config.dedup.threshold = 0.2;
    let engine = MemoryEngine::builder(config).build();

    let first = engine
        .add_memory(
            add_input("The auth service validates JWT tokens on every request", "u1", "a1"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let second = engine
        .add_memory(
            add_input(
                "The auth service also validates JWT signatures and expiry on every incoming request",
                "u1",
                "a1",
            ),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_ne!(first.id, second.id, "near-duplicates stay distinct memories");

    let (_, edges) = engine
        .graph_store
        .neighborhood(&second.id.to_string(), 1, Some("sibling_of"))
        .await
        .unwrap();
    assert!(
        edges.iter().any(|e| e.dst == first.id.to_string()),
        "expected a sibling_of edge from the newer memory to the older one"
    );
}

#[tokio::test]
async fn summarize_then_undo_restores_the_original_text() {
    let mut config = Config::default();
    config.summarize.min_age_days = 30;
    config.summarize.min_length = 50;
    config.summarize.target_length = 80;
    let engine = MemoryEngine::builder(config).build();

    let long_text = "The migration touched the billing pipeline end to end. ".repeat(5);
    let memory = engine
        .add_memory(add_input(&long_text, "u1", "a1"), CancellationToken::new())
        .await
        .unwrap();

    // Backdate past min_age_days so the sweep picks it up.
    engine
        .record_store
        .update(
            memory.id,
            Box::new(|m: &mut memoria::types::Memory| {
                m.created_at = chrono::Utc::now() - chrono::Duration::days(45);
                Ok(())
            }),
        )
        .await
        .unwrap();

    let report = summarize::dry_run(&engine, "u1").await.unwrap();
    assert_eq!(report.candidates.len(), 1);
    summarize::apply(&engine, &report).await.unwrap();

    let summarized = engine.record_store.get(memory.id).await.unwrap().unwrap();
    assert!(summarized.summarized);
    assert_ne!(summarized.text, long_text);
    assert_eq!(
        summarized.metadata.get(reserved_metadata_keys::ORIGINAL_TEXT).and_then(|v| v.as_str()),
        Some(long_text.as_str())
    );

    let entries = engine
        .audit_log
        .query(&memoria::journal::AuditFilter {
            memory_id: Some(memory.id),
            operation_type: Some("summarize_apply".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let undo_id = entries[0].undo_id.expect("summarize_apply entry carries an undo_id");

    engine.undo(undo_id).await.unwrap();

    let restored = engine.record_store.get(memory.id).await.unwrap().unwrap();
    assert!(!restored.summarized);
    assert_eq!(restored.text, long_text);
}

#[tokio::test]
async fn custom_visibility_grants_only_the_allowed_agents() {
    let engine = MemoryEngine::builder(Config::default()).build();

    let memory = engine
        .add_memory(add_input("Only ops and oncall should see this runbook note", "u1", "author-agent"), CancellationToken::new())
        .await
        .unwrap();

    let mut allowed = std::collections::BTreeSet::new();
    allowed.insert("ops-agent".to_string());
    engine
        .update_memory(
            memory.id,
            UpdateMemoryInput {
                share_policy: Some(SharePolicy::custom(allowed).unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let allowed_requester = Requester {
        user_id: "u1".into(),
        agent_id: "ops-agent".into(),
    };
    assert!(engine.get_memory(memory.id, &allowed_requester).await.is_ok());

    let denied_requester = Requester {
        user_id: "u1".into(),
        agent_id: "bystander-agent".into(),
    };
    assert!(engine.get_memory(memory.id, &denied_requester).await.is_err());

    // The author itself is not in allowed_agents once the policy is custom,
    // so even the original writer loses access (spec §4.4: custom replaces,
    // doesn't extend, the visibility rule).
    let author_requester = Requester {
        user_id: "u1".into(),
        agent_id: "author-agent".into(),
    };
    assert!(engine.get_memory(memory.id, &author_requester).await.is_err());
}

#[tokio::test]
async fn hybrid_search_ranks_the_closest_match_first() {
    let engine = MemoryEngine::builder(Config::default()).build();
    let requester = Requester {
        user_id: "u1".into(),
        agent_id: "a1".into(),
    };

    engine
        .add_memory(add_input("JWT token rotation happens every fifteen minutes", "u1", "a1"), CancellationToken::new())
        .await
        .unwrap();
    engine
        .add_memory(add_input("The deploy pipeline runs integration tests before shipping", "u1", "a1"), CancellationToken::new())
        .await
        .unwrap();
    engine
        .add_memory(add_input("Token rotation for JWT sessions is configurable per tenant", "u1", "a1"), CancellationToken::new())
        .await
        .unwrap();

    let hits = engine
        .search_hybrid("JWT token rotation", &requester, 10, CancellationToken::new())
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(
        hits[0].memory.text.to_lowercase().contains("jwt") && hits[0].memory.text.to_lowercase().contains("rotation"),
        "top hit should be one of the JWT-rotation memories, got: {}",
        hits[0].memory.text
    );
    // Scores must be in non-increasing order (spec §4.4 stable tie-break).
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(hits.iter().any(|h| h.memory.text.contains("deploy pipeline")) || hits.len() <= 3);
}

#[tokio::test]
async fn cross_language_search_favors_the_detected_query_language() {
    let engine = MemoryEngine::builder(Config::default()).build();
    let requester = Requester {
        user_id: "u1".into(),
        agent_id: "a1".into(),
    };

    let english = engine
        .add_memory(
            CreateMemoryInput {
                language_code: Some("en".to_string()),
                ..add_input("The token refresh endpoint is rate limited", "u1", "a1")
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let spanish = engine
        .add_memory(
            CreateMemoryInput {
                language_code: Some("es".to_string()),
                ..add_input("El endpoint de renovacion de token tiene limite de velocidad", "u1", "a1")
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // The query itself is English prose, so the detector should resolve it
    // to "en" and favor the English memory by the full 1.0 affinity over
    // the Spanish memory's 0.7 (spec §8 scenario 6).
    let hits = engine
        .cross_language_search("token refresh rate limited", &requester, 10, CancellationToken::new())
        .await
        .unwrap();

    assert!(!hits.is_empty());
    let spanish_hit = hits.iter().find(|h| h.memory.id == spanish.id);
    let english_hit = hits.iter().find(|h| h.memory.id == english.id);
    if let (Some(es), Some(en)) = (spanish_hit, english_hit) {
        assert!(en.score >= es.score);
    }
}
