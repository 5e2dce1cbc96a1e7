//! End-to-end behaviour of the ticket service over in-memory stores.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use chrono::Duration as ChronoDuration;
use helpdesk_core::environment::Clock;
use helpdesk_core::{
    HelpdeskError, IdempotencyKey, NewComment, NewTicket, Priority, Status, TicketPatch,
    UserId, VersionToken,
};
use helpdesk_engine::audit::actions;
use helpdesk_engine::{Admission, EngineConfig, TicketService};
use helpdesk_testing::{Faults, InMemoryBackend, ManualClock, TestUsers};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    users: TestUsers,
    backend: InMemoryBackend,
    clock: ManualClock,
    service: Arc<TicketService<InMemoryBackend>>,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), &Faults::new())
}

fn harness_with(config: EngineConfig, faults: &Faults) -> Harness {
    helpdesk_testing::init_tracing();
    let users = TestUsers::new();
    let backend = users.backend_with_faults(faults);
    let clock = ManualClock::at_test_epoch();
    let service = Arc::new(TicketService::new(
        backend.clone(),
        Arc::new(clock.clone()),
        config,
    ));
    Harness {
        users,
        backend,
        clock,
        service,
    }
}

fn new_ticket(title: &str, priority: Priority) -> NewTicket {
    NewTicket {
        title: title.to_string(),
        description: format!("{title} needs attention"),
        priority,
    }
}

fn status_patch(status: Status) -> TicketPatch {
    TicketPatch {
        status: Some(status),
        ..TicketPatch::default()
    }
}

#[tokio::test]
async fn sla_is_fixed_at_creation_and_stale_tokens_are_rejected() {
    let h = harness();
    let user = h.users.user.identity();
    let t0 = h.clock.now();

    let created = h
        .service
        .create(&user, new_ticket("VPN down", Priority::High))
        .await
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.status, Status::Open);
    assert_eq!(created.sla_deadline, t0 + ChronoDuration::hours(24));

    h.clock.advance(ChronoDuration::minutes(10));
    let updated = h
        .service
        .update(
            &user,
            created.id,
            Some(VersionToken::Version(1)),
            TicketPatch {
                priority: Some(Priority::Low),
                ..TicketPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.priority, Priority::Low);
    assert_eq!(updated.sla_deadline, created.sla_deadline);

    let stale = h
        .service
        .update(
            &user,
            created.id,
            Some(VersionToken::UpdatedAt(created.updated_at)),
            status_patch(Status::Closed),
        )
        .await
        .unwrap_err();
    assert_eq!(stale.code(), "STALE_UPDATE");
    assert_eq!(h.service.get(&user, created.id).await.unwrap().version, 2);
}

#[tokio::test]
async fn version_counts_successful_updates() {
    let h = harness();
    let user = h.users.user.identity();
    let mut ticket = h
        .service
        .create(&user, new_ticket("Printer", Priority::Low))
        .await
        .unwrap();

    for (n, status) in [Status::InProgress, Status::Open, Status::Closed, Status::Open]
        .into_iter()
        .enumerate()
    {
        h.clock.advance(ChronoDuration::seconds(1));
        ticket = h
            .service
            .update(
                &user,
                ticket.id,
                Some(VersionToken::UpdatedAt(ticket.updated_at)),
                status_patch(status),
            )
            .await
            .unwrap();
        assert_eq!(ticket.version, 2 + n as u64);
    }

    // A stale attempt leaves the counter alone.
    let err = h
        .service
        .update(&user, ticket.id, Some(VersionToken::Version(1)), status_patch(Status::Closed))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::StaleUpdate { current_version: 5, .. }));
    assert_eq!(h.service.get(&user, ticket.id).await.unwrap().version, 5);
}

#[tokio::test]
async fn updated_at_token_is_stale_even_within_one_instant() {
    let h = harness();
    let user = h.users.user.identity();
    let created = h
        .service
        .create(&user, new_ticket("Badge reader", Priority::Medium))
        .await
        .unwrap();

    // The clock never moves in this test.
    let first = h
        .service
        .update(
            &user,
            created.id,
            Some(VersionToken::UpdatedAt(created.updated_at)),
            status_patch(Status::InProgress),
        )
        .await
        .unwrap();
    assert_eq!(first.version, 2);
    assert!(first.updated_at > created.updated_at);

    let err = h
        .service
        .update(
            &user,
            created.id,
            Some(VersionToken::UpdatedAt(created.updated_at)),
            status_patch(Status::Closed),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STALE_UPDATE");

    let second = h
        .service
        .update(
            &user,
            created.id,
            Some(VersionToken::UpdatedAt(first.updated_at)),
            status_patch(Status::Closed),
        )
        .await
        .unwrap();
    assert_eq!(second.version, 3);
    assert!(second.updated_at > first.updated_at);
    assert_eq!(
        h.service.get(&user, created.id).await.unwrap().status,
        Status::Closed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_with_same_token_have_one_winner() {
    let h = harness();
    let agent = h.users.agent.identity();
    let ticket = h
        .service
        .create(&agent, new_ticket("Disk full", Priority::Medium))
        .await
        .unwrap();

    let ticket_id = ticket.id;
    let tasks = (0..8).map(|i| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            service
                .update(
                    &agent,
                    ticket_id,
                    Some(VersionToken::Version(1)),
                    TicketPatch {
                        title: Some(format!("Disk full #{i}")),
                        ..TicketPatch::default()
                    },
                )
                .await
        })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(HelpdeskError::StaleUpdate { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(stale, 7);
    assert_eq!(h.service.get(&agent, ticket.id).await.unwrap().version, 2);

    // One `created` plus exactly one `updated`.
    let timeline = h.service.timeline(&agent, ticket.id).await.unwrap();
    assert_eq!(timeline.len(), 2);
}

#[tokio::test]
async fn replayed_create_is_byte_identical_and_creates_once() {
    let h = harness();
    let user = h.users.user.identity();
    let key = IdempotencyKey::parse("create-42").unwrap();

    let first = h
        .service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Laptop", Priority::High)),
        )
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(5));
    let second = h
        .service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Laptop", Priority::High)),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.status, 201);
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 1);

    // Same key, different caller: a separate request.
    let other = h.users.other_user.identity();
    h.service
        .idempotent(
            &other,
            Some(&key),
            201,
            h.service.create(&other, new_ticket("Laptop", Priority::High)),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 2);
}

#[tokio::test]
async fn failed_mutation_leaves_no_idempotency_record() {
    let h = harness();
    let user = h.users.user.identity();
    let key = IdempotencyKey::parse("bad-create").unwrap();

    let err = h
        .service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("   ", Priority::Low)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(h.backend.idempotency.is_empty().unwrap());

    // The key is still usable for a corrected request.
    h.service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Fixed", Priority::Low)),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 1);
}

#[tokio::test]
async fn concurrent_first_use_of_a_key_runs_once() {
    let faults = Faults::new();
    let h = harness_with(EngineConfig::default(), &faults);
    faults.set_delay(Duration::from_millis(20));
    let user = h.users.user.identity();
    let key = IdempotencyKey::parse("double-click").unwrap();

    let (a, b) = tokio::join!(
        h.service.idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Monitor", Priority::Medium)),
        ),
        h.service.idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Monitor", Priority::Medium)),
        ),
    );
    let results = [a, b];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let refused = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(refused.code(), "IDEMPOTENCY_IN_PROGRESS");
    assert!(refused.is_retryable());
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 1);

    // The refused client's retry gets the winner's exact response.
    faults.set_delay(Duration::ZERO);
    let retried = h
        .service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Monitor", Priority::Medium)),
        )
        .await
        .unwrap();
    assert_eq!(&retried, winners[0]);
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 1);
}

#[tokio::test]
async fn rate_limit_admits_sixty_per_minute() {
    let h = harness();
    let user = Some(h.users.user.id);
    let limiter = h.service.rate_limiter();

    for _ in 0..60 {
        limiter.check(user, h.clock.now()).await.unwrap();
        h.clock.advance(ChronoDuration::milliseconds(500));
    }
    let err = limiter.check(user, h.clock.now()).await.unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT");

    h.clock.advance(ChronoDuration::seconds(31));
    limiter.check(user, h.clock.now()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_cannot_overshoot_the_limit() {
    let h = harness();
    let user = Some(h.users.user.id);
    let now = h.clock.now();
    let limiter = h.service.rate_limiter().clone();

    let attempts = (0..100).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.admit(user, now).await.unwrap() })
    });
    let outcomes: Vec<Admission> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let allowed = outcomes
        .iter()
        .filter(|outcome| **outcome == Admission::Allowed)
        .count();
    assert_eq!(allowed, 60);
    assert_eq!(outcomes.len() - allowed, 40);

    // Another identity has its own window.
    assert_eq!(
        limiter.admit(Some(h.users.other_user.id), now).await.unwrap(),
        Admission::Allowed
    );
}

#[tokio::test]
async fn visibility_follows_role() {
    let h = harness();
    let user = h.users.user.identity();
    let other_user = h.users.other_user.identity();
    let agent = h.users.agent.identity();
    let other_agent = h.users.other_agent.identity();
    let admin = h.users.admin.identity();

    let mine = h
        .service
        .create(&user, new_ticket("Mine", Priority::Low))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(1));
    let agents_own = h
        .service
        .create(&agent, new_ticket("Agent's own", Priority::Low))
        .await
        .unwrap();
    h.service.assign(&admin, mine.id, agent.user_id).await.unwrap();

    let ids = |tickets: Vec<helpdesk_core::Ticket>| -> Vec<_> {
        tickets.into_iter().map(|t| t.id).collect()
    };

    assert_eq!(ids(h.service.list(&user, None).await.unwrap()), vec![mine.id]);
    assert!(h.service.list(&other_user, None).await.unwrap().is_empty());
    assert_eq!(
        ids(h.service.list(&agent, None).await.unwrap()),
        vec![agents_own.id, mine.id]
    );
    assert!(h.service.list(&other_agent, None).await.unwrap().is_empty());
    assert_eq!(h.service.list(&admin, None).await.unwrap().len(), 2);

    // Hidden tickets read as missing.
    let err = h.service.get(&other_user, mine.id).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    let err = h.service.comments(&other_agent, mine.id).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    // Mutations on them are forbidden.
    let err = h
        .service
        .update(&other_user, mine.id, Some(VersionToken::Version(2)), status_patch(Status::Closed))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn search_covers_title_description_and_comments() {
    let h = harness();
    let user = h.users.user.identity();
    let vpn = h
        .service
        .create(&user, new_ticket("VPN down", Priority::Low))
        .await
        .unwrap();
    let printer = h
        .service
        .create(&user, new_ticket("Printer jam", Priority::Low))
        .await
        .unwrap();
    h.service
        .add_comment(
            &user,
            printer.id,
            NewComment {
                text: "Toner is EMPTY".to_string(),
                parent: None,
            },
        )
        .await
        .unwrap();

    let found = h.service.list(&user, Some("vpn")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, vpn.id);

    let found = h.service.list(&user, Some("empty")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, printer.id);

    assert_eq!(h.service.list(&user, Some("   ")).await.unwrap().len(), 2);
    assert!(h.service.list(&user, Some("keyboard")).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_mutation_appends_one_ordered_audit_entry() {
    let h = harness();
    let user = h.users.user.identity();
    let admin = h.users.admin.identity();

    let ticket = h
        .service
        .create(&user, new_ticket("Monitor", Priority::Medium))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(1));
    let ticket = h
        .service
        .update(&user, ticket.id, Some(VersionToken::Version(1)), status_patch(Status::InProgress))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(1));
    h.service
        .add_comment(
            &user,
            ticket.id,
            NewComment {
                text: "Flickers every few seconds".to_string(),
                parent: None,
            },
        )
        .await
        .unwrap();
    // Same instant as the comment: insertion order breaks the tie.
    let assigned = h
        .service
        .assign(&admin, ticket.id, h.users.agent.id)
        .await
        .unwrap();

    let timeline = h.service.timeline(&admin, ticket.id).await.unwrap();
    let kinds: Vec<&str> = timeline.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            actions::CREATED,
            actions::UPDATED,
            actions::COMMENT_ADDED,
            actions::ASSIGNED
        ]
    );
    assert!(timeline.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(timeline[1].metadata["changed"], serde_json::json!(["status"]));
    assert_eq!(timeline[3].metadata["version"], 3);
    assert_eq!(assigned.version, 3);
}

#[tokio::test]
async fn failed_write_commits_neither_ticket_nor_audit() {
    let faults = Faults::new();
    let h = harness_with(EngineConfig::default(), &faults);
    let user = h.users.user.identity();

    faults.set_fail_writes(true);
    let err = h
        .service
        .create(&user, new_ticket("Broken", Priority::Low))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILURE");
    assert_eq!(h.backend.tickets.ticket_count().unwrap(), 0);
    assert_eq!(h.backend.tickets.timeline_len().unwrap(), 0);
}

#[tokio::test]
async fn slow_storage_surfaces_as_retryable_timeout() {
    let faults = Faults::new();
    let config = EngineConfig::default().with_storage_timeout(Duration::from_millis(20));
    let h = harness_with(config, &faults);
    let user = h.users.user.identity();

    faults.set_delay(Duration::from_millis(500));
    let err = h
        .service
        .create(&user, new_ticket("Slow", Priority::Low))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn assignment_rules() {
    let h = harness();
    let user = h.users.user.identity();
    let agent = h.users.agent.identity();
    let admin = h.users.admin.identity();
    let ticket = h
        .service
        .create(&user, new_ticket("Keyboard", Priority::Low))
        .await
        .unwrap();

    let err = h
        .service
        .assign(&agent, ticket.id, agent.user_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = h
        .service
        .assign(&admin, ticket.id, h.users.other_user.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .service
        .assign(&admin, ticket.id, UserId::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let first = h.service.assign(&admin, ticket.id, agent.user_id).await.unwrap();
    assert_eq!(first.assignee, Some(agent.user_id));
    assert_eq!(first.version, 2);

    let second = h
        .service
        .assign(&admin, ticket.id, h.users.other_agent.id)
        .await
        .unwrap();
    assert_eq!(second.assignee, Some(h.users.other_agent.id));
    assert_eq!(second.version, 3);
    assert_eq!(second.sla_deadline, ticket.sla_deadline);

    let timeline = h.service.timeline(&admin, ticket.id).await.unwrap();
    let last = timeline.last().unwrap();
    assert_eq!(
        last.metadata["previous_assignee"],
        serde_json::json!(agent.user_id)
    );
}

#[tokio::test]
async fn comment_threads_stay_within_a_ticket() {
    let h = harness();
    let user = h.users.user.identity();
    let first = h
        .service
        .create(&user, new_ticket("One", Priority::Low))
        .await
        .unwrap();
    let second = h
        .service
        .create(&user, new_ticket("Two", Priority::Low))
        .await
        .unwrap();

    let root = h
        .service
        .add_comment(
            &user,
            first.id,
            NewComment {
                text: "Any update?".to_string(),
                parent: None,
            },
        )
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(1));
    let reply = h
        .service
        .add_comment(
            &user,
            first.id,
            NewComment {
                text: "Still broken".to_string(),
                parent: Some(root.id),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.parent, Some(root.id));

    let err = h
        .service
        .add_comment(
            &user,
            second.id,
            NewComment {
                text: "Wrong thread".to_string(),
                parent: Some(root.id),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .service
        .add_comment(
            &user,
            first.id,
            NewComment {
                text: "   ".to_string(),
                parent: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let comments = h.service.comments(&user, first.id).await.unwrap();
    assert_eq!(
        comments.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![root.id, reply.id]
    );
    // Comments leave the version alone.
    assert_eq!(h.service.get(&user, first.id).await.unwrap().version, 1);
}

#[tokio::test]
async fn breached_listing_excludes_closed_and_hidden() {
    let h = harness();
    let user = h.users.user.identity();
    let other = h.users.other_user.identity();
    let admin = h.users.admin.identity();

    let urgent = h
        .service
        .create(&user, new_ticket("Urgent", Priority::High))
        .await
        .unwrap();
    let closed = h
        .service
        .create(&user, new_ticket("Done", Priority::High))
        .await
        .unwrap();
    h.service
        .update(&user, closed.id, Some(VersionToken::Version(1)), status_patch(Status::Closed))
        .await
        .unwrap();
    h.service
        .create(&user, new_ticket("Relaxed", Priority::Low))
        .await
        .unwrap();
    h.service
        .create(&other, new_ticket("Someone else's", Priority::High))
        .await
        .unwrap();

    assert!(h.service.list_breached(&user).await.unwrap().is_empty());

    h.clock.advance(ChronoDuration::hours(25));
    let breached = h.service.list_breached(&user).await.unwrap();
    assert_eq!(breached.len(), 1);
    assert_eq!(breached[0].id, urgent.id);
    assert_eq!(h.service.list_breached(&admin).await.unwrap().len(), 2);
}

#[tokio::test]
async fn input_validation() {
    let h = harness();
    let user = h.users.user.identity();
    let ticket = h
        .service
        .create(&user, new_ticket("Mouse", Priority::Low))
        .await
        .unwrap();

    let err = h
        .service
        .update(&user, ticket.id, None, status_patch(Status::Closed))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .service
        .update(&user, ticket.id, Some(VersionToken::Version(1)), TicketPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .service
        .create(
            &user,
            NewTicket {
                title: "x".repeat(256),
                description: "d".to_string(),
                priority: Priority::Low,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn identities_and_agent_listing() {
    let h = harness();
    let resolved = h.service.identify(h.users.agent.id).await.unwrap();
    assert_eq!(resolved, h.users.agent.identity());

    let err = h.service.identify(UserId::new()).await.unwrap_err();
    assert_eq!(err, HelpdeskError::Unauthenticated);

    let agents = h.service.list_agents(&h.users.admin.identity()).await.unwrap();
    let names: Vec<&str> = agents.iter().map(|a| a.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let err = h
        .service
        .list_agents(&h.users.agent.identity())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn expired_idempotency_records_are_purged() {
    let h = harness();
    let user = h.users.user.identity();
    let key = IdempotencyKey::parse("purge-me").unwrap();
    h.service
        .idempotent(
            &user,
            Some(&key),
            201,
            h.service.create(&user, new_ticket("Old", Priority::Low)),
        )
        .await
        .unwrap();

    assert_eq!(h.service.purge_expired_idempotency().await.unwrap(), 0);
    h.clock.advance(ChronoDuration::hours(24));
    assert_eq!(h.service.purge_expired_idempotency().await.unwrap(), 1);
}

mod properties {
    use super::*;
    use helpdesk_testing::properties::{arb_new_ticket, arb_patch};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn version_is_one_plus_accepted_updates(
            submission in arb_new_ticket(),
            steps in proptest::collection::vec((arb_patch(), any::<bool>()), 1..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let h = harness();
                let user = h.users.user.identity();
                let mut ticket = h.service.create(&user, submission).await.unwrap();
                let mut accepted = 0_u64;

                for (patch, stale) in steps {
                    h.clock.advance(ChronoDuration::seconds(1));
                    let token = if stale {
                        VersionToken::Version(0)
                    } else {
                        VersionToken::Version(ticket.version)
                    };
                    match h.service.update(&user, ticket.id, Some(token), patch).await {
                        Ok(next) => {
                            prop_assert!(!stale);
                            accepted += 1;
                            ticket = next;
                        }
                        Err(err) => {
                            prop_assert!(stale);
                            prop_assert_eq!(err.code(), "STALE_UPDATE");
                        }
                    }
                }

                let stored = h.service.get(&user, ticket.id).await.unwrap();
                prop_assert_eq!(stored.version, 1 + accepted);
                Ok(())
            })?;
        }
    }
}
