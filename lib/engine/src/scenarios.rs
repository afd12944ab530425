//! End-to-end behavior of the engine against the in-memory store.

use crate::clock::ManualClock;
use crate::directory::{EntityProfile, UserProfile};
use crate::engine::{Engine, EngineConfig};
use crate::handler::{EventHandler, Handled};
use crate::memory::{InMemoryDirectory, InMemoryStore, RecordingEventBus, RecordingNotifier, TenantData};
use crate::process::ProcessOutcome;
use crate::schedule::{ScheduleOutcome, SkipReason};
use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use flowline_core::{EntityRef, ExecutionId, FlowActionId, FlowId, OperationContext, Tenant, UserId};
use flowline_flow::{
    ActionKind, AuthorGraph, AuthorNodeData, CompiledFlow, CompletionKind, EmailMessage, Envelope,
    ExecutionStatus, FlowActionExecution, FlowEvent, ParticipantStatus,
};
use flowline_scheduler::{Mailbox, SlotAllocator, UserWorkingSchedule};
use std::collections::HashMap;
use std::sync::Arc;

fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

fn minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(1)).unwrap()
}

struct Harness {
    engine: Arc<Engine<InMemoryStore>>,
    store: InMemoryStore,
    directory: Arc<InMemoryDirectory>,
    bus: Arc<RecordingEventBus>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
    tenant: Tenant,
    ctx: OperationContext,
}

impl Harness {
    fn new(now: DateTime<Utc>) -> Self {
        let store = InMemoryStore::new();
        let directory = Arc::new(InMemoryDirectory::new());
        let bus = Arc::new(RecordingEventBus::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(now));
        let engine = Engine::new(
            store.clone(),
            directory.clone(),
            bus.clone(),
            notifier.clone(),
            clock.clone(),
            SlotAllocator::seeded(7),
            EngineConfig::default(),
        );
        let tenant = Tenant::new("acme");
        Self {
            engine: Arc::new(engine),
            store,
            directory,
            bus,
            notifier,
            clock,
            ctx: OperationContext::system(tenant.clone()),
            tenant,
        }
    }

    /// Registers a user owning one mailbox with the given quota and schedule.
    async fn sender(&self, address: &str, quota: u32, days: &str, start: &str, end: &str) -> UserId {
        self.sender_with_spacing(address, quota, (1, 1), days, start, end)
            .await
    }

    async fn sender_with_spacing(
        &self,
        address: &str,
        quota: u32,
        spacing: (u32, u32),
        days: &str,
        start: &str,
        end: &str,
    ) -> UserId {
        let user_id = UserId::new();
        self.directory.put_user(
            &self.tenant,
            UserProfile {
                id: user_id,
                first_name: Some("Sam".to_string()),
                last_name: Some("Seller".to_string()),
                emails: vec![address.to_string()],
            },
        );
        let mailbox = Mailbox::new(address, quota, self.clock_now()).with_spacing(spacing.0, spacing.1);
        let schedule = UserWorkingSchedule::new(user_id, days, start, end);
        self.store
            .with_tenant(&self.tenant, |data| {
                data.mailboxes.insert(mailbox.username.clone(), mailbox);
                data.schedules.push(schedule);
            })
            .await;
        user_id
    }

    fn contact(&self, id: &str, first: &str, last: &str, email: Option<&str>) -> EntityRef {
        let entity = EntityRef::contact(id);
        self.directory.put_entity(
            &self.tenant,
            entity.clone(),
            EntityProfile {
                first_name: Some(first.to_string()),
                last_name: Some(last.to_string()),
                primary_email: email.map(str::to_string),
                organization_name: Some("Example Inc".to_string()),
            },
        );
        entity
    }

    /// Creates, compiles and turns on a flow with the given senders.
    async fn live_flow(&self, graph: &AuthorGraph, senders: &[UserId]) -> (FlowId, CompiledFlow) {
        let flow = self
            .engine
            .create_flow(&self.ctx, "Outreach", None)
            .await
            .expect("create");
        let compiled = self
            .engine
            .save_graph(&self.ctx, flow.id, graph)
            .await
            .expect("save");
        for user in senders {
            self.engine
                .add_sender(&self.ctx, flow.id, *user)
                .await
                .expect("add sender");
        }
        self.engine.turn_on(&self.ctx, flow.id).await.expect("turn on");
        (flow.id, compiled)
    }

    /// Seeds a historical execution on a mailbox for an unrelated entity.
    async fn history(&self, mailbox: &str, at: DateTime<Utc>) {
        let execution = FlowActionExecution::scheduled(
            FlowId::new(),
            FlowActionId::new(),
            EntityRef::contact(format!("history-{at}")),
            Some(mailbox.to_string()),
            at,
            at,
        );
        self.store
            .with_tenant(&self.tenant, |data| data.executions.push(execution))
            .await;
    }

    async fn data(&self) -> TenantData {
        self.store.snapshot(&self.tenant).await
    }

    async fn pending(&self, flow_id: FlowId, entity: &EntityRef) -> Vec<FlowActionExecution> {
        self.data()
            .await
            .executions_for(flow_id, entity)
            .into_iter()
            .filter(|e| e.status == ExecutionStatus::Scheduled)
            .collect()
    }

    async fn participant_status(&self, flow_id: FlowId, entity: &EntityRef) -> ParticipantStatus {
        self.data()
            .await
            .participants
            .values()
            .find(|p| p.flow_id == flow_id && &p.entity == entity)
            .map(|p| p.status)
            .expect("participant")
    }

    async fn email_of(&self, execution_id: ExecutionId) -> EmailMessage {
        self.data()
            .await
            .emails
            .into_iter()
            .find(|e| e.producer_id == execution_id)
            .expect("email")
    }

    async fn mark_sent(&self, execution_id: ExecutionId, message_id: &str) {
        let marked = self
            .store
            .with_tenant(&self.tenant, |data| data.mark_email_sent(execution_id, message_id))
            .await;
        assert!(marked);
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use crate::clock::Clock;
        self.clock.now()
    }
}

fn start() -> AuthorNodeData {
    AuthorNodeData::action("FLOW_START")
}

fn end() -> AuthorNodeData {
    AuthorNodeData::action("FLOW_END")
}

fn hi() -> AuthorNodeData {
    AuthorNodeData::action("EMAIL_NEW")
        .with_subject("Hi")
        .with_body("Hello {{contact_first_name}}")
}

/// START -> WAIT(60) -> EMAIL_NEW -> WAIT(1440) -> EMAIL_REPLY -> END
fn two_step_graph() -> AuthorGraph {
    let mut graph = AuthorGraph::default();
    graph
        .push_node("start", start())
        .push_node("w1", AuthorNodeData::wait(60))
        .push_node("hi", hi())
        .push_node("w2", AuthorNodeData::wait(1440))
        .push_node("bump", AuthorNodeData::action("EMAIL_REPLY").with_body("Bump"))
        .push_node("end", end())
        .push_edge("start", "w1")
        .push_edge("w1", "hi")
        .push_edge("hi", "w2")
        .push_edge("w2", "bump")
        .push_edge("bump", "end");
    graph
}

/// START -> EMAIL_NEW(waitBefore) -> END
fn single_email_graph(wait_before: u32) -> AuthorGraph {
    let mut graph = AuthorGraph::default();
    graph
        .push_node("start", start())
        .push_node("hi", hi().with_wait(wait_before))
        .push_node("end", end())
        .push_edge("start", "hi")
        .push_edge("hi", "end");
    graph
}

#[tokio::test]
async fn linear_two_step_with_wait() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, compiled) = h.live_flow(&two_step_graph(), &[user]).await;
    let hi_id = compiled.action_by_external_id("hi").expect("hi").id;
    let bump_id = compiled.action_by_external_id("bump").expect("bump").id;

    let participant = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");
    assert_eq!(participant.status, ParticipantStatus::Scheduled);

    let pending = h.pending(flow_id, &alice).await;
    assert_eq!(pending.len(), 1);
    let first = pending[0].clone();
    assert_eq!(first.action_id, hi_id);
    assert_eq!(first.mailbox.as_deref(), Some("me@acme.com"));
    assert!(first.scheduled_at >= monday(10, 0));
    assert_eq!(minute(first.scheduled_at), monday(10, 1));

    h.clock.set(first.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Succeeded);

    let email = h.email_of(first.id).await;
    assert_eq!(email.subject, "Hi");
    assert_eq!(email.content, "Hello Alice");
    assert_eq!(email.to, vec!["alice@ex.com".to_string()]);
    assert_eq!(email.from, "me@acme.com");
    assert_eq!(email.from_name, "Sam Seller");

    let pending = h.pending(flow_id, &alice).await;
    assert_eq!(pending.len(), 1);
    let second = pending[0].clone();
    assert_eq!(second.action_id, bump_id);
    assert_eq!(second.mailbox.as_deref(), Some("me@acme.com"));
    let gap = minute(second.scheduled_at) - minute(first.scheduled_at);
    assert!(gap >= Duration::minutes(1439) && gap <= Duration::minutes(1441), "gap {gap}");

    h.mark_sent(first.id, "<msg-1@acme.com>").await;
    h.clock.set(second.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, second.id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Succeeded);

    let reply = h.email_of(second.id).await;
    assert_eq!(reply.subject, "Re: Hi");
    assert_eq!(reply.content, "Bump");
    assert_eq!(reply.provider_in_reply_to.as_deref(), Some("<msg-1@acme.com>"));
    assert_eq!(reply.provider_references.as_deref(), Some("<msg-1@acme.com>"));
    assert_eq!(reply.provider_thread_id.as_deref(), Some("thread-<msg-1@acme.com>"));

    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Completed);
    let billed: Vec<_> = h.data().await.billable_events.iter().map(|b| b.subtype).collect();
    assert_eq!(billed, vec![ActionKind::EmailNew, ActionKind::EmailReply]);
}

#[tokio::test]
async fn daily_cap_forces_next_day_slot() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 2, "Mon-Fri", "09:00", "17:00").await;
    h.history("me@acme.com", monday(9, 30)).await;
    h.history("me@acme.com", monday(9, 45)).await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&single_email_graph(60), &[user]).await;

    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");

    let pending = h.pending(flow_id, &alice).await;
    assert_eq!(pending.len(), 1);
    let at = pending[0].scheduled_at;
    assert_eq!(at.weekday(), Weekday::Tue);
    assert!(at.time() >= NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    assert!(minute(at).time() <= NaiveTime::from_hms_opt(17, 0, 0).unwrap());
}

#[tokio::test]
async fn missing_primary_email_holds_then_fails_forced_execution() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let bob = h.contact("bob", "Bob", "Jones", None);
    let (flow_id, compiled) = h.live_flow(&single_email_graph(0), &[user]).await;

    let participant = h
        .engine
        .enroll_participant(&h.ctx, flow_id, bob.clone())
        .await
        .expect("enroll");
    assert_eq!(participant.status, ParticipantStatus::OnHold);
    assert!(h.data().await.executions.is_empty());

    let forced = FlowActionExecution::scheduled(
        flow_id,
        compiled.action_by_external_id("hi").expect("hi").id,
        bob.clone(),
        Some("me@acme.com".to_string()),
        monday(9, 0),
        monday(9, 0),
    );
    let forced_id = forced.id;
    h.store
        .with_tenant(&h.tenant, |data| data.executions.push(forced))
        .await;

    let outcome = h.engine.process_execution(&h.ctx, forced_id).await.expect("process");
    assert!(matches!(outcome, ProcessOutcome::BusinessError { .. }));
    let data = h.data().await;
    assert_eq!(data.executions[0].status, ExecutionStatus::BusinessError);
    assert!(data.emails.is_empty());
    assert_eq!(h.participant_status(flow_id, &bob).await, ParticipantStatus::OnHold);
}

#[tokio::test]
async fn business_error_is_retried_once_requirements_recover() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let bob = h.contact("bob", "Bob", "Jones", Some("bob@ex.com"));
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    h.engine
        .enroll_participant(&h.ctx, flow_id, bob.clone())
        .await
        .expect("enroll");
    let first = h.pending(flow_id, &bob).await[0].clone();

    // The address disappears before the send fires.
    h.contact("bob", "Bob", "Jones", None);
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert!(matches!(outcome, ProcessOutcome::BusinessError { .. }));
    assert_eq!(h.participant_status(flow_id, &bob).await, ParticipantStatus::OnHold);

    h.contact("bob", "Bob", "Jones", Some("bob@ex.com"));
    let changed = h
        .engine
        .recompute_participant_requirements(&h.ctx, flow_id)
        .await
        .expect("recompute");
    assert_eq!(changed, 1);
    let participant_id = h.data().await.participants.values().next().expect("participant").id;
    let outcome = h
        .engine
        .schedule_participant(&h.ctx, participant_id)
        .await
        .expect("schedule");
    let ScheduleOutcome::Scheduled(created) = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert_eq!(created[0].action_id, first.action_id);
    assert!(created[0].scheduled_at >= h.clock_now());
}

#[tokio::test]
async fn compile_strips_wait_nodes() {
    let h = Harness::new(monday(9, 0));
    let flow = h.engine.create_flow(&h.ctx, "Outreach", None).await.expect("create");
    let mut graph = AuthorGraph::default();
    graph
        .push_node("A", start())
        .push_node("B", AuthorNodeData::wait(30))
        .push_node("C", AuthorNodeData::wait(15))
        .push_node("D", hi())
        .push_node("E", end())
        .push_edge("A", "B")
        .push_edge("B", "C")
        .push_edge("C", "D")
        .push_edge("D", "E");

    h.engine.save_graph(&h.ctx, flow.id, &graph).await.expect("save");

    let data = h.data().await;
    let by_external: HashMap<_, _> = data
        .actions
        .values()
        .map(|a| (a.external_id.as_str(), a))
        .collect();
    let mut names: Vec<_> = by_external.keys().copied().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["A", "D", "E"]);
    assert!(data.actions.values().all(|a| a.kind() != ActionKind::Wait));
    assert_eq!(by_external["D"].data.wait_before, 45);

    let mut links: Vec<_> = data
        .links
        .iter()
        .map(|(from, to)| {
            (
                data.actions[from].external_id.as_str(),
                data.actions[to].external_id.as_str(),
            )
        })
        .collect();
    links.sort_unstable();
    assert_eq!(links, vec![("A", "D"), ("D", "E")]);

    // The saved authoring graph now carries internal ids for real actions.
    let saved = &data.flows[&flow.id].graph;
    assert!(
        saved
            .nodes
            .iter()
            .filter(|n| n.data.action != "WAIT")
            .all(|n| n.internal_id.is_some())
    );
    assert!(h.bus.events().contains(&FlowEvent::ComputeParticipantRequirements { flow_id: flow.id }));
}

#[tokio::test]
async fn sender_selection_picks_fastest_mailbox() {
    let h = Harness::new(monday(11, 0));
    let one = h.sender("one@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let two = h.sender("two@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    h.history("one@acme.com", monday(13, 0)).await;
    h.history("two@acme.com", monday(11, 0)).await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&single_email_graph(60), &[one, two]).await;

    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");

    let data = h.data().await;
    let settings = data
        .settings
        .iter()
        .find(|s| s.flow_id == flow_id && s.entity == alice)
        .expect("settings");
    assert_eq!(settings.mailbox.as_deref(), Some("two@acme.com"));
    assert_eq!(settings.user_id, Some(two));

    let pending = h.pending(flow_id, &alice).await;
    assert_eq!(pending[0].mailbox.as_deref(), Some("two@acme.com"));
    assert!(pending[0].scheduled_at >= monday(12, 0));
    assert!(pending[0].scheduled_at < monday(13, 0));
}

#[tokio::test]
async fn mailbox_binding_is_sticky() {
    let h = Harness::new(monday(9, 0));
    let one = h.sender("one@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let two = h.sender("two@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let bob = h.contact("bob", "Bob", "Jones", Some("bob@ex.com"));
    let (flow_id, _) = h.live_flow(&two_step_graph(), &[one, two]).await;

    // Neither mailbox has history, so the address breaks the tie.
    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll alice");
    let first = h.pending(flow_id, &alice).await[0].clone();
    assert_eq!(first.mailbox.as_deref(), Some("one@acme.com"));

    // one@ now has history and two@ has none, so bob goes to two@.
    h.engine
        .enroll_participant(&h.ctx, flow_id, bob.clone())
        .await
        .expect("enroll bob");
    assert_eq!(
        h.pending(flow_id, &bob).await[0].mailbox.as_deref(),
        Some("two@acme.com")
    );

    // alice's reply stays on one@ even though two@ is less busy.
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    let executions = h.data().await.executions_for(flow_id, &alice);
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.mailbox.as_deref() == Some("one@acme.com")));
}

#[tokio::test]
async fn goal_achievement_supersedes_pending_reply() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&two_step_graph(), &[user]).await;
    let participant = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");
    let first = h.pending(flow_id, &alice).await[0].clone();
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    let reply = h.pending(flow_id, &alice).await[0].clone();
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Scheduled);

    let updated = h
        .engine
        .goal_achieved(&h.ctx, flow_id, &alice)
        .await
        .expect("goal");
    assert_eq!(updated.status, ParticipantStatus::GoalAchieved);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.email, "me@acme.com");
    assert_eq!(sent[0].workflow_id, "flow-goal-achieved");
    assert_eq!(sent[0].template_data["entityId"], "alice");

    let outcome = h
        .engine
        .schedule_participant(&h.ctx, participant.id)
        .await
        .expect("schedule");
    assert_eq!(outcome, ScheduleOutcome::Skipped(SkipReason::Terminal));

    h.clock.set(reply.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, reply.id).await.expect("process");
    assert!(matches!(outcome, ProcessOutcome::BusinessError { .. }));
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::GoalAchieved);
    assert_eq!(h.data().await.executions_for(flow_id, &alice).len(), 2);

    // A repeated signal changes nothing.
    h.engine.goal_achieved(&h.ctx, flow_id, &alice).await.expect("goal");
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn mailbox_slots_are_monotonic_capped_and_in_hours() {
    let h = Harness::new(monday(9, 0));
    let user = h
        .sender_with_spacing("me@acme.com", 3, (5, 30), "Mon-Fri", "09:00", "17:00")
        .await;
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    for n in 0..8 {
        let contact = h.contact(&format!("c{n}"), "C", "N", Some(&format!("c{n}@ex.com")));
        h.engine
            .enroll_participant(&h.ctx, flow_id, contact)
            .await
            .expect("enroll");
    }

    let data = h.data().await;
    let slots: Vec<_> = data
        .executions
        .iter()
        .filter(|e| e.mailbox.as_deref() == Some("me@acme.com"))
        .map(|e| e.scheduled_at)
        .collect();
    assert_eq!(slots.len(), 8);
    assert!(slots.windows(2).all(|w| w[0] <= w[1]), "{slots:?}");

    let mut per_day: HashMap<_, u32> = HashMap::new();
    for at in &slots {
        *per_day.entry(at.date_naive()).or_default() += 1;
        assert!(!matches!(at.weekday(), Weekday::Sat | Weekday::Sun));
        assert!(at.time() >= NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert!(minute(*at).time() <= NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    }
    assert!(per_day.values().all(|&count| count <= 3), "{per_day:?}");
    assert_eq!(per_day.len(), 3);
}

#[tokio::test]
async fn statistics_match_participant_statuses() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let bob = h.contact("bob", "Bob", "Jones", None);
    let carol = h.contact("carol", "Carol", "White", Some("carol@ex.com"));
    for entity in [&alice, &bob, &carol] {
        h.engine
            .enroll_participant(&h.ctx, flow_id, entity.clone())
            .await
            .expect("enroll");
    }
    h.engine.goal_achieved(&h.ctx, flow_id, &carol).await.expect("goal");
    h.bus.drain();

    let updated = h.engine.refresh_statistics(&h.tenant).await.expect("stats");
    assert_eq!(updated, 1);
    let counters = h.data().await.flows[&flow_id].counters;
    assert_eq!(counters.scheduled, 1);
    assert_eq!(counters.on_hold, 1);
    assert_eq!(counters.goal_achieved, 1);
    assert_eq!(counters.total, 3);
    assert!(counters.is_consistent());
    assert_eq!(
        h.bus.events(),
        vec![FlowEvent::flow_changed(flow_id, CompletionKind::Update)]
    );

    let updated = h.engine.refresh_statistics(&h.tenant).await.expect("stats");
    assert_eq!(updated, 0);
}

#[tokio::test]
async fn dropping_email_actions_releases_held_participants() {
    let h = Harness::new(monday(9, 0));
    let flow = h.engine.create_flow(&h.ctx, "Outreach", None).await.expect("create");
    h.engine
        .save_graph(&h.ctx, flow.id, &single_email_graph(0))
        .await
        .expect("save");
    let bob = h.contact("bob", "Bob", "Jones", None);
    h.engine
        .enroll_participant(&h.ctx, flow.id, bob.clone())
        .await
        .expect("enroll");
    assert_eq!(h.participant_status(flow.id, &bob).await, ParticipantStatus::OnHold);

    let mut no_email = AuthorGraph::default();
    no_email
        .push_node("start", start())
        .push_node("end", end())
        .push_edge("start", "end");
    h.bus.drain();
    h.engine
        .save_graph(&h.ctx, flow.id, &no_email)
        .await
        .expect("save");

    let handler = EventHandler::new(Arc::clone(&h.engine));
    let recompute = h
        .bus
        .drain()
        .into_iter()
        .find(|e| e.event.event_type == flowline_flow::event::TOPIC_COMPUTE_REQUIREMENTS)
        .expect("recompute event");
    assert_eq!(handler.handle(&recompute).await.expect("handle"), Handled::Dispatched);
    assert_eq!(h.participant_status(flow.id, &bob).await, ParticipantStatus::Ready);
}

#[tokio::test]
async fn ramp_up_catches_up_without_passing_ceiling() {
    let h = Harness::new(monday(9, 0));
    let three_days_ago = monday(0, 0) - Duration::days(3);
    let slow = Mailbox::new("slow@acme.com", 5, three_days_ago).with_ramp(20, 4, three_days_ago);
    let near = Mailbox::new("near@acme.com", 18, three_days_ago).with_ramp(20, 5, three_days_ago);
    h.store
        .with_tenant(&h.tenant, |data| {
            data.mailboxes.insert(slow.username.clone(), slow);
            data.mailboxes.insert(near.username.clone(), near);
        })
        .await;

    assert_eq!(h.engine.ramp_up_mailboxes(&h.tenant).await.expect("ramp"), 2);
    let data = h.data().await;
    assert_eq!(data.mailboxes["slow@acme.com"].ramp_up_current, 17);
    assert_eq!(data.mailboxes["slow@acme.com"].last_ramp_up_at, monday(0, 0));
    assert_eq!(data.mailboxes["near@acme.com"].ramp_up_current, 20);

    assert_eq!(h.engine.ramp_up_mailboxes(&h.tenant).await.expect("ramp"), 0);
    assert_eq!(h.data().await.mailboxes["slow@acme.com"].ramp_up_current, 17);
}

#[tokio::test]
async fn graph_changes_require_flow_off() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;

    let err = h
        .engine
        .save_graph(&h.ctx, flow_id, &two_step_graph())
        .await
        .expect_err("flow is on");
    assert_eq!(err.current_context().tag(), "FlowActive");

    h.engine.turn_off(&h.ctx, flow_id).await.expect("turn off");
    let mut broken = AuthorGraph::default();
    broken.push_node("hi", hi());
    let before = h.data().await.actions.len();
    let err = h
        .engine
        .save_graph(&h.ctx, flow_id, &broken)
        .await
        .expect_err("no start");
    assert_eq!(err.current_context().tag(), "InvalidGraph");
    assert_eq!(h.data().await.actions.len(), before);
}

#[tokio::test]
async fn first_start_is_kept_across_restarts() {
    let h = Harness::new(monday(9, 0));
    let flow = h.engine.create_flow(&h.ctx, "Outreach", Some("Q1")).await.expect("create");
    assert_eq!(flow.description.as_deref(), Some("Q1"));

    let on = h.engine.turn_on(&h.ctx, flow.id).await.expect("on");
    assert_eq!(on.first_started_at, Some(monday(9, 0)));
    h.engine.turn_off(&h.ctx, flow.id).await.expect("off");
    h.clock.advance(Duration::hours(2));
    let on = h.engine.turn_on(&h.ctx, flow.id).await.expect("on");
    assert_eq!(on.first_started_at, Some(monday(9, 0)));

    let schedules = h
        .bus
        .events()
        .into_iter()
        .filter(|e| matches!(e, FlowEvent::ScheduleFlow { .. }))
        .count();
    assert_eq!(schedules, 2);
}

#[tokio::test]
async fn enrollment_is_idempotent_and_surfaces_scheduling_errors() {
    let h = Harness::new(monday(9, 0));
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[]).await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));

    let err = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect_err("no senders");
    assert_eq!(err.current_context().tag(), "NoMailboxAvailable");
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Ready);

    let again = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll again");
    assert_eq!(again.status, ParticipantStatus::Ready);
    assert_eq!(h.data().await.participants.len(), 1);
}

#[tokio::test]
async fn linkedin_steps_are_unsupported_at_scheduling() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let mut graph = AuthorGraph::default();
    graph
        .push_node("start", start())
        .push_node("li", AuthorNodeData::action("LINKEDIN_MESSAGE"))
        .push_node("end", end())
        .push_edge("start", "li")
        .push_edge("li", "end");
    let (flow_id, _) = h.live_flow(&graph, &[user]).await;
    let alice = h.contact("alice", "Alice", "Smith", None);

    let err = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice)
        .await
        .expect_err("unsupported");
    assert_eq!(err.current_context().tag(), "Unsupported");
    assert!(h.data().await.executions.is_empty());
}

#[tokio::test]
async fn processing_twice_sends_once() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");
    let first = h.pending(flow_id, &alice).await[0].clone();

    h.clock.set(first.scheduled_at + Duration::minutes(5));
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Succeeded);
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Skipped);

    let data = h.data().await;
    assert_eq!(data.emails.len(), 1);
    assert_eq!(data.billable_events.len(), 1);
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Completed);
}

#[tokio::test]
async fn unsent_parent_is_retried_by_the_sweeper() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&two_step_graph(), &[user]).await;
    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");

    assert_eq!(
        h.engine.process_due_executions(&h.tenant).await.expect("sweep").total(),
        0
    );

    let first = h.pending(flow_id, &alice).await[0].clone();
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    let report = h.engine.process_due_executions(&h.tenant).await.expect("sweep");
    assert_eq!(report.succeeded, 1);

    let reply = h.pending(flow_id, &alice).await[0].clone();
    h.clock.set(reply.scheduled_at + Duration::minutes(1));
    let report = h.engine.process_due_executions(&h.tenant).await.expect("sweep");
    assert_eq!(report.tech_errors, 1);
    let data = h.data().await;
    let stored = data.executions.iter().find(|e| e.id == reply.id).expect("reply");
    assert_eq!(stored.status, ExecutionStatus::TechError);
    assert_eq!(data.emails.len(), 1);

    h.mark_sent(first.id, "<msg-1@acme.com>").await;
    let report = h.engine.process_due_executions(&h.tenant).await.expect("sweep");
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.email_of(reply.id).await.subject, "Re: Hi");
}

#[tokio::test]
async fn business_error_releases_participant_for_retry() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let (flow_id, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    let participant = h
        .engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll");
    let first = h.pending(flow_id, &alice).await[0].clone();

    let mailbox = h
        .store
        .with_tenant(&h.tenant, |data| data.mailboxes.remove("me@acme.com"))
        .await
        .expect("mailbox");
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert!(matches!(outcome, ProcessOutcome::BusinessError { .. }), "{outcome:?}");
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Ready);
    assert!(h.pending(flow_id, &alice).await.is_empty());

    h.store
        .with_tenant(&h.tenant, |data| {
            data.mailboxes.insert(mailbox.username.clone(), mailbox);
        })
        .await;
    let outcome = h
        .engine
        .schedule_participant(&h.ctx, participant.id)
        .await
        .expect("reschedule");
    let ScheduleOutcome::Scheduled(retried) = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].action_id, first.action_id);
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Scheduled);

    h.clock.set(retried[0].scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, retried[0].id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Succeeded);
    assert_eq!(h.participant_status(flow_id, &alice).await, ParticipantStatus::Completed);
}

#[tokio::test]
async fn failed_reply_keeps_its_daily_slot() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 1, "Mon-Sun", "00:00", "23:59").await;
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    let bob = h.contact("bob", "Bob", "Jones", Some("bob@ex.com"));
    let (flow_id, _) = h.live_flow(&two_step_graph(), &[user]).await;
    h.engine
        .enroll_participant(&h.ctx, flow_id, alice.clone())
        .await
        .expect("enroll alice");

    let first = h.pending(flow_id, &alice).await[0].clone();
    h.clock.set(first.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, first.id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Succeeded);

    let reply = h.pending(flow_id, &alice).await[0].clone();
    assert_eq!(reply.scheduled_at.weekday(), Weekday::Tue);
    h.clock.set(reply.scheduled_at + Duration::minutes(1));
    let outcome = h.engine.process_execution(&h.ctx, reply.id).await.expect("process");
    assert!(matches!(outcome, ProcessOutcome::TechError { .. }), "{outcome:?}");

    h.engine
        .enroll_participant(&h.ctx, flow_id, bob.clone())
        .await
        .expect("enroll bob");
    let bobs = h.pending(flow_id, &bob).await;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].scheduled_at.weekday(), Weekday::Wed);

    h.mark_sent(first.id, "<msg-1@acme.com>").await;
    let report = h.engine.process_due_executions(&h.tenant).await.expect("sweep");
    assert_eq!(report.succeeded, 1);

    let mut per_day: HashMap<_, u32> = HashMap::new();
    for execution in h.data().await.executions {
        if execution.status.counts_against_quota() {
            *per_day.entry(execution.scheduled_at.date_naive()).or_default() += 1;
        }
    }
    assert!(per_day.values().all(|count| *count <= 1), "{per_day:?}");
}

#[tokio::test]
async fn reschedule_requests_only_active_flows() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let (active, _) = h.live_flow(&single_email_graph(0), &[user]).await;
    h.engine.create_flow(&h.ctx, "Draft", None).await.expect("create");
    h.bus.drain();

    assert_eq!(h.engine.request_reschedule(&h.tenant).await.expect("reschedule"), 1);
    assert_eq!(h.bus.events(), vec![FlowEvent::ScheduleFlow { flow_id: active }]);
}

#[tokio::test]
async fn handler_schedules_flow_and_ignores_observer_events() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let flow = h.engine.create_flow(&h.ctx, "Outreach", None).await.expect("create");
    h.engine
        .save_graph(&h.ctx, flow.id, &single_email_graph(0))
        .await
        .expect("save");
    h.engine.add_sender(&h.ctx, flow.id, user).await.expect("sender");
    let alice = h.contact("alice", "Alice", "Smith", Some("alice@ex.com"));
    h.engine
        .enroll_participant(&h.ctx, flow.id, alice.clone())
        .await
        .expect("enroll");
    assert!(h.pending(flow.id, &alice).await.is_empty());

    h.bus.drain();
    h.engine.turn_on(&h.ctx, flow.id).await.expect("on");
    let handler = EventHandler::new(Arc::clone(&h.engine));
    let mut handled = Vec::new();
    for envelope in h.bus.drain() {
        handled.push(handler.handle(&envelope).await.expect("handle"));
    }
    assert_eq!(handled, vec![Handled::Ignored, Handled::Dispatched]);
    assert_eq!(h.pending(flow.id, &alice).await.len(), 1);

    let mut future = Envelope::wrap(
        &h.ctx,
        &FlowEvent::ScheduleFlow { flow_id: flow.id },
        "test",
        monday(9, 0),
    )
    .expect("wrap");
    future.version += 1;
    assert_eq!(handler.handle(&future).await.expect("handle"), Handled::Rejected);
}

#[tokio::test]
async fn senders_can_be_listed_and_removed() {
    let h = Harness::new(monday(9, 0));
    let user = h.sender("me@acme.com", 10, "Mon-Sun", "00:00", "23:59").await;
    let flow = h.engine.create_flow(&h.ctx, "Outreach", None).await.expect("create");

    let sender = h.engine.add_sender(&h.ctx, flow.id, user).await.expect("add");
    let again = h.engine.add_sender(&h.ctx, flow.id, user).await.expect("add");
    assert_eq!(sender, again);
    assert_eq!(h.engine.list_senders(&h.ctx, flow.id).await.expect("list").len(), 1);

    let err = h
        .engine
        .add_sender(&h.ctx, flow.id, UserId::new())
        .await
        .expect_err("unknown user");
    assert_eq!(err.current_context().tag(), "UserMissing");

    assert!(h.engine.remove_sender(&h.ctx, flow.id, sender.id).await.expect("remove"));
    assert!(!h.engine.remove_sender(&h.ctx, flow.id, sender.id).await.expect("remove"));
    assert!(h.engine.list_senders(&h.ctx, flow.id).await.expect("list").is_empty());
}
