//! Task dispatcher: one message in, one redelivery directive or terminal
//! failure out.
//!
//! Flow for a task message: validate metadata, resolve the user, build the
//! controller, run it, then apply the failure policy from the `Decider`.
//! Scheduler-job messages bypass all of that and go to the `JobExecutor`.

use std::error::Error as _;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::job_executor::JobExecutor;
use crate::domain::{
    Decider, Decision, Entity, LogLevel, Message, MessageType, RedeliveryDirective,
    ScheduledJobRequest, TaskError, TaskFailure, TaskRequest, User,
};
use crate::ports::{
    ControllerFactory, EntityStore, IdGenerator, Notification, NotificationSink, TaskController,
};

pub const SUCCESS_TEXT: &str = "Task completed successfully";
pub const TIMED_OUT_TEXT: &str = "Task is timed out";

pub struct Dispatcher {
    store: Arc<dyn EntityStore>,
    factory: Arc<dyn ControllerFactory>,
    notifier: Arc<dyn NotificationSink>,
    jobs: JobExecutor,
    decider: Arc<dyn Decider>,
    ids: Arc<dyn IdGenerator>,
}

/// Renders an error and every source below it. Only for logs.
fn error_chain(err: &TaskError) -> String {
    let mut out = err.to_string();
    // the top-level message already embeds its direct source
    let mut source = err.source().and_then(|s| s.source());
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        factory: Arc<dyn ControllerFactory>,
        notifier: Arc<dyn NotificationSink>,
        jobs: JobExecutor,
        decider: Arc<dyn Decider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            factory,
            notifier,
            jobs,
            decider,
            ids,
        }
    }

    /// Queue entry point. `Err` means "do not redeliver"; the transport uses
    /// it only as a terminal acknowledgment.
    #[instrument(skip_all, fields(message_type = ?message.message_type, retries = message.retries))]
    pub async fn process_message(
        &self,
        message: &Message,
    ) -> Result<RedeliveryDirective, TaskFailure> {
        match message.message_type {
            MessageType::SchedulerJob => self.process_scheduler_job(message).await,
            MessageType::Task => self.process_task(message).await,
        }
    }

    async fn process_scheduler_job(
        &self,
        message: &Message,
    ) -> Result<RedeliveryDirective, TaskFailure> {
        let job = ScheduledJobRequest::parse(&message.body).map_err(|e| {
            warn!(error = %e, "rejecting malformed scheduler job message");
            TaskFailure::new(None, e)
        })?;
        self.jobs
            .execute(&job)
            .await
            .map_err(|e| TaskFailure::new(None, e))?;
        Ok(RedeliveryDirective::complete())
    }

    async fn process_task(&self, message: &Message) -> Result<RedeliveryDirective, TaskFailure> {
        let request = TaskRequest::parse(&message.metadata, self.ids.generate_trace_id())
            .map_err(|e| {
                warn!(error = %e, "rejecting malformed task message");
                TaskFailure::new(None, e)
            })?;

        let entity_id = Some(request.entity_id);
        let user = self
            .resolve_user(&request)
            .await
            .map_err(|e| TaskFailure::new(entity_id, e))?;

        let mut controller = self
            .factory
            .build(request.controller, &request, &user)
            .await
            .map_err(|e| {
                warn!(entity_id = %request.entity_id, error = %e, "cannot build task controller");
                TaskFailure::new(entity_id, e)
            })?;

        info!(
            entity_id = %request.entity_id,
            trace_id = %request.trace_id,
            action = %request.action,
            controller = %request.controller,
            "running task"
        );

        match controller.run().await {
            Ok(()) => {
                self.save_logs(controller.as_mut()).await;
                self.notify(controller.entity(), &user, SUCCESS_TEXT).await;
                Ok(RedeliveryDirective::complete())
            }
            Err(error) => {
                self.handle_failure(controller.as_mut(), &user, error, message.retries)
                    .await
            }
        }
    }

    async fn resolve_user(&self, request: &TaskRequest) -> Result<User, TaskError> {
        self.store
            .load_user(request.user_id)
            .await?
            .ok_or_else(|| TaskError::CannotProceed(format!("user {} not found", request.user_id)))
    }

    async fn handle_failure(
        &self,
        controller: &mut dyn TaskController,
        user: &User,
        error: TaskError,
        retries: u32,
    ) -> Result<RedeliveryDirective, TaskFailure> {
        let entity_id = controller.entity().id;

        match self.decider.decide(&error, retries) {
            Decision::Retry {
                directive,
                transition,
            } => {
                controller.log(
                    LogLevel::Warn,
                    format!(
                        "{}: {error}; retry {}/{} in {}ms",
                        error.class_name(),
                        retries + 1,
                        directive.max_attempts,
                        directive.delay.as_millis()
                    ),
                );
                if transition && let Err(e) = controller.mark_retry().await {
                    error!(entity_id = %entity_id, error = %e, "failed to mark entity for retry");
                }
                self.save_logs(controller).await;
                Ok(directive)
            }
            Decision::TimedOut => {
                controller.log(
                    LogLevel::Error,
                    format!("giving up after {retries} retries: {error}"),
                );
                self.mark_failed(controller).await;
                self.save_logs(controller).await;
                self.notify(controller.entity(), user, TIMED_OUT_TEXT).await;
                Err(TaskFailure::new(Some(entity_id), error))
            }
            Decision::Fail { mark_failed } => {
                if matches!(error, TaskError::Unexpected(_)) {
                    let chain = error_chain(&error);
                    error!(entity_id = %entity_id, error = %chain, "unhandled error in task pipeline");
                    controller.log(LogLevel::Error, chain);
                } else {
                    controller.log(LogLevel::Error, error.to_string());
                }
                if mark_failed {
                    self.mark_failed(controller).await;
                }
                self.save_logs(controller).await;
                self.notify(controller.entity(), user, error.class_name())
                    .await;
                Err(TaskFailure::new(Some(entity_id), error))
            }
        }
    }

    async fn mark_failed(&self, controller: &mut dyn TaskController) {
        if let Err(e) = controller.mark_failed().await {
            error!(entity_id = %controller.entity().id, error = %e, "failed to mark entity failed");
        }
    }

    async fn save_logs(&self, controller: &mut dyn TaskController) {
        if let Err(e) = controller.save_logs().await {
            error!(entity_id = %controller.entity().id, error = %e, "failed to persist task logs");
        }
    }

    async fn notify(&self, entity: &Entity, user: &User, text: &str) {
        let notification = Notification {
            entity_name: entity.name.clone(),
            entity_id: entity.id,
            user_id: user.id,
            text: text.to_string(),
        };
        if let Err(e) = self.notifier.publish(notification).await {
            warn!(entity_id = %entity.id, user_id = %user.id, error = %e, "notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::controllers::testing::{clock, entity, trace};
    use super::super::factory::DefaultControllerFactory;
    use super::super::testing::*;
    use super::*;
    use crate::domain::{
        ControllerKind, DefaultDecider, EntityId, EntityKind, JobType, SchedulerJobBody, State,
        Status, TaskAction, UserId,
    };
    use crate::impls::{
        InMemoryStore, RecordingGitProvider, RecordingNotifier, RecordingProvisioner,
        RecordingSqlExecutor, StaticSecretManager,
    };
    use crate::ports::UlidGenerator;
    use std::time::Duration;
    use ulid::Ulid;

    #[tokio::test]
    async fn successful_task_notifies_and_completes() {
        let h = Harness::new(None).await;

        let directive = h.dispatcher.process_message(&h.message(0)).await.unwrap();

        assert_eq!(directive, RedeliveryDirective::complete());
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, SUCCESS_TEXT);
        assert_eq!(sent[0].entity_name, "vpc");
        assert_eq!(sent[0].user_id, h.user.id);
        assert_eq!(h.events(), ["run", "save_logs"]);
    }

    #[tokio::test]
    async fn unready_children_with_budget_left_requeue_quietly() {
        let h = Harness::new(Some(|| TaskError::ChildrenNotReady("subnet".into()))).await;

        let directive = h.dispatcher.process_message(&h.message(2)).await.unwrap();

        assert_eq!(
            directive,
            RedeliveryDirective {
                requeue: true,
                delay: Duration::from_millis(1000),
                max_attempts: 3,
            }
        );
        assert_eq!(h.events(), ["run", "mark_retry", "save_logs"]);
        assert_eq!(h.last_status(), Some(Status::Error));
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_times_out() {
        let h = Harness::new(Some(|| TaskError::ParentNotReady("vpc".into()))).await;

        let failure = h.dispatcher.process_message(&h.message(3)).await.unwrap_err();

        assert_eq!(failure.source.class_name(), "ParentIsNotReady");
        assert_eq!(failure.entity_id, Some(h.entity.id));
        assert_eq!(h.events(), ["run", "mark_failed", "save_logs"]);
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, TIMED_OUT_TEXT);
    }

    #[tokio::test]
    async fn wrong_state_retries_without_touching_entity() {
        let h = Harness::new(Some(wrong_state)).await;

        let directive = h.dispatcher.process_message(&h.message(0)).await.unwrap();

        assert!(directive.requeue);
        assert_eq!(h.events(), ["run", "save_logs"]);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[rstest::rstest]
    #[case::cannot_proceed(|| TaskError::CannotProceed("no secret".into()), "CannotProceed", true)]
    #[case::assertion(|| TaskError::Assertion("plan diverged".into()), "AssertionError", true)]
    #[case::unexpected(|| TaskError::unexpected("connection reset"), "UnhandledError", true)]
    #[case::exit(|| TaskError::ExitWithoutSave("no changes".into()), "ExitWithoutSave", false)]
    #[tokio::test]
    async fn terminal_errors_fail_immediately(
        #[case] make: fn() -> TaskError,
        #[case] text: &str,
        #[case] marks_failed: bool,
    ) {
        let h = Harness::new(Some(make)).await;

        let failure = h.dispatcher.process_message(&h.message(0)).await.unwrap_err();

        assert_eq!(failure.source.class_name(), text);
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, text);
        let expected: &[&str] = if marks_failed {
            &["run", "mark_failed", "save_logs"]
        } else {
            &["run", "save_logs"]
        };
        assert_eq!(h.events(), expected);
    }

    #[tokio::test]
    async fn unhandled_error_chain_is_logged_not_notified() {
        let h = Harness::new(Some(|| TaskError::unexpected("connection reset"))).await;

        h.dispatcher.process_message(&h.message(0)).await.unwrap_err();

        assert!(h.logs().iter().any(|m| m.contains("connection reset")));
        let sent = h.notifier.sent().await;
        assert!(!sent[0].text.contains("connection reset"));
    }

    #[tokio::test]
    async fn unknown_controller_never_reaches_factory() {
        let h = Harness::new(None).await;
        let mut message = h.message(0);
        message.metadata.entity_controller = Some("template".into());

        let failure = h.dispatcher.process_message(&message).await.unwrap_err();

        assert!(matches!(failure.source, TaskError::CannotProceed(_)));
        assert_eq!(h.builds(), 0);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn missing_metadata_field_cannot_proceed() {
        let h = Harness::new(None).await;
        let mut message = h.message(0);
        message.metadata.user = None;

        let failure = h.dispatcher.process_message(&message).await.unwrap_err();

        assert!(matches!(failure.source, TaskError::CannotProceed(ref m) if m == "user is required"));
        assert_eq!(failure.entity_id, None);
        assert_eq!(h.builds(), 0);
    }

    #[tokio::test]
    async fn unknown_user_cannot_proceed() {
        let h = Harness::new(None).await;
        let mut message = h.message(0);
        message.metadata.user = Some(Ulid::new().to_string());

        let failure = h.dispatcher.process_message(&message).await.unwrap_err();

        assert!(matches!(failure.source, TaskError::CannotProceed(_)));
        assert_eq!(h.builds(), 0);
    }

    /// A dispatcher over the real controller factory.
    struct Wired {
        dispatcher: Dispatcher,
        store: InMemoryStore,
        notifier: RecordingNotifier,
        user: User,
    }

    async fn wired() -> Wired {
        let store = InMemoryStore::new();
        let notifier = RecordingNotifier::new();
        let user = User {
            id: UserId::from_ulid(Ulid::new()),
            identifier: "ops@example.com".into(),
        };
        store.insert_user(user.clone()).await;

        let factory = DefaultControllerFactory::new(
            Arc::new(store.clone()),
            clock(),
            Arc::new(StaticSecretManager::default()),
            Arc::new(RecordingProvisioner::new()),
            Arc::new(RecordingGitProvider::new()),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(factory),
            Arc::new(notifier.clone()),
            JobExecutor::new(Arc::new(RecordingSqlExecutor::new())),
            Arc::new(DefaultDecider::default()),
            Arc::new(UlidGenerator::new(clock())),
        );
        Wired {
            dispatcher,
            store,
            notifier,
            user,
        }
    }

    fn execute(entity_id: EntityId, user: &User, controller: ControllerKind) -> Message {
        Message::task(&TaskRequest {
            entity_id,
            action: TaskAction::Execute,
            user_id: user.id,
            controller,
            trace_id: trace(),
        })
    }

    #[tokio::test]
    async fn unassemblable_controller_fails_entity_and_notifies() {
        let w = wired().await;
        let ws = entity(EntityKind::Workspace, "team-a", State::Provision, Status::Queued);
        w.store.insert_entity(ws.clone()).await;

        let message = execute(ws.id, &w.user, ControllerKind::Workspace);
        let failure = w.dispatcher.process_message(&message).await.unwrap_err();

        assert!(
            matches!(failure.source, TaskError::CannotProceed(ref m) if m.contains("no backing resource"))
        );
        assert_eq!(failure.entity_id, Some(ws.id));
        let saved = w.store.entity(ws.id).await.unwrap();
        assert_eq!(saved.status(), Status::Error);
        let records = w.store.logs_for(ws.id).await;
        assert_eq!(records.len(), 1);
        assert!(
            records[0]
                .entries
                .iter()
                .any(|e| e.message.contains("no backing resource"))
        );
        let sent = w.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "CannotProceed");
        assert_eq!(sent[0].entity_name, "team-a");
    }

    #[tokio::test]
    async fn kind_mismatch_fails_the_addressed_entity() {
        let w = wired().await;
        let bucket = entity(EntityKind::Storage, "bucket", State::Provision, Status::Queued);
        w.store.insert_entity(bucket.clone()).await;

        let message = execute(bucket.id, &w.user, ControllerKind::Resource);
        w.dispatcher.process_message(&message).await.unwrap_err();

        assert_eq!(w.store.entity(bucket.id).await.unwrap().status(), Status::Error);
        assert_eq!(w.notifier.sent().await[0].text, "CannotProceed");
    }

    #[tokio::test]
    async fn missing_entity_fails_without_notification() {
        let w = wired().await;
        let message = execute(
            EntityId::from_ulid(Ulid::new()),
            &w.user,
            ControllerKind::Resource,
        );

        let failure = w.dispatcher.process_message(&message).await.unwrap_err();

        assert!(matches!(failure.source, TaskError::CannotProceed(_)));
        assert!(w.notifier.sent().await.is_empty());
        assert!(w.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn scheduler_job_goes_to_job_executor() {
        let h = Harness::new(None).await;
        let message = Message {
            message_type: MessageType::SchedulerJob,
            body: SchedulerJobBody {
                job_id: Some(Ulid::new().to_string()),
                job_type: Some(JobType::Sql.as_str().into()),
                job_script: Some("VACUUM".into()),
            },
            ..Message::default()
        };

        let directive = h.dispatcher.process_message(&message).await.unwrap();

        assert_eq!(directive, RedeliveryDirective::complete());
        assert_eq!(h.sql.executed().await, vec!["VACUUM".to_string()]);
        assert_eq!(h.builds(), 0);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn scheduler_job_without_script_cannot_proceed() {
        let h = Harness::new(None).await;
        let message = Message {
            message_type: MessageType::SchedulerJob,
            body: SchedulerJobBody {
                job_id: Some(Ulid::new().to_string()),
                job_type: Some("SQL".into()),
                job_script: None,
            },
            ..Message::default()
        };

        let failure = h.dispatcher.process_message(&message).await.unwrap_err();
        assert!(matches!(failure.source, TaskError::CannotProceed(_)));
        assert!(h.sql.executed().await.is_empty());
    }
}
