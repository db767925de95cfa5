//! The top-level reactor and its main loop: the event queue, the
//! reaction queue, and logical-time advancement.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    ActionClass, ActionKey, Alarm, Env, MutationCtx, PhysicalEvent, PrioritySet, ReactionBody,
    ReactionCtx, ReactionKey, ReactorData, ReactorKey, RuntimeError, StagedReaction, Tag,
    TaggedEvent, TimeValue, TimerKey, TriggerKey, TriggerRes, TypedActionKey, WaitOutcome,
};

/// How long an idle keep-alive loop sleeps before re-checking the queues.
const SNOOZE: Duration = Duration::from_secs(1);

/// Scheduler configuration.
#[derive(Debug, Default)]
pub struct Config {
    /// Skip waiting for physical time to catch up with logical time.
    pub fast: bool,
    /// Keep the loop alive waiting for asynchronous events when the
    /// queues run empty.
    pub keep_alive: bool,
    /// Schedule a shutdown this long after startup. Cannot be cancelled.
    pub timeout: Option<TimeValue>,
}

/// Handle for scheduling physical actions from outside the main loop.
/// Cloneable and sendable across threads.
#[derive(Debug, Clone)]
pub struct AsyncScheduler {
    tx: Sender<PhysicalEvent>,
}

impl AsyncScheduler {
    /// Schedule a physical action. Returns false if the app has shut
    /// down.
    pub fn schedule<T: ReactorData>(
        &self,
        action: TypedActionKey<T>,
        delay: TimeValue,
        value: Option<T>,
    ) -> bool {
        self.tx
            .send(PhysicalEvent::Trigger {
                action: action.into(),
                value: value.map(|v| Arc::new(v) as Arc<dyn ReactorData>),
                extra_delay: delay,
            })
            .is_ok()
    }

    /// Request a clean shutdown from another thread.
    pub fn request_stop(&self) -> bool {
        self.tx.send(PhysicalEvent::Shutdown).is_ok()
    }
}

/// The top-level reactor: owns the topology, the queues, and the main
/// loop. Dereferences to [`Env`] for assembly.
pub struct App {
    env: Env,
    config: Config,
    event_queue: PrioritySet<TaggedEvent>,
    reaction_queue: PrioritySet<StagedReaction>,
    alarm: Alarm,
    event_tx: Sender<PhysicalEvent>,
    event_rx: Receiver<PhysicalEvent>,
    current_tag: Tag,
    start_time: TimeValue,
    end_of_execution: Option<Tag>,
    active: bool,
    errored: Option<String>,
    pending_deletions: Vec<ReactorKey>,
    pending_deactivations: Vec<ReactorKey>,
    success: Option<Box<dyn FnOnce() + Send>>,
    failure: Option<Box<dyn FnOnce() + Send>>,
}

impl std::ops::Deref for App {
    type Target = Env;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

impl std::ops::DerefMut for App {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.env
    }
}

impl App {
    pub fn new(name: &str, config: Config) -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Self {
            env: Env::new(name),
            config,
            event_queue: PrioritySet::new(),
            reaction_queue: PrioritySet::new(),
            alarm: Alarm::new(),
            event_tx,
            event_rx,
            current_tag: Tag::NEVER,
            start_time: TimeValue::ZERO,
            end_of_execution: None,
            active: false,
            errored: None,
            pending_deletions: Vec::new(),
            pending_deactivations: Vec::new(),
            success: None,
            failure: None,
        }
    }

    /// Invoked once on clean termination.
    pub fn on_success(&mut self, f: impl FnOnce() + Send + 'static) {
        self.success = Some(Box::new(f));
    }

    /// Invoked once on erroneous termination.
    pub fn on_failure(&mut self, f: impl FnOnce() + Send + 'static) {
        self.failure = Some(Box::new(f));
    }

    /// A handle for delivering physical events from other threads.
    pub fn async_scheduler(&self) -> AsyncScheduler {
        AsyncScheduler {
            tx: self.event_tx.clone(),
        }
    }

    pub fn current_tag(&self) -> Tag {
        self.current_tag
    }

    pub fn start_time(&self) -> TimeValue {
        self.start_time
    }

    /// Execute the reactor network until shutdown. Invokes the success or
    /// failure callback and reports the outcome.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let outcome = self.execute();
        self.env.running = false;
        self.active = false;

        match outcome {
            Ok(()) => {
                if !self.event_queue.is_empty() {
                    tracing::warn!(
                        "{} unprocessed future events remain on the event queue",
                        self.event_queue.len()
                    );
                }
                let elapsed = self.current_tag.time().saturating_sub(self.start_time);
                tracing::info!(elapsed = %elapsed, "Execution finished");
                if let Some(msg) = self.errored.take() {
                    if let Some(failure) = self.failure.take() {
                        failure();
                    }
                    Err(RuntimeError::ErrorStop(msg))
                } else {
                    if let Some(success) = self.success.take() {
                        success();
                    }
                    Ok(())
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Execution failed");
                self.cancel_next();
                if let Some(failure) = self.failure.take() {
                    failure();
                }
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<(), RuntimeError> {
        // A cycle in the reaction graph aborts startup.
        self.env.assign_priorities()?;

        self.start_time = TimeValue::now();
        self.current_tag = Tag::new(self.start_time, 0);
        self.active = true;
        self.env.running = true;
        let start_tag = self.current_tag;

        // The pre-built hierarchy receives its startup at the start tag.
        let startup_actions: Vec<ActionKey> = self
            .env
            .reactors
            .values_mut()
            .map(|reactor| {
                reactor.active = true;
                reactor.startup
            })
            .collect();
        for action in startup_actions {
            self.env.actions[action].tag = Some(start_tag);
        }

        // Stage reactions flagged as immediately triggered (startup
        // triggers and zero-offset timers).
        let immediate: Vec<ReactionKey> = self
            .env
            .reactions
            .iter()
            .filter(|(_, r)| r.triggered_immediately)
            .map(|(key, _)| key)
            .collect();
        let mut staged = Vec::new();
        for key in immediate {
            self.env.stage_if_active(key, &mut staged);
        }
        for entry in staged {
            self.reaction_queue.push(entry);
        }

        // Initial timer events.
        let timers: Vec<(TimerKey, Tag)> = self
            .env
            .timers
            .iter()
            .map(|(key, timer)| (key, timer.initial_tag(start_tag)))
            .collect();
        for (key, tag) in timers {
            self.event_queue
                .push(TaggedEvent::new(TriggerKey::Timer(key), tag, None));
        }

        if let Some(timeout) = self.config.timeout {
            self.schedule_shutdown_events(start_tag.later(timeout));
        }

        tracing::info!(tag = %start_tag, "Starting the execution");
        self.react()?;
        self.next()
    }

    /// The main loop: process one tag per iteration, in lockstep with
    /// physical time unless `fast` is set.
    fn next(&mut self) -> Result<(), RuntimeError> {
        loop {
            self.drain_physical_events();

            let Some(head_tag) = self.event_queue.peek().map(|e| e.tag()) else {
                if self.end_of_execution.is_some() {
                    break;
                }
                if self.config.keep_alive {
                    // Snooze, then look again for asynchronous events.
                    match self.event_rx.recv_timeout(SNOOZE) {
                        Ok(event) => self.enqueue_physical(event),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => self.initiate_shutdown(),
                    }
                    continue;
                }
                self.initiate_shutdown();
                continue;
            };

            if !self.config.fast && head_tag.time() > TimeValue::now() {
                match self.alarm.wait_until(head_tag.time(), &self.event_rx) {
                    WaitOutcome::Interrupted(event) => self.enqueue_physical(event),
                    WaitOutcome::Expired { actual } => {
                        tracing::trace!(waited = ?actual, "Alarm expired");
                    }
                }
                // Re-peek: an asynchronous event may now precede the head.
                continue;
            }

            // Superdense monotonicity: the queue is ordered, so the head
            // never precedes the current tag.
            self.current_tag = head_tag;

            // Deliver every event sharing this tag. Microsteps at the
            // same time are handled by immediate re-entry, without
            // yielding in between.
            while self
                .event_queue
                .peek()
                .is_some_and(|event| event.tag() == head_tag)
            {
                let event = self.event_queue.pop().expect("peeked");
                self.deliver(event)?;
            }

            self.react()?;

            // End-of-step maintenance: deactivations, deferred deletions,
            // and re-analysis after topology changes.
            for reactor in std::mem::take(&mut self.pending_deactivations) {
                if let Some(entry) = self.env.reactors.get_mut(reactor) {
                    entry.active = false;
                }
            }
            for reactor in std::mem::take(&mut self.pending_deletions) {
                let dropped = self.env.remove_reactor_subtree(reactor);
                if !dropped.is_empty() {
                    self.event_queue
                        .retain(|event| !dropped.contains(&event.trigger()));
                }
            }
            if self.env.graph_dirty {
                self.env.assign_priorities()?;
            }

            if self.end_of_execution == Some(self.current_tag) {
                break;
            }
        }
        Ok(())
    }

    /// Deliver one event to its trigger: store the value, mark the tag,
    /// stage the registered reactions, and reschedule periodic timers.
    fn deliver(&mut self, event: TaggedEvent) -> Result<(), RuntimeError> {
        if event.tag() != self.current_tag {
            return Err(RuntimeError::TagViolation {
                event_tag: event.tag(),
                current_tag: self.current_tag,
            });
        }

        let mut staged = Vec::new();
        match event.trigger() {
            TriggerKey::Timer(key) => {
                let Some(timer) = self.env.timers.get_mut(key) else {
                    return Ok(());
                };
                timer.tag = Some(self.current_tag);
                let triggers = timer.triggers.clone();
                let next = timer
                    .is_periodic()
                    .then(|| self.current_tag.later(timer.period));
                for reaction in triggers {
                    self.env.stage_if_active(reaction, &mut staged);
                }
                if let Some(next) = next {
                    self.event_queue
                        .push(TaggedEvent::new(TriggerKey::Timer(key), next, None));
                }
            }
            TriggerKey::Action(key) => {
                let Some(action) = self.env.actions.get_mut(key) else {
                    return Ok(());
                };
                action.value = event.value;
                action.tag = Some(self.current_tag);
                let class = action.class;
                let owner = action.meta.container;
                let triggers = action.triggers.clone();
                match class {
                    // A reactor becomes active on delivery of its startup
                    // event, and inactive once its shutdown tag completes.
                    ActionClass::Startup => self.env.reactors[owner].active = true,
                    ActionClass::Shutdown => self.pending_deactivations.push(owner),
                    ActionClass::Logical | ActionClass::Physical => {}
                }
                for reaction in triggers {
                    self.env.stage_if_active(reaction, &mut staged);
                }
            }
        }
        for entry in staged {
            self.reaction_queue.push(entry);
        }
        Ok(())
    }

    /// Drain the reaction queue in priority order. An error from a body
    /// terminates execution.
    fn react(&mut self) -> Result<(), RuntimeError> {
        while let Some(staged) = self.reaction_queue.pop() {
            self.execute_reaction(staged.key)?;
        }
        Ok(())
    }

    fn execute_reaction(&mut self, key: ReactionKey) -> Result<(), RuntimeError> {
        let Some(reaction) = self.env.reactions.get(key) else {
            // Deleted after staging.
            return Ok(());
        };
        if !reaction.active {
            return Ok(());
        }
        if !self
            .env
            .reactors
            .get(reaction.meta.container)
            .is_some_and(|r| r.active)
        {
            return Ok(());
        }

        let name = reaction.meta.name.clone();
        let body = reaction.body.clone();
        let is_mutation = matches!(body, ReactionBody::Mutation(_));

        // Soft deadline: if dispatch happens past `tag + deadline`, the
        // late handler runs instead of the body.
        let mut late = None;
        if let Some(deadline) = &reaction.deadline {
            let latest = Tag::new(
                self.current_tag.time().saturating_add(deadline.delay),
                0,
            );
            if latest < Tag::new(TimeValue::now(), 0) {
                match &deadline.late {
                    Some(handler) => late = Some(handler.clone()),
                    None => {
                        tracing::warn!(reaction = %name, "Deadline missed with no late handler")
                    }
                }
            }
        }

        tracing::trace!(reaction = %name, tag = %self.current_tag, "Executing");
        let mut ctx = ReactionCtx::new(&mut self.env, key, self.current_tag, self.start_time);
        let outcome = match late {
            Some(handler) => handler(&mut ctx),
            None => match &body {
                ReactionBody::Reaction(f) => f(&mut ctx),
                ReactionBody::Mutation(f) => {
                    let mut mutation_ctx = MutationCtx::new(ctx);
                    let outcome = f(&mut mutation_ctx);
                    ctx = mutation_ctx.inner;
                    outcome
                }
            },
        };
        let trigger_res = ctx.trigger_res;

        outcome.map_err(|source| RuntimeError::ReactionFailure {
            reaction: name,
            source,
        })?;
        self.apply_trigger_res(trigger_res);

        // A mutation that altered the graph re-triggers the precedence
        // analyzer; already-staged reactions pick up fresh priorities.
        if is_mutation && self.env.graph_dirty {
            self.env.assign_priorities()?;
            self.refresh_reaction_queue();
        }
        Ok(())
    }

    fn apply_trigger_res(&mut self, res: TriggerRes) {
        for entry in res.staged {
            self.reaction_queue.push(entry);
        }
        for event in res.scheduled {
            self.enqueue_event(event);
        }
        if let Some(msg) = res.error_stop {
            if self.errored.is_none() {
                self.errored = Some(msg);
            }
        }
        if res.stop_requested {
            self.initiate_shutdown();
        }
        self.pending_deletions.extend(res.deleted);
    }

    fn refresh_reaction_queue(&mut self) {
        let mut entries = Vec::with_capacity(self.reaction_queue.len());
        while let Some(staged) = self.reaction_queue.pop() {
            entries.push(staged.key);
        }
        let mut staged = Vec::new();
        for key in entries {
            self.env.stage_if_active(key, &mut staged);
        }
        for entry in staged {
            self.reaction_queue.push(entry);
        }
    }

    /// Schedule a shutdown one microstep after the current tag.
    pub fn request_stop(&mut self) {
        if self.active {
            self.initiate_shutdown();
        }
    }

    fn initiate_shutdown(&mut self) {
        self.schedule_shutdown_events(self.current_tag.microsteps_later(1));
    }

    fn schedule_shutdown_events(&mut self, tag: Tag) {
        if self.end_of_execution.map_or(true, |end| tag < end) {
            self.end_of_execution = Some(tag);
        }
        let shutdown_actions: Vec<ActionKey> = self
            .env
            .reactors
            .values()
            .filter(|reactor| reactor.active || !self.env.running)
            .map(|reactor| reactor.shutdown)
            .collect();
        for action in shutdown_actions {
            self.event_queue
                .push(TaggedEvent::new(TriggerKey::Action(action), tag, None));
        }
    }

    /// Unset the alarm and discard all pending work.
    fn cancel_next(&mut self) {
        self.event_queue.clear();
        self.reaction_queue.clear();
    }

    fn drain_physical_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.enqueue_physical(event);
        }
    }

    fn enqueue_physical(&mut self, event: PhysicalEvent) {
        match event {
            PhysicalEvent::Trigger {
                action,
                value,
                extra_delay,
            } => {
                let Some(entry) = self.env.actions.get(action) else {
                    return;
                };
                if entry.class != ActionClass::Physical {
                    tracing::warn!(action = %entry, "Ignoring async event for non-physical action");
                    return;
                }
                let total = entry.min_delay.saturating_add(extra_delay);
                let tag = Tag::new(TimeValue::now(), 0).later(total);
                self.enqueue_event(TaggedEvent::new(TriggerKey::Action(action), tag, value));
            }
            PhysicalEvent::Shutdown => {
                if self.active {
                    self.initiate_shutdown();
                }
            }
        }
    }

    /// Push an event, never behind the current tag. Physical events can
    /// compute tags in the logical past when running `fast`; they are
    /// moved to the next microstep instead.
    fn enqueue_event(&mut self, mut event: TaggedEvent) {
        if event.tag() <= self.current_tag {
            event.tag = self.current_tag.microsteps_later(1);
        }
        self.event_queue.push(event);
    }
}
