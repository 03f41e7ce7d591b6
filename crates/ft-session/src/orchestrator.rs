//! Per-session owner of every registry.
//!
//! # Tick sequence
//!
//! Each call to [`SessionOrchestrator::tick`] runs the same fixed steps:
//!
//! 1. Drain the inbound queue.
//! 2. Route each message through the ledger, treasure box and timeline.
//!    A failing message is logged, counted and skipped.
//! 3. Rebuild the roster.
//! 4. Evaluate the group policy.
//! 5. Flush the timeline tick.
//! 6. Return an owned snapshot.
//!
//! All mutation happens inside `tick` and `stop`, so producers only ever talk
//! to the queue through an [`Ingestor`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ft_core::governance::{self, Policy};
use ft_core::ledger::LedgerEventKind;
use ft_core::{
    AssignRequest, DeviceAssignmentLedger, DeviceEvent, DeviceId, DeviceRegistry, EntityId,
    EntitySummary, FitnessTimeline, InboundMessage, LedgerEvent, MetricKind, ProfileId,
    ProfileStore, Roster, Sample, SeriesExport, SeriesOwner, SessionConfig,
    SessionEntityRegistry, SessionId, SessionState, SessionSummary, Snapshot, TrackingError,
    TransferCommand, TreasureBox, ZoneId, ZoneProfile,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::ingest::Ingestor;

/// Owns all per-session state and drives it one tick at a time.
pub struct SessionOrchestrator {
    session_id: SessionId,
    config: SessionConfig,
    policy: Policy,
    zone_ranks: HashMap<ZoneId, u32>,
    profiles: Arc<dyn ProfileStore>,
    zone_cache: HashMap<ProfileId, Option<ZoneProfile>>,
    unconfigured: HashSet<EntityId>,

    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,

    ingestor: Ingestor,
    inbox: mpsc::Receiver<InboundMessage>,

    devices: DeviceRegistry,
    entities: SessionEntityRegistry,
    ledger: DeviceAssignmentLedger,
    treasure: TreasureBox,
    timeline: FitnessTimeline,

    events: Vec<LedgerEvent>,
}

impl SessionOrchestrator {
    pub fn new(
        session_id: SessionId,
        config: SessionConfig,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let (ingestor, inbox) = Ingestor::channel(config.queue_capacity);
        let policy = config.policy();
        let zone_ranks = config.zones.rank_map();
        let mut timeline = FitnessTimeline::new();
        // Idle ticks still get a slot, so the series lines up with tick 0.
        timeline.register(SeriesOwner::global("session").metric("active_count"));
        Self {
            session_id,
            policy,
            zone_ranks,
            profiles,
            zone_cache: HashMap::new(),
            unconfigured: HashSet::new(),
            state: SessionState::Idle,
            started_at: None,
            ended_at: None,
            ingestor,
            inbox,
            devices: DeviceRegistry::new(),
            entities: SessionEntityRegistry::new(),
            ledger: DeviceAssignmentLedger::new(config.grace_period()),
            treasure: TreasureBox::new(config.max_dwell_gap()),
            timeline,
            events: Vec::new(),
            config,
        }
    }

    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A producer handle for this session's queue.
    pub fn ingestor(&self) -> Ingestor {
        self.ingestor.clone()
    }

    pub const fn entities(&self) -> &SessionEntityRegistry {
        &self.entities
    }

    pub const fn ledger(&self) -> &DeviceAssignmentLedger {
        &self.ledger
    }

    pub const fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub const fn timeline(&self) -> &FitnessTimeline {
        &self.timeline
    }

    /// Every timeline series recorded so far.
    pub fn timeline_export(&self) -> Vec<SeriesExport> {
        self.timeline.export()
    }

    /// Runs one tick at `now` and returns the resulting snapshot.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Snapshot, SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::NotActive(self.state));
        }

        let mut batch = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            batch.push(message);
        }

        let mut rejected = 0;
        for message in batch {
            if let Err(err) = self.route(message) {
                warn!(session_id = %self.session_id, error = %err, "inbound message rejected");
                rejected += 1;
            }
        }

        self.devices
            .sweep_stale(now, self.config.stale_device_timeout());
        if self.timed_out(now) {
            info!(
                session_id = %self.session_id,
                timeout_ms = self.config.session_timeout_ms,
                "no device activity, ending session"
            );
            self.finish(now);
        }

        self.sync_coins();
        let roster = Roster::build(
            &self.ledger,
            &self.entities,
            &self.devices,
            &self.treasure,
            self.profiles.as_ref(),
        );

        let governance = governance::evaluate(
            &roster.active_entities(),
            &roster.zone_map(),
            &self.zone_ranks,
            &self.policy,
        );

        self.stage_tick_metrics(&roster);
        let tick_index = self.timeline.tick_count();
        self.timeline.tick(tick_index)?;

        debug!(
            session_id = %self.session_id,
            tick = tick_index,
            participants = roster.len(),
            satisfied = governance.satisfied,
            rejected,
            "tick complete"
        );

        Ok(Snapshot {
            session_id: self.session_id.clone(),
            tick_index,
            taken_at: now,
            state: self.state,
            coin_totals: self.coin_totals(),
            roster,
            governance,
            events: std::mem::take(&mut self.events),
            rejected,
        })
    }

    /// Ends the session at `now` and returns its summary.
    ///
    /// Anything still queued is logged and dropped. Calling `stop` on a
    /// session that already ended returns the same summary.
    pub fn stop(&mut self, now: DateTime<Utc>) -> SessionSummary {
        if self.state != SessionState::Ended {
            self.finish(now);
        }
        self.build_summary(self.ended_at.unwrap_or(now))
    }

    /// The summary of an ended session.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.ended_at.map(|end| self.build_summary(end))
    }

    fn route(&mut self, message: InboundMessage) -> Result<(), TrackingError> {
        match message {
            InboundMessage::Sample(sample) => self.apply_sample(&sample),
            InboundMessage::Assign(request) => self.apply_assign(&request),
            InboundMessage::Release(event) => self.apply_release(&event),
            InboundMessage::Disconnect(event) => self.apply_disconnect(&event),
        }
    }

    fn apply_sample(&mut self, sample: &Sample) -> Result<(), TrackingError> {
        let device_id = parse_device_id(&sample.device_id)?;
        self.devices
            .observe(&device_id, sample.metric, sample.value, sample.timestamp);

        let metric = sample.metric.as_str();
        self.timeline
            .assign_metric(&SeriesOwner::device(&device_id), metric, sample.value);

        let Some(entry) = self.ledger.entry(&device_id).cloned() else {
            debug!(device_id = %device_id, "sample from unassigned device");
            return Ok(());
        };
        self.treasure.ensure_fresh(&entry.entity_id, sample.timestamp)?;
        if sample.metric == MetricKind::HeartRate {
            self.score_heart_rate(&entry.entity_id, &entry.profile_id, sample)?;
        }

        // Only samples the entity accepted reach its series.
        self.timeline
            .assign_metric(&SeriesOwner::entity(&entry.entity_id), metric, sample.value);
        self.timeline
            .assign_metric(&SeriesOwner::user(&entry.profile_id), metric, sample.value);
        Ok(())
    }

    fn score_heart_rate(
        &mut self,
        entity_id: &EntityId,
        profile_id: &ProfileId,
        sample: &Sample,
    ) -> Result<(), TrackingError> {
        let Some(zones) = self.zone_profile(profile_id) else {
            if self.unconfigured.insert(entity_id.clone()) {
                warn!(
                    entity_id = %entity_id,
                    error = %TrackingError::ConfigurationMissing(profile_id.clone()),
                    "heart rate will not be scored"
                );
            }
            return Ok(());
        };

        let outcome = self
            .treasure
            .record_sample(entity_id, sample.value, &zones, sample.timestamp)?;
        if outcome.zone_changed {
            debug!(
                entity_id = %entity_id,
                zone = ?outcome.zone,
                heart_rate = sample.value,
                "zone changed"
            );
        }
        Ok(())
    }

    fn apply_assign(&mut self, request: &AssignRequest) -> Result<(), TrackingError> {
        let profile_id = ProfileId::new(request.profile_id.as_str())
            .map_err(TrackingError::InvalidProfileId)?;
        let plan = self
            .ledger
            .plan(&request.device_id, &profile_id, request.timestamp)?;

        // Close the outgoing entity's dwell interval so the audit events and
        // any inherited total include it.
        if let Some(outgoing) = plan.decision.outgoing_entity().cloned() {
            self.settle_entity(&outgoing, plan.at)?;
        }

        let assignment = self.ledger.commit(plan, &mut self.entities)?;
        for command in &assignment.commands {
            match command {
                TransferCommand::MergeAccumulator { from, to } => {
                    self.treasure.transfer_accumulator(from, to)?;
                }
                TransferCommand::RekeySeries { from, to } => {
                    self.timeline
                        .transfer_series(&SeriesOwner::entity(from), &SeriesOwner::entity(to));
                }
            }
        }
        if assignment.created {
            self.treasure.open(&assignment.entity_id);
        }
        self.record_events(assignment.events);

        if self.state == SessionState::Idle {
            self.state = SessionState::Active;
            self.started_at = Some(request.timestamp);
            info!(session_id = %self.session_id, at = %request.timestamp, "session started");
        }
        Ok(())
    }

    fn apply_release(&mut self, event: &DeviceEvent) -> Result<(), TrackingError> {
        let device_id = parse_device_id(&event.device_id)?;
        let Some(entity_id) = self.ledger.entity_for(&device_id).cloned() else {
            debug!(device_id = %device_id, "release for unassigned device ignored");
            return Ok(());
        };
        self.settle_entity(&entity_id, event.timestamp)?;
        if let Some(dropped) = self
            .ledger
            .release(&device_id, event.timestamp, &mut self.entities)?
        {
            self.record_events(vec![dropped]);
        }
        Ok(())
    }

    fn apply_disconnect(&mut self, event: &DeviceEvent) -> Result<(), TrackingError> {
        let device_id = parse_device_id(&event.device_id)?;
        if self.devices.disconnect(&device_id).is_none() {
            debug!(device_id = %device_id, "disconnect for unknown device ignored");
        }
        Ok(())
    }

    /// Settles an entity's open dwell interval and copies its total into the registry.
    fn settle_entity(&mut self, entity_id: &EntityId, at: DateTime<Utc>) -> Result<(), TrackingError> {
        let coins = self.treasure.settle(entity_id, at)?;
        self.entities.sync_coins(entity_id, coins)
    }

    fn sync_coins(&mut self) {
        let active: Vec<EntityId> = self.entities.active().map(|e| e.entity_id.clone()).collect();
        for entity_id in active {
            if let Some(total) = self.treasure.total(&entity_id) {
                if let Err(err) = self.entities.sync_coins(&entity_id, total) {
                    warn!(entity_id = %entity_id, error = %err, "coin sync failed");
                }
            }
        }
    }

    fn coin_totals(&self) -> BTreeMap<EntityId, f64> {
        self.entities
            .active()
            .map(|e| (e.entity_id.clone(), e.coins))
            .collect()
    }

    fn zone_profile(&mut self, profile_id: &ProfileId) -> Option<ZoneProfile> {
        let profiles = &self.profiles;
        let table = &self.config.zones;
        self.zone_cache
            .entry(profile_id.clone())
            .or_insert_with(|| {
                profiles
                    .zone_profile(profile_id)
                    .map(|zones| zones.with_fallback_rates(table))
            })
            .clone()
    }

    fn stage_tick_metrics(&mut self, roster: &Roster) {
        for entry in &roster.entries {
            self.timeline
                .assign_metric(&SeriesOwner::entity(&entry.entity_id), "coins", entry.coins);
        }
        if self.state != SessionState::Idle {
            self.timeline.assign_metric(
                &SeriesOwner::global("session"),
                "active_count",
                roster.active_entities().len() as f64,
            );
        }
    }

    fn record_events(&mut self, events: Vec<LedgerEvent>) {
        for event in events {
            info!(
                session_id = %self.session_id,
                kind = ?event.kind,
                entity_id = %event.entity_id,
                profile_id = %event.profile_id,
                device_id = %event.device_id,
                duration_ms = event.duration_ms,
                coins = event.coins,
                "ledger event"
            );
            self.events.push(event);
        }
    }

    fn timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.devices
            .last_activity_at()
            .or(self.started_at)
            .is_some_and(|last| now - last >= self.config.session_timeout())
    }

    /// Closes the queue, settles and finalizes every active entity.
    fn finish(&mut self, now: DateTime<Utc>) {
        self.inbox.close();
        let mut dropped = 0usize;
        while let Ok(message) = self.inbox.try_recv() {
            debug!(device_id = message.device_id(), "queued message dropped");
            dropped += 1;
        }
        if dropped > 0 {
            warn!(session_id = %self.session_id, dropped, "queued messages dropped at session end");
        }

        let active: Vec<EntityId> = self.entities.active().map(|e| e.entity_id.clone()).collect();
        for entity_id in &active {
            if let Err(err) = self.settle_entity(entity_id, now) {
                warn!(entity_id = %entity_id, error = %err, "settle failed at session end");
            }
        }

        let ended = self.entities.finalize_active(now);
        let events = ended
            .iter()
            .filter_map(|id| self.entities.get(id))
            .map(|entity| LedgerEvent {
                kind: LedgerEventKind::EntityDropped,
                entity_id: entity.entity_id.clone(),
                profile_id: entity.profile_id.clone(),
                device_id: entity.device_id.clone(),
                duration_ms: entity.duration_ms(now),
                coins: entity.coins,
                at: now,
            })
            .collect();
        self.record_events(events);
        self.ledger.clear();

        self.state = SessionState::Ended;
        self.ended_at = Some(now);
        info!(
            session_id = %self.session_id,
            entities = self.entities.len(),
            ticks = self.timeline.tick_count(),
            "session ended"
        );
    }

    fn build_summary(&self, end_time: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            start_time: self.started_at,
            end_time,
            tick_count: self.timeline.tick_count(),
            entities: self
                .entities
                .in_creation_order()
                .map(|entity| {
                    let zone_time = self
                        .treasure
                        .accumulator(&entity.entity_id)
                        .map(|acc| acc.zone_time_ms.clone())
                        .unwrap_or_default();
                    EntitySummary::from_entity(entity, zone_time)
                })
                .collect(),
        }
    }
}

fn parse_device_id(raw: &str) -> Result<DeviceId, TrackingError> {
    DeviceId::new(raw).map_err(TrackingError::InvalidDeviceId)
}
