//! Arena — the Round Orchestrator
//!
//! Owns the live round set and drives it: a fixed-period background step
//! advances any round whose timer expired or whose completion condition is
//! already met, and keeps a target number of registrable rounds open.
//!
//! One coordinator-wide async mutex guards all round state. Each step runs
//! in two lock acquisitions with the node I/O in between, so the critical
//! sections never block on the network:
//!
//! ```text
//! ┌──────────────── lock ────────────────┐   ┌───── no lock ─────┐   ┌── lock ──┐
//! │ timeouts, phase transitions,         │ → │ broadcasts, spend │ → │ commit,  │
//! │ ban/blame decisions, creation plan   │   │ checks, fee rate  │   │ create   │
//! └──────────────────────────────────────┘   └───────────────────┘   └──────────┘
//!                                                 then: publish snapshot + events
//! ```
//!
//! Results of the I/O stage are re-validated against current state before
//! they are applied; a round disrupted in the gap ignores them.

pub mod events;
pub mod handlers;
pub mod max_suggested;
pub mod requests;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::core::coin::{OutPoint, ScriptPubkey};
use crate::core::units::{Amount, FeeRate};
use crate::error::Offense;
use crate::infra::credentials::CredentialIssuer;
use crate::infra::prison::Prison;
use crate::infra::rpc::BitcoinRpc;
use crate::infra::scripts::UsedScripts;
use crate::round::construction::{ConstructionState, Transaction};
use crate::round::params::RoundParameters;
use crate::round::phase::{EndRoundState, Phase};
use crate::round::round::{Round, RoundId, RoundKind, TxState};

use events::RoundEvent;
use max_suggested::MaxSuggestedAmountProvider;
use status::RoundSnapshot;

/// Everything behind the coordinator lock.
pub(crate) struct ArenaState {
    pub(crate) rounds: BTreeMap<RoundId, Round>,
    pub(crate) max_suggested: MaxSuggestedAmountProvider,
    pub(crate) pending_events: Vec<RoundEvent>,
    next_nonce: u64,
}

impl ArenaState {
    pub(crate) fn push_event(&mut self, event: RoundEvent) {
        self.pending_events.push(event);
    }

    /// Whether the outpoint is registered in any round that has not ended.
    pub(crate) fn outpoint_registered(&self, outpoint: &OutPoint) -> bool {
        self.rounds.values().any(|r| !r.is_ended() && r.contains_outpoint(outpoint))
    }

    /// Whether the script appears as an input or output of any live round.
    pub(crate) fn script_in_use(&self, script: &ScriptPubkey) -> bool {
        self.rounds.values().any(|r| !r.is_ended() && r.uses_script(script))
    }
}

/// A spend-status check queued during pass 1.
struct SpendCheck {
    round_id: RoundId,
    context: SpendCheckContext,
    outpoints: Vec<OutPoint>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SpendCheckContext {
    /// Input registration closed; verify coins before confirmation starts.
    InputRegistrationEnd,
    /// Confirmation timed out; re-verify the remaining coins.
    ConfirmationTimeout,
}

/// A round to create during commit.
struct RoundPlan {
    max_suggested: Amount,
    /// Mine the id to order before every other registrable round.
    order_first: bool,
}

/// Work collected under the first lock acquisition.
#[derive(Default)]
struct StepPlan {
    broadcasts: Vec<(RoundId, Transaction)>,
    spend_checks: Vec<SpendCheck>,
    rounds_needed: Vec<RoundPlan>,
}

impl StepPlan {
    fn needs_io(&self) -> bool {
        !self.broadcasts.is_empty() || !self.spend_checks.is_empty() || !self.rounds_needed.is_empty()
    }
}

/// Results of the I/O stage.
struct StepOutcome {
    broadcasts: Vec<(RoundId, Result<(), String>)>,
    spend_checks: Vec<(SpendCheck, Vec<OutPoint>)>,
    fee_rate: Option<FeeRate>,
    rounds_needed: Vec<RoundPlan>,
}

/// The round orchestrator.
pub struct Arena {
    pub(crate) config: CoordinatorConfig,
    pub(crate) rpc: Arc<dyn BitcoinRpc>,
    pub(crate) prison: Arc<Prison>,
    pub(crate) used_scripts: Arc<UsedScripts>,
    pub(crate) issuer: Arc<dyn CredentialIssuer>,
    pub(crate) state: Mutex<ArenaState>,
    snapshot_tx: watch::Sender<Arc<Vec<RoundSnapshot>>>,
    event_tx: broadcast::Sender<RoundEvent>,
}

impl Arena {
    /// Create an arena with no rounds; the first step opens them.
    pub fn new(
        config: CoordinatorConfig,
        rpc: Arc<dyn BitcoinRpc>,
        prison: Arc<Prison>,
        used_scripts: Arc<UsedScripts>,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        let max_suggested = MaxSuggestedAmountProvider::new(
            config.max_suggested_base_amount,
            config.max_registrable_amount,
        );
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            rpc,
            prison,
            used_scripts,
            issuer,
            state: Mutex::new(ArenaState {
                rounds: BTreeMap::new(),
                max_suggested,
                pending_events: Vec::new(),
                next_nonce: 0,
            }),
            snapshot_tx,
            event_tx,
        }
    }

    /// Subscribe to round transitions.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RoundEvent> {
        self.event_tx.subscribe()
    }

    /// Watch the published snapshot set.
    pub fn watch_status(&self) -> watch::Receiver<Arc<Vec<RoundSnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    /// Run the background loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(period = ?self.config.step_period, "arena loop starting");
        let mut ticker = interval(self.config.step_period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.step().await,
                _ = shutdown.recv() => {
                    info!("arena loop stopping");
                    return;
                }
            }
        }
    }

    /// One maintenance pass. The background loop calls this every period;
    /// tests drive it directly.
    pub async fn step(&self) {
        let now = Instant::now();
        self.prison.release_expired(now);

        let plan = {
            let mut state = self.state.lock().await;
            self.advance(&mut state, now)
        };

        let outcome = if plan.needs_io() {
            Some(self.execute_plan(plan).await)
        } else {
            None
        };

        let (snapshot, events) = {
            let mut state = self.state.lock().await;
            if let Some(outcome) = outcome {
                self.commit(&mut state, outcome, Instant::now());
            }
            let snapshot: Vec<RoundSnapshot> =
                state.rounds.values().map(RoundSnapshot::from_round).collect();
            (Arc::new(snapshot), std::mem::take(&mut state.pending_events))
        };

        // Outside the lock: observers never run in the critical section
        self.snapshot_tx.send_replace(snapshot);
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }

    /// Drain handler-produced events after a lock release.
    pub(crate) async fn publish_pending(&self) {
        let events = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending_events)
        };
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }

    // =========================================================================
    // PASS 1 — PURE TRANSITIONS
    // =========================================================================

    fn advance(&self, state: &mut ArenaState, now: Instant) -> StepPlan {
        let mut plan = StepPlan::default();
        self.timeout_rounds(state, now);
        self.timeout_alices(state, now);
        self.step_signing(state, now, &mut plan);
        self.step_output_registration(state, now);
        self.step_connection_confirmation(state, now, &mut plan);
        self.step_input_registration(state, now, &mut plan);
        self.plan_round_creation(state, now, &mut plan);
        self.abort_flagged_rounds(state, now);
        plan
    }

    /// Evict ended rounds past their retention window.
    fn timeout_rounds(&self, state: &mut ArenaState, now: Instant) {
        let expiry = self.config.round_expiry_timeout;
        state.rounds.retain(|id, round| {
            let keep = match round.ended_at {
                Some(ended_at) => now < ended_at + expiry,
                None => true,
            };
            if !keep {
                debug!(round_id = %id, "evicting expired round");
            }
            keep
        });
    }

    /// Remove unconfirmed Alices whose deadline passed.
    fn timeout_alices(&self, state: &mut ArenaState, now: Instant) {
        for round in state.rounds.values_mut() {
            if round.phase() != Phase::InputRegistration {
                continue;
            }
            let expired: Vec<_> = round.alices.iter()
                .filter(|(_, a)| !a.confirmed && a.deadline <= now)
                .map(|(id, a)| (*id, a.coin.outpoint))
                .collect();
            for (alice_id, outpoint) in expired {
                round.alices.remove(&alice_id);
                round.touch();
                debug!(round_id = %round.id, %outpoint, "alice timed out");
                state.pending_events.push(RoundEvent::InputRemoved { id: round.id, outpoint });
            }
        }
    }

    /// Queue broadcasts for fully signed rounds; punish stragglers on
    /// signing timeout and continue in a blame round when possible.
    fn step_signing(&self, state: &mut ArenaState, now: Instant, plan: &mut StepPlan) {
        enum Action {
            Broadcast(Transaction),
            Timeout,
            Broken,
        }

        let rounds: Vec<RoundId> = state.rounds.values()
            .filter(|r| r.phase() == Phase::TransactionSigning)
            .map(|r| r.id)
            .collect();

        for id in rounds {
            let Some(round) = state.rounds.get(&id) else { continue };
            let action = match round.signing() {
                None => Action::Broken,
                Some(signing) => match signing.to_transaction() {
                    Some(tx) => Action::Broadcast(tx),
                    None if round.phase_frame.has_expired(now) => Action::Timeout,
                    None => continue,
                },
            };
            match action {
                Action::Broadcast(tx) => plan.broadcasts.push((id, tx)),
                Action::Timeout => self.handle_signing_timeout(state, id, now),
                Action::Broken => {
                    error!(round_id = %id, "signing phase without signing state");
                    if let Some(round) = state.rounds.get_mut(&id) {
                        round.end(EndRoundState::AbortedWithError, now);
                        state.pending_events.push(RoundEvent::RoundEnded {
                            id,
                            state: EndRoundState::AbortedWithError,
                        });
                    }
                }
            }
        }
    }

    fn handle_signing_timeout(&self, state: &mut ArenaState, id: RoundId, now: Instant) {
        let Some(round) = state.rounds.get_mut(&id) else { return };

        let unsigned = round.signing().map(|s| s.unsigned_outpoints()).unwrap_or_default();
        let offenders: Vec<_> = round.alices.iter()
            .filter(|(_, a)| unsigned.contains(&a.coin.outpoint))
            .map(|(alice_id, a)| (*alice_id, a.coin.outpoint))
            .collect();

        let may_ban = self.may_ban_offenders(offenders.len(), round.params.min_input_count);
        if !may_ban {
            warn!(
                round_id = %id,
                offenders = offenders.len(),
                "implausibly many non-signers, skipping bans"
            );
        }
        for (alice_id, outpoint) in &offenders {
            if may_ban {
                self.prison.punish(*outpoint, Offense::FailedToSign, id, now);
                state.pending_events.push(RoundEvent::InputBanned {
                    id,
                    outpoint: *outpoint,
                    offense: Offense::FailedToSign,
                });
            }
            round.alices.remove(alice_id);
            round.touch();
            state.pending_events.push(RoundEvent::InputRemoved { id, outpoint: *outpoint });
        }

        let remaining: Vec<OutPoint> = round.alices.values().map(|a| a.coin.outpoint).collect();
        if remaining.len() >= self.config.min_blame_input_count {
            info!(
                round_id = %id,
                remaining = remaining.len(),
                "signing timed out, continuing in blame round"
            );
            round.end(EndRoundState::NotAllSigned, now);
            let params = round.params.for_blame_round(&self.config);
            state.pending_events.push(RoundEvent::RoundEnded {
                id,
                state: EndRoundState::NotAllSigned,
            });
            self.create_round(
                state,
                params,
                RoundKind::Blame { blame_of: id, whitelist: remaining.into_iter().collect() },
                blame_nonce(&id),
                now,
            );
        } else {
            warn!(round_id = %id, remaining = remaining.len(), "not enough signers to continue");
            round.end(EndRoundState::AbortedNotEnoughSigners, now);
            state.pending_events.push(RoundEvent::RoundEnded {
                id,
                state: EndRoundState::AbortedNotEnoughSigners,
            });
        }
    }

    /// Freeze the transaction once everyone is ready or the window closes.
    fn step_output_registration(&self, state: &mut ArenaState, now: Instant) {
        let rounds: Vec<RoundId> = state.rounds.values()
            .filter(|r| r.phase() == Phase::OutputRegistration)
            .map(|r| r.id)
            .collect();

        for id in rounds {
            let Some(round) = state.rounds.get_mut(&id) else { continue };
            let all_ready = !round.alices.is_empty()
                && round.alices.values().all(|a| a.ready_to_sign);
            let expired = round.phase_frame.has_expired(now);
            if !all_ready && !expired {
                continue;
            }

            // Stragglers already had their window: shorten signing
            round.fast_signing = !all_ready;

            let placeholder = TxState::Constructing(ConstructionState::new(round.params.mining_fee_rate));
            let construction = match std::mem::replace(&mut round.tx, placeholder) {
                TxState::Constructing(construction) => construction,
                TxState::Signing(_) => {
                    error!(round_id = %id, "output registration with frozen transaction");
                    round.end(EndRoundState::AbortedWithError, now);
                    state.pending_events.push(RoundEvent::RoundEnded {
                        id,
                        state: EndRoundState::AbortedWithError,
                    });
                    continue;
                }
            };
            let signing = construction.finalize(&self.config.coordinator_script);
            info!(
                round_id = %id,
                inputs = signing.inputs.len(),
                outputs = signing.outputs.len(),
                fast = !all_ready,
                "transaction frozen, signing"
            );
            round.tx = TxState::Signing(signing);
            round.set_phase(Phase::TransactionSigning, now);
            state.pending_events.push(RoundEvent::PhaseChanged {
                id,
                phase: Phase::TransactionSigning,
            });
        }
    }

    /// Advance fully confirmed rounds; on timeout drop (and maybe ban) the
    /// unconfirmed and queue a spend re-check for the rest.
    fn step_connection_confirmation(&self, state: &mut ArenaState, now: Instant, plan: &mut StepPlan) {
        let rounds: Vec<RoundId> = state.rounds.values()
            .filter(|r| r.phase() == Phase::ConnectionConfirmation)
            .map(|r| r.id)
            .collect();

        for id in rounds {
            let Some(round) = state.rounds.get_mut(&id) else { continue };
            let all_confirmed = !round.alices.is_empty()
                && round.alices.values().all(|a| a.confirmed);
            if all_confirmed {
                round.set_phase(Phase::OutputRegistration, now);
                info!(round_id = %id, inputs = round.alices.len(), "all confirmed, registering outputs");
                state.pending_events.push(RoundEvent::PhaseChanged {
                    id,
                    phase: Phase::OutputRegistration,
                });
                continue;
            }
            if !round.phase_frame.has_expired(now) {
                continue;
            }

            let offenders: Vec<_> = round.alices.iter()
                .filter(|(_, a)| !a.confirmed)
                .map(|(alice_id, a)| (*alice_id, a.coin.outpoint))
                .collect();
            let may_ban = self.may_ban_offenders(offenders.len(), round.params.min_input_count);
            if !may_ban {
                warn!(
                    round_id = %id,
                    offenders = offenders.len(),
                    "implausibly many unconfirmed, skipping bans"
                );
            }
            for (alice_id, outpoint) in &offenders {
                if may_ban {
                    self.prison.punish(*outpoint, Offense::FailedToConfirm, id, now);
                    state.pending_events.push(RoundEvent::InputBanned {
                        id,
                        outpoint: *outpoint,
                        offense: Offense::FailedToConfirm,
                    });
                }
                round.alices.remove(alice_id);
                round.touch();
                state.pending_events.push(RoundEvent::InputRemoved { id, outpoint: *outpoint });
            }

            if round.alices.len() < round.params.min_input_count {
                warn!(round_id = %id, remaining = round.alices.len(), "too few confirmed inputs");
                round.end(EndRoundState::AbortedNotAllConfirmed, now);
                state.pending_events.push(RoundEvent::RoundEnded {
                    id,
                    state: EndRoundState::AbortedNotAllConfirmed,
                });
                continue;
            }
            // The survivors' coins may have been spent while we waited
            plan.spend_checks.push(SpendCheck {
                round_id: id,
                context: SpendCheckContext::ConfirmationTimeout,
                outpoints: round.alices.values().map(|a| a.coin.outpoint).collect(),
            });
        }
    }

    /// Close registration when full or expired; queue the batch spend check
    /// or abort outright when participation is too thin.
    fn step_input_registration(&self, state: &mut ArenaState, now: Instant, plan: &mut StepPlan) {
        let rounds: Vec<RoundId> = state.rounds.values()
            .filter(|r| r.phase() == Phase::InputRegistration && r.flagged_end.is_none())
            .map(|r| r.id)
            .collect();

        for id in rounds {
            let Some(round) = state.rounds.get_mut(&id) else { continue };
            let expired = round.phase_frame.has_expired(now);
            let full = round.alices.len() >= round.params.max_input_count;
            if !expired && !full {
                continue;
            }

            if round.alices.len() < round.params.min_input_count {
                info!(round_id = %id, inputs = round.alices.len(), "input registration failed");
                let is_blame = round.is_blame();
                round.end(EndRoundState::AbortedNotEnoughInputs, now);
                state.pending_events.push(RoundEvent::RoundEnded {
                    id,
                    state: EndRoundState::AbortedNotEnoughInputs,
                });
                if !is_blame {
                    state.max_suggested.on_input_registration_failed();
                }
                continue;
            }

            plan.spend_checks.push(SpendCheck {
                round_id: id,
                context: SpendCheckContext::InputRegistrationEnd,
                outpoints: round.alices.values().map(|a| a.coin.outpoint).collect(),
            });
        }
    }

    /// Keep the target number of registrable rounds; split an
    /// over-subscribed round into a large-cap and a small-cap pair.
    fn plan_round_creation(&self, state: &mut ArenaState, now: Instant, plan: &mut StepPlan) {
        let oversubscribed: Option<RoundId> = state.rounds.values()
            .find(|r| {
                !r.is_blame()
                    && r.is_registrable(now)
                    && r.alices.len() >= self.config.round_split_threshold
            })
            .map(|r| r.id);
        if let Some(id) = oversubscribed {
            if let Some(round) = state.rounds.get_mut(&id) {
                info!(round_id = %id, inputs = round.alices.len(), "splitting over-subscribed round");
                round.end(EndRoundState::AbortedLoadBalancing, now);
                state.pending_events.push(RoundEvent::RoundEnded {
                    id,
                    state: EndRoundState::AbortedLoadBalancing,
                });
                plan.rounds_needed.push(RoundPlan {
                    max_suggested: self.config.max_suggested_base_amount,
                    order_first: false,
                });
                plan.rounds_needed.push(RoundPlan {
                    max_suggested: self.config.max_registrable_amount,
                    order_first: true,
                });
            }
        }

        let registrable = state.rounds.values()
            .filter(|r| !r.is_blame() && r.is_registrable(now))
            .count();
        let target = self.config.target_registrable_round_count;
        let needed = target.saturating_sub(registrable + plan.rounds_needed.len());
        for _ in 0..needed {
            let max_suggested = state.max_suggested.next_max_suggested();
            plan.rounds_needed.push(RoundPlan { max_suggested, order_first: false });
        }
    }

    /// Apply externally flagged aborts (double-spend watchers and the like).
    fn abort_flagged_rounds(&self, state: &mut ArenaState, now: Instant) {
        for round in state.rounds.values_mut() {
            if round.is_ended() {
                continue;
            }
            if let Some(end_state) = round.flagged_end.take() {
                warn!(round_id = %round.id, %end_state, "aborting disrupted round");
                round.end(end_state, now);
                state.pending_events.push(RoundEvent::RoundEnded { id: round.id, state: end_state });
            }
        }
    }

    /// The self-protection heuristic: mass offenses look like a coordinator
    /// malfunction, not an attack, so banning is skipped. Tunable policy.
    fn may_ban_offenders(&self, offender_count: usize, min_input_count: usize) -> bool {
        offender_count <= min_input_count
    }

    // =========================================================================
    // I/O STAGE
    // =========================================================================

    async fn execute_plan(&self, plan: StepPlan) -> StepOutcome {
        let mut broadcast_results = Vec::with_capacity(plan.broadcasts.len());
        for (round_id, tx) in plan.broadcasts {
            let txid = tx.txid();
            let result = self.rpc.broadcast(&tx).await;
            match &result {
                Ok(()) => info!(round_id = %round_id, %txid, "coinjoin broadcast"),
                Err(err) => warn!(round_id = %round_id, %txid, %err, "broadcast failed"),
            }
            broadcast_results.push((round_id, result.map_err(|e| e.to_string())));
        }

        let mut spend_results = Vec::with_capacity(plan.spend_checks.len());
        for check in plan.spend_checks {
            let spent = self.find_spent(&check.outpoints).await;
            spend_results.push((check, spent));
        }

        let fee_rate = if plan.rounds_needed.is_empty() {
            None
        } else {
            match self.rpc.estimate_fee(self.config.fee_estimate_target).await {
                Ok(rate) => Some(rate),
                Err(err) => {
                    warn!(%err, "fee estimation failed, postponing round creation");
                    None
                }
            }
        };

        StepOutcome {
            broadcasts: broadcast_results,
            spend_checks: spend_results,
            fee_rate,
            rounds_needed: plan.rounds_needed,
        }
    }

    /// Batched spend-status lookup: concurrent within a chunk, sequential
    /// across chunks. Lookup failures count as spent; the coin is dropped
    /// rather than trusted.
    async fn find_spent(&self, outpoints: &[OutPoint]) -> Vec<OutPoint> {
        let mut spent = Vec::new();
        for chunk in outpoints.chunks(self.config.rpc_batch_size.max(1)) {
            let lookups = join_all(chunk.iter().map(|op| self.rpc.get_utxo(op))).await;
            for (outpoint, result) in chunk.iter().zip(lookups) {
                match result {
                    Ok(Some(_)) => {}
                    Ok(None) => spent.push(*outpoint),
                    Err(err) => {
                        warn!(%outpoint, %err, "spend check failed, treating as spent");
                        spent.push(*outpoint);
                    }
                }
            }
        }
        spent
    }

    // =========================================================================
    // PASS 2 — COMMIT
    // =========================================================================

    fn commit(&self, state: &mut ArenaState, outcome: StepOutcome, now: Instant) {
        for (round_id, result) in outcome.broadcasts {
            let Some(round) = state.rounds.get_mut(&round_id) else { continue };
            if round.is_ended() {
                continue;
            }
            let end_state = match result {
                Ok(()) => EndRoundState::TransactionBroadcasted,
                Err(_) => EndRoundState::TransactionBroadcastFailed,
            };
            round.end(end_state, now);
            state.pending_events.push(RoundEvent::RoundEnded { id: round_id, state: end_state });
        }

        for (check, spent) in outcome.spend_checks {
            self.commit_spend_check(state, check, spent, now);
        }

        if !outcome.rounds_needed.is_empty() {
            if let Some(fee_rate) = outcome.fee_rate {
                self.commit_round_creation(state, outcome.rounds_needed, fee_rate, now);
            }
        }
    }

    fn commit_spend_check(
        &self,
        state: &mut ArenaState,
        check: SpendCheck,
        spent: Vec<OutPoint>,
        now: Instant,
    ) {
        let expected_phase = match check.context {
            SpendCheckContext::InputRegistrationEnd => Phase::InputRegistration,
            SpendCheckContext::ConfirmationTimeout => Phase::ConnectionConfirmation,
        };
        let id = check.round_id;
        let Some(round) = state.rounds.get_mut(&id) else { return };
        // Disrupted in the I/O gap: the result no longer applies
        if round.phase() != expected_phase {
            return;
        }

        for outpoint in &spent {
            // A coin spent while registered is a provable double spend
            self.prison.punish(*outpoint, Offense::DoubleSpend, id, now);
            state.pending_events.push(RoundEvent::InputBanned {
                id,
                outpoint: *outpoint,
                offense: Offense::DoubleSpend,
            });
            let doomed: Vec<_> = round.alices.iter()
                .filter(|(_, a)| a.coin.outpoint == *outpoint)
                .map(|(alice_id, _)| *alice_id)
                .collect();
            for alice_id in doomed {
                round.alices.remove(&alice_id);
                if let Some(construction) = round.construction_mut() {
                    construction.remove_input(outpoint);
                }
                round.touch();
                state.pending_events.push(RoundEvent::InputRemoved { id, outpoint: *outpoint });
            }
        }

        match check.context {
            SpendCheckContext::InputRegistrationEnd => {
                if round.alices.len() >= round.params.min_input_count {
                    round.set_phase(Phase::ConnectionConfirmation, now);
                    info!(round_id = %id, inputs = round.alices.len(), "confirming connections");
                    state.pending_events.push(RoundEvent::PhaseChanged {
                        id,
                        phase: Phase::ConnectionConfirmation,
                    });
                } else {
                    info!(round_id = %id, "too few inputs after spend check");
                    let is_blame = round.is_blame();
                    round.end(EndRoundState::AbortedNotEnoughInputs, now);
                    state.pending_events.push(RoundEvent::RoundEnded {
                        id,
                        state: EndRoundState::AbortedNotEnoughInputs,
                    });
                    if !is_blame {
                        state.max_suggested.on_input_registration_failed();
                    }
                }
            }
            SpendCheckContext::ConfirmationTimeout => {
                if round.alices.len() >= round.params.min_input_count {
                    round.set_phase(Phase::OutputRegistration, now);
                    state.pending_events.push(RoundEvent::PhaseChanged {
                        id,
                        phase: Phase::OutputRegistration,
                    });
                } else {
                    round.end(EndRoundState::AbortedNotAllConfirmed, now);
                    state.pending_events.push(RoundEvent::RoundEnded {
                        id,
                        state: EndRoundState::AbortedNotAllConfirmed,
                    });
                }
            }
        }
    }

    fn commit_round_creation(
        &self,
        state: &mut ArenaState,
        plans: Vec<RoundPlan>,
        fee_rate: FeeRate,
        now: Instant,
    ) {
        // Plain rounds first so mined rounds know what to order before
        let (mined, plain): (Vec<_>, Vec<_>) = plans.into_iter().partition(|p| p.order_first);

        for plan in plain {
            let params = RoundParameters::from_config(&self.config, fee_rate, plan.max_suggested);
            let nonce = state.next_nonce;
            state.next_nonce += 1;
            self.create_round(state, params, RoundKind::Default, nonce, now);
        }

        for plan in mined {
            let params = RoundParameters::from_config(&self.config, fee_rate, plan.max_suggested);
            let pivot = state.rounds.values()
                .filter(|r| r.is_registrable(now))
                .map(|r| r.id)
                .min();
            let nonce = self.mine_nonce(state, &params, pivot);
            self.create_round(state, params, RoundKind::Default, nonce, now);
        }
    }

    /// Mine a creation nonce whose round id sorts before `pivot`, so legacy
    /// clients that take the first round by id prefer the new round. Gives
    /// up after the configured attempt bound.
    fn mine_nonce(&self, state: &mut ArenaState, params: &RoundParameters, pivot: Option<RoundId>) -> u64 {
        let commitment = self.issuer.parameters_commitment();
        let first = state.next_nonce;
        state.next_nonce += self.config.round_id_mining_max_attempts.max(1) as u64;
        let Some(pivot) = pivot else { return first };
        for nonce in first..state.next_nonce {
            if RoundId::compute(params, &commitment, nonce) < pivot {
                return nonce;
            }
        }
        debug!("round id mining exhausted, ordering not guaranteed");
        first
    }

    pub(crate) fn create_round(
        &self,
        state: &mut ArenaState,
        params: RoundParameters,
        kind: RoundKind,
        nonce: u64,
        now: Instant,
    ) -> RoundId {
        let blame_of = match &kind {
            RoundKind::Default => None,
            RoundKind::Blame { blame_of, .. } => Some(*blame_of),
        };
        let round = Round::new(params, &self.issuer.parameters_commitment(), nonce, kind, now);
        let id = round.id;
        info!(
            round_id = %id,
            max_suggested = %round.params.max_suggested_amount,
            blame = blame_of.is_some(),
            "round created"
        );
        state.rounds.insert(id, round);
        state.push_event(RoundEvent::RoundCreated { id, blame_of });
        id
    }
}

/// Blame-round creation nonce, derived from the failed round's id so
/// concurrent blame rounds never collide.
fn blame_nonce(parent: &RoundId) -> u64 {
    u64::from_le_bytes(parent.0[..8].try_into().unwrap_or([0; 8]))
}

#[cfg(test)]
mod tests;
