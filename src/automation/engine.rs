//! Automation decision engine: the keeper-facing check/perform pair.
//!
//! `check_upkeep` is read-only and may be called any number of times;
//! `perform_upkeep` re-derives every condition from current state before it
//! acts, so an intent that went stale between the two calls is skipped
//! rather than executed. The engine never schedules itself.

use super::executor::{RebalanceExecutor, RebalanceRequest, RebalanceStart};
use super::intent::{
    IntentKind, IntentOutcome, IntentResult, PerformReport, RemediationIntent, UpkeepCheck,
};
use super::prices::{fresh_price, fresh_prices};
use crate::chain::{ChainId, ChainRegistry};
use crate::config::EngineConfig;
use crate::error::PolicyError;
use crate::ledger::{HedgeLedger, HedgePosition};
use crate::policy::{AutomationPolicy, PolicyStore};
use crate::utils::deviation_bps;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AutomationEngine {
    config: EngineConfig,
    registry: Arc<ChainRegistry>,
    policies: Arc<PolicyStore>,
    ledger: Arc<HedgeLedger>,
    executor: Arc<RebalanceExecutor>,
}

impl AutomationEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ChainRegistry>,
        policies: Arc<PolicyStore>,
        ledger: Arc<HedgeLedger>,
        executor: Arc<RebalanceExecutor>,
    ) -> Self {
        Self {
            config,
            registry,
            policies,
            ledger,
            executor,
        }
    }

    // =========================================================================
    // Phase 1: check
    // =========================================================================

    /// Evaluate every owner's policy against current prices.
    pub async fn check_upkeep(&self) -> UpkeepCheck {
        self.check_upkeep_at(Utc::now()).await
    }

    /// Same as [`check_upkeep`](Self::check_upkeep) with an explicit clock.
    pub async fn check_upkeep_at(&self, now: DateTime<Utc>) -> UpkeepCheck {
        let mut intents = Vec::new();

        for (owner, policy) in self.policies.snapshot().await {
            let prices = fresh_prices(
                &self.registry,
                policy.monitored_chain_ids.iter().copied(),
                &self.config.asset,
                self.config.staleness_bound(),
                now,
            )
            .await;

            if prices.is_empty() {
                debug!(%owner, "No fresh prices, skipping owner this cycle");
                continue;
            }

            let mut held = BTreeSet::new();
            for &chain_id in prices.keys() {
                if self.ledger.has_active(&owner, chain_id).await {
                    held.insert(chain_id);
                }
            }

            let owner_intents = decide(&owner, &policy, &prices, &held);
            if !owner_intents.is_empty() {
                debug!(%owner, count = owner_intents.len(), "Remediation needed");
            }
            intents.extend(owner_intents);
        }

        UpkeepCheck::new(intents)
    }

    // =========================================================================
    // Phase 2: perform
    // =========================================================================

    /// Re-validate and execute intents, one at a time.
    ///
    /// A failing intent never stops the batch.
    pub async fn perform_upkeep(&self, intents: &[RemediationIntent]) -> PerformReport {
        let mut report = PerformReport::default();

        for intent in intents {
            let outcome = self.perform_one(intent, Utc::now()).await;

            match &outcome {
                IntentOutcome::Skipped { reason } => {
                    info!(%intent, %reason, "Intent skipped");
                }
                IntentOutcome::Failed { error } => {
                    warn!(%intent, %error, "Intent failed");
                }
                _ => debug!(%intent, ?outcome, "Intent performed"),
            }

            report.results.push(IntentResult {
                intent: intent.clone(),
                outcome,
            });
        }

        if !report.results.is_empty() {
            info!(
                acted = report.acted(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Upkeep performed"
            );
        }
        report
    }

    async fn perform_one(&self, intent: &RemediationIntent, now: DateTime<Utc>) -> IntentOutcome {
        let owner = intent.owner.as_str();
        let policy = match self.policies.get(owner).await {
            Ok(policy) => policy,
            Err(_) => return IntentOutcome::skipped("no policy configured"),
        };

        match intent.kind {
            IntentKind::OpenPosition { chain_id } => {
                self.perform_open(owner, &policy, chain_id, now).await
            }
            IntentKind::ClosePosition { chain_id } => {
                self.perform_close(owner, &policy, chain_id, now).await
            }
            IntentKind::RebalanceAcrossChains {
                source_chain_id,
                target_chain_id,
                ..
            } => {
                self.perform_rebalance(owner, &policy, source_chain_id, target_chain_id, now)
                    .await
            }
        }
    }

    async fn perform_open(
        &self,
        owner: &str,
        policy: &AutomationPolicy,
        chain_id: ChainId,
        now: DateTime<Utc>,
    ) -> IntentOutcome {
        if !policy.monitors(chain_id) {
            return IntentOutcome::skipped(format!("chain {chain_id} no longer monitored"));
        }
        let price = match self.price(chain_id, now).await {
            Ok(price) => price,
            Err(reason) => return IntentOutcome::Skipped { reason },
        };
        if price >= policy.min_price {
            return IntentOutcome::skipped(format!(
                "price {price} no longer below minimum {}",
                policy.min_price
            ));
        }
        if self.ledger.has_active(owner, chain_id).await {
            return IntentOutcome::skipped(format!("already hedged on chain {chain_id}"));
        }

        match self
            .executor
            .open_position(owner, chain_id, policy.hedge_amount, price)
            .await
        {
            Ok(position_id) => IntentOutcome::Opened { position_id },
            Err(e) => IntentOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn perform_close(
        &self,
        owner: &str,
        policy: &AutomationPolicy,
        chain_id: ChainId,
        now: DateTime<Utc>,
    ) -> IntentOutcome {
        if !policy.monitors(chain_id) {
            return IntentOutcome::skipped(format!("chain {chain_id} no longer monitored"));
        }
        let price = match self.price(chain_id, now).await {
            Ok(price) => price,
            Err(reason) => return IntentOutcome::Skipped { reason },
        };
        if price <= policy.max_price {
            return IntentOutcome::skipped(format!(
                "price {price} no longer above maximum {}",
                policy.max_price
            ));
        }

        match self.executor.close_first_active(owner, chain_id, price).await {
            Ok(Some(position_id)) => IntentOutcome::Closed { position_id },
            Ok(None) => IntentOutcome::skipped(format!("no active position on chain {chain_id}")),
            Err(e) => IntentOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn perform_rebalance(
        &self,
        owner: &str,
        policy: &AutomationPolicy,
        source: ChainId,
        target: ChainId,
        now: DateTime<Utc>,
    ) -> IntentOutcome {
        if !policy.monitors(source) || !policy.monitors(target) {
            return IntentOutcome::skipped("rebalance chains no longer monitored");
        }
        let source_price = match self.price(source, now).await {
            Ok(price) => price,
            Err(reason) => return IntentOutcome::Skipped { reason },
        };
        let target_price = match self.price(target, now).await {
            Ok(price) => price,
            Err(reason) => return IntentOutcome::Skipped { reason },
        };

        if source_price <= target_price {
            return IntentOutcome::skipped(format!(
                "source price {source_price} no longer above target price {target_price}"
            ));
        }
        if source_price > policy.max_price {
            return IntentOutcome::skipped("source above maximum, position is due for close");
        }
        let Some(deviation) = deviation_bps(source_price, target_price) else {
            return IntentOutcome::skipped(format!(
                "deviation between {source_price} and {target_price} is out of range"
            ));
        };
        if deviation <= Decimal::from(policy.rebalance_threshold_bps) {
            return IntentOutcome::skipped(format!(
                "deviation {deviation:.1} bps within threshold {}",
                policy.rebalance_threshold_bps
            ));
        }
        let Some(position) = self.ledger.first_active(owner, source).await else {
            return IntentOutcome::skipped(format!("no active position on chain {source}"));
        };

        let request = RebalanceRequest {
            owner: owner.to_string(),
            source_chain_id: source,
            position_id: position.position_id,
            amount: position.amount,
            source_price,
            target_chain_id: target,
            target_price,
        };

        match self.executor.start_rebalance(&request).await {
            Ok(RebalanceStart::Initiated(transfer_id)) => {
                IntentOutcome::TransferInitiated { transfer_id }
            }
            Ok(RebalanceStart::Uneconomic { fee }) => IntentOutcome::skipped(format!(
                "bridge fee {fee} not below amount {}",
                position.amount
            )),
            Ok(RebalanceStart::AlreadyMoved) => {
                IntentOutcome::skipped("position already moved by a concurrent perform")
            }
            Err(e) => IntentOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn price(&self, chain_id: ChainId, now: DateTime<Utc>) -> Result<Decimal, String> {
        fresh_price(
            &self.registry,
            chain_id,
            &self.config.asset,
            self.config.staleness_bound(),
            now,
        )
        .await
        .map_err(|e| format!("chain {chain_id}: {e}"))
    }

    // =========================================================================
    // Owner-facing
    // =========================================================================

    pub async fn set_policy(&self, owner: &str, policy: AutomationPolicy) -> Result<(), PolicyError> {
        self.policies.set(owner, policy).await
    }

    pub async fn get_policy(&self, owner: &str) -> Result<Arc<AutomationPolicy>, PolicyError> {
        self.policies.get(owner).await
    }

    /// Stop automation for an owner. Positions are left as they are.
    pub async fn clear_policy(&self, owner: &str) -> bool {
        self.policies.clear(owner).await
    }

    pub async fn list_positions(&self, owner: &str) -> Vec<HedgePosition> {
        self.ledger.list_positions(owner).await
    }

    pub fn executor(&self) -> &Arc<RebalanceExecutor> {
        &self.executor
    }
}

/// Intents for one owner given fresh prices and the chains where the owner
/// holds an active position. Ordered closes, opens, then at most one
/// rebalance.
pub fn decide(
    owner: &str,
    policy: &AutomationPolicy,
    prices: &BTreeMap<ChainId, Decimal>,
    held: &BTreeSet<ChainId>,
) -> Vec<RemediationIntent> {
    let mut closes = Vec::new();
    let mut opens = Vec::new();
    let mut closing = BTreeSet::new();

    for (&chain_id, &price) in prices {
        let holds = held.contains(&chain_id);
        if price < policy.min_price && !holds {
            opens.push(RemediationIntent {
                owner: owner.to_string(),
                kind: IntentKind::OpenPosition { chain_id },
                observed_price: price,
            });
        } else if price > policy.max_price && holds {
            closing.insert(chain_id);
            closes.push(RemediationIntent {
                owner: owner.to_string(),
                kind: IntentKind::ClosePosition { chain_id },
                observed_price: price,
            });
        }
    }

    let mut intents = closes;
    intents.extend(opens);

    if let Some((source, target, deviation)) = best_rebalance(policy, prices, held, &closing) {
        intents.push(RemediationIntent {
            owner: owner.to_string(),
            kind: IntentKind::RebalanceAcrossChains {
                source_chain_id: source,
                target_chain_id: target,
                deviation_bps: deviation,
            },
            observed_price: prices[&source],
        });
    }

    intents
}

/// Pick the single rebalance worth doing: the pair with the largest
/// deviation above threshold whose higher-priced chain holds a position.
/// Ties go to the smaller `(source, target)`.
fn best_rebalance(
    policy: &AutomationPolicy,
    prices: &BTreeMap<ChainId, Decimal>,
    held: &BTreeSet<ChainId>,
    closing: &BTreeSet<ChainId>,
) -> Option<(ChainId, ChainId, Decimal)> {
    let threshold = Decimal::from(policy.rebalance_threshold_bps);
    let chains: Vec<(ChainId, Decimal)> = prices.iter().map(|(&c, &p)| (c, p)).collect();
    let mut best: Option<(ChainId, ChainId, Decimal)> = None;

    for (i, &(a, price_a)) in chains.iter().enumerate() {
        for &(b, price_b) in &chains[i + 1..] {
            let (source, target) = match price_a.cmp(&price_b) {
                std::cmp::Ordering::Greater => (a, b),
                std::cmp::Ordering::Less => (b, a),
                std::cmp::Ordering::Equal => continue,
            };
            if !held.contains(&source) || closing.contains(&source) {
                continue;
            }

            let Some(deviation) = deviation_bps(price_a, price_b) else {
                warn!(
                    source = %source,
                    target = %target,
                    source_price = %prices[&source],
                    target_price = %prices[&target],
                    "Price deviation out of range, skipping pair"
                );
                continue;
            };
            if deviation <= threshold {
                continue;
            }

            let better = match best {
                None => true,
                Some((best_source, best_target, best_deviation)) => {
                    deviation > best_deviation
                        || (deviation == best_deviation
                            && (source, target) < (best_source, best_target))
                }
            };
            if better {
                best = Some((source, target, deviation));
            }
        }
    }

    best
}
