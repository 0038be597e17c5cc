//! Rebalance execution and bridge delivery handling.

use super::transfer::{PendingTransfer, TransferStatus};
use crate::chain::{ChainId, ChainRegistry, DeliveryStatus, TransferId};
use crate::error::ExecutionError;
use crate::events::{DomainEvent, EventBus};
use crate::ledger::{HedgeLedger, PositionId};
use crate::persistence::PersistenceManager;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A re-validated request to move one position's exposure.
#[derive(Debug, Clone)]
pub struct RebalanceRequest {
    pub owner: String,
    pub source_chain_id: ChainId,
    pub position_id: PositionId,
    pub amount: Decimal,
    pub source_price: Decimal,
    pub target_chain_id: ChainId,
    pub target_price: Decimal,
}

/// How far a rebalance got in the perform phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceStart {
    /// Source closed, transfer in flight
    Initiated(TransferId),
    /// Fee would consume the whole amount; nothing touched
    Uneconomic { fee: Decimal },
    /// Position was closed by a concurrent perform; nothing transferred
    AlreadyMoved,
}

/// Result of handling a delivery notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Exposure re-opened on the target chain
    Opened { position_id: PositionId },
    /// Transfer recorded as failed; owner left unhedged on that leg
    Failed { reason: String },
    /// Notification for a transfer that was already resolved
    AlreadyResolved(TransferStatus),
}

/// Sequences ledger, registry and bridge calls for remediations and owns
/// the pending-transfer table.
pub struct RebalanceExecutor {
    registry: Arc<ChainRegistry>,
    ledger: Arc<HedgeLedger>,
    events: EventBus,
    transfers: Arc<PersistenceManager>,
    asset: String,
    bridge_timeout: Duration,
    /// Serializes transfer resolution so each transfer resolves once
    resolution: Mutex<()>,
}

impl RebalanceExecutor {
    pub fn new(
        registry: Arc<ChainRegistry>,
        ledger: Arc<HedgeLedger>,
        events: EventBus,
        transfers: Arc<PersistenceManager>,
        asset: impl Into<String>,
        bridge_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            events,
            transfers,
            asset: asset.into(),
            bridge_timeout,
            resolution: Mutex::new(()),
        }
    }

    /// Open a hedge position locally.
    pub async fn open_position(
        &self,
        owner: &str,
        chain_id: ChainId,
        amount: Decimal,
        price: Decimal,
    ) -> Result<PositionId, ExecutionError> {
        Ok(self.ledger.open(owner, chain_id, amount, price).await?)
    }

    /// Close the owner's first active position on a chain.
    ///
    /// Returns None when there was nothing left to close.
    pub async fn close_first_active(
        &self,
        owner: &str,
        chain_id: ChainId,
        price: Decimal,
    ) -> Result<Option<PositionId>, ExecutionError> {
        let Some(position) = self.ledger.first_active(owner, chain_id).await else {
            return Ok(None);
        };

        let closed = self
            .ledger
            .close_at(owner, chain_id, position.position_id, Some(price))
            .await?;

        Ok(closed.then_some(position.position_id))
    }

    /// Quote, close the source position, and start the transfer.
    ///
    /// The source is closed before the transfer starts so the exposure is
    /// never active on two chains.
    pub async fn start_rebalance(
        &self,
        request: &RebalanceRequest,
    ) -> Result<RebalanceStart, ExecutionError> {
        let owner = request.owner.as_str();
        let source = request.source_chain_id;
        let target = request.target_chain_id;

        let bridge = self.registry.bridge(source).await?;

        let fee = bridge
            .estimate_fees(target, request.amount)
            .await
            .map_err(|e| ExecutionError::FeeEstimation { target, source: e })?;

        if fee >= request.amount {
            warn!(
                %owner,
                source = %source,
                target = %target,
                amount = %request.amount,
                %fee,
                "Bridge fee exceeds amount, skipping rebalance"
            );
            return Ok(RebalanceStart::Uneconomic { fee });
        }

        let closed = self
            .ledger
            .close_at(owner, source, request.position_id, Some(request.source_price))
            .await?;
        if !closed {
            debug!(%owner, source = %source, position_id = request.position_id, "Position already moved");
            return Ok(RebalanceStart::AlreadyMoved);
        }

        let transfer_id = match bridge.initiate_transfer(target, request.amount).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    %owner,
                    source = %source,
                    target = %target,
                    error = %e,
                    "Transfer initiation failed, owner left unhedged on this leg"
                );
                self.events.emit(DomainEvent::RebalanceFailed {
                    owner: owner.to_string(),
                    transfer_id: None,
                    source_chain: source,
                    target_chain: target,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(ExecutionError::TransferInitiation { target, source: e });
            }
        };

        let now = Utc::now();
        let record = PendingTransfer {
            transfer_id: transfer_id.clone(),
            owner: owner.to_string(),
            source_chain_id: source,
            target_chain_id: target,
            source_position_id: request.position_id,
            amount: request.amount,
            fee,
            target_price_at_initiation: request.target_price,
            status: TransferStatus::Pending,
            delivered_amount: None,
            target_position_id: None,
            failure_reason: None,
            initiated_at: now,
            resolved_at: None,
        };
        if let Err(e) = self.transfers.upsert_transfer(&record) {
            error!(
                %owner,
                %transfer_id,
                error = %e,
                "Failed to record pending transfer, delivery will not be tracked"
            );
            self.events.emit(DomainEvent::RebalanceFailed {
                owner: owner.to_string(),
                transfer_id: Some(transfer_id),
                source_chain: source,
                target_chain: target,
                reason: format!("pending transfer could not be recorded: {e}"),
                timestamp: Utc::now(),
            });
            return Err(ExecutionError::Store(e));
        }

        info!(
            %owner,
            %transfer_id,
            source = %source,
            target = %target,
            amount = %request.amount,
            %fee,
            "Cross-chain hedge transfer initiated"
        );

        self.events.emit(DomainEvent::CrossChainHedgeInitiated {
            owner: owner.to_string(),
            transfer_id: transfer_id.clone(),
            source_chain_id: source,
            target_chain_id: target,
            amount: request.amount,
            fee,
            timestamp: now,
        });

        Ok(RebalanceStart::Initiated(transfer_id))
    }

    /// Bridge reported delivery: open the exposure on the target chain.
    ///
    /// The transfer is claimed in the store before the ledger is touched, so
    /// a store failure at any step can never lead to a second open.
    pub async fn on_delivery_confirmed(
        &self,
        transfer_id: &TransferId,
        delivered_amount: Decimal,
    ) -> Result<DeliveryOutcome, ExecutionError> {
        let _guard = self.resolution.lock().await;
        let mut transfer = self.load_transfer(transfer_id)?;

        if !transfer.is_pending() {
            debug!(%transfer_id, status = ?transfer.status, "Delivery confirmation for resolved transfer");
            return Ok(DeliveryOutcome::AlreadyResolved(transfer.status));
        }

        let claimed = self
            .transfers
            .claim_transfer(transfer_id)
            .map_err(ExecutionError::Store)?;
        if !claimed {
            let status = self.load_transfer(transfer_id)?.status;
            return Ok(DeliveryOutcome::AlreadyResolved(status));
        }
        transfer.status = TransferStatus::Confirming;
        transfer.delivered_amount = Some(delivered_amount);

        let target = transfer.target_chain_id;
        let price = self.price_at_confirmation(&transfer).await;

        let position_id = match self
            .ledger
            .open(&transfer.owner, target, delivered_amount, price)
            .await
        {
            Ok(position_id) => position_id,
            Err(e) => {
                let reason = format!("delivered exposure could not be recorded: {e}");
                return self.mark_failed(transfer, reason);
            }
        };

        let now = Utc::now();
        transfer.status = TransferStatus::Confirmed;
        transfer.target_position_id = Some(position_id);
        transfer.resolved_at = Some(now);
        if let Err(e) = self.transfers.upsert_transfer(&transfer) {
            // Position is open; the row stays `confirming` and is never re-opened
            error!(
                %transfer_id,
                position_id,
                error = %e,
                "Failed to record confirmed transfer"
            );
            return Err(ExecutionError::Store(e));
        }

        info!(
            owner = %transfer.owner,
            %transfer_id,
            source = %transfer.source_chain_id,
            target = %target,
            %delivered_amount,
            %price,
            "Rebalance completed"
        );

        self.events.emit(DomainEvent::RebalanceTriggered {
            owner: transfer.owner.clone(),
            transfer_id: transfer_id.clone(),
            source_chain: transfer.source_chain_id,
            target_chain: target,
            delivered_amount,
            timestamp: now,
        });

        Ok(DeliveryOutcome::Opened { position_id })
    }

    /// Bridge reported failure: leave the source closed, open nothing.
    pub async fn on_delivery_failed(
        &self,
        transfer_id: &TransferId,
        reason: &str,
    ) -> Result<DeliveryOutcome, ExecutionError> {
        let _guard = self.resolution.lock().await;
        let transfer = self.load_transfer(transfer_id)?;

        if !transfer.is_pending() {
            debug!(%transfer_id, status = ?transfer.status, "Delivery failure for resolved transfer");
            return Ok(DeliveryOutcome::AlreadyResolved(transfer.status));
        }

        self.mark_failed(transfer, reason.to_string())
    }

    /// Fail every pending transfer older than the bridge timeout.
    pub async fn sweep_timed_out(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferId>, ExecutionError> {
        let expired: Vec<TransferId> = self
            .pending_transfers()?
            .into_iter()
            .filter(|t| t.is_timed_out(now, self.bridge_timeout))
            .map(|t| t.transfer_id)
            .collect();

        let mut failed = Vec::with_capacity(expired.len());
        for transfer_id in expired {
            warn!(
                %transfer_id,
                timeout_secs = self.bridge_timeout.num_seconds(),
                "Bridge delivery timed out"
            );
            match self.on_delivery_failed(&transfer_id, "timeout").await {
                Ok(DeliveryOutcome::Failed { .. }) => failed.push(transfer_id),
                Ok(_) => {}
                Err(e) => {
                    error!(%transfer_id, error = %e, "Failed to expire transfer");
                }
            }
        }
        Ok(failed)
    }

    /// Ask each pending transfer's bridge for its status and dispatch the
    /// resolved ones to the delivery callbacks.
    pub async fn poll_deliveries(&self) -> Result<Vec<(TransferId, DeliveryOutcome)>, ExecutionError> {
        let mut resolved = Vec::new();

        for transfer in self.pending_transfers()? {
            let bridge = match self.registry.bridge_any(transfer.source_chain_id).await {
                Ok(bridge) => bridge,
                Err(e) => {
                    warn!(transfer_id = %transfer.transfer_id, error = %e, "No bridge to poll");
                    continue;
                }
            };

            let status = match bridge.delivery_status(&transfer.transfer_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(transfer_id = %transfer.transfer_id, error = %e, "Delivery status poll failed");
                    continue;
                }
            };

            let outcome = match status {
                DeliveryStatus::Pending => continue,
                DeliveryStatus::Confirmed { delivered_amount } => {
                    self.on_delivery_confirmed(&transfer.transfer_id, delivered_amount)
                        .await
                }
                DeliveryStatus::Failed { reason } => {
                    self.on_delivery_failed(&transfer.transfer_id, &reason).await
                }
            };
            match outcome {
                Ok(outcome) => resolved.push((transfer.transfer_id, outcome)),
                Err(e) => {
                    error!(transfer_id = %transfer.transfer_id, error = %e, "Failed to resolve delivery");
                }
            }
        }

        Ok(resolved)
    }

    /// Transfers still awaiting delivery, oldest first.
    pub fn pending_transfers(&self) -> Result<Vec<PendingTransfer>, ExecutionError> {
        self.transfers
            .list_transfers(Some(TransferStatus::Pending))
            .map_err(ExecutionError::Store)
    }

    pub fn transfer(&self, transfer_id: &TransferId) -> Result<PendingTransfer, ExecutionError> {
        self.load_transfer(transfer_id)
    }

    fn load_transfer(&self, transfer_id: &TransferId) -> Result<PendingTransfer, ExecutionError> {
        self.transfers
            .get_transfer(transfer_id)
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ExecutionError::UnknownTransfer(transfer_id.clone()))
    }

    /// Target chain's latest price; staleness is ignored because delivered
    /// exposure has to be recorded.
    async fn price_at_confirmation(&self, transfer: &PendingTransfer) -> Decimal {
        let target = transfer.target_chain_id;
        let fallback = transfer.target_price_at_initiation;

        let feed = match self.registry.price_feed_any(target).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(chain = %target, error = %e, "No price feed at confirmation, using initiation price");
                return fallback;
            }
        };

        match feed.latest_price(target, &self.asset).await {
            Ok(reading) if reading.price > Decimal::ZERO => reading.price,
            Ok(reading) => {
                warn!(chain = %target, price = %reading.price, "Invalid price at confirmation, using initiation price");
                fallback
            }
            Err(e) => {
                warn!(chain = %target, error = %e, "Price read failed at confirmation, using initiation price");
                fallback
            }
        }
    }

    fn mark_failed(
        &self,
        mut transfer: PendingTransfer,
        reason: String,
    ) -> Result<DeliveryOutcome, ExecutionError> {
        let now = Utc::now();
        transfer.status = TransferStatus::Failed;
        transfer.failure_reason = Some(reason.clone());
        transfer.resolved_at = Some(now);
        self.transfers
            .upsert_transfer(&transfer)
            .map_err(ExecutionError::Store)?;

        warn!(
            owner = %transfer.owner,
            transfer_id = %transfer.transfer_id,
            source = %transfer.source_chain_id,
            target = %transfer.target_chain_id,
            amount = %transfer.amount,
            %reason,
            "Rebalance failed, exposure left flat until re-opened"
        );

        self.events.emit(DomainEvent::RebalanceFailed {
            owner: transfer.owner,
            transfer_id: Some(transfer.transfer_id),
            source_chain: transfer.source_chain_id,
            target_chain: transfer.target_chain_id,
            reason: reason.clone(),
            timestamp: now,
        });

        Ok(DeliveryOutcome::Failed { reason })
    }
}
