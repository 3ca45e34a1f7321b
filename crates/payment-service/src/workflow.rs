//! Purchase workflow state machine
//!
//! One purchase, one owner task. The workflow provisions a deposit address,
//! binds the required coin amount from the creation-time exchange rate,
//! polls the chain until a sufficient payment is confirmed, grants the
//! entitlement exactly once, and then (when custody sweeping is enabled)
//! drains the deposit address to the operator.
//!
//! State is persisted after every transition; a restarted process recomputes
//! where to pick up from the stored fields, never from in-memory flags.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use broker_common::{format_coin, Error, Result};

use crate::chain::ChainObserver;
use crate::config::WorkflowSettings;
use crate::evaluator::PaymentEvaluator;
use crate::gateway::Gateway;
use crate::oracle::PriceOracle;
use crate::provisioner::AddressProvisioner;
use crate::storage::PurchaseStore;
use crate::sweeper::CustodySweeper;

/// Lifecycle states of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Created,
    AwaitingPayment,
    PaymentSeen,
    Confirming,
    Confirmed,
    Granted,
    Sweeping,
    Swept,
    SweepFailed,
    ProvisionFailed,
    PricingFailed,
    TimedOut,
    Cancelled,
    /// Non-retryable infrastructure failure (bad credentials, broken
    /// provider contract) surfaced mid-flight
    Failed,
}

impl PurchaseState {
    /// Whether the workflow has stopped for good in this state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseState::Granted
                | PurchaseState::Swept
                | PurchaseState::SweepFailed
                | PurchaseState::ProvisionFailed
                | PurchaseState::PricingFailed
                | PurchaseState::TimedOut
                | PurchaseState::Cancelled
                | PurchaseState::Failed
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            PurchaseState::Created => "created",
            PurchaseState::AwaitingPayment => "awaiting_payment",
            PurchaseState::PaymentSeen => "payment_seen",
            PurchaseState::Confirming => "confirming",
            PurchaseState::Confirmed => "confirmed",
            PurchaseState::Granted => "granted",
            PurchaseState::Sweeping => "sweeping",
            PurchaseState::Swept => "swept",
            PurchaseState::SweepFailed => "sweep_failed",
            PurchaseState::ProvisionFailed => "provision_failed",
            PurchaseState::PricingFailed => "pricing_failed",
            PurchaseState::TimedOut => "timed_out",
            PurchaseState::Cancelled => "cancelled",
            PurchaseState::Failed => "failed",
        }
    }
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "created" => PurchaseState::Created,
            "awaiting_payment" => PurchaseState::AwaitingPayment,
            "payment_seen" => PurchaseState::PaymentSeen,
            "confirming" => PurchaseState::Confirming,
            "confirmed" => PurchaseState::Confirmed,
            "granted" => PurchaseState::Granted,
            "sweeping" => PurchaseState::Sweeping,
            "swept" => PurchaseState::Swept,
            "sweep_failed" => PurchaseState::SweepFailed,
            "provision_failed" => PurchaseState::ProvisionFailed,
            "pricing_failed" => PurchaseState::PricingFailed,
            "timed_out" => PurchaseState::TimedOut,
            "cancelled" => PurchaseState::Cancelled,
            "failed" => PurchaseState::Failed,
            other => {
                return Err(Error::Storage(format!("unknown purchase state {}", other)))
            }
        })
    }
}

/// One entitlement sale attempt
///
/// The id is the deposit address: unique per purchase, never reused. The
/// spending secret is not part of this record; it lives in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub buyer: String,
    pub deposit_address: String,
    /// Fiat price target, fixed at creation
    pub price_fiat: f64,
    /// Required coin amount in smallest units, bound once at creation
    pub required_units: u64,
    pub state: PurchaseState,
    pub context_id: Option<String>,
    pub observed_tx_id: Option<String>,
    /// Value of the observed paying transaction, smallest units
    pub observed_value: u64,
    /// Monotonically non-decreasing within one purchase
    pub confirmations: u32,
    pub sweep_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub granted_at: Option<DateTime<Utc>>,
}

impl Purchase {
    pub fn new(
        buyer: String,
        deposit_address: String,
        price_fiat: f64,
        required_units: u64,
    ) -> Self {
        Self {
            id: deposit_address.clone(),
            buyer,
            deposit_address,
            price_fiat,
            required_units,
            state: PurchaseState::Created,
            context_id: None,
            observed_tx_id: None,
            observed_value: 0,
            confirmations: 0,
            sweep_tx_id: None,
            created_at: Utc::now(),
            granted_at: None,
        }
    }

    /// Recompute the state to resume from after a restart, using persisted
    /// fields rather than whatever state string happened to be written last.
    pub fn resume_state(&self, required_confirmations: u32, sweeping_enabled: bool) -> PurchaseState {
        match self.state {
            PurchaseState::ProvisionFailed
            | PurchaseState::PricingFailed
            | PurchaseState::TimedOut
            | PurchaseState::Cancelled
            | PurchaseState::SweepFailed
            | PurchaseState::Swept
            | PurchaseState::Failed => return self.state,
            _ => {}
        }

        // A record persisted before pricing completed has no bound amount;
        // polling it would let any dust payment qualify.
        if self.required_units == 0 {
            return PurchaseState::PricingFailed;
        }

        if self.granted_at.is_some() {
            if !sweeping_enabled {
                return PurchaseState::Granted;
            }
            return if self.sweep_tx_id.is_some() {
                PurchaseState::Swept
            } else {
                PurchaseState::Sweeping
            };
        }

        match self.observed_tx_id {
            None => PurchaseState::AwaitingPayment,
            Some(_) => {
                if self.confirmations >= required_confirmations
                    && self.observed_value >= self.required_units
                {
                    PurchaseState::Confirmed
                } else {
                    PurchaseState::Confirming
                }
            }
        }
    }
}

/// Collaborators shared by every purchase workflow, injected at construction
pub struct WorkflowDeps {
    pub observer: ChainObserver,
    pub oracle: Arc<dyn PriceOracle>,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn PurchaseStore>,
    pub sweeper: Option<CustodySweeper>,
    pub settings: WorkflowSettings,
}

/// Create a purchase: provision a deposit address, bind the price, open the
/// buyer context, and post payment instructions.
///
/// Returns the purchase in `AwaitingPayment`, ready to be spawned. Pricing
/// failures leave a terminal `PricingFailed` record behind; provisioning
/// failures happen before any record exists and only return an error.
pub async fn begin(
    deps: &Arc<WorkflowDeps>,
    provisioner: &AddressProvisioner,
    buyer: &str,
) -> Result<Purchase> {
    let credential = provisioner.provision().await?;

    let mut purchase = Purchase::new(
        buyer.to_string(),
        credential.address().to_string(),
        deps.settings.price_target_fiat,
        0,
    );
    deps.store.upsert(&purchase).await?;

    // The rate is fetched exactly once, here. The required amount never
    // moves for the lifetime of the purchase.
    let rate = match deps.oracle.fiat_per_coin().await {
        Ok(rate) => rate,
        Err(e) => {
            purchase.state = PurchaseState::PricingFailed;
            deps.store.upsert(&purchase).await?;
            return Err(e);
        }
    };

    let evaluator = match PaymentEvaluator::bind(deps.settings.price_target_fiat, rate) {
        Ok(evaluator) => evaluator,
        Err(e) => {
            purchase.state = PurchaseState::PricingFailed;
            deps.store.upsert(&purchase).await?;
            return Err(e);
        }
    };
    purchase.required_units = evaluator.required_units();

    match deps.gateway.open_context(buyer).await {
        Ok(context_id) => purchase.context_id = Some(context_id),
        Err(e) => warn!("Could not open buyer context for {}: {}", purchase.id, e),
    }

    purchase.state = PurchaseState::AwaitingPayment;
    deps.store.upsert(&purchase).await?;

    if let Some(context_id) = &purchase.context_id {
        if let Err(e) = deps
            .gateway
            .payment_instructions(
                context_id,
                &purchase.deposit_address,
                purchase.required_units,
                purchase.price_fiat,
            )
            .await
        {
            warn!("Could not post payment instructions for {}: {}", purchase.id, e);
        }
    }

    info!(
        "Purchase {} created for buyer {}: {} coin ({} fiat)",
        purchase.id,
        buyer,
        format_coin(purchase.required_units),
        purchase.price_fiat
    );

    Ok(purchase)
}

/// Driver for a single purchase
pub struct PurchaseWorkflow {
    deps: Arc<WorkflowDeps>,
    purchase: Purchase,
    evaluator: PaymentEvaluator,
    cancel: watch::Receiver<bool>,
    deadline: DateTime<Utc>,
    backoff: Duration,
    sweep_attempts: u32,
    underpayment_reported: bool,
}

/// Bounded transient retries for the post-grant sweep
const MAX_SWEEP_ATTEMPTS: u32 = 5;

impl PurchaseWorkflow {
    pub fn new(deps: Arc<WorkflowDeps>, purchase: Purchase, cancel: watch::Receiver<bool>) -> Self {
        let max_wait = ChronoDuration::from_std(deps.settings.max_wait)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        let deadline = purchase.created_at + max_wait;
        let evaluator = PaymentEvaluator::from_required_units(purchase.required_units);
        let backoff = deps.settings.poll_interval;

        Self {
            deps,
            purchase,
            evaluator,
            cancel,
            deadline,
            backoff,
            sweep_attempts: 0,
            underpayment_reported: false,
        }
    }

    /// Run the workflow to a terminal state. Never panics the process; all
    /// failures end in a persisted terminal state.
    pub async fn run(mut self) {
        let id = self.purchase.id.clone();

        match self.drive().await {
            Ok(state) => info!("Purchase {} finished in state {}", id, state),
            Err(e) => {
                error!("Purchase {} failed: {}", id, e);
                self.purchase.state = PurchaseState::Failed;
                if let Err(persist_err) = self.deps.store.upsert(&self.purchase).await {
                    error!("Could not persist failure for {}: {}", id, persist_err);
                }
                self.notify("Purchase failed due to an internal error; the operator has been notified.")
                    .await;
            }
        }
    }

    async fn drive(&mut self) -> Result<PurchaseState> {
        let sweeping = self.deps.sweeper.is_some();
        self.purchase.state = self
            .purchase
            .resume_state(self.deps.settings.required_confirmations, sweeping);
        self.deps.store.upsert(&self.purchase).await?;

        loop {
            if *self.cancel.borrow() && !self.purchase.state.is_terminal() {
                return self.cancel_now().await;
            }

            match self.purchase.state {
                PurchaseState::Created | PurchaseState::AwaitingPayment => {
                    self.await_payment().await?
                }
                PurchaseState::PaymentSeen | PurchaseState::Confirming => {
                    self.confirm().await?
                }
                PurchaseState::Confirmed => self.grant().await?,
                PurchaseState::Granted => {
                    if sweeping && self.purchase.sweep_tx_id.is_none() {
                        self.set_state(PurchaseState::Sweeping).await?;
                    } else {
                        return Ok(self.purchase.state);
                    }
                }
                PurchaseState::Sweeping => self.sweep_once().await?,
                state => return Ok(state),
            }
        }
    }

    /// AWAITING_PAYMENT: poll for an incoming transaction
    async fn await_payment(&mut self) -> Result<()> {
        if let Some(tx) = self
            .deps
            .observer
            .find_incoming_tx(&self.purchase.deposit_address)
            .await?
        {
            info!(
                "Purchase {}: payment seen, tx {} paying {}",
                self.purchase.id,
                tx.tx_id,
                format_coin(tx.value)
            );

            self.purchase.observed_tx_id = Some(tx.tx_id);
            self.purchase.observed_value = tx.value;
            self.set_state(PurchaseState::PaymentSeen).await?;
            self.set_state(PurchaseState::Confirming).await?;
            self.notify(&format!(
                "Payment of {} detected, waiting for confirmations...",
                format_coin(tx.value)
            ))
            .await;
            self.reset_backoff();
            return Ok(());
        }

        self.deadline_or_sleep().await
    }

    /// CONFIRMING: poll confirmation depth and evaluate sufficiency
    async fn confirm(&mut self) -> Result<()> {
        let Some(tx_id) = self.purchase.observed_tx_id.clone() else {
            // Field-level recovery: no tx recorded means we are really
            // still waiting.
            self.set_state(PurchaseState::AwaitingPayment).await?;
            return Ok(());
        };

        let seen = self.deps.observer.get_confirmations(&tx_id).await?;

        // A provider reporting fewer confirmations than before is stale
        // data, not something to act on: the count never regresses.
        if seen > self.purchase.confirmations {
            self.purchase.confirmations = seen;
            self.deps.store.upsert(&self.purchase).await?;
            self.reset_backoff();
            self.notify(&format!(
                "{} of {} confirmations",
                self.purchase.confirmations, self.deps.settings.required_confirmations
            ))
            .await;
        }

        if self.purchase.confirmations >= self.deps.settings.required_confirmations {
            if self.evaluator.is_sufficient(self.purchase.observed_value) {
                self.set_state(PurchaseState::Confirmed).await?;
                return Ok(());
            }

            // Underpayment: never grant. Tell the buyer once, then keep
            // watching for a qualifying payment until the deadline.
            if !self.underpayment_reported {
                self.underpayment_reported = true;
                warn!(
                    "Purchase {}: confirmed payment {} below required {}",
                    self.purchase.id,
                    format_coin(self.purchase.observed_value),
                    format_coin(self.purchase.required_units)
                );
                self.notify(&format!(
                    "Received {} but {} is required; please send the remaining amount in a single payment.",
                    format_coin(self.purchase.observed_value),
                    format_coin(self.purchase.required_units)
                ))
                .await;
            }

            if let Some(tx) = self
                .deps
                .observer
                .find_incoming_tx(&self.purchase.deposit_address)
                .await?
            {
                if Some(&tx.tx_id) != self.purchase.observed_tx_id.as_ref()
                    && self.evaluator.is_sufficient(tx.value)
                {
                    info!(
                        "Purchase {}: qualifying replacement payment {} seen",
                        self.purchase.id, tx.tx_id
                    );
                    self.purchase.observed_tx_id = Some(tx.tx_id);
                    self.purchase.observed_value = tx.value;
                    self.purchase.confirmations = 0;
                    self.deps.store.upsert(&self.purchase).await?;
                    self.reset_backoff();
                    return Ok(());
                }
            }
        }

        self.deadline_or_sleep().await
    }

    /// CONFIRMED: grant the entitlement, at most once per purchase id
    async fn grant(&mut self) -> Result<()> {
        let first = self.deps.store.try_acquire_grant(&self.purchase.id).await?;

        if first {
            if let Err(e) = self
                .deps
                .gateway
                .grant_entitlement(&self.purchase.buyer)
                .await
            {
                // The guard is spent: retrying could double-grant under a
                // gateway that delivered but failed to respond. Surface for
                // manual follow-up instead.
                error!(
                    "Entitlement delivery failed for purchase {} (buyer {}): {}",
                    self.purchase.id, self.purchase.buyer, e
                );
            }
        } else {
            info!(
                "Grant already recorded for purchase {}, skipping delivery",
                self.purchase.id
            );
        }

        if self.purchase.granted_at.is_none() {
            self.purchase.granted_at = Some(Utc::now());
        }

        if self.deps.sweeper.is_some() && self.purchase.sweep_tx_id.is_none() {
            // Never persist a resting GRANTED while a sweep is pending, so
            // a crash here resumes straight into SWEEPING.
            self.set_state(PurchaseState::Sweeping).await?;
        } else {
            self.set_state(PurchaseState::Granted).await?;
        }

        self.notify("Payment confirmed. Your access has been granted!").await;
        Ok(())
    }

    /// SWEEPING: move funds to custody, recovering any prior broadcast first
    async fn sweep_once(&mut self) -> Result<()> {
        let Some(sweeper) = self.deps.sweeper.as_ref() else {
            self.set_state(PurchaseState::Granted).await?;
            return Ok(());
        };

        // The deposit address is single-use, so any outgoing payment to
        // custody is our sweep. Re-querying before sending makes a crash
        // between broadcast and persist recoverable without a re-send.
        match sweeper
            .find_existing_sweep(&self.purchase.deposit_address, 1)
            .await
        {
            Ok(Some(tx_id)) => {
                info!(
                    "Purchase {}: found existing sweep tx {}, not re-sending",
                    self.purchase.id, tx_id
                );
                return self.record_sweep(tx_id).await;
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => return self.sweep_retry_or_fail(e).await,
            Err(e) => return Err(e),
        }

        match sweeper
            .sweep(&self.purchase.deposit_address, self.purchase.observed_value)
            .await
        {
            Ok(tx_id) => self.record_sweep(tx_id).await,
            Err(e) if e.is_transient() => self.sweep_retry_or_fail(e).await,
            Err(e) => {
                warn!("Purchase {}: sweep failed: {}", self.purchase.id, e);
                self.set_state(PurchaseState::SweepFailed).await?;
                Ok(())
            }
        }
    }

    async fn record_sweep(&mut self, tx_id: String) -> Result<()> {
        // The broadcast is recorded before any further transition.
        self.purchase.sweep_tx_id = Some(tx_id);
        self.deps.store.upsert(&self.purchase).await?;
        self.set_state(PurchaseState::Swept).await?;
        Ok(())
    }

    async fn sweep_retry_or_fail(&mut self, e: Error) -> Result<()> {
        self.sweep_attempts += 1;
        if self.sweep_attempts >= MAX_SWEEP_ATTEMPTS {
            warn!(
                "Purchase {}: giving up on sweep after {} attempts: {}",
                self.purchase.id, self.sweep_attempts, e
            );
            self.set_state(PurchaseState::SweepFailed).await?;
            return Ok(());
        }

        warn!(
            "Purchase {}: transient sweep failure (attempt {}): {}",
            self.purchase.id, self.sweep_attempts, e
        );
        let delay = self.next_delay();
        self.pause(delay).await;
        Ok(())
    }

    async fn cancel_now(&mut self) -> Result<PurchaseState> {
        info!("Purchase {} cancelled", self.purchase.id);
        self.set_state(PurchaseState::Cancelled).await?;
        self.notify("Purchase cancelled.").await;
        Ok(PurchaseState::Cancelled)
    }

    /// Check the overall deadline; time out or sleep one backoff step
    async fn deadline_or_sleep(&mut self) -> Result<()> {
        if Utc::now() >= self.deadline {
            warn!(
                "Purchase {} timed out in state {}",
                self.purchase.id, self.purchase.state
            );
            self.set_state(PurchaseState::TimedOut).await?;
            self.notify("No qualifying payment arrived in time; this purchase has expired.")
                .await;
            return Ok(());
        }

        let delay = self.next_delay();
        self.pause(delay).await;
        Ok(())
    }

    /// Sleep, waking early on cancellation
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = sleep(delay) => {}
            changed = self.cancel.changed() => {
                if changed.is_err() {
                    // Cancel handle dropped; keep the poll cadence.
                    sleep(delay).await;
                }
            }
        }
    }

    /// Exponential backoff with a cap and +/-20% jitter
    fn next_delay(&mut self) -> Duration {
        let base = self.backoff;
        self.backoff = (self.backoff * 2).min(self.deps.settings.max_poll_interval);

        let ms = base.as_millis().max(1) as u64;
        let jittered = {
            let mut rng = rand::thread_rng();
            rng.gen_range(ms * 4 / 5..=ms * 6 / 5)
        };
        Duration::from_millis(jittered)
    }

    fn reset_backoff(&mut self) {
        self.backoff = self.deps.settings.poll_interval;
    }

    async fn set_state(&mut self, state: PurchaseState) -> Result<()> {
        self.purchase.state = state;
        self.deps.store.upsert(&self.purchase).await
    }

    /// Fire-and-forget buyer notification
    async fn notify(&self, text: &str) {
        if let Some(context_id) = &self.purchase.context_id {
            if let Err(e) = self.deps.gateway.status_update(context_id, text).await {
                warn!(
                    "Status update for purchase {} not delivered: {}",
                    self.purchase.id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase() -> Purchase {
        Purchase::new("buyer#1".into(), "addr_1".into(), 30.0, 30_000_000)
    }

    #[test]
    fn test_state_string_roundtrip() {
        let states = [
            PurchaseState::Created,
            PurchaseState::AwaitingPayment,
            PurchaseState::PaymentSeen,
            PurchaseState::Confirming,
            PurchaseState::Confirmed,
            PurchaseState::Granted,
            PurchaseState::Sweeping,
            PurchaseState::Swept,
            PurchaseState::SweepFailed,
            PurchaseState::ProvisionFailed,
            PurchaseState::PricingFailed,
            PurchaseState::TimedOut,
            PurchaseState::Cancelled,
            PurchaseState::Failed,
        ];

        for state in states {
            let parsed: PurchaseState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }

        assert!("not_a_state".parse::<PurchaseState>().is_err());
    }

    #[test]
    fn test_resume_fresh_purchase() {
        let mut p = purchase();
        p.state = PurchaseState::AwaitingPayment;
        assert_eq!(p.resume_state(1, false), PurchaseState::AwaitingPayment);
    }

    #[test]
    fn test_resume_recomputes_from_fields() {
        let mut p = purchase();
        // Stored state says awaiting, but a tx was recorded: resume confirming.
        p.state = PurchaseState::AwaitingPayment;
        p.observed_tx_id = Some("tx_1".into());
        p.observed_value = 30_000_000;
        assert_eq!(p.resume_state(3, false), PurchaseState::Confirming);

        p.confirmations = 3;
        assert_eq!(p.resume_state(3, false), PurchaseState::Confirmed);
    }

    #[test]
    fn test_resume_insufficient_payment_stays_confirming() {
        let mut p = purchase();
        p.observed_tx_id = Some("tx_1".into());
        p.observed_value = 25_000_000;
        p.confirmations = 5;
        assert_eq!(p.resume_state(1, false), PurchaseState::Confirming);
    }

    #[test]
    fn test_resume_granted_paths() {
        let mut p = purchase();
        p.observed_tx_id = Some("tx_1".into());
        p.observed_value = 30_000_000;
        p.confirmations = 1;
        p.granted_at = Some(Utc::now());

        assert_eq!(p.resume_state(1, false), PurchaseState::Granted);
        assert_eq!(p.resume_state(1, true), PurchaseState::Sweeping);

        p.sweep_tx_id = Some("sweep_1".into());
        assert_eq!(p.resume_state(1, true), PurchaseState::Swept);
    }

    #[test]
    fn test_resume_unpriced_record_is_pricing_failed() {
        // Persisted before the rate was bound: no amount to evaluate against.
        let mut p = Purchase::new("buyer#1".into(), "addr_1".into(), 30.0, 0);
        assert_eq!(p.resume_state(1, false), PurchaseState::PricingFailed);

        // Even with a payment on record, a zero requirement never confirms.
        p.observed_tx_id = Some("tx_1".into());
        p.observed_value = 1;
        p.confirmations = 5;
        assert_eq!(p.resume_state(1, false), PurchaseState::PricingFailed);
    }

    #[test]
    fn test_resume_preserves_terminal_failures() {
        let mut p = purchase();
        p.state = PurchaseState::TimedOut;
        assert_eq!(p.resume_state(1, true), PurchaseState::TimedOut);

        p.state = PurchaseState::Cancelled;
        assert_eq!(p.resume_state(1, true), PurchaseState::Cancelled);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PurchaseState::Granted.is_terminal());
        assert!(PurchaseState::Swept.is_terminal());
        assert!(PurchaseState::TimedOut.is_terminal());
        assert!(!PurchaseState::Confirming.is_terminal());
        assert!(!PurchaseState::Sweeping.is_terminal());
        assert!(!PurchaseState::AwaitingPayment.is_terminal());
    }
}
