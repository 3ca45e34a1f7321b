//! Workflow registry
//!
//! Owns one supervised task per running purchase. Tasks are spawned,
//! enumerable, cancellable, and restored from persisted purchases at
//! startup; nothing runs detached.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use broker_common::Result;

use crate::provisioner::AddressProvisioner;
use crate::workflow::{self, Purchase, PurchaseWorkflow, WorkflowDeps};

struct PurchaseHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct WorkflowRegistry {
    deps: Arc<WorkflowDeps>,
    provisioner: AddressProvisioner,
    tasks: Mutex<HashMap<String, PurchaseHandle>>,
}

impl WorkflowRegistry {
    pub fn new(deps: Arc<WorkflowDeps>, provisioner: AddressProvisioner) -> Self {
        Self {
            deps,
            provisioner,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a purchase for `buyer` and start driving it
    pub async fn start_purchase(&self, buyer: &str) -> Result<Purchase> {
        let purchase = workflow::begin(&self.deps, &self.provisioner, buyer).await?;
        self.spawn(purchase.clone()).await;
        Ok(purchase)
    }

    /// Spawn a supervised workflow task for an existing purchase
    pub async fn spawn(&self, purchase: Purchase) {
        let id = purchase.id.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let workflow = PurchaseWorkflow::new(self.deps.clone(), purchase, cancel_rx);
        let handle = tokio::spawn(workflow.run());

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(
            id.clone(),
            PurchaseHandle {
                cancel: cancel_tx,
                handle,
            },
        ) {
            // One owner per purchase id; a stale task must not keep polling.
            warn!("Replacing existing workflow task for purchase {}", id);
            previous.handle.abort();
        }

        info!("Workflow task started for purchase {}", id);
    }

    /// Request cancellation of a running purchase. Returns false if no task
    /// is running under this id.
    pub async fn cancel(&self, id: &str) -> bool {
        let tasks = self.tasks.lock().await;
        match tasks.get(id) {
            Some(task) if !task.handle.is_finished() => task.cancel.send(true).is_ok(),
            _ => false,
        }
    }

    /// Restore workflows for every non-terminal persisted purchase
    pub async fn restore(&self) -> Result<usize> {
        let ids = self.deps.store.active_ids().await?;
        let mut restored = 0;

        for id in ids {
            match self.deps.store.get(&id).await? {
                Some(purchase) if !purchase.state.is_terminal() => {
                    info!(
                        "Restoring purchase {} from state {}",
                        purchase.id, purchase.state
                    );
                    self.spawn(purchase).await;
                    restored += 1;
                }
                Some(_) => {}
                None => warn!("Active purchase id {} has no stored record", id),
            }
        }

        Ok(restored)
    }

    /// Number of workflow tasks still running
    pub async fn running_count(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, task| !task.handle.is_finished());
        tasks.len()
    }

    /// Await completion of every running task (shutdown and tests)
    pub async fn join_all(&self) {
        let drained: Vec<PurchaseHandle> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, task)| task).collect()
        };

        for task in drained {
            let _ = task.handle.await;
        }
    }
}
