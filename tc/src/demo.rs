//! Demonstration scenario behind `tc demo`
//!
//! Binds a request id and masking patterns on the calling thread, begins a
//! local transaction, then hands each branch to a worker (or runs it inline)
//! and reports what the branch could see from there.

use std::sync::Arc;

use diagcontext::{label, masking, mdc};
use eyre::{Result, eyre};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, ObserverKind};
use crate::coordinator::HandoffCoordinator;
use crate::dispatch::{dispatch, run_handoff};
use crate::observer::{DebugObserver, LifecycleObserver, NoopObserver, ObserverEvent, RecordingObserver};
use crate::transaction::{LocalTransactionManager, TransactionManager};

/// Options for one demo run
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// Number of branches to hand off
    pub branches: usize,
    /// Branch numbers (1-based) that fail
    pub fail: Vec<usize>,
    /// Run every branch on the calling thread
    pub inline: bool,
    /// Request id to bind; generated when absent
    pub request_id: Option<String>,
    /// Masking patterns added to the configured ones
    pub mask: Vec<String>,
}

/// What a branch saw on the thread it ran on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchObservation {
    pub thread: String,
    pub request_id: Option<String>,
    pub transaction: Option<String>,
    pub masked: String,
}

/// Outcome of one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub branch: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<BranchObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub request_id: String,
    pub transaction: String,
    /// The transaction was back on the calling thread after every branch
    pub transaction_resumed: bool,
    pub committed: bool,
    pub branches: Vec<BranchReport>,
    pub events: Vec<ObserverEvent>,
}

/// Run the demo with the observer the configuration asks for
pub fn run_demo(config: &Config, options: &DemoOptions) -> Result<DemoReport> {
    debug!(?options, kind = ?config.observer.kind, "run_demo: called");
    match config.observer.kind {
        ObserverKind::None => run_with::<NoopObserver>(config, options, None),
        ObserverKind::Debug => run_with(config, options, Some(Arc::new(DebugObserver::default()))),
        ObserverKind::Recording => {
            let observer = Arc::new(RecordingObserver::new());
            let mut report = run_with(config, options, Some(observer.clone()))?;
            report.events = observer.events();
            Ok(report)
        }
    }
}

fn run_with<O: LifecycleObserver>(config: &Config, options: &DemoOptions, observer: Option<Arc<O>>) -> Result<DemoReport> {
    let request_id = options
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let _request = mdc::scoped("request_id", request_id.clone());

    let patterns = config.masking.compile()?;
    let patterns = options.mask.iter().try_fold(patterns, |set, p| set.with(p))?;
    let _masking = masking::scoped(&patterns);

    let manager = LocalTransactionManager::new("demo");
    let transaction = manager.begin()?;
    let transactions: &dyn TransactionManager = &manager;
    info!(%request_id, %transaction, branches = options.branches, "Demo started");

    let mut branches = Vec::with_capacity(options.branches);
    for branch in 1..=options.branches {
        let coordinator = HandoffCoordinator::new(
            "demo",
            format!("branch-{branch}"),
            observer.clone(),
            Some(transactions),
            Some(&request_id),
        )
        .with_config(config.handoff.clone());

        let should_fail = options.fail.contains(&branch);
        let manager = &manager;
        let work = move |secret: String| -> Result<BranchObservation> {
            if should_fail {
                return Err(eyre!("branch {branch} failed as requested"));
            }
            info!(input = %secret, "Branch started");
            Ok(BranchObservation {
                thread: label::current(),
                request_id: mdc::get("request_id"),
                transaction: manager.current(),
                masked: masking::mask(&secret),
            })
        };

        let input = format!("password=branch{branch}-secret");
        let outcome = if options.inline {
            let mut coordinator = coordinator;
            let outcome = run_handoff(&mut coordinator, input, work);
            coordinator.close();
            outcome
        } else {
            dispatch(coordinator, input, work)
        };

        branches.push(match outcome {
            Ok(observed) => BranchReport {
                branch,
                observed: Some(observed),
                error: None,
            },
            Err(e) => BranchReport {
                branch,
                observed: None,
                error: Some(format!("{e:#}")),
            },
        });
    }

    let transaction_resumed = manager.current().as_deref() == Some(transaction.as_str());
    let committed = transaction_resumed && branches.iter().all(|b| b.error.is_none());
    if committed {
        manager.commit()?;
    } else if transaction_resumed {
        manager.rollback()?;
    }
    info!(%request_id, committed, "Demo finished");

    Ok(DemoReport {
        request_id,
        transaction,
        transaction_resumed,
        committed,
        branches,
        events: Vec::new(),
    })
}
