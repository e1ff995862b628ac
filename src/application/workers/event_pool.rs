//! Services the Exchange Gateway's fill/cancel event stream for the OCO
//! Manager — a distinct pool from the dispatch workers, per
//! SPEC_FULL.md §5.

use crate::application::oco_manager::OcoManager;
use crate::domain::ports::FillEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn spawn(oco_manager: Arc<OcoManager>, events: mpsc::Receiver<FillEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        oco_manager.run(events).await;
    })
}
