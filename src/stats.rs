//! Per-flow execution statistics derived from the execution log.

use serde::Serialize;
use uuid::Uuid;

use crate::error::FlowResult;
use crate::model::ExecutionStatus;
use crate::store::FlowStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    /// Mean duration over completed and failed executions that recorded one.
    pub avg_duration_ms: Option<f64>,
    /// Successes over terminal executions, 0.0 when none are terminal.
    pub success_rate: f64,
}

/// Aggregate the execution history of one flow.
pub async fn flow_stats(store: &dyn FlowStore, flow_id: Uuid) -> FlowResult<FlowStats> {
    let executions = store.list_executions(flow_id).await?;

    let mut stats = FlowStats {
        total_executions: executions.len() as u64,
        ..Default::default()
    };

    let mut duration_sum: u64 = 0;
    let mut duration_count: u64 = 0;
    for execution in &executions {
        match execution.status {
            ExecutionStatus::Completed => stats.successful_executions += 1,
            ExecutionStatus::Failed => stats.failed_executions += 1,
            ExecutionStatus::Cancelled => stats.cancelled_executions += 1,
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
        if execution.status.is_terminal() {
            if let Some(duration) = execution.duration_ms {
                duration_sum += duration;
                duration_count += 1;
            }
        }
    }

    if duration_count > 0 {
        stats.avg_duration_ms = Some(duration_sum as f64 / duration_count as f64);
    }
    let terminal =
        stats.successful_executions + stats.failed_executions + stats.cancelled_executions;
    if terminal > 0 {
        stats.success_rate = stats.successful_executions as f64 / terminal as f64;
    }

    Ok(stats)
}
