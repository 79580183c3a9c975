use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use infrastructure::sync::timer;
use service::prelude::ExecutionManager;

/// Submit new calculations and poll the submitted ones, forever.
pub async fn refresh_jobs(manager: Arc<ExecutionManager>, interval: Duration) {
    timer::every::<(), _, _>(interval, || async {
        manager.submit_new().await;
        manager.update_jobs().await;
        ControlFlow::Continue(())
    })
    .await;
}
