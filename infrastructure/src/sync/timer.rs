use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

/// Run `f` right away and then once per `interval` until it breaks.
///
/// A round that takes longer than `interval` delays the next one instead of
/// bunching up missed rounds.
pub async fn every<T, F, Fut>(interval: Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<T>>,
{
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let ControlFlow::Break(ret) = f().await {
            break ret;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::every;

    #[tokio::test(start_paused = true)]
    async fn runs_until_break() {
        let start = Instant::now();
        let mut rounds = 0;
        let ret = every(Duration::from_secs(60), || {
            rounds += 1;
            let round = rounds;
            async move {
                if round == 3 {
                    ControlFlow::Break(round)
                } else {
                    ControlFlow::Continue(())
                }
            }
        })
        .await;
        assert_eq!(3, ret);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }
}
