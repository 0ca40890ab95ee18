use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use lifeline_db::Database;
use lifeline_gateway::dispatcher::Dispatcher;
use lifeline_types::events::GatewayEvent;

/// Background task that lifts suspensions whose end has passed and tells
/// the affected users their profile changed.
pub async fn run_sweep_loop(db: Arc<Database>, dispatcher: Dispatcher, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match sweep(&db, &dispatcher).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: lifted {} expired suspensions", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

async fn sweep(db: &Arc<Database>, dispatcher: &Dispatcher) -> anyhow::Result<usize> {
    let db = db.clone();
    let lifted = tokio::task::spawn_blocking(move || db.lift_expired_suspensions()).await??;

    for user_id in &lifted {
        dispatcher
            .send_to_user(*user_id, GatewayEvent::ProfileUpdated { profile_id: *user_id })
            .await;
    }
    Ok(lifted.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_with_nothing_expired_is_quiet() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_profile(Uuid::new_v4(), "calm", "hash").unwrap();
        let count = sweep(&db, &Dispatcher::new()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn expired_suspension_is_lifted_and_announced() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        db.create_profile(user, "returning", "hash").unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET suspended_until = '2000-01-01T00:00:00.000Z',
                     suspension_reason = 'spam' WHERE id = ?1",
                [user.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let dispatcher = Dispatcher::new();
        let (_conn, mut rx) = dispatcher.register_user_channel(user).await;

        assert_eq!(sweep(&db, &dispatcher).await.unwrap(), 1);
        assert!(db.get_profile(user).unwrap().unwrap().suspended_until.is_none());
        assert!(matches!(
            rx.recv().await,
            Some(GatewayEvent::ProfileUpdated { profile_id }) if profile_id == user
        ));
    }
}
