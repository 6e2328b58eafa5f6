use crate::session::{ScopeError, SessionFactory, SessionScope};
use std::time::Duration;

/// Side-effect free statement used to confirm connectivity.
pub const PROBE_STATEMENT: &str = "SELECT 1";

/// Probe the database with a throwaway session.
///
/// Any failure (acquisition, authentication, query, commit, close, or the
/// probe outliving `timeout`) is logged and reported as `false`.
#[tracing::instrument(name = "Probing database health", skip_all)]
pub async fn check_database_health(sessions: &dyn SessionFactory, timeout: Duration) -> bool {
    let scope = SessionScope::new(sessions);
    let probe = scope.run(|session| {
        Box::pin(async move {
            session.execute(PROBE_STATEMENT).await?;
            Ok::<(), anyhow::Error>(())
        })
    });

    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log_probe_failure(&e);
            false
        }
        Err(_) => {
            tracing::error!(timeout = ?timeout, "Database health probe timed out");
            false
        }
    }
}

fn log_probe_failure(e: &ScopeError) {
    tracing::error!(
        error.cause_chain = ?e,
        error.message = %e,
        "Database health probe failed"
    );
}
