//! Detached launch of the test binary itself.
//!
//! `daemonize` re-executes the current program, which here is this test
//! harness: the background copy runs this same test, finds the daemon key in
//! its environment, detaches and reports readiness back to the foreground
//! copy. Keep a single test in this file; every test in it runs again in the
//! background process.

use std::time::Duration;

use waddle_supervise::{
    daemonize, report_from_env, CauseToken, InitStatus, Launch, ReadinessReceiver, ReadyCheck,
    Role,
};

const DAEMON_KEY: &str = "WADDLE_SUPERVISE_DAEMONIZE_TEST";

#[tokio::test]
async fn background_copy_reports_ready_to_foreground() {
    let token = CauseToken::new();

    match Role::from_env(DAEMON_KEY).unwrap() {
        Role::Supervisor => {
            let receiver = ReadinessReceiver::open(&token).await.unwrap();
            let launch = tokio::time::timeout(
                Duration::from_secs(30),
                daemonize(
                    &token,
                    DAEMON_KEY,
                    receiver.address(),
                    Some(&receiver as &dyn ReadyCheck),
                ),
            )
            .await
            .expect("background process reported in time")
            .expect("background process initialized");
            assert_eq!(launch, Launch::Foreground);
        }
        Role::Supervised { value } => {
            let launch = daemonize(&token, DAEMON_KEY, &value, None).await.unwrap();
            assert_eq!(launch, Launch::Background);
            report_from_env(DAEMON_KEY, InitStatus::Ready).await.unwrap();
        }
    }
}
