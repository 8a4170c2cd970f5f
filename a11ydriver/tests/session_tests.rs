mod common;

use a11ydriver::platforms::memory::MemoryNode;
use a11ydriver::registry::path_for_handle;
use a11ydriver::{AppTarget, LocateMode, Locator, WebDriverError};
use common::{fixture, init_tracing, manager, FakeLauncher, KCALC_PID};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn caps_for(app: &str, implicit: u64) -> serde_json::Value {
    json!({
        "capabilities": {
            "alwaysMatch": {"app": app, "timeouts": {"implicit": implicit}}
        }
    })
}

#[tokio::test]
async fn test_root_session_binds_desktop_and_never_launches() {
    init_tracing();
    let fx = fixture();
    let launcher = Arc::new(FakeLauncher::new(9000, None));
    let manager = manager(&fx, launcher.clone());

    let handle = manager.create_session(&caps_for("Root", 100)).await.unwrap();
    let id = {
        let session = handle.lock().await;
        assert_eq!(session.target, AppTarget::Root);
        assert_eq!(session.browsing_context, fx.desktop.accessible());
        assert_eq!(session.process_id, None);
        assert!(!session.launched);
        session.id.clone()
    };

    manager.delete_session(&id).await.unwrap();
    assert!(launcher.launched().is_empty());
    assert!(launcher.terminated().is_empty());
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test]
async fn test_pid_session_attaches_without_owning_the_process() {
    let fx = fixture();
    let launcher = Arc::new(FakeLauncher::new(9000, None));
    let manager = manager(&fx, launcher.clone());

    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 100))
        .await
        .unwrap();
    let id = {
        let session = handle.lock().await;
        assert_eq!(session.browsing_context, fx.app.accessible());
        assert_eq!(session.process_id, Some(KCALC_PID));
        assert!(!session.launched);
        session.id.clone()
    };

    manager.delete_session(&id).await.unwrap();
    assert!(launcher.launched().is_empty());
    assert!(launcher.terminated().is_empty(), "attached apps must survive delete");
}

#[tokio::test]
async fn test_capability_shapes_are_equivalent() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let app = KCALC_PID.to_string();

    let bodies = [
        json!({"capabilities": {"alwaysMatch": {"app": app, "timeouts": {"implicit": 250}}}}),
        json!({"capabilities": {"firstMatch": [{"appium:app": app, "appium:timeouts": {"implicit": 250}}]}}),
        json!({"desiredCapabilities": {"app": app, "timeouts": {"implicit": 250}}}),
    ];

    for body in &bodies {
        let handle = manager.create_session(body).await.unwrap();
        let session = handle.lock().await;
        assert_eq!(session.app, app, "body {body}");
        assert_eq!(session.target, AppTarget::Pid(KCALC_PID));
        assert_eq!(session.timeouts.implicit, 250);
        assert_eq!(session.browsing_context, fx.app.accessible());
    }
    assert_eq!(manager.session_count().await, bodies.len());
}

#[tokio::test(start_paused = true)]
async fn test_absent_pid_fails_within_twice_the_implicit_wait() {
    init_tracing();
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));

    let started = Instant::now();
    let result = manager.create_session(&caps_for("42", 200)).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(WebDriverError::SessionNotCreated(_))));
    assert!(elapsed >= Duration::from_millis(400), "gave up after {elapsed:?}");
    assert!(
        elapsed <= Duration::from_millis(400) + manager.config().discovery_poll_interval,
        "took {elapsed:?}"
    );
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test]
async fn test_discovery_skips_unreadable_applications() {
    let fx = fixture();
    let broken = MemoryNode::builder("application").process_id(1).build();
    broken.set_broken(true);
    fx.desktop.insert_child(0, broken);
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));

    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 100))
        .await
        .unwrap();
    assert_eq!(handle.lock().await.browsing_context, fx.app.accessible());
}

#[tokio::test]
async fn test_launched_session_is_killed_on_delete() {
    init_tracing();
    let fx = fixture();
    let launcher = Arc::new(FakeLauncher::new(5000, Some(fx.desktop.clone())));
    let manager = manager(&fx, launcher.clone());

    let body = json!({
        "capabilities": {"alwaysMatch": {
            "app": "kwrite '/tmp/a file.txt'",
            "appium:environ": {"LANG": "C"},
            "timeouts": {"implicit": 100}
        }}
    });
    let handle = manager.create_session(&body).await.unwrap();
    let id = {
        let session = handle.lock().await;
        assert!(session.launched);
        assert_eq!(session.process_id, Some(5000));
        assert_eq!(session.browsing_context.name().await.unwrap(), "kwrite");
        session.id.clone()
    };

    let launched = launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].program, "kwrite");
    assert_eq!(launched[0].args, vec!["/tmp/a file.txt".to_string()]);
    let env = &launched[0].env;
    assert!(env.contains(&("QT_ACCESSIBILITY".to_string(), "1".to_string())));
    assert!(env.contains(&("QT_LINUX_ACCESSIBILITY_ALWAYS_ON".to_string(), "1".to_string())));
    assert_eq!(env.last(), Some(&("LANG".to_string(), "C".to_string())));

    manager.delete_session(&id).await.unwrap();
    assert_eq!(launcher.terminated(), vec![5000]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_discovery_kills_launched_process() {
    let fx = fixture();
    // Launches succeed but nothing ever registers on the bus.
    let launcher = Arc::new(FakeLauncher::new(5001, None));
    let manager = manager(&fx, launcher.clone());

    let result = manager.create_session(&caps_for("kwrite", 50)).await;

    assert!(matches!(result, Err(WebDriverError::SessionNotCreated(_))));
    assert_eq!(launcher.launched().len(), 1);
    assert_eq!(launcher.terminated(), vec![5001]);
}

#[tokio::test]
async fn test_unknown_session_is_no_such_window() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));

    assert!(matches!(
        manager.get_session("missing").await,
        Err(WebDriverError::NoSuchWindow(_))
    ));
    assert!(matches!(
        manager.delete_session("missing").await,
        Err(WebDriverError::NoSuchWindow(_))
    ));
    assert!(matches!(
        manager.set_implicit_timeout("missing", 10).await,
        Err(WebDriverError::NoSuchWindow(_))
    ));
}

#[tokio::test]
async fn test_find_element_is_idempotent_and_handles_round_trip() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 0))
        .await
        .unwrap();
    let config = manager.config().clone();
    let mut session = handle.lock().await;

    let first = session
        .find_element(Locator::new("name", "1").unwrap(), None, &config)
        .await
        .unwrap();
    let second = session
        .find_element(Locator::new("name", "1").unwrap(), None, &config)
        .await
        .unwrap();

    assert_eq!(first, "e-0-0");
    assert_eq!(first, second);
    assert_eq!(session.elements.len(), 1);
    assert_eq!(path_for_handle(&first), Some(vec![0, 0]));
    assert_eq!(session.element(&first).unwrap(), &fx.one.accessible());
    assert!(matches!(
        session.element("e-9-9"),
        Err(WebDriverError::NoSuchElement(_))
    ));
}

#[tokio::test]
async fn test_find_element_miss_and_empty_plural() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 0))
        .await
        .unwrap();
    let config = manager.config().clone();
    let mut session = handle.lock().await;

    let single = session
        .find_element(Locator::new("name", "absent").unwrap(), None, &config)
        .await;
    assert!(matches!(single, Err(WebDriverError::NoSuchElement(_))));

    let plural = session
        .find_elements(
            Locator::new("name", "absent").unwrap(),
            None,
            LocateMode::All,
            &config,
        )
        .await
        .unwrap();
    assert!(plural.is_empty());
}

#[tokio::test]
async fn test_find_within_element_uses_full_paths() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 0))
        .await
        .unwrap();
    let config = manager.config().clone();
    let mut session = handle.lock().await;

    let frame = session
        .find_element(Locator::new("name", "KCalc").unwrap(), None, &config)
        .await
        .unwrap();
    assert_eq!(frame, "e-0");

    let live = session
        .find_elements(
            Locator::new("description", "digit").unwrap(),
            Some(&frame),
            LocateMode::All,
            &config,
        )
        .await
        .unwrap();
    assert_eq!(live, vec!["e-0-0", "e-0-1", "e-0-3-0"]);

    let structural = session
        .find_elements(
            Locator::new("xpath", "//slider").unwrap(),
            Some(&frame),
            LocateMode::All,
            &config,
        )
        .await
        .unwrap();
    assert_eq!(structural, vec!["e-0-3-1"]);
    assert_eq!(session.element("e-0-3-1").unwrap(), &fx.slider.accessible());
}

#[tokio::test]
async fn test_timeouts_are_per_session() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let a = manager.create_session(&caps_for("Root", 100)).await.unwrap();
    let b = manager.create_session(&caps_for("Root", 100)).await.unwrap();
    let a_id = a.lock().await.id.clone();
    let b_id = b.lock().await.id.clone();

    manager.set_implicit_timeout(&a_id, 1234).await.unwrap();
    manager
        .set_timeouts(&b_id, &json!({"script": 10, "pageLoad": 20}))
        .await
        .unwrap();

    let a_timeouts = manager.timeouts(&a_id).await.unwrap();
    let b_timeouts = manager.timeouts(&b_id).await.unwrap();
    assert_eq!(a_timeouts.implicit, 1234);
    assert_eq!(b_timeouts.implicit, 100);
    assert_eq!(b_timeouts.script, 10);
    assert_eq!(b_timeouts.page_load, 20);

    assert!(matches!(
        manager.set_timeouts(&b_id, &json!({"implicit": "soon"})).await,
        Err(WebDriverError::InvalidArgument(_))
    ));
    assert_eq!(manager.timeouts(&b_id).await.unwrap().implicit, 100);
}

#[tokio::test]
async fn test_source_of_desktop_filters_foreign_toolkits() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let handle = manager.create_session(&caps_for("Root", 0)).await.unwrap();
    let session = handle.lock().await;

    let xml = session.source(true, manager.config()).await.unwrap();
    assert!(xml.starts_with("<desktop_frame name=\"main\""), "{xml}");
    assert!(xml.contains("<push_button name=\"1\""));
    assert!(xml.contains("accessibility-id=\"KCalc.digits.one\""));
    assert!(!xml.contains("Firefox"), "Gecko subtree must be excluded");
    assert!(xml.ends_with('\n'));
}

#[tokio::test]
async fn test_source_of_vanished_app_is_no_such_window() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));
    let handle = manager
        .create_session(&caps_for(&KCALC_PID.to_string(), 0))
        .await
        .unwrap();
    fx.app.set_broken(true);

    let session = handle.lock().await;
    assert!(matches!(
        session.source(false, manager.config()).await,
        Err(WebDriverError::NoSuchWindow(_))
    ));
}

#[tokio::test]
async fn test_type_text_sends_keysyms() {
    let fx = fixture();
    let manager = manager(&fx, Arc::new(FakeLauncher::new(9000, None)));

    manager.type_text("a1\u{E006}").await.unwrap();
    assert_eq!(fx.engine.typed_keysyms(), vec![0x61, 0x31, 0xff0d]);
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let fx = fixture();
    let launcher = Arc::new(FakeLauncher::new(5000, Some(fx.desktop.clone())));
    let manager = manager(&fx, launcher.clone());
    manager.create_session(&caps_for("kwrite", 100)).await.unwrap();
    manager.create_session(&caps_for("Root", 100)).await.unwrap();

    manager.shutdown().await;
    assert_eq!(manager.session_count().await, 0);
    assert_eq!(launcher.terminated(), vec![5000]);
}
