// Integration tests for the block engine.
//
// These tests drive real `sh` commands through the public API and inspect
// the frames captured in memory:
// 1. Persistent blocks publish one frame per output line
// 2. Polling blocks keep their schedule after command and transformer failures
// 3. Concurrent updates never leave a stale value in the last frame
// 4. Submenus run their blocks and round-trip through `back`
// 5. Hidden groups keep updating without producing frames
// 6. A click stream drives group switches and submenus

use std::sync::Arc;
use std::time::Duration;

use blockbar::click::read_clicks;
use blockbar::{
    BlockDefinition, CaptureSink, ClickEvent, IntervalPolicy, Layout, Navigator, OnClickAction,
    Publisher, Transformer,
};

fn navigator(groups: Vec<(&str, Vec<BlockDefinition>)>) -> (Arc<Navigator>, CaptureSink) {
    let groups = groups
        .into_iter()
        .map(|(name, blocks)| (name.to_string(), blocks))
        .collect();
    let layout = Layout::new(groups, None).expect("valid layout");
    let (mut publisher, sink) = Publisher::capture();
    publisher.begin().expect("header");
    (Navigator::new(layout, publisher), sink)
}

#[tokio::test]
async fn test_persistent_block_publishes_each_line_in_order() {
    let (nav, sink) = navigator(vec![(
        "main",
        vec![BlockDefinition::new("stream")
            .with_command("printf 'a\\nb\\nc\\n'", IntervalPolicy::Persistent)],
    )]);

    let handles = nav.start().await;
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }

    // Initial frame, then exactly one frame per line.
    assert_eq!(
        sink.texts(),
        vec![vec![""], vec!["a"], vec!["b"], vec!["c"]]
    );
    assert_eq!(nav.current().blocks()[0].full_text(), "c");
}

#[tokio::test]
async fn test_persistent_transformer_failure_stops_stream() {
    let (nav, sink) = navigator(vec![(
        "main",
        vec![BlockDefinition::new("json")
            .with_command("echo '{\"full_text\":\"ok\"}'; echo broken; sleep 30", IntervalPolicy::Persistent)
            .with_transformer(Transformer::json())],
    )]);

    for handle in nav.start().await {
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("stream task should end after the bad line")
            .unwrap();
    }
    assert_eq!(sink.texts(), vec![vec![""], vec!["ok"], vec!["ERROR"]]);
}

#[tokio::test]
async fn test_polling_block_survives_failures_and_keeps_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs");
    let command = format!("date +%s%N >> '{}'; exit 1", log.display());

    let (nav, sink) = navigator(vec![(
        "main",
        vec![BlockDefinition::new("poll")
            .with_command(command, IntervalPolicy::RepeatEvery(Duration::from_millis(300)))],
    )]);
    let handles = nav.start().await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    for handle in &handles {
        handle.abort();
    }

    let runs: Vec<u128> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(|line| line.trim().parse().unwrap())
        .collect();
    assert!(runs.len() >= 3, "expected repeated runs, got {}", runs.len());
    for pair in runs.windows(2) {
        let gap_ms = (pair[1] - pair[0]) / 1_000_000;
        assert!(gap_ms >= 300, "runs only {gap_ms}ms apart");
    }

    let texts = sink.texts();
    assert!(texts.len() >= 3);
    assert!(texts[1..].iter().all(|frame| frame == &vec!["ERROR"]));
}

#[tokio::test]
async fn test_polling_block_survives_transformer_failures() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs");
    let command = format!("echo run >> '{}'; echo plain", log.display());

    let (nav, sink) = navigator(vec![(
        "main",
        vec![BlockDefinition::new("poll")
            .with_command(command, IntervalPolicy::RepeatEvery(Duration::from_millis(200)))
            .with_transformer(Transformer::json())],
    )]);
    let handles = nav.start().await;
    tokio::time::sleep(Duration::from_millis(900)).await;
    for handle in &handles {
        handle.abort();
    }

    let runs = std::fs::read_to_string(&log).unwrap().lines().count();
    assert!(runs >= 3, "expected repeated runs, got {}", runs);

    let texts = sink.texts();
    assert!(texts.len() >= 3);
    assert!(texts[1..].iter().all(|frame| frame == &vec!["ERROR"]));
}

#[tokio::test]
async fn test_concurrent_updates_leave_no_stale_values() {
    let (nav, sink) = navigator(vec![(
        "main",
        vec![
            BlockDefinition::new("left").with_command("seq 1 200", IntervalPolicy::Persistent),
            BlockDefinition::new("right").with_command("seq 1 150", IntervalPolicy::Persistent),
        ],
    )]);

    for handle in nav.start().await {
        handle.await.unwrap();
    }

    let texts = sink.texts();
    assert_eq!(texts.last().unwrap(), &vec!["200", "150"]);
    // One initial frame plus one per line.
    assert_eq!(texts.len(), 1 + 200 + 150);
    // Every frame is complete.
    assert!(texts.iter().all(|frame| frame.len() == 2));
}

#[tokio::test]
async fn test_submenu_runs_blocks_and_back_restores_previous_screen() {
    let (nav, sink) = navigator(vec![(
        "main",
        vec![
            BlockDefinition::new("clock").with_command("echo 12:00", IntervalPolicy::RunOnce),
            BlockDefinition::new("menu")
                .with_text("M")
                .on_click(OnClickAction::PushSubmenu(vec![BlockDefinition::new("host")
                    .with_command("echo box", IntervalPolicy::RunOnce)])),
        ],
    )]);
    nav.start().await;
    let before = sink.frames().last().cloned().unwrap();

    nav.dispatch(&ClickEvent::new("menu")).await;
    assert_eq!(sink.texts().last().unwrap(), &vec!["box", "BACK"]);

    // Clicks for blocks of the hidden screen are dropped.
    let frames = sink.frames().len();
    nav.dispatch(&ClickEvent::new("clock")).await;
    assert_eq!(sink.frames().len(), frames);

    nav.dispatch(&ClickEvent::new("back")).await;
    assert_eq!(sink.frames().last().unwrap(), &before);
    assert_eq!(nav.depth(), 0);
}

#[tokio::test]
async fn test_hidden_group_updates_without_frames() {
    let (nav, sink) = navigator(vec![
        ("main", vec![BlockDefinition::new("label").with_text("main")]),
        (
            "other",
            vec![BlockDefinition::new("hidden").with_command("echo updated", IntervalPolicy::RunOnce)],
        ),
    ]);
    nav.start().await;

    // Only the initial frame; the hidden block's update was not published.
    assert_eq!(sink.texts(), vec![vec!["main"]]);

    assert!(nav.switch_to("other"));
    assert_eq!(sink.texts().last().unwrap(), &vec!["updated"]);
}

#[tokio::test]
async fn test_click_stream_drives_navigation() {
    let (nav, sink) = navigator(vec![
        (
            "main",
            vec![
                BlockDefinition::new("power")
                    .with_text("P")
                    .on_click(OnClickAction::SwitchGroup("power".into())),
            ],
        ),
        (
            "power",
            vec![
                BlockDefinition::new("more")
                    .with_text("...")
                    .on_click(OnClickAction::PushSubmenu(vec![
                        BlockDefinition::new("reboot").with_text("R")
                    ])),
            ],
        ),
    ]);
    nav.start().await;

    let input = concat!(
        "[\n",
        "{\"name\":\"x\",\"instance\":\"power\",\"button\":1},\n",
        "{\"name\":\"x\",\"button\":1},\n",
        "{\"name\":\"x\",\"instance\":\"more\",\"button\":1,\"x\":4,\"y\":7},\n",
        "{\"name\":\"x\",\"instance\":\"back\",\"button\":1},\n",
    );
    read_clicks(input.as_bytes(), &nav).await.unwrap();

    assert_eq!(
        sink.texts(),
        vec![vec!["P"], vec!["..."], vec!["R", "BACK"], vec!["..."]]
    );
    assert_eq!(nav.current().key(), "power");
}

#[tokio::test]
async fn test_run_command_click_leaves_state_alone() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("clicked");
    let (nav, sink) = navigator(vec![(
        "main",
        vec![BlockDefinition::new("eject")
            .with_text("E")
            .on_click(OnClickAction::RunCommand(format!("touch '{}'", marker.display())))],
    )]);
    nav.start().await;

    nav.dispatch(&ClickEvent::new("eject")).await;
    for _ in 0..50 {
        if marker.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(marker.exists());
    assert_eq!(sink.texts(), vec![vec!["E"]]);
}
