//! Integration tests for the supervisor's command surface.
//!
//! These drive the real supervisor task against a temp-dir store and a
//! mock one-shot runner, so they run without any assistant CLI installed
//! and without opening PTYs.

use async_trait::async_trait;
use forge_common::{Event, ForgeError};
use forge_supervisor::{
    spawn_supervisor, Command, OneShotRequest, OneShotRunner, Response, RunOutcome,
    SupervisorConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// Runner that answers every request with a fixed string.
struct FixedRunner;

#[async_trait]
impl OneShotRunner for FixedRunner {
    async fn run(&self, req: OneShotRequest) -> RunOutcome {
        RunOutcome::Completed {
            output: format!("answer for: {}", req.stdin.lines().next().unwrap_or("")),
            code: 0,
        }
    }
}

struct Harness {
    handle: forge_supervisor::SupervisorHandle,
    events: tokio::sync::mpsc::UnboundedReceiver<Event>,
    home: tempfile::TempDir,
    _keep: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let mut config = SupervisorConfig::new(dir.path().join("forge.db"));
    config.home = home.path().to_path_buf();
    config.runner = Arc::new(FixedRunner);
    config.idle_notify_delay = Duration::from_millis(50);
    config.goal_write_delay = Duration::from_millis(50);
    let (handle, events) = spawn_supervisor(config).unwrap();
    Harness {
        handle,
        events,
        home,
        _keep: dir,
    }
}

#[tokio::test]
async fn workspace_open_creates_and_refreshes() {
    let h = harness();
    let ws = tempfile::tempdir().unwrap();
    std::fs::write(ws.path().join("AGENTS.md"), "context here").unwrap();

    let opened = match h
        .handle
        .command(Command::WorkspaceOpen {
            path: ws.path().to_string_lossy().into_owned(),
        })
        .await
        .unwrap()
    {
        Response::Opened(opened) => opened,
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(opened.workspace.id.len(), 16);
    assert_eq!(opened.agents_md.unwrap().content, "context here");
    assert!(opened.skills.is_empty());

    // Second open resolves to the same workspace row.
    let reopened = match h
        .handle
        .command(Command::WorkspaceOpen {
            path: ws.path().to_string_lossy().into_owned(),
        })
        .await
        .unwrap()
    {
        Response::Opened(o) => o,
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(reopened.workspace.id, opened.workspace.id);

    match h.handle.command(Command::WorkspaceList).await.unwrap() {
        Response::Workspaces(list) => assert_eq!(list.len(), 1),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn workspace_open_rejects_missing_directory() {
    let h = harness();
    let err = h
        .handle
        .command(Command::WorkspaceOpen {
            path: "/definitely/not/here".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));
}

#[tokio::test]
async fn memory_roundtrip_through_commands() {
    let h = harness();
    h.handle
        .command(Command::MemoryStore {
            workspace_id: "w1".into(),
            key: "deploy".into(),
            content: "deploys go through the kestrel pipeline".into(),
            category: None,
        })
        .await
        .unwrap();

    match h
        .handle
        .command(Command::MemorySearch {
            workspace_id: "w1".into(),
            query: "kestrel".into(),
        })
        .await
        .unwrap()
    {
        Response::Memories(found) => {
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].key, "deploy");
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Unbalanced quotes downgrade to the LIKE fallback instead of erroring.
    match h
        .handle
        .command(Command::MemorySearch {
            workspace_id: "w1".into(),
            query: "kest rel\"".into(),
        })
        .await
        .unwrap()
    {
        Response::Memories(found) => assert_eq!(found.len(), 1),
        other => panic!("unexpected: {other:?}"),
    }

    match h
        .handle
        .command(Command::MemoryDelete {
            workspace_id: "w1".into(),
            key: "deploy".into(),
        })
        .await
        .unwrap()
    {
        Response::Deleted(deleted) => assert!(deleted),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn routing_commands_match_rules() {
    let h = harness();
    match h
        .handle
        .command(Command::AgentRoute {
            description: "help me refactor the auth module".into(),
            preferred: None,
        })
        .await
        .unwrap()
    {
        Response::Route(decision) => {
            assert_eq!(decision.cli.as_str(), "claude");
            assert_eq!(decision.category.as_str(), "deep");
            assert!(decision.confidence > 0.0);
        }
        other => panic!("unexpected: {other:?}"),
    }

    match h
        .handle
        .command(Command::AgentRoute {
            description: "design the card layout".into(),
            preferred: None,
        })
        .await
        .unwrap()
    {
        Response::Route(decision) => assert_eq!(decision.cli.as_str(), "gemini"),
        other => panic!("unexpected: {other:?}"),
    }

    let err = h
        .handle
        .command(Command::AgentRoute {
            description: "anything".into(),
            preferred: Some("chatgpt".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));
}

#[tokio::test]
async fn shell_spawn_validates_before_touching_the_store() {
    let h = harness();
    let ws = tempfile::tempdir().unwrap();

    let err = h
        .handle
        .command(Command::ShellSpawn {
            cli_type: "chatgpt".into(),
            workspace_path: ws.path().to_string_lossy().into_owned(),
            workspace_id: "w1".into(),
            goal: None,
            one_shot_loop: false,
            shell_session: false,
            resume_session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    let err = h
        .handle
        .command(Command::ShellSpawn {
            cli_type: "claude".into(),
            workspace_path: "/nope/nothing".into(),
            workspace_id: "w1".into(),
            goal: None,
            one_shot_loop: false,
            shell_session: false,
            resume_session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    // One-shot loop without a goal is rejected, as is a non-claude resume.
    let err = h
        .handle
        .command(Command::ShellSpawn {
            cli_type: "claude".into(),
            workspace_path: ws.path().to_string_lossy().into_owned(),
            workspace_id: "w1".into(),
            goal: Some("   ".into()),
            one_shot_loop: true,
            shell_session: false,
            resume_session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    let err = h
        .handle
        .command(Command::ShellSpawn {
            cli_type: "gemini".into(),
            workspace_path: ws.path().to_string_lossy().into_owned(),
            workspace_id: "w1".into(),
            goal: None,
            one_shot_loop: false,
            shell_session: false,
            resume_session_id: Some("abc".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    // Nothing spawned, nothing recorded.
    match h.handle.command(Command::ShellList).await.unwrap() {
        Response::PtyIds(ids) => assert!(ids.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
    match h
        .handle
        .command(Command::WorkspaceActiveSessions {
            workspace_id: "w1".into(),
        })
        .await
        .unwrap()
    {
        Response::Sessions(sessions) => assert!(sessions.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn shell_boundary_checks() {
    let h = harness();

    // Out-of-range resize is rejected even for unknown sessions.
    let err = h
        .handle
        .command(Command::ShellResize {
            pty_id: "pty_x".into(),
            cols: 0,
            rows: 24,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    // In-range resize for a vanished session is a silent ack, like write.
    assert!(matches!(
        h.handle
            .command(Command::ShellResize {
                pty_id: "pty_x".into(),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap(),
        Response::Ack
    ));
    assert!(matches!(
        h.handle
            .command(Command::ShellWrite {
                pty_id: "pty_x".into(),
                data: "hello".into(),
            })
            .await
            .unwrap(),
        Response::Ack
    ));

    // Kill is idempotent, even for ids that never existed.
    for _ in 0..2 {
        assert!(matches!(
            h.handle
                .command(Command::ShellKill {
                    pty_id: "pty_x".into(),
                })
                .await
                .unwrap(),
            Response::Ack
        ));
    }

    let err = h
        .handle
        .command(Command::ShellOpenExternal {
            url: "file:///etc/passwd".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));
    assert!(matches!(
        h.handle
            .command(Command::ShellOpenExternal {
                url: "https://example.com".into(),
            })
            .await
            .unwrap(),
        Response::Target(_)
    ));
}

#[tokio::test]
async fn continuation_commands_require_a_session() {
    let h = harness();
    let err = h
        .handle
        .command(Command::ContinuationStart {
            pty_id: "pty_x".into(),
            goal: "keep going".into(),
            max_iterations: Some(3),
            require_prompt: None,
            quiet_delay_ms: Some(250),
            kick_off: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));

    // State for an unknown session is simply absent.
    match h
        .handle
        .command(Command::ContinuationState {
            pty_id: "pty_x".into(),
        })
        .await
        .unwrap()
    {
        Response::Continuation(state) => assert!(state.is_none()),
        other => panic!("unexpected: {other:?}"),
    }

    // Stop is safe without a continuation.
    assert!(matches!(
        h.handle
            .command(Command::ContinuationStop {
                pty_id: "pty_x".into(),
            })
            .await
            .unwrap(),
        Response::Ack
    ));
}

#[tokio::test]
async fn synthesis_through_the_command_surface() {
    let mut h = harness();
    let ws = tempfile::tempdir().unwrap();

    let outcome = match h
        .handle
        .command(Command::EnsembleSynthesis {
            workspace_id: "w1".into(),
            workspace_path: ws.path().to_string_lossy().into_owned(),
            goal: "summarize the repo".into(),
            n: Some(2),
        })
        .await
        .unwrap()
    {
        Response::Synthesis(outcome) => outcome,
        other => panic!("unexpected: {other:?}"),
    };
    assert!(outcome.ok);
    assert_eq!(outcome.count, 2);
    assert!(!outcome.session_id.is_empty());

    let mut completed = Vec::new();
    let mut done = 0;
    while let Ok(ev) = h.events.try_recv() {
        match ev {
            Event::EnsembleProgress {
                completed: c,
                total,
                ..
            } => {
                assert_eq!(total, 2);
                completed.push(c);
            }
            Event::EnsembleDone {
                session_id, total, ..
            } => {
                assert_eq!(total, 2);
                assert_eq!(session_id, outcome.session_id);
                done += 1;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(completed, vec![0, 1, 2]);
    assert_eq!(done, 1);

    // The real home was never written.
    assert_eq!(std::fs::read_dir(h.home.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn synthesis_requires_a_goal() {
    let h = harness();
    let err = h
        .handle
        .command(Command::EnsembleSynthesis {
            workspace_id: "w1".into(),
            workspace_path: "/tmp".into(),
            goal: "  ".into(),
            n: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidInput(_)));
}

#[tokio::test]
async fn skills_and_memory_listing_commands() {
    let h = harness();
    let ws = tempfile::tempdir().unwrap();
    let skill_dir = ws.path().join(".forge/skills/release");
    std::fs::create_dir_all(&skill_dir).unwrap();
    std::fs::write(
        skill_dir.join("SKILL.md"),
        "---\nname: release\ndescription: cut a release\n---\nSteps.\n",
    )
    .unwrap();

    match h
        .handle
        .command(Command::WorkspaceGetSkills {
            path: ws.path().to_string_lossy().into_owned(),
        })
        .await
        .unwrap()
    {
        Response::Skills(skills) => {
            assert_eq!(skills.len(), 1);
            assert_eq!(skills[0].name, "release");
        }
        other => panic!("unexpected: {other:?}"),
    }

    match h
        .handle
        .command(Command::MemoryList {
            workspace_id: "w-empty".into(),
            category: None,
        })
        .await
        .unwrap()
    {
        Response::Memories(memories) => assert!(memories.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
}
