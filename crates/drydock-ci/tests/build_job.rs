//! Integration tests for build jobs driven against the recording manager.

use drydock_ci::fakes::{ManagerCall, ManagerOp, RecordingAnalyzer, RecordingManager};
use drydock_ci::{
    Build, CiError, Event, ImageRef, Node, NodeType, NodeTypes, Operation, StepNode, StepStage,
    StepState, Tree,
};
use std::sync::Arc;

fn event(operation: Operation, context_dir: &str) -> Event {
    Event::with_id("ev-42", operation, ImageRef::new("reg/app", "v1")).with_context_dir(context_dir)
}

fn load(root: Node, manager: Arc<RecordingManager>, context_dir: &str) -> Build {
    Build::load(
        "/src",
        event(Operation::Integration, context_dir),
        manager,
        Arc::new(Tree::new(root)),
    )
}

/// A step of `node_type` with enough config to run.
fn runnable(node_type: NodeType, image: &str) -> Node {
    Node::step(
        node_type,
        StepNode::new(format!("{}-step", node_type))
            .with_image(image)
            .with_commands(["echo run"]),
    )
}

fn stage_log(build: &Build) -> Vec<(StepStage, StepState)> {
    build
        .event()
        .step_logs
        .iter()
        .map(|e| (e.stage, e.state))
        .collect()
}

/// Scenario A: service then integration, unrestricted.
#[tokio::test]
async fn test_service_then_integration() {
    let out = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        Node::Service(StepNode::new("db").with_image("img:1")),
        Node::Integration(StepNode::new("test").with_image("alpine:3").with_commands(["echo hi"])),
    ]);
    let mut build = load(tree, manager.clone(), out.path().to_str().unwrap());

    build.setup().await.expect("setup failed");
    build.run_node(NodeTypes::empty()).await.expect("walk failed");

    let network = build.network().unwrap().clone();
    let calls = manager.calls();

    let ManagerCall::StartContainer(service) = &calls[1] else {
        panic!("expected service start, got {:?}", calls[1]);
    };
    assert_eq!(service.image, "img:1");
    assert_eq!(build.service_containers().len(), 1);
    assert_eq!(
        calls[2],
        ManagerCall::ConnectNetwork {
            network_id: network.id.clone(),
            container: build.service_containers()[0].clone(),
            alias: "db".to_string(),
        }
    );

    let runs = manager.run_specs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].cmd, vec!["-c", "set -e\necho hi"]);
    assert_eq!(runs[0].network.as_deref(), Some(network.name.as_str()));

    build
        .remove_service_containers()
        .await
        .expect("service cleanup failed");
    build.teardown().await.expect("teardown failed");
}

/// Scenario A through the scoped lifecycle: attached services go before the network.
#[tokio::test]
async fn test_run_with_network_removes_services_before_network() {
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        Node::Service(StepNode::new("db").with_image("img:1")),
        Node::Integration(StepNode::new("test").with_image("alpine:3").with_commands(["echo hi"])),
    ]);
    let mut build = load(tree, manager.clone(), "/tmp/ev-42");

    build
        .run_with_network(NodeTypes::empty())
        .await
        .expect("job failed");

    assert!(build.network().is_none());
    assert!(build.service_containers().is_empty());

    let calls = manager.calls();
    let service_id = calls
        .iter()
        .find_map(|c| match c {
            ManagerCall::ConnectNetwork { container, .. } => Some(container.clone()),
            _ => None,
        })
        .expect("service never attached");
    let service_removed = calls
        .iter()
        .position(|c| matches!(c, ManagerCall::RemoveContainer { container } if *container == service_id))
        .expect("service never removed");
    let network_removed = calls
        .iter()
        .position(|c| matches!(c, ManagerCall::RemoveNetwork { .. }))
        .expect("network never removed");
    assert!(service_removed < network_removed);
}

#[tokio::test]
async fn test_run_with_network_reports_service_cleanup_failure() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_operation(ManagerOp::RemoveContainer, "device or resource busy");
    let mut build = load(
        Node::Service(StepNode::new("db").with_image("img:1")),
        manager,
        "/tmp/ev-42",
    );

    let err = build.run_with_network(NodeTypes::empty()).await.unwrap_err();
    assert!(err.to_string().contains("device or resource busy"));
    assert_eq!(build.service_containers().len(), 1);
    assert!(build.network().is_some());
}

/// Scenario B: flags restricted to services skip the integration step.
#[tokio::test]
async fn test_service_only_flags_skip_integration() {
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        Node::Service(StepNode::new("db").with_image("img:1")),
        Node::Integration(StepNode::new("test").with_image("alpine:3").with_commands(["echo hi"])),
    ]);
    let mut build = load(tree, manager.clone(), "/tmp/ev-42");

    build.setup().await.unwrap();
    build
        .run_node(NodeTypes::from(NodeType::Service))
        .await
        .expect("walk failed");

    assert!(manager.run_specs().is_empty());
    assert_eq!(manager.container_images(), vec!["img:1"]);
    assert_eq!(build.flags(), NodeTypes::from(NodeType::Service));
}

/// Scenario C: a failing post-build hook is audited Start then Stop.
#[tokio::test]
async fn test_post_build_nonzero_exit() {
    let manager = Arc::new(RecordingManager::new());
    manager.set_exit_code("alpine:3", 1);
    let tree = Node::list(vec![Node::PostBuild(
        StepNode::new("notify").with_image("alpine:3").with_commands(["exit 1"]),
    )]);
    let mut build = load(tree, manager, "/tmp/ev-42");

    let err = build.run_node(NodeTypes::empty()).await.unwrap_err();

    assert!(err.to_string().starts_with("container meets error"));
    assert_eq!(err.exit_code(), Some(1));
    assert_eq!(
        stage_log(&build),
        vec![
            (StepStage::PostBuild, StepState::Start),
            (StepStage::PostBuild, StepState::Stop),
        ]
    );
    let stop = &build.event().step_logs[1];
    assert!(stop.error.as_deref().unwrap().contains("exited with code 1"));
}

/// Scenario D: deploy events report push success without pushing.
#[tokio::test]
async fn test_deploy_push_success_without_push() {
    let manager = Arc::new(RecordingManager::new());
    let build = Build::load(
        "/src",
        event(Operation::Deploy, "/tmp/ev-42"),
        manager.clone(),
        Arc::new(Tree::new(Node::list(vec![]))),
    );

    assert!(build.is_push_image_success());
    assert!(manager.calls().is_empty());
}

#[tokio::test]
async fn test_walk_stops_at_first_failure() {
    let n = 5;
    for k in 0..n {
        let manager = Arc::new(RecordingManager::new());
        let children: Vec<Node> = (0..n)
            .map(|i| runnable(NodeType::Integration, &format!("step:{i}")))
            .collect();
        manager.set_exit_code(&format!("step:{k}"), 2);

        let mut build = load(Node::list(children), manager.clone(), "/tmp/ev-42");
        let err = build.run_node(NodeTypes::empty()).await.unwrap_err();
        assert!(matches!(err, CiError::ContainerExit { exit_code: 2, .. }));

        let visited: Vec<String> = (0..=k).map(|i| format!("step:{i}")).collect();
        assert_eq!(manager.container_images(), visited, "failure at position {k}");
    }
}

#[tokio::test]
async fn test_nested_lists_walk_in_declared_order() {
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        runnable(NodeType::Integration, "a:1"),
        Node::list(vec![
            runnable(NodeType::Integration, "b:1"),
            Node::list(vec![runnable(NodeType::Integration, "c:1")]),
        ]),
        runnable(NodeType::Integration, "d:1"),
    ]);
    let mut build = load(tree, manager.clone(), "/tmp/ev-42");

    build.run_node(NodeTypes::empty()).await.unwrap();
    assert_eq!(manager.container_images(), vec!["a:1", "b:1", "c:1", "d:1"]);
}

#[tokio::test]
async fn test_runtime_failure_in_nested_list_aborts_walk() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_image("b:1", "image not found");
    let tree = Node::list(vec![
        Node::list(vec![
            runnable(NodeType::Integration, "a:1"),
            runnable(NodeType::Integration, "b:1"),
        ]),
        runnable(NodeType::Integration, "c:1"),
    ]);
    let mut build = load(tree, manager.clone(), "/tmp/ev-42");

    let err = build.run_node(NodeTypes::empty()).await.unwrap_err();
    assert!(matches!(err, CiError::Runtime { .. }));
    assert!(err.exit_code().is_none());
    assert_eq!(manager.container_images(), vec!["a:1", "b:1"]);
}

#[tokio::test]
async fn test_unselected_types_are_never_dispatched() {
    for selected in NodeType::ALL {
        for node_type in NodeType::ALL {
            if node_type == selected {
                continue;
            }
            let manager = Arc::new(RecordingManager::new());
            let mut build = load(runnable(node_type, "img:1"), manager.clone(), "/tmp/ev-42");

            build.run_node(NodeTypes::from(selected)).await.unwrap();

            assert!(
                manager.calls().is_empty(),
                "{node_type} dispatched under flags {selected}"
            );
            assert!(build.event().step_logs.is_empty());
        }
    }
}

#[tokio::test]
async fn test_steps_without_image_config_are_skipped() {
    for node_type in NodeType::ALL {
        if node_type == NodeType::Build {
            continue;
        }
        let manager = Arc::new(RecordingManager::new());
        let node = Node::step(node_type, StepNode::new("bare").with_commands(["echo hi"]));
        let mut build = load(node, manager.clone(), "/tmp/ev-42");

        build.run_node(NodeTypes::empty()).await.unwrap();

        assert!(manager.calls().is_empty(), "{node_type} was not skipped");
        assert!(build.event().step_logs.is_empty());
    }
}

#[tokio::test]
async fn test_build_step_without_config_still_builds() {
    let manager = Arc::new(RecordingManager::new());
    let mut build = load(Node::Build(StepNode::new("image")), manager.clone(), "/tmp/ev-42");

    build.run_node(NodeTypes::empty()).await.unwrap();

    let calls = manager.calls();
    assert_eq!(calls.len(), 1);
    let ManagerCall::BuildImage(request) = &calls[0] else {
        panic!("expected build, got {:?}", calls[0]);
    };
    assert_eq!(request.tag, "reg/app:v1");
    assert_eq!(request.dockerfile, std::path::PathBuf::from("/src/Dockerfile"));
    assert!(build.event().step_logs.is_empty());
}

#[tokio::test]
async fn test_pre_and_post_build_audit_pairs_on_success() {
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        runnable(NodeType::PreBuild, "pre:1"),
        runnable(NodeType::PostBuild, "post:1"),
    ]);
    let mut build = load(tree, manager, "/tmp/ev-42");

    build.run_node(NodeTypes::empty()).await.unwrap();

    assert_eq!(
        stage_log(&build),
        vec![
            (StepStage::PreBuild, StepState::Start),
            (StepStage::PreBuild, StepState::Finish),
            (StepStage::PostBuild, StepState::Start),
            (StepStage::PostBuild, StepState::Finish),
        ]
    );
}

#[tokio::test]
async fn test_pre_build_runtime_failure_audited() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_operation(ManagerOp::RunContainer, "oci runtime error");
    let mut build = load(runnable(NodeType::PreBuild, "pre:1"), manager, "/tmp/ev-42");

    let err = build.run_node(NodeTypes::empty()).await.unwrap_err();
    assert!(err.to_string().contains("oci runtime error"));
    assert_eq!(
        stage_log(&build),
        vec![
            (StepStage::PreBuild, StepState::Start),
            (StepStage::PreBuild, StepState::Stop),
        ]
    );
}

#[tokio::test]
async fn test_pre_build_dockerfile_failure_audited() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_operation(ManagerOp::BuildImage, "syntax error in Dockerfile");
    let node = Node::PreBuild(StepNode::new("deps").with_dockerfile("", "Dockerfile.deps"));
    let mut build = load(node, manager.clone(), "/tmp/ev-42");

    assert!(build.run_node(NodeTypes::empty()).await.is_err());
    assert!(manager.run_specs().is_empty());
    assert_eq!(
        stage_log(&build),
        vec![
            (StepStage::PreBuild, StepState::Start),
            (StepStage::PreBuild, StepState::Stop),
        ]
    );
    assert!(build.event().output.pre_build_image.is_none());
}

#[tokio::test]
async fn test_pre_build_from_dockerfile_records_image() {
    let out = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecordingManager::new());
    let node = Node::PreBuild(
        StepNode::new("deps")
            .with_dockerfile("ci", "Dockerfile.deps")
            .with_outputs(["/go/bin/app"]),
    );
    let mut build = load(node, manager.clone(), out.path().to_str().unwrap());

    build.run_node(NodeTypes::empty()).await.expect("walk failed");

    assert_eq!(
        stage_log(&build),
        vec![
            (StepStage::PreBuild, StepState::Start),
            (StepStage::PreBuild, StepState::Finish),
        ]
    );
    assert_eq!(
        build.event().output.pre_build_image.as_deref(),
        Some("drydock-prebuild:ev-42")
    );

    let calls = manager.calls();
    let ManagerCall::BuildImage(request) = &calls[0] else {
        panic!("expected build, got {:?}", calls[0]);
    };
    assert_eq!(request.dockerfile, std::path::PathBuf::from("/src/ci/Dockerfile.deps"));
    assert!(calls.iter().any(|c| matches!(
        c,
        ManagerCall::CopyFromContainer { src, dest, .. } if src == "/go/bin/app" && dest == out.path()
    )));
}

#[tokio::test]
async fn test_post_build_ignores_dockerfile() {
    let manager = Arc::new(RecordingManager::new());
    let node = Node::PostBuild(
        StepNode::new("report")
            .with_image("alpine:3")
            .with_dockerfile("", "Dockerfile")
            .with_commands(["echo done"]),
    );
    let mut build = load(node, manager.clone(), "/tmp/ev-42");

    build.run_node(NodeTypes::empty()).await.unwrap();

    assert!(!manager
        .calls()
        .iter()
        .any(|c| matches!(c, ManagerCall::BuildImage(_))));
    assert_eq!(manager.run_specs().len(), 1);
}

// Service, integration and build failures propagate without audit entries;
// only pre/post build and network setup are recorded.
#[tokio::test]
async fn test_service_integration_build_failures_are_not_audited() {
    let cases = [
        (NodeType::Service, ManagerOp::StartContainer),
        (NodeType::Integration, ManagerOp::RunContainer),
        (NodeType::Build, ManagerOp::BuildImage),
    ];
    for (node_type, op) in cases {
        let manager = Arc::new(RecordingManager::new());
        manager.fail_operation(op, "boom");
        let mut build = load(runnable(node_type, "img:1"), manager, "/tmp/ev-42");
        build.setup().await.unwrap();

        assert!(build.run_node(NodeTypes::empty()).await.is_err());
        assert!(
            build.event().step_logs.is_empty(),
            "{node_type} failure was audited"
        );
    }
}

#[tokio::test]
async fn test_integration_nonzero_exit_is_not_audited() {
    let manager = Arc::new(RecordingManager::new());
    manager.set_exit_code("img:1", 127);
    let mut build = load(runnable(NodeType::Integration, "img:1"), manager, "/tmp/ev-42");

    let err = build.run_node(NodeTypes::empty()).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(127));
    assert!(build.event().step_logs.is_empty());
}

#[tokio::test]
async fn test_service_recorded_even_when_attach_fails() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_operation(ManagerOp::ConnectNetwork, "network not found");
    let mut build = load(
        Node::Service(StepNode::new("cache").with_image("redis:7")),
        manager,
        "/tmp/ev-42",
    );
    build.setup().await.unwrap();

    assert!(build.run_node(NodeTypes::empty()).await.is_err());
    assert_eq!(build.service_containers().len(), 1);
}

#[tokio::test]
async fn test_service_containers_accumulate_in_order() {
    let manager = Arc::new(RecordingManager::new());
    let tree = Node::list(vec![
        Node::Service(StepNode::new("db").with_image("postgres:16")),
        runnable(NodeType::Integration, "alpine:3"),
        Node::Service(StepNode::new("cache").with_image("redis:7")),
    ]);
    let mut build = load(tree, manager.clone(), "/tmp/ev-42");
    build.setup().await.unwrap();

    build.run_node(NodeTypes::empty()).await.unwrap();

    let started: Vec<String> = manager
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ManagerCall::ConnectNetwork { container, .. } => Some(container),
            _ => None,
        })
        .collect();
    assert_eq!(build.service_containers(), started.as_slice());
    assert_eq!(started.len(), 2);
}

#[tokio::test]
async fn test_integration_outputs_captured_under_context_dir() {
    let out = tempfile::tempdir().unwrap();
    let context_dir = out.path().to_str().unwrap().to_string();
    let manager = Arc::new(RecordingManager::new());
    let node = Node::Integration(
        StepNode::new("test")
            .with_image("golang:1.22")
            .with_commands(["go test ./... > /out/report.txt"])
            .with_outputs(["/out/report.txt"]),
    );
    let mut build = load(node, manager.clone(), &context_dir);

    build.run_node(NodeTypes::empty()).await.unwrap();

    let copied: Vec<_> = manager
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ManagerCall::CopyFromContainer { src, dest, .. } => Some((src, dest)),
            _ => None,
        })
        .collect();
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].0, "/out/report.txt");
    assert_eq!(copied[0].1, out.path());
}

#[tokio::test]
async fn test_missing_context_dir_fails_container_steps() {
    let manager = Arc::new(RecordingManager::new());
    let event = Event::with_id("ev-42", Operation::Integration, ImageRef::new("reg/app", "v1"));
    let mut build = Build::load(
        "/src",
        event,
        manager.clone(),
        Arc::new(Tree::new(runnable(NodeType::Integration, "img:1"))),
    );

    let err = build.run_node(NodeTypes::empty()).await.unwrap_err();
    assert!(matches!(err, CiError::MissingEventData(_)));
    assert!(manager.calls().is_empty());
}

#[tokio::test]
async fn test_run_with_network_tears_down_after_failure() {
    let manager = Arc::new(RecordingManager::new());
    manager.set_exit_code("img:1", 1);
    let mut build = load(runnable(NodeType::Integration, "img:1"), manager.clone(), "/tmp/ev-42");

    let err = build.run_with_network(NodeTypes::empty()).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(1));
    assert!(build.network().is_none());
    assert!(matches!(
        manager.calls().last(),
        Some(ManagerCall::RemoveNetwork { .. })
    ));
}

#[tokio::test]
async fn test_run_with_network_prefers_walk_error() {
    let manager = Arc::new(RecordingManager::new());
    manager.set_exit_code("img:1", 1);
    manager.fail_operation(ManagerOp::RemoveNetwork, "in use");
    let mut build = load(runnable(NodeType::Integration, "img:1"), manager, "/tmp/ev-42");

    let err = build.run_with_network(NodeTypes::empty()).await.unwrap_err();
    assert!(matches!(err, CiError::ContainerExit { .. }));
}

#[tokio::test]
async fn test_run_with_network_setup_failure_skips_walk() {
    let manager = Arc::new(RecordingManager::new());
    manager.fail_operation(ManagerOp::CreateNetwork, "address pool exhausted");
    let mut build = load(runnable(NodeType::Integration, "img:1"), manager.clone(), "/tmp/ev-42");

    assert!(build.run_with_network(NodeTypes::empty()).await.is_err());
    assert_eq!(manager.calls().len(), 1);
    assert_eq!(
        stage_log(&build),
        vec![(StepStage::Integration, StepState::Stop)]
    );
}

#[tokio::test]
async fn test_full_job_publish_and_analysis() {
    let manager = Arc::new(RecordingManager::new());
    let analyzer = Arc::new(RecordingAnalyzer::new());
    let tree = Node::list(vec![
        runnable(NodeType::PreBuild, "golang:1.22"),
        Node::Build(StepNode::new("image").with_dockerfile("", "Dockerfile")),
        runnable(NodeType::PostBuild, "alpine:3"),
    ]);
    let mut build = Build::load(
        "/src",
        event(Operation::Publish, "/tmp/ev-42"),
        manager.clone(),
        Arc::new(Tree::new(tree)),
    )
    .with_analyzer(analyzer.clone());

    build.run_with_network(NodeTypes::empty()).await.unwrap();
    build.publish_image().await.unwrap();

    assert!(build.is_push_image_success());
    assert_eq!(analyzer.analyzed(), vec!["ev-42"]);
    assert!(matches!(
        manager.calls().last(),
        Some(ManagerCall::PushImage { image }) if image == "reg/app:v1"
    ));

    let event = build.into_event();
    assert_eq!(event.step_logs.len(), 4);
}
