#[cfg(test)]
mod dependency_checker_tests {
    use std::sync::Arc;

    use orchestrator_core::models::{DetermineStrategy, Task};
    use orchestrator_core::OrchestratorError;
    use orchestrator_dispatcher::dependency_checker::*;
    use orchestrator_testing_utils::{ScriptedTaskApi, TaskBuilder};

    fn depends_on(id: &str, strategy: DetermineStrategy) -> Task {
        TaskBuilder::new("child").with_depend(id, strategy).build()
    }

    #[test]
    fn test_same_node_strategy() {
        let dep_task = TaskBuilder::new("install_k8s")
            .with_nodes(&["n1", "n2", "n3"])
            .with_status("n1", "complete", "Success")
            .with_status("n2", "complete", "Failure")
            .build();
        let child = depends_on("install_k8s", DetermineStrategy::SameNode);
        let dep = &child.depends[0];

        assert_eq!(
            evaluate_dependency(&dep_task, dep, "n1"),
            DependencyState::Ready
        );
        assert!(matches!(
            evaluate_dependency(&dep_task, dep, "n2"),
            DependencyState::Unsatisfiable(_)
        ));
        assert!(matches!(
            evaluate_dependency(&dep_task, dep, "n3"),
            DependencyState::Waiting(_)
        ));
    }

    #[test]
    fn test_at_least_once_strategy() {
        let child = depends_on("install_storage", DetermineStrategy::AtLeastOnce);
        let dep = &child.depends[0];

        let one_success = TaskBuilder::new("install_storage")
            .with_nodes(&["n1", "n2"])
            .with_status("n1", "complete", "Failure")
            .with_status("n2", "complete", "Success")
            .build();
        assert_eq!(
            evaluate_dependency(&one_success, dep, "n9"),
            DependencyState::Ready
        );

        let still_running = TaskBuilder::new("install_storage")
            .with_nodes(&["n1", "n2"])
            .with_status("n1", "complete", "Failure")
            .with_status("n2", "exec", "")
            .build();
        assert!(matches!(
            evaluate_dependency(&still_running, dep, "n9"),
            DependencyState::Waiting(_)
        ));

        let all_failed = TaskBuilder::new("install_storage")
            .with_nodes(&["n1", "n2"])
            .with_status("n1", "complete", "Failure")
            .with_status("n2", "timeout", "Timeout")
            .build();
        assert!(matches!(
            evaluate_dependency(&all_failed, dep, "n9"),
            DependencyState::Unsatisfiable(_)
        ));
    }

    #[tokio::test]
    async fn test_evaluate_against_task_api() {
        let api = ScriptedTaskApi::new()
            .with_task(
                TaskBuilder::new("install_storage")
                    .with_status("n1", "complete", "Success")
                    .build(),
            )
            .with_task(TaskBuilder::new("install_k8s").build());
        let checker = DependencyChecker::new(Arc::new(api));

        let ready = TaskBuilder::new("install_network")
            .with_depend("install_storage", DetermineStrategy::SameNode)
            .build();
        assert_eq!(
            checker.evaluate(&ready, "n1").await.unwrap(),
            DependencyState::Ready
        );

        let waiting = TaskBuilder::new("install_network")
            .with_depend("install_storage", DetermineStrategy::SameNode)
            .with_depend("install_k8s", DetermineStrategy::AtLeastOnce)
            .build();
        assert!(matches!(
            checker.evaluate(&waiting, "n1").await.unwrap(),
            DependencyState::Waiting(reason) if reason.contains("install_k8s")
        ));

        let missing = TaskBuilder::new("install_network")
            .with_depend("install_k8s", DetermineStrategy::AtLeastOnce)
            .with_depend("install_dns", DetermineStrategy::AtLeastOnce)
            .build();
        assert!(matches!(
            checker.evaluate(&missing, "n1").await.unwrap(),
            DependencyState::Unsatisfiable(reason) if reason.contains("install_dns")
        ));
    }

    #[test]
    fn test_install_order_follows_dependencies() {
        let tasks = vec![
            TaskBuilder::new("install_plugins")
                .with_depend("install_network", DetermineStrategy::SameNode)
                .build(),
            TaskBuilder::new("install_network")
                .with_depend("install_k8s", DetermineStrategy::SameNode)
                .build(),
            TaskBuilder::new("install_storage").build(),
            TaskBuilder::new("install_k8s")
                .with_depend("install_storage", DetermineStrategy::AtLeastOnce)
                .with_depend("install_base", DetermineStrategy::AtLeastOnce)
                .build(),
        ];

        let order = DependencyChecker::install_order(&tasks).unwrap();
        assert_eq!(
            order,
            vec![
                "install_storage",
                "install_k8s",
                "install_network",
                "install_plugins"
            ]
        );
    }

    #[test]
    fn test_install_order_breaks_ties_by_id() {
        let tasks = vec![
            TaskBuilder::new("c").with_depend("a", DetermineStrategy::SameNode).build(),
            TaskBuilder::new("b").with_depend("a", DetermineStrategy::SameNode).build(),
            TaskBuilder::new("a").build(),
            TaskBuilder::new("d")
                .with_depend("b", DetermineStrategy::SameNode)
                .with_depend("c", DetermineStrategy::SameNode)
                .build(),
        ];

        assert_eq!(
            DependencyChecker::install_order(&tasks).unwrap(),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_install_order_rejects_cycle() {
        let tasks = vec![
            TaskBuilder::new("root").build(),
            TaskBuilder::new("x")
                .with_depend("y", DetermineStrategy::SameNode)
                .with_depend("root", DetermineStrategy::SameNode)
                .build(),
            TaskBuilder::new("y").with_depend("x", DetermineStrategy::SameNode).build(),
        ];

        match DependencyChecker::install_order(&tasks) {
            Err(OrchestratorError::CircularDependency(ids)) => assert_eq!(ids, "x,y"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closure_collects_transitive_dependencies() {
        let api = ScriptedTaskApi::new()
            .with_task(TaskBuilder::new("install_storage").build())
            .with_task(
                TaskBuilder::new("install_k8s")
                    .with_depend("install_storage", DetermineStrategy::AtLeastOnce)
                    .build(),
            )
            .with_task(
                TaskBuilder::new("install_network")
                    .with_depend("install_k8s", DetermineStrategy::SameNode)
                    .build(),
            )
            .with_task(TaskBuilder::new("unrelated").build());
        let checker = DependencyChecker::new(Arc::new(api));

        let tasks = checker
            .closure(&["install_network".to_string()])
            .await
            .unwrap();
        let mut ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["install_k8s", "install_network", "install_storage"]);

        assert!(checker.closure(&["ghost".to_string()]).await.is_err());
    }
}
