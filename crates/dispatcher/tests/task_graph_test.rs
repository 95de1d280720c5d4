#[cfg(test)]
mod task_graph_tests {
    use std::sync::Arc;

    use orchestrator_core::config::TaskConfig;
    use orchestrator_core::models::TaskOutput;
    use orchestrator_core::OrchestratorError;
    use orchestrator_dispatcher::task_graph::*;
    use orchestrator_testing_utils::{task_status, ScriptedTaskApi, StatusStep, TaskBuilder};

    fn new_executor(api: &ScriptedTaskApi) -> (TaskGraphExecutor, Arc<RecordingProgress>) {
        let progress = Arc::new(RecordingProgress::default());
        let executor =
            TaskGraphExecutor::new(Arc::new(api.clone()), progress.clone(), &TaskConfig::default());
        (executor, progress)
    }

    fn nodes(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn dispatched(progress: &RecordingProgress) -> Vec<(String, Vec<String>)> {
        progress
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Dispatched { task, nodes } => Some((task, nodes)),
                _ => None,
            })
            .collect()
    }

    fn completed() -> StatusStep {
        StatusStep::of(&[("nodeX", task_status("complete", "Success"))])
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_tasks_only_follow_declaring_node() {
        let api = ScriptedTaskApi::new()
            .with_task(
                TaskBuilder::new("T1")
                    .with_next_tasks("nodeX", &["T2", "T3"])
                    .build(),
            )
            .with_task(TaskBuilder::new("T2").build())
            .with_task(TaskBuilder::new("T3").build())
            .with_script(
                "T1",
                vec![StatusStep::of(&[
                    ("nodeX", task_status("complete", "Success")),
                    ("nodeY", task_status("exec", "")),
                ])],
            )
            .with_script("T2", vec![completed()])
            .with_script("T3", vec![completed()]);
        let (executor, progress) = new_executor(&api);

        let outcome = executor.exec("T1", &nodes(&["nodeX"])).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        assert_eq!(api.exec_calls(), vec![("T1".to_string(), nodes(&["nodeX"]))]);
        assert_eq!(
            dispatched(&progress),
            vec![
                ("T1".to_string(), nodes(&["nodeX"])),
                ("T2".to_string(), nodes(&["nodeX"])),
                ("T3".to_string(), nodes(&["nodeX"])),
            ]
        );
        assert!(progress.events().contains(&ProgressEvent::Skipped {
            task: "T1".to_string(),
            node: "nodeY".to_string(),
        }));
        assert_eq!(api.status_call_count("T2"), 1);
        assert_eq!(api.status_call_count("T3"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_after_consecutive_failures() {
        let api = ScriptedTaskApi::new()
            .with_task(TaskBuilder::new("T1").build())
            .with_script("T1", vec![StatusStep::Error]);
        let (executor, _progress) = new_executor(&api);

        let outcome = executor.status("T1", &nodes(&["nodeX"])).await;

        match outcome {
            Outcome::Unreachable { task, failures, .. } => {
                assert_eq!(task, "T1");
                assert_eq!(failures, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.status_call_count("T1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_resets_after_good_poll() {
        let api = ScriptedTaskApi::new()
            .with_task(TaskBuilder::new("T1").build())
            .with_script(
                "T1",
                vec![
                    StatusStep::Error,
                    StatusStep::Error,
                    StatusStep::of(&[("nodeX", task_status("exec", ""))]),
                    StatusStep::Error,
                    StatusStep::Error,
                    completed(),
                ],
            );
        let (executor, _progress) = new_executor(&api);

        assert!(executor.status("T1", &nodes(&["nodeX"])).await.is_done());
        assert_eq!(api.status_call_count("T1"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_status_returns_outputs() {
        let mut task = TaskBuilder::new("T1").build();
        task.update_output(TaskOutput {
            node_id: "nodeX".to_string(),
            body: "disk full".to_string(),
            ..Default::default()
        });
        task.update_output(TaskOutput {
            node_id: "nodeY".to_string(),
            body: "ignored".to_string(),
            ..Default::default()
        });
        let api = ScriptedTaskApi::new().with_task(task).with_script(
            "T1",
            vec![
                StatusStep::of(&[("nodeX", task_status("exec", ""))]),
                StatusStep::of(&[("nodeX", task_status("complete", "Failure"))]),
            ],
        );
        let (executor, progress) = new_executor(&api);

        match executor.status("T1", &nodes(&["nodeX"])).await {
            Outcome::Fatal {
                task,
                node,
                status,
                outputs,
            } => {
                assert_eq!(task, "T1");
                assert_eq!(node, "nodeX");
                assert_eq!(status.comple_status, "Failure");
                assert_eq!(outputs.len(), 1);
                assert_eq!(outputs[0].body, "disk full");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(progress
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Fatal { node, .. } if node == "nodeX")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_chain_transitions_in_order() {
        let chain = [
            "install_storage",
            "install_k8s",
            "install_network",
            "install_plugins",
        ];
        let mut api = ScriptedTaskApi::new();
        for (i, id) in chain.iter().enumerate() {
            let mut builder = TaskBuilder::new(id);
            if let Some(next) = chain.get(i + 1) {
                builder = builder.with_next_tasks("n1", &[*next]);
            }
            api = api.with_task(builder.build()).with_script(
                id,
                vec![
                    StatusStep::of(&[("n1", task_status("create", ""))]),
                    StatusStep::of(&[("n1", task_status("exec", ""))]),
                    StatusStep::of(&[("n1", task_status("exec", ""))]),
                    StatusStep::of(&[("n1", task_status("complete", "Success"))]),
                ],
            );
        }
        let (executor, progress) = new_executor(&api);

        let outcome = executor.exec("install_storage", &nodes(&["n1"])).await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        let expected: Vec<(String, String, String, String)> = chain
            .iter()
            .flat_map(|id| {
                [("create", ""), ("exec", ""), ("complete", "Success")]
                    .into_iter()
                    .map(move |(status, comple)| {
                        (
                            id.to_string(),
                            "n1".to_string(),
                            status.to_string(),
                            comple.to_string(),
                        )
                    })
            })
            .collect();
        assert_eq!(progress.transitions(), expected);

        // 状态未变化的轮询只输出等待标记
        let waiting = progress
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Waiting { .. }))
            .count();
        assert_eq!(waiting, chain.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_next_tasks_terminate() {
        let api = ScriptedTaskApi::new()
            .with_task(TaskBuilder::new("A").with_next_tasks("nodeX", &["B"]).build())
            .with_task(TaskBuilder::new("B").with_next_tasks("nodeX", &["A"]).build())
            .with_script("A", vec![completed()])
            .with_script("B", vec![completed()]);
        let (executor, _progress) = new_executor(&api);

        assert!(executor.status("A", &nodes(&["nodeX"])).await.is_done());
        assert_eq!(api.status_calls(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_exec_requires_nodes() {
        let api = ScriptedTaskApi::new().with_task(TaskBuilder::new("T1").build());
        let (executor, _progress) = new_executor(&api);

        assert!(matches!(
            executor.exec("T1", &[]).await,
            Err(OrchestratorError::TaskExecution(_))
        ));
        assert!(api.exec_calls().is_empty());
    }
}
