use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Completion, CompletionRequest, HiveError, LlmProvider, ManualClock, ModelName, NewTask,
    ProviderName, Task, TaskFilter, TaskId, TaskStatus, Usage, WorkerId,
};
use engine::{
    EngineConfig, LlmWorker, ModelPrice, Orchestrator, PriceTable, StartOptions, Swarm, TaskPool,
    Worker,
};
use serde_json::{json, Value};

/// Records every task it executes.
struct RecordingWorker {
    id: WorkerId,
    executed: Arc<Mutex<Vec<TaskId>>>,
}

#[async_trait]
impl Worker for RecordingWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn execute(&self, task: &Task) -> Result<Value, HiveError> {
        self.executed.lock().unwrap().push(task.id);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(json!({ "worker": self.id.as_str() }))
    }
}

fn recording_workers(prefix: &str, count: usize, executed: &Arc<Mutex<Vec<TaskId>>>) -> Vec<Arc<dyn Worker>> {
    (0..count)
        .map(|n| {
            Arc::new(RecordingWorker {
                id: WorkerId::new(format!("{prefix}-{n}")).unwrap(),
                executed: executed.clone(),
            }) as Arc<dyn Worker>
        })
        .collect()
}

fn fast_options() -> StartOptions {
    StartOptions {
        stop_when_empty: true,
        poll_interval: Duration::from_millis(5),
        max_iterations: Some(100_000),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn n_workers_take_n_distinct_tasks() {
    for round in 0..25 {
        let count = 2 + round % 6;
        let pool = Arc::new(TaskPool::in_memory());
        for n in 0..count {
            pool.create_task(NewTask::new(format!("task {n}"), "d"))
                .await
                .unwrap();
        }
        let executed = Arc::new(Mutex::new(Vec::new()));
        let swarm = Swarm::new(pool.clone());
        for worker in recording_workers("w", count, &executed) {
            swarm.register_agent(worker).unwrap();
        }

        let summary = swarm.start(fast_options()).await.unwrap();
        assert_eq!(summary.completed, count);

        let tasks = pool.query(&TaskFilter::default()).await.unwrap();
        let agents: HashSet<_> = tasks
            .iter()
            .filter_map(|t| t.assigned_agent.clone())
            .collect();
        assert_eq!(agents.len(), count, "round {round}");
        assert_eq!(executed.lock().unwrap().len(), count);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn swarms_sharing_a_pool_never_double_execute() {
    let pool = Arc::new(TaskPool::in_memory());
    for n in 0..40 {
        pool.create_task(NewTask::new(format!("task {n}"), "d"))
            .await
            .unwrap();
    }
    let executed = Arc::new(Mutex::new(Vec::new()));

    let left = Arc::new(Swarm::new(pool.clone()));
    let right = Arc::new(Swarm::new(pool.clone()));
    for worker in recording_workers("left", 3, &executed) {
        left.register_agent(worker).unwrap();
    }
    for worker in recording_workers("right", 3, &executed) {
        right.register_agent(worker).unwrap();
    }

    let (a, b) = tokio::join!(
        tokio::spawn({
            let swarm = left.clone();
            async move { swarm.start(fast_options()).await }
        }),
        tokio::spawn({
            let swarm = right.clone();
            async move { swarm.start(fast_options()).await }
        }),
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    assert_eq!(a.completed + b.completed, 40);

    let executed = executed.lock().unwrap().clone();
    let unique: HashSet<_> = executed.iter().copied().collect();
    assert_eq!(executed.len(), 40);
    assert_eq!(unique.len(), 40);

    let stats = pool.get_stats().await.unwrap();
    assert_eq!(stats.completed, 40);
    assert_eq!(stats.total, 40);
}

/// Answers every request with a fixed usage.
struct FixedProvider {
    name: ProviderName,
}

#[async_trait]
impl LlmProvider for FixedProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, HiveError> {
        Ok(Completion {
            content: "ok".into(),
            model: request.model.clone(),
            usage: Usage::new(500, 500),
            cached: false,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn budget_stops_charging_mid_drain() {
    let provider = Arc::new(FixedProvider {
        name: ProviderName::new("fixed").unwrap(),
    });
    // $0.25 per call against a $1.00 ceiling: four calls fit.
    let prices = PriceTable::empty(ModelPrice::new(0.25, 0.25));
    let config = EngineConfig {
        max_total_cost: Some(1.0),
        ..EngineConfig::default()
    };
    let orchestrator = Arc::new(
        Orchestrator::new(provider, &config, prices, Arc::new(ManualClock::default())).unwrap(),
    );

    let pool = Arc::new(TaskPool::in_memory());
    for n in 0..7 {
        pool.create_task(NewTask::new(format!("task {n}"), "d"))
            .await
            .unwrap();
    }
    let model = ModelName::new("any-model").unwrap();
    let workers: Vec<Arc<dyn Worker>> = (0..2)
        .map(|n| {
            Arc::new(LlmWorker::new(&format!("agent-{n}"), orchestrator.clone(), model.clone()).unwrap())
                as Arc<dyn Worker>
        })
        .collect();

    let summary = orchestrator
        .drain_pool(pool.clone(), workers, fast_options())
        .await
        .unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 3);

    let costs = orchestrator.costs();
    assert_eq!(costs.entries().len(), 4);
    assert!(costs.current_cost().as_f64() <= 1.0);

    let failed = pool
        .query(&TaskFilter::with_status(TaskStatus::Failed))
        .await
        .unwrap();
    assert!(failed
        .iter()
        .all(|t| t.error.as_deref().unwrap().contains("budget")));
}
