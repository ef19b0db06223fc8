//! Cluster Memory Tests
//!
//! ## Test Scopes
//! - **Relay**: sets reach every sibling.
//! - **Confirmation**: ensure-replicated sets wait for every sibling's ack, and report
//!   an unknown cluster when nobody answers the worker count.
//! - **Read-through**: polling siblings for missing keys, default initialisation.
//! - **Restart**: a fresh worker copies memory from a sibling.

#[cfg(test)]
mod tests {
    use crate::cluster_memory::{ClusterMemory, ReplicationStatus};
    use crate::config::ClusterMemoryConfig;
    use crate::ipc::Supervisor;
    use crate::membership::types::NodeId;
    use crate::testkit::{fast_config, local_cluster, settle, spawn_workers};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    // ============================================================
    // RELAY
    // ============================================================

    #[tokio::test]
    async fn test_set_reaches_every_sibling() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(3, &fast_config(dir.path()));

        // ACT
        let status = workers[0]
            .cluster_memory
            .set("color", json!("blue"), false, None)
            .await;
        settle().await;

        // ASSERT
        assert_eq!(status, ReplicationStatus::Relayed);
        for worker in &workers {
            assert_eq!(worker.cluster_memory.get_local("color"), Some(json!("blue")));
        }
    }

    #[tokio::test]
    async fn test_later_set_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(2, &fast_config(dir.path()));

        workers[0].cluster_memory.set("k", json!(1), false, None).await;
        settle().await;
        workers[1].cluster_memory.set("k", json!(2), false, None).await;
        settle().await;

        assert_eq!(workers[0].cluster_memory.get_local("k"), Some(json!(2)));
        assert_eq!(workers[1].cluster_memory.get_local("k"), Some(json!(2)));
    }

    // ============================================================
    // CONFIRMATION
    // ============================================================

    #[tokio::test]
    async fn test_ensure_replicated_waits_for_all_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(4, &fast_config(dir.path()));

        let status = workers[2]
            .cluster_memory
            .set("config", json!({"v": 1}), true, Some(Duration::from_millis(500)))
            .await;

        assert_eq!(status, ReplicationStatus::Replicated { siblings: 3 });
        assert!(status.marker().is_none());
        for worker in &workers {
            assert_eq!(worker.cluster_memory.get_local("config"), Some(json!({"v": 1})));
        }
    }

    #[tokio::test]
    async fn test_ensure_replicated_alone_needs_no_acks() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(1, &fast_config(dir.path()));

        let status = workers[0].cluster_memory.set("solo", json!(true), true, None).await;

        assert_eq!(status, ReplicationStatus::Replicated { siblings: 0 });
    }

    #[tokio::test]
    async fn test_missing_sibling_acks_time_out() {
        // ARRANGE: a registered worker whose inbox nobody reads
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(NodeId::new());
        let workers = spawn_workers(&supervisor, None, 1, &fast_config(dir.path()));
        let (_silent, _inbox) = supervisor.connect();

        // ACT
        let status = workers[0]
            .cluster_memory
            .set("k", json!(1), true, Some(Duration::from_millis(80)))
            .await;

        // ASSERT
        assert_eq!(status, ReplicationStatus::TimedOut { acked: 0, expected: 1 });
        assert_eq!(status.marker(), Some(ReplicationStatus::TIMEOUT_MARKER));
    }

    #[tokio::test]
    async fn test_unanswered_worker_count_reports_cluster_unknown() {
        // ARRANGE: a channel whose count replies are never read
        let supervisor = Supervisor::new(NodeId::new());
        let (channel, _inbox) = supervisor.connect();
        let memory = ClusterMemory::new(Arc::new(channel), ClusterMemoryConfig::default());

        // ACT
        let status = memory
            .set("k", json!(1), true, Some(Duration::from_millis(50)))
            .await;

        // ASSERT
        assert_eq!(status, ReplicationStatus::ClusterUnknown);
        assert_eq!(memory.get_local("k"), Some(json!(1)), "local write stands");
    }

    // ============================================================
    // READ-THROUGH
    // ============================================================

    #[tokio::test]
    async fn test_get_polls_siblings_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(3, &fast_config(dir.path()));
        // Written behind the relay's back, so only worker 2 holds it.
        workers[2]
            .cluster_memory
            .handle_message(crate::cluster_memory::protocol::ClusterMemoryMessage::Set {
                key: "hidden".to_string(),
                value: json!("found"),
                from: 99,
                ack_id: None,
            });

        assert_eq!(workers[0].cluster_memory.get("hidden", None, false, None).await, None);
        let polled = workers[0]
            .cluster_memory
            .get("hidden", None, true, Some(Duration::from_millis(200)))
            .await;

        assert_eq!(polled, Some(json!("found")));
        assert_eq!(workers[0].cluster_memory.get_local("hidden"), Some(json!("found")));
    }

    #[tokio::test]
    async fn test_get_initialises_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(2, &fast_config(dir.path()));

        let value = workers[0]
            .cluster_memory
            .get("counter", Some(json!(0)), true, Some(Duration::from_millis(50)))
            .await;
        settle().await;

        assert_eq!(value, Some(json!(0)));
        assert_eq!(workers[1].cluster_memory.get_local("counter"), Some(json!(0)));
    }

    // ============================================================
    // RESTART
    // ============================================================

    #[tokio::test]
    async fn test_new_worker_restores_from_sibling() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_config(dir.path());
        let supervisor = Supervisor::new(NodeId::new());
        let old = spawn_workers(&supervisor, None, 2, &config);
        old[0].cluster_memory.set("a", json!(1), false, None).await;
        old[0].cluster_memory.set("b", json!(2), false, None).await;
        settle().await;

        // ACT: a replacement worker joins
        config.cluster_memory.restore_on_start = true;
        let fresh = spawn_workers(&supervisor, None, 1, &config);
        let restored = fresh[0].cluster_memory.init().await;

        // ASSERT
        assert_eq!(restored, 2);
        assert_eq!(fresh[0].cluster_memory.get_local("b"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_restore_without_siblings_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (_supervisor, workers) = local_cluster(1, &fast_config(dir.path()));

        let restored = workers[0]
            .cluster_memory
            .restore_from_siblings(Duration::from_millis(50))
            .await;

        assert_eq!(restored, 0);
        assert!(workers[0].cluster_memory.is_empty());
    }
}
