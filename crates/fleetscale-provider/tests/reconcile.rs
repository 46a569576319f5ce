//! End-to-end reconciliation tests against the in-memory compute API.
//!
//! Each test seeds a fake cluster, connects a provider to it, and checks
//! both the registry view and the calls that reached the "remote" side.

use std::sync::Arc;
use std::time::Duration;

use fleetscale_cloud::{
    ACTION_DESCRIBE_GROUPS, ACTION_LIST_NODES, ACTION_SCALE_DOWN, ACTION_SCALE_UP, ApiConfig, ClusterSeed, GroupSpec, InMemoryComputeApi,
    RecordedCall, RemoteNode, StaticCredentialProvider,
};
use fleetscale_core::FleetConfig;
use fleetscale_metrics::ApiCallCollector;
use fleetscale_provider::template::{RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};
use fleetscale_provider::{
    CloudProvider, ErrorKind, ProviderError, ProviderResult, ReconciliationManager,
};

const ZONE: &str = "cn-bj2-04";

fn config() -> FleetConfig {
    FleetConfig::from_toml_str(
        r#"
[cluster]
id = "cluster-abc"
region = "cn-bj2"
project_id = "org-xyz"
"#,
    )
    .unwrap()
}

fn group(id: &str, min: u32, max: u32) -> GroupSpec {
    GroupSpec {
        id: id.into(),
        zone: ZONE.into(),
        min,
        max,
        cpu: 4,
        mem: 8192,
        machine_type: "N".into(),
        boot_disk_type: "CLOUD_SSD".into(),
        ..Default::default()
    }
}

fn node(asg: &str, node_id: &str, status: &str) -> RemoteNode {
    RemoteNode {
        zone: ZONE.into(),
        node_id: node_id.into(),
        instance_name: node_id.into(),
        node_status: status.into(),
        asg_id: asg.into(),
        ..Default::default()
    }
}

fn nodes(asg: &str, n: usize) -> Vec<RemoteNode> {
    (0..n)
        .map(|i| node(asg, &format!("seed-{asg}-{i}"), "Ready"))
        .collect()
}

fn provider_id(node_id: &str) -> String {
    format!("fleetscale://{ZONE}//{node_id}")
}

async fn connect(api: &InMemoryComputeApi) -> ProviderResult<CloudProvider> {
    let credentials = Arc::new(StaticCredentialProvider::for_api(
        ApiConfig {
            region: "cn-bj2".into(),
            project_id: "org-xyz".into(),
            endpoint: "http://127.0.0.1:1".into(),
        },
        Duration::from_secs(3600),
    ));
    let manager = ReconciliationManager::connect(
        &config(),
        credentials,
        api.factory(),
        Arc::new(ApiCallCollector::new()),
    )
    .await?;
    Ok(CloudProvider::new(manager))
}

fn seeded(groups: Vec<GroupSpec>, nodes: Vec<RemoteNode>) -> InMemoryComputeApi {
    InMemoryComputeApi::from_seed(ClusterSeed {
        enabled: true,
        groups,
        nodes,
    })
}

// ── Scale up ──────────────────────────────────────────────────────

#[tokio::test]
async fn increase_is_split_into_batches_of_ten() {
    let api = seeded(vec![group("asg-1", 0, 30)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    ng.increase_size(25).await.unwrap();

    assert_eq!(api.scale_up_counts(), vec![10, 10, 5]);
    assert_eq!(ng.target_size(), 25);
    assert_eq!(ng.nodes().len(), 25);
}

#[tokio::test]
async fn increase_past_max_makes_no_call() {
    let api = seeded(vec![group("asg-1", 0, 10)], nodes("asg-1", 8));
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();
    assert_eq!(ng.target_size(), 8);

    let err = ng.increase_size(3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert!(err.to_string().contains("desired:11 max:10"), "{err}");
    assert!(api.scale_up_counts().is_empty());

    ng.increase_size(2).await.unwrap();
    assert_eq!(api.scale_up_counts(), vec![2]);
    assert_eq!(ng.target_size(), 10);
}

#[tokio::test]
async fn non_positive_increase_is_rejected() {
    let api = seeded(vec![group("asg-1", 0, 10)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    for delta in [0, -3] {
        let err = ng.increase_size(delta).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(api.scale_up_counts().is_empty());
}

#[tokio::test]
async fn failed_batch_stops_the_rest_and_keeps_progress() {
    let api = seeded(vec![group("asg-1", 0, 30)], Vec::new());
    let provider = connect(&api).await.unwrap();
    api.fail_after(ACTION_SCALE_UP, 1, 8001, "quota exceeded");
    let ng = provider.node_group("asg-1").unwrap();

    let err = ng.increase_size(25).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.to_string().contains("quota exceeded"), "{err}");
    // The second batch was attempted and failed, the third never sent.
    assert_eq!(api.scale_up_counts(), vec![10, 10]);
    assert_eq!(ng.target_size(), 10);
}

#[tokio::test]
async fn node_refresh_failure_after_scale_up_is_not_an_error() {
    let api = seeded(vec![group("asg-1", 0, 10)], Vec::new());
    let provider = connect(&api).await.unwrap();
    api.fail_action(ACTION_LIST_NODES, 8900, "list unavailable");
    let ng = provider.node_group("asg-1").unwrap();

    ng.increase_size(2).await.unwrap();

    assert_eq!(api.scale_up_counts(), vec![2]);
    // The registry still shows the pre-scale snapshot.
    assert_eq!(ng.target_size(), 0);
}

#[tokio::test]
async fn concurrent_increases_respect_max() {
    let api = seeded(vec![group("asg-1", 0, 10)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let a = provider.node_group("asg-1").unwrap();
    let b = provider.node_group("asg-1").unwrap();

    let (ra, rb) = tokio::join!(a.increase_size(6), b.increase_size(6));

    let failures = [&ra, &rb].iter().filter(|r| r.is_err()).count();
    assert_eq!(failures, 1, "exactly one increase must be refused: {ra:?} {rb:?}");
    let refused = ra.err().or(rb.err()).unwrap();
    assert_eq!(refused.kind(), ErrorKind::Capacity);
    assert_eq!(api.scale_up_counts(), vec![6]);
    assert_eq!(a.target_size(), 6);
}

// ── Scale down ────────────────────────────────────────────────────

#[tokio::test]
async fn delete_at_min_size_is_refused() {
    let api = seeded(vec![group("asg-1", 3, 10)], nodes("asg-1", 3));
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    let err = ng
        .delete_nodes(&[provider_id("seed-asg-1-0")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert!(err.to_string().contains("min size reached"), "{err}");
    assert!(api.scale_down_ids().is_empty());
    assert_eq!(ng.target_size(), 3);
}

#[tokio::test]
async fn empty_delete_at_min_size_is_refused() {
    let api = seeded(vec![group("asg-1", 3, 10)], nodes("asg-1", 3));
    let provider = connect(&api).await.unwrap();
    api.clear_calls();

    let err = provider
        .node_group("asg-1")
        .unwrap()
        .delete_nodes(&[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn delete_issues_one_call_per_node_in_order() {
    let api = seeded(vec![group("asg-1", 1, 10)], nodes("asg-1", 4));
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    ng.delete_nodes(&[provider_id("seed-asg-1-2"), provider_id("seed-asg-1-0")])
        .await
        .unwrap();

    assert_eq!(api.scale_down_ids(), vec!["seed-asg-1-2", "seed-asg-1-0"]);
    assert_eq!(ng.target_size(), 2);
}

#[tokio::test]
async fn malformed_provider_id_fails_before_any_call() {
    let api = seeded(vec![group("asg-1", 0, 10)], nodes("asg-1", 4));
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    let err = ng
        .delete_nodes(&[provider_id("seed-asg-1-0"), "seed-asg-1-1".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(api.scale_down_ids().is_empty());
    assert_eq!(ng.target_size(), 4);
}

#[tokio::test]
async fn failed_delete_stops_and_refreshes() {
    let api = seeded(vec![group("asg-1", 0, 10)], nodes("asg-1", 4));
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();
    api.fail_after(ACTION_SCALE_DOWN, 1, 8500, "node busy");

    let err = ng
        .delete_nodes(&[
            provider_id("seed-asg-1-0"),
            provider_id("seed-asg-1-1"),
            provider_id("seed-asg-1-2"),
        ])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(api.scale_down_ids(), vec!["seed-asg-1-0", "seed-asg-1-1"]);
    assert_eq!(ng.target_size(), 3);
}

#[tokio::test]
async fn empty_delete_is_a_no_op() {
    let api = seeded(vec![group("asg-1", 0, 10)], nodes("asg-1", 2));
    let provider = connect(&api).await.unwrap();
    api.clear_calls();

    provider
        .node_group("asg-1")
        .unwrap()
        .delete_nodes(&[])
        .await
        .unwrap();
    assert!(api.calls().is_empty());
}

// ── Registry refresh ──────────────────────────────────────────────

#[tokio::test]
async fn terminal_nodes_do_not_count() {
    let api = seeded(
        vec![group("asg-1", 0, 10)],
        vec![
            node("asg-1", "a", "Ready"),
            node("asg-1", "b", "Installing"),
            node("asg-1", "c", "Deleting"),
            node("asg-1", "d", "Deleted"),
            node("asg-1", "e", "ToBeDeleted"),
        ],
    );
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    assert_eq!(ng.target_size(), 2);
    let ids: Vec<String> = ng.nodes().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![provider_id("a"), provider_id("b")]);
    assert!(provider.node_group_for_node(&provider_id("c")).is_none());
}

#[tokio::test]
async fn nodes_of_unknown_groups_are_ignored() {
    let api = seeded(
        vec![group("asg-1", 0, 10)],
        vec![node("asg-1", "a", "Ready"), node("asg-x", "b", "Ready"), node("", "c", "Ready")],
    );
    let provider = connect(&api).await.unwrap();

    assert_eq!(provider.node_group("asg-1").unwrap().target_size(), 1);
    assert!(provider.node_group_for_node(&provider_id("b")).is_none());
    assert!(provider.node_group_for_node("").is_none());
    assert_eq!(
        provider.node_group_for_node(&provider_id("a")).unwrap().id(),
        "asg-1"
    );
}

#[tokio::test]
async fn refresh_replaces_the_whole_group_set() {
    let api = seeded(vec![group("A", 0, 5), group("B", 0, 5)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let ids: Vec<String> = provider.node_groups().iter().map(|g| g.id().to_string()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    api.set_groups(vec![group("B", 1, 8), group("C", 0, 3)]);
    provider.force_refresh().await.unwrap();

    let groups = provider.node_groups();
    let ids: Vec<&str> = groups.iter().map(|g| g.id()).collect();
    assert_eq!(ids, vec!["B", "C"]);
    assert_eq!(groups[0].debug(), "B (1:8)");
    assert!(matches!(
        provider.node_group("A"),
        Err(ProviderError::GroupNotFound(_))
    ));
}

#[tokio::test]
async fn disabled_autoscaler_flushes_registry() {
    let api = seeded(vec![group("A", 0, 5)], nodes("A", 2));
    let provider = connect(&api).await.unwrap();
    assert_eq!(provider.node_groups().len(), 1);

    api.set_enabled(false);
    let err = provider.force_refresh().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AutoscalerDisabled);
    assert!(provider.node_groups().is_empty());
    assert!(provider.node_group_for_node(&provider_id("seed-A-0")).is_none());
}

#[tokio::test]
async fn disabled_at_startup_fails_connect() {
    let api = seeded(vec![group("A", 0, 5)], Vec::new());
    api.set_enabled(false);
    let err = connect(&api).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AutoscalerDisabled);
}

#[tokio::test]
async fn invalid_group_clears_registry() {
    let api = seeded(vec![group("A", 0, 5)], Vec::new());
    let provider = connect(&api).await.unwrap();

    api.set_groups(vec![group("B", 0, 5), group("C", 6, 2)]);
    let err = provider.force_refresh().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(provider.node_groups().is_empty());
}

#[tokio::test]
async fn node_list_failure_keeps_groups_and_timestamp() {
    let api = seeded(vec![group("A", 0, 5)], Vec::new());
    let provider = connect(&api).await.unwrap();

    api.set_groups(vec![group("B", 0, 5)]);
    api.fail_action(ACTION_LIST_NODES, 8900, "list unavailable");
    let err = provider.force_refresh().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    let ids: Vec<String> = provider.node_groups().iter().map(|g| g.id().to_string()).collect();
    assert_eq!(ids, vec!["B"]);

    // The group refresh succeeded, so the cadence gate is armed.
    api.clear_calls();
    provider.refresh().await.unwrap();
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn describe_failure_keeps_previous_snapshot() {
    let api = seeded(
        vec![group("A", 0, 5), group("B", 0, 5)],
        nodes("A", 2),
    );
    let provider = connect(&api).await.unwrap();

    api.set_groups(vec![group("C", 0, 5)]);
    api.fail_action(ACTION_DESCRIBE_GROUPS, 8900, "describe unavailable");
    let err = provider.force_refresh().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    let ids: Vec<String> = provider.node_groups().iter().map(|g| g.id().to_string()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(provider.node_group("A").unwrap().target_size(), 2);
    assert!(provider.node_group("C").is_err());
}

#[tokio::test]
async fn gated_refresh_makes_no_calls_within_interval() {
    let api = seeded(vec![group("A", 0, 5)], Vec::new());
    let provider = connect(&api).await.unwrap();
    api.clear_calls();

    provider.refresh().await.unwrap();
    assert!(api.calls().is_empty());

    provider.force_refresh().await.unwrap();
    assert!(matches!(api.calls()[0], RecordedCall::DescribeGroups { .. }));
}

// ── Templates and capabilities ────────────────────────────────────

#[tokio::test]
async fn template_allocatable_is_within_capacity() {
    let api = seeded(vec![group("asg-1", 0, 10)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let template = provider
        .node_group("asg-1")
        .unwrap()
        .template_node_info()
        .unwrap();

    assert!(template.is_ready());
    assert_eq!(template.capacity_of(RESOURCE_CPU).value(), 4);
    assert_eq!(template.allocatable_of(RESOURCE_CPU).milli_value(), 3800);
    assert_eq!(template.capacity_of(RESOURCE_PODS).value(), 110);

    let capacity = template.capacity_of(RESOURCE_MEMORY).value();
    let allocatable = template.allocatable_of(RESOURCE_MEMORY).value();
    assert_eq!(capacity, 8192 * 1024 * 1024);
    assert!(allocatable > 0 && allocatable < capacity);
    assert_eq!(template.labels["kubernetes.io/os"], "linux");
}

#[tokio::test]
async fn static_capabilities() {
    let api = seeded(vec![group("asg-1", 0, 10)], Vec::new());
    let provider = connect(&api).await.unwrap();
    let ng = provider.node_group("asg-1").unwrap();

    assert_eq!(provider.name(), "fleetscale");
    assert_eq!(provider.gpu_label(), "accelerator");
    assert_eq!(provider.available_gpu_types().len(), 3);
    assert!(provider.available_machine_types().is_empty());
    assert_eq!(provider.pricing().unwrap_err().kind(), ErrorKind::NotImplemented);
    assert_eq!(
        provider.new_node_group("N").err().unwrap().kind(),
        ErrorKind::NotImplemented
    );

    assert!(ng.exist());
    assert!(!ng.autoprovisioned());
    assert_eq!(ng.create().err().unwrap().kind(), ErrorKind::NotImplemented);
    assert_eq!(ng.delete().unwrap_err().kind(), ErrorKind::NotImplemented);
    assert_eq!(
        ng.decrease_target_size(-1).await.unwrap_err().kind(),
        ErrorKind::NotImplemented
    );
}

#[tokio::test]
async fn rotation_starts_and_stops() {
    let api = seeded(Vec::new(), Vec::new());
    let provider = connect(&api).await.unwrap();

    provider.start_credential_rotation();
    provider.start_credential_rotation();
    assert!(provider.rotation_running());

    provider.cleanup().unwrap();
    assert!(!provider.rotation_running());
}
