//! HttpComputeClient — signed JSON calls against the remote control plane.
//!
//! Every action is a POST of one flat JSON object:
//! `{Action, Region, ProjectId, ...params, PublicKey, SecurityToken, Signature}`.
//! The signature is the lowercase hex SHA-256 of the key-sorted `keyvalue`
//! concatenation of all other fields, followed by the private key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetscale_core::post_json;
use fleetscale_metrics::{ApiCallSample, MetricsSink};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::api::{ApiFuture, ComputeApi, ComputeApiFactory};
use crate::credentials::CredentialBundle;
use crate::error::{CloudError, CloudResult};
use crate::types::*;

/// Compute the request signature over `params` (which must not contain
/// `Signature`).
pub fn sign_params(params: &Map<String, Value>, private_key: &str) -> String {
    let sorted: BTreeMap<&String, &Value> = params.iter().collect();
    let mut payload = String::new();
    for (key, value) in sorted {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        payload.push_str(key);
        payload.push_str(&rendered);
    }
    payload.push_str(private_key);
    hex::encode(Sha256::digest(payload.as_bytes()))
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Envelope {
    ret_code: i64,
    message: String,
    #[serde(rename = "RequestUUID")]
    request_uuid: String,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeGroupsResponse {
    autoscaler: Option<AutoscalerFlag>,
    #[serde(rename = "AutoScalingGroup")]
    groups: Option<Vec<GroupSpec>>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AutoscalerFlag {
    enabled: i64,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListNodesResponse {
    node_set: Option<Vec<RemoteNode>>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Empty {}

/// Remote compute API client bound to one credential bundle.
///
/// Clients are immutable; credential rotation builds a new one.
pub struct HttpComputeClient {
    bundle: CredentialBundle,
    timeout: Duration,
    sink: Arc<dyn MetricsSink>,
}

impl HttpComputeClient {
    pub fn new(bundle: CredentialBundle, timeout: Duration, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            bundle,
            timeout,
            sink,
        }
    }

    /// Factory building one client per credential bundle.
    pub fn factory(timeout: Duration) -> ComputeApiFactory {
        Arc::new(
            move |bundle: &CredentialBundle,
                  sink: Arc<dyn MetricsSink>|
                  -> CloudResult<Arc<dyn ComputeApi>> {
                let client: Arc<dyn ComputeApi> =
                    Arc::new(HttpComputeClient::new(bundle.clone(), timeout, sink));
                Ok(client)
            },
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.bundle.api.endpoint
    }

    /// Build the signed request body for `action`.
    pub fn signed_body<P: Serialize>(&self, action: &str, params: &P) -> CloudResult<Vec<u8>> {
        let mut fields = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            _ => {
                return Err(CloudError::InvalidRequest(format!(
                    "{action}: parameters must be an object"
                )));
            }
        };
        let cred = &self.bundle.credential;
        fields.insert("Action".into(), Value::String(action.to_string()));
        if !self.bundle.api.project_id.is_empty() {
            fields.insert(
                "ProjectId".into(),
                Value::String(self.bundle.api.project_id.clone()),
            );
        }
        fields.insert("PublicKey".into(), Value::String(cred.public_key.clone()));
        if let Some(token) = &cred.security_token {
            fields.insert("SecurityToken".into(), Value::String(token.clone()));
        }
        let signature = sign_params(&fields, &cred.private_key);
        fields.insert("Signature".into(), Value::String(signature));
        Ok(serde_json::to_vec(&Value::Object(fields))?)
    }

    /// Validate, send, decode, and report one call.
    async fn invoke<P, T>(
        &self,
        action: &str,
        cluster: &ClusterRef,
        params: &P,
        validated: CloudResult<()>,
    ) -> CloudResult<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let mut request_id = String::new();
        let result = match validated {
            Ok(()) => self.exchange(action, params, &mut request_id).await,
            Err(e) => Err(e),
        };

        let status_code = match &result {
            Ok(_) => 0,
            Err(e) => e.status_code(),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = &result {
            warn!(%action, cluster = %cluster.cluster_id, error = %e, "remote call failed");
        } else {
            debug!(%action, cluster = %cluster.cluster_id, %request_id, latency_ms, "remote call ok");
        }
        self.sink.report(ApiCallSample {
            cluster_id: cluster.cluster_id.clone(),
            action: action.to_string(),
            region: cluster.region.clone(),
            request_id,
            status_code,
            latency_ms,
        });
        result
    }

    async fn exchange<P, T>(
        &self,
        action: &str,
        params: &P,
        request_id: &mut String,
    ) -> CloudResult<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let body = self.signed_body(action, params)?;
        let resp = post_json(&self.bundle.api.endpoint, &[], body, self.timeout).await?;
        if !resp.is_success() {
            return Err(CloudError::Transport(format!(
                "{action}: HTTP status {}",
                resp.status
            )));
        }

        let value: Value = serde_json::from_slice(&resp.body)?;
        let envelope: Envelope = serde_json::from_value(value.clone())?;
        *request_id = envelope.request_uuid;
        if envelope.ret_code != 0 {
            return Err(CloudError::Remote {
                action: action.to_string(),
                code: envelope.ret_code,
                message: envelope.message,
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl ComputeApi for HttpComputeClient {
    fn describe_autoscaler_groups(&self, cluster: ClusterRef) -> ApiFuture<'_, AutoscalerGroups> {
        Box::pin(async move {
            let validated = cluster.validate();
            let resp: DescribeGroupsResponse = self
                .invoke(ACTION_DESCRIBE_GROUPS, &cluster, &cluster, validated)
                .await?;
            Ok(AutoscalerGroups {
                enabled: resp.autoscaler.map(|a| a.enabled == 1).unwrap_or(false),
                groups: resp.groups.unwrap_or_default(),
            })
        })
    }

    fn list_nodes(&self, cluster: ClusterRef) -> ApiFuture<'_, Vec<RemoteNode>> {
        Box::pin(async move {
            let validated = cluster.validate();
            let resp: ListNodesResponse = self
                .invoke(ACTION_LIST_NODES, &cluster, &cluster, validated)
                .await?;
            Ok(resp.node_set.unwrap_or_default())
        })
    }

    fn scale_up(&self, req: ScaleUpRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let cluster = ClusterRef::new(req.region.clone(), req.cluster_id.clone());
            let _: Empty = self
                .invoke(ACTION_SCALE_UP, &cluster, &req, req.validate())
                .await?;
            Ok(())
        })
    }

    fn scale_down(&self, req: ScaleDownRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let cluster = ClusterRef::new(req.region.clone(), req.cluster_id.clone());
            let _: Empty = self
                .invoke(ACTION_SCALE_DOWN, &cluster, &req, req.validate())
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{ApiConfig, Credential};
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ApiCallSample>>);

    impl MetricsSink for Recording {
        fn report(&self, sample: ApiCallSample) {
            self.0.lock().unwrap().push(sample);
        }
    }

    fn bundle(endpoint: &str) -> CredentialBundle {
        CredentialBundle {
            credential: Credential {
                public_key: "pub".into(),
                private_key: "pri".into(),
                security_token: Some("tok".into()),
                expires_at: SystemTime::now() + Duration::from_secs(60),
            },
            api: ApiConfig {
                region: "cn-bj2".into(),
                project_id: "org-xyz".into(),
                endpoint: endpoint.into(),
            },
        }
    }

    /// Serve one request with `body`, returning the raw request text.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        break;
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}/"), handle)
    }

    #[test]
    fn signature_is_key_sorted_sha256() {
        let mut params = Map::new();
        params.insert("Region".into(), Value::String("cn-bj2".into()));
        params.insert("Action".into(), Value::String("ListClusterNodeV2".into()));
        params.insert("Count".into(), Value::from(3));

        let expected = hex::encode(Sha256::digest(
            b"ActionListClusterNodeV2Count3Regioncn-bj2pri",
        ));
        assert_eq!(sign_params(&params, "pri"), expected);
    }

    #[test]
    fn signed_body_carries_auth_fields() {
        let client = HttpComputeClient::new(
            bundle("http://127.0.0.1:1/"),
            Duration::from_secs(1),
            Arc::new(Recording::default()),
        );
        let body = client
            .signed_body(ACTION_LIST_NODES, &ClusterRef::new("cn-bj2", "cluster-abc"))
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["Action"], ACTION_LIST_NODES);
        assert_eq!(value["ProjectId"], "org-xyz");
        assert_eq!(value["PublicKey"], "pub");
        assert_eq!(value["SecurityToken"], "tok");
        assert_eq!(value["ClusterId"], "cluster-abc");

        let mut fields = value.as_object().unwrap().clone();
        let signature = fields.remove("Signature").unwrap();
        assert_eq!(signature, Value::String(sign_params(&fields, "pri")));
    }

    #[tokio::test]
    async fn validation_failure_reports_local_status_without_io() {
        let sink = Arc::new(Recording::default());
        let client = HttpComputeClient::new(
            bundle("http://127.0.0.1:1/"),
            Duration::from_secs(1),
            sink.clone(),
        );

        let err = client
            .scale_down(ScaleDownRequest {
                region: "cn-bj2".into(),
                cluster_id: "cluster-abc".into(),
                node_id: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidRequest(_)));

        let samples = sink.0.lock().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].action, ACTION_SCALE_DOWN);
        assert_eq!(samples[0].status_code, -1);
    }

    #[tokio::test]
    async fn describe_decodes_groups() {
        let (endpoint, server) = serve_once(
            r#"{"RetCode":0,"Action":"DescribeAutoscalerGroupResponse","RequestUUID":"req-9",
                "Autoscaler":{"Enabled":1},
                "AutoScalingGroup":[{"Id":"asg-1","Min":1,"Max":3,"CPU":4,"Mem":8192}]}"#,
        )
        .await;
        let sink = Arc::new(Recording::default());
        let client = HttpComputeClient::new(bundle(&endpoint), Duration::from_secs(5), sink.clone());

        let groups = client
            .describe_autoscaler_groups(ClusterRef::new("cn-bj2", "cluster-abc"))
            .await
            .unwrap();
        assert!(groups.enabled);
        assert_eq!(groups.groups.len(), 1);
        assert_eq!(groups.groups[0].cpu, 4);

        let request = server.await.unwrap();
        assert!(request.contains("\"Action\":\"DescribeAutoscalerGroup\""));

        let samples = sink.0.lock().unwrap();
        assert_eq!(samples[0].status_code, 0);
        assert_eq!(samples[0].request_id, "req-9");
    }

    #[tokio::test]
    async fn non_zero_ret_code_is_remote_error() {
        let (endpoint, _server) = serve_once(
            r#"{"RetCode":230,"Message":"Params [ClusterId] not available","RequestUUID":"req-1"}"#,
        )
        .await;
        let sink = Arc::new(Recording::default());
        let client = HttpComputeClient::new(bundle(&endpoint), Duration::from_secs(5), sink.clone());

        let err = client
            .list_nodes(ClusterRef::new("cn-bj2", "cluster-abc"))
            .await
            .unwrap_err();
        match err {
            CloudError::Remote { action, code, .. } => {
                assert_eq!(action, ACTION_LIST_NODES);
                assert_eq!(code, 230);
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert_eq!(sink.0.lock().unwrap()[0].status_code, 230);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpComputeClient::new(
            bundle(&format!("http://{addr}/")),
            Duration::from_secs(2),
            Arc::new(Recording::default()),
        );
        let err = client
            .list_nodes(ClusterRef::new("cn-bj2", "cluster-abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Transport(_)));
    }
}
