use async_trait::async_trait;
use orchestrator_core::{
    models::{HostNode, Task, TaskStatus},
    NodeApi, OrchestratorError, OrchestratorResult, TaskApi,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, error};

/// 控制面统一响应体
#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    bean: Option<serde_json::Value>,
    #[serde(default)]
    list: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
}

/// 控制面REST客户端
#[derive(Debug, Clone)]
pub struct RegionClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RegionClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OrchestratorError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> OrchestratorResult<(StatusCode, String)> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            error!("请求控制面失败: {} - {}", url, e);
            OrchestratorError::Network(format!("Region connection error: {e}"))
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrchestratorError::Network(format!("读取响应失败: {e}")))?;
        Ok((status, text))
    }

    /// 发送请求并检查状态码，404 转换为 `not_found` 给出的错误
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        not_found: impl FnOnce() -> OrchestratorError,
    ) -> OrchestratorResult<String> {
        let (status, text) = self.request(method, path, body).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            let msg = parse_body(&text)
                .ok()
                .and_then(|b| b.msg)
                .unwrap_or(text);
            return Err(OrchestratorError::Network(format!("HTTP {status} - {msg}")));
        }
        Ok(text)
    }
}

fn parse_body(text: &str) -> OrchestratorResult<ResponseBody> {
    Ok(serde_json::from_str(text)?)
}

/// 解析响应体中的 bean 字段
pub fn decode_bean<T: DeserializeOwned>(text: &str) -> OrchestratorResult<T> {
    let body = parse_body(text)?;
    let bean = body
        .bean
        .ok_or_else(|| OrchestratorError::Network("响应缺少bean字段".to_string()))?;
    Ok(serde_json::from_value(bean)?)
}

/// 解析响应体中的 list 字段，缺省视为空列表
pub fn decode_list<T: DeserializeOwned>(text: &str) -> OrchestratorResult<Vec<T>> {
    let body = parse_body(text)?;
    match body.list {
        Some(list) if !list.is_null() => Ok(serde_json::from_value(list)?),
        _ => Ok(Vec::new()),
    }
}

/// 基于REST接口的任务管理客户端
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: RegionClient,
}

impl HttpTaskApi {
    pub fn new(client: RegionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        let text = self
            .client
            .call(Method::GET, "/tasks", None, || {
                OrchestratorError::Network("任务列表接口不存在".to_string())
            })
            .await?;
        decode_list(&text)
    }

    async fn get(&self, task_id: &str) -> OrchestratorResult<Task> {
        let text = self
            .client
            .call(Method::GET, &format!("/tasks/{task_id}"), None, || {
                OrchestratorError::TaskNotFound {
                    id: task_id.to_string(),
                }
            })
            .await?;
        decode_bean(&text)
    }

    async fn status(&self, task_id: &str) -> OrchestratorResult<HashMap<String, TaskStatus>> {
        let text = self
            .client
            .call(Method::GET, &format!("/tasks/{task_id}/status"), None, || {
                OrchestratorError::TaskNotFound {
                    id: task_id.to_string(),
                }
            })
            .await?;
        let body = parse_body(&text)?;
        match body.bean {
            Some(bean) if !bean.is_null() => Ok(serde_json::from_value(bean)?),
            _ => Ok(HashMap::new()),
        }
    }

    async fn exec(&self, task_id: &str, nodes: &[String]) -> OrchestratorResult<()> {
        self.client
            .call(
                Method::POST,
                &format!("/tasks/{task_id}/exec"),
                Some(json!({ "nodes": nodes })),
                || OrchestratorError::TaskNotFound {
                    id: task_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

/// 基于REST接口的节点管理客户端
#[derive(Debug, Clone)]
pub struct HttpNodeApi {
    client: RegionClient,
}

impl HttpNodeApi {
    pub fn new(client: RegionClient) -> Self {
        Self { client }
    }

    async fn node_action(&self, method: Method, node_id: &str, action: &str) -> OrchestratorResult<()> {
        self.client
            .call(method, &format!("/nodes/{node_id}/{action}"), None, || {
                OrchestratorError::NodeNotFound {
                    id: node_id.to_string(),
                }
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn list(&self) -> OrchestratorResult<Vec<HostNode>> {
        let text = self
            .client
            .call(Method::GET, "/nodes", None, || {
                OrchestratorError::Network("节点列表接口不存在".to_string())
            })
            .await?;
        decode_list(&text)
    }

    async fn get(&self, node_id: &str) -> OrchestratorResult<HostNode> {
        let text = self
            .client
            .call(Method::GET, &format!("/nodes/{node_id}"), None, || {
                OrchestratorError::NodeNotFound {
                    id: node_id.to_string(),
                }
            })
            .await?;
        decode_bean(&text)
    }

    async fn up(&self, node_id: &str) -> OrchestratorResult<()> {
        self.node_action(Method::POST, node_id, "up").await
    }

    async fn down(&self, node_id: &str) -> OrchestratorResult<()> {
        self.node_action(Method::POST, node_id, "down").await
    }

    async fn cordon(&self, node_id: &str) -> OrchestratorResult<()> {
        self.node_action(Method::PUT, node_id, "unschedulable").await
    }

    async fn uncordon(&self, node_id: &str) -> OrchestratorResult<()> {
        self.node_action(Method::PUT, node_id, "reschedulable").await
    }

    async fn set_labels(
        &self,
        node_id: &str,
        labels: &BTreeMap<String, String>,
    ) -> OrchestratorResult<()> {
        self.client
            .call(
                Method::PUT,
                &format!("/nodes/{node_id}/labels"),
                Some(json!(labels)),
                || OrchestratorError::NodeNotFound {
                    id: node_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = RegionClient::new("http://127.0.0.1:6100/v2/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/tasks/t1/exec"), "http://127.0.0.1:6100/v2/tasks/t1/exec");
        assert_eq!(client.url("nodes"), "http://127.0.0.1:6100/v2/nodes");
    }

    #[test]
    fn test_decode_status_bean() {
        let text = r#"{"bean":{"n1":{"status":"complete","comple_status":"Success"}}}"#;
        let status: HashMap<String, TaskStatus> = decode_bean(text).unwrap();
        assert!(status["n1"].is_complete());
    }

    #[test]
    fn test_decode_list_defaults_to_empty() {
        let tasks: Vec<Task> = decode_list(r#"{"list":null}"#).unwrap();
        assert!(tasks.is_empty());
        let tasks: Vec<Task> = decode_list(r#"{"msg":"ok"}"#).unwrap();
        assert!(tasks.is_empty());
        assert!(decode_bean::<Task>(r#"{"msg":"ok"}"#).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_region_is_network_error() {
        let client = RegionClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let api = HttpTaskApi::new(client);
        let result = api.get("t1").await;
        assert!(matches!(result, Err(OrchestratorError::Network(_))));
    }
}
