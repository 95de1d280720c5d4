use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use orchestrator_core::{
    config::StoreConfig, CoordinationStore, EventType, KeyValue, LeaseId, OrchestratorError,
    OrchestratorResult, RawEvent,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// etcd v3 的 JSON 网关把 int64 编码为字符串
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        Text(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireKv {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "int64")]
    create_revision: i64,
    #[serde(default, deserialize_with = "int64")]
    mod_revision: i64,
    #[serde(default, deserialize_with = "int64")]
    lease: i64,
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    #[serde(rename = "ID", default, deserialize_with = "int64")]
    id: i64,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct KeepAliveResult {
    #[serde(rename = "TTL", default, deserialize_with = "int64")]
    ttl: i64,
}

#[derive(Debug, Deserialize)]
struct KeepAliveResponse {
    result: Option<KeepAliveResult>,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<WireKv>,
}

#[derive(Debug, Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteRangeResponse {
    #[serde(default, deserialize_with = "int64")]
    deleted: i64,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    kv: WireKv,
}

#[derive(Debug, Default, Deserialize)]
struct WatchResult {
    #[serde(default)]
    events: Vec<WireEvent>,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: String,
}

#[derive(Debug, Deserialize)]
struct WatchLine {
    result: Option<WatchResult>,
    error: Option<Value>,
}

/// watch 流中一行解析后的结果
#[derive(Debug)]
enum WatchFrame {
    Events(Vec<RawEvent>),
    Closed(String),
}

fn encode(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

fn encode_bytes(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

fn decode(field: &str, text: &str) -> OrchestratorResult<String> {
    let bytes = general_purpose::STANDARD
        .decode(text)
        .map_err(|e| OrchestratorError::Store(format!("{field} 不是合法的base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| OrchestratorError::Store(format!("{field} 不是UTF-8: {e}")))
}

/// 前缀查询的 range_end：最后一个小于 0xff 的字节加一并截断
fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // 空前缀或全 0xff 时查询全部键
    vec![0]
}

fn decode_kv(kv: WireKv) -> OrchestratorResult<KeyValue> {
    Ok(KeyValue {
        key: decode("key", &kv.key)?,
        value: decode("value", &kv.value)?,
        create_revision: kv.create_revision,
        mod_revision: kv.mod_revision,
        lease: kv.lease,
    })
}

fn parse_watch_line(line: &str) -> OrchestratorResult<WatchFrame> {
    let parsed: WatchLine = serde_json::from_str(line)?;
    if let Some(err) = parsed.error {
        return Ok(WatchFrame::Closed(err.to_string()));
    }
    let result = parsed.result.unwrap_or_default();
    if result.canceled {
        return Ok(WatchFrame::Closed(result.cancel_reason));
    }

    let mut events = Vec::with_capacity(result.events.len());
    for event in result.events {
        // PUT 是枚举零值，网关不输出 type 字段
        let event_type = match event.event_type.as_deref() {
            Some("DELETE") => EventType::Delete,
            _ => EventType::Put,
        };
        events.push(RawEvent {
            event_type,
            kv: decode_kv(event.kv)?,
        });
    }
    Ok(WatchFrame::Events(events))
}

fn store_error(message: &str, lease: Option<LeaseId>) -> OrchestratorError {
    match lease {
        Some(id) if message.contains("lease not found") => OrchestratorError::LeaseNotFound { id },
        _ => OrchestratorError::Store(message.to_string()),
    }
}

/// 基于 etcd v3 HTTP 网关的协调存储
///
/// 一元请求带超时并在连接失败时切换到下一个地址；watch 请求为长连接，
/// 每个前缀一个后台任务逐行读取响应流并转发到通道。
pub struct EtcdStore {
    endpoints: Vec<String>,
    current: AtomicUsize,
    http_client: reqwest::Client,
    request_timeout: Duration,
    watch_buffer: usize,
    closed: AtomicBool,
    watches: Mutex<Vec<JoinHandle<()>>>,
}

impl EtcdStore {
    pub fn new(config: &StoreConfig) -> OrchestratorResult<Self> {
        if config.endpoints.is_empty() {
            return Err(OrchestratorError::Configuration("etcd地址不能为空".to_string()));
        }
        // 客户端不设置全局超时，watch 连接需要长期保持
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| OrchestratorError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            endpoints: config
                .endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            current: AtomicUsize::new(0),
            http_client,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            watch_buffer: config.watch_buffer,
            closed: AtomicBool::new(false),
            watches: Mutex::new(Vec::new()),
        })
    }

    fn ensure_open(&self) -> OrchestratorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestratorError::StoreClosed);
        }
        Ok(())
    }

    /// 依次尝试各地址发送请求，只有连接失败才切换
    async fn send(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> OrchestratorResult<reqwest::Response> {
        self.ensure_open()?;
        let start = self.current.load(Ordering::SeqCst);
        let mut last_error = None;

        for offset in 0..self.endpoints.len() {
            let index = (start + offset) % self.endpoints.len();
            let url = format!("{}{}", self.endpoints[index], path);
            debug!("POST {}", url);

            let mut request = self.http_client.post(&url).json(body);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            match request.send().await {
                Ok(response) => {
                    if index != start {
                        self.current.store(index, Ordering::SeqCst);
                        info!("etcd 切换到地址 {}", self.endpoints[index]);
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!("连接 etcd 失败: {} - {}", url, e);
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(OrchestratorError::Network(format!("etcd请求失败: {e}")));
                }
            }
        }

        Err(OrchestratorError::Network(match last_error {
            Some(e) => format!("所有etcd地址均不可用: {e}"),
            None => "所有etcd地址均不可用".to_string(),
        }))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        lease: Option<LeaseId>,
    ) -> OrchestratorResult<T> {
        let response = self.send(path, &body, Some(self.request_timeout)).await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrchestratorError::Network(format!("读取etcd响应失败: {e}")))?;

        if !status.is_success() {
            error!("etcd 请求 {} 失败: {} {}", path, status, text);
            return Err(store_error(&text, lease));
        }
        // keepalive 是流式接口，只取第一行
        let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("{}");
        Ok(serde_json::from_str(line)?)
    }

    async fn range(&self, key: &str, range_end: Option<Vec<u8>>) -> OrchestratorResult<Vec<KeyValue>> {
        let mut body = json!({ "key": encode(key) });
        if let Some(end) = range_end {
            body["range_end"] = json!(encode_bytes(&end));
        }
        let response: RangeResponse = self.call("/v3/kv/range", body, None).await?;
        response.kvs.into_iter().map(decode_kv).collect()
    }

    /// 读取 watch 响应流，按行解析后转发
    async fn pump_watch(
        mut response: reqwest::Response,
        prefix: String,
        tx: mpsc::Sender<RawEvent>,
    ) {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    info!("前缀 {} 的watch连接已结束", prefix);
                    return;
                }
                Err(e) => {
                    warn!("前缀 {} 的watch读取失败: {}", prefix, e);
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if line.trim().is_empty() {
                    continue;
                }
                match parse_watch_line(line.trim()) {
                    Ok(WatchFrame::Events(events)) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                debug!("前缀 {} 的watch接收端已关闭", prefix);
                                return;
                            }
                        }
                    }
                    Ok(WatchFrame::Closed(reason)) => {
                        warn!("前缀 {} 的watch被取消: {}", prefix, reason);
                        return;
                    }
                    Err(e) => {
                        error!("前缀 {} 的watch事件无法解析: {}", prefix, e);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant(&self, ttl_seconds: i64) -> OrchestratorResult<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(OrchestratorError::Store(format!(
                "租约TTL必须大于0: {ttl_seconds}"
            )));
        }
        let response: GrantResponse = self
            .call("/v3/lease/grant", json!({ "TTL": ttl_seconds, "ID": 0 }), None)
            .await?;
        if !response.error.is_empty() {
            return Err(OrchestratorError::Store(response.error));
        }
        debug!("授予租约 {} ttl={}s", response.id, ttl_seconds);
        Ok(response.id)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> OrchestratorResult<()> {
        let response: KeepAliveResponse = self
            .call("/v3/lease/keepalive", json!({ "ID": lease }), Some(lease))
            .await?;
        match response.result {
            Some(result) if result.ttl > 0 => Ok(()),
            _ => Err(OrchestratorError::LeaseNotFound { id: lease }),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> OrchestratorResult<()> {
        let _: Value = self
            .call("/v3/lease/revoke", json!({ "ID": lease }), Some(lease))
            .await?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> OrchestratorResult<()> {
        let body = json!({
            "key": encode(key),
            "value": encode(value),
            "lease": lease.unwrap_or(0),
        });
        let _: Value = self.call("/v3/kv/put", body, lease).await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> OrchestratorResult<bool> {
        let body = json!({
            "compare": [{
                "key": encode(key),
                "target": "CREATE",
                "result": "EQUAL",
                "create_revision": 0,
            }],
            "success": [{
                "request_put": {
                    "key": encode(key),
                    "value": encode(value),
                    "lease": lease.unwrap_or(0),
                }
            }],
        });
        let response: TxnResponse = self.call("/v3/kv/txn", body, lease).await?;
        Ok(response.succeeded)
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Option<KeyValue>> {
        Ok(self.range(key, None).await?.into_iter().next())
    }

    async fn get_prefix(&self, prefix: &str) -> OrchestratorResult<Vec<KeyValue>> {
        self.range(prefix, Some(prefix_range_end(prefix))).await
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        let response: DeleteRangeResponse = self
            .call("/v3/kv/deleterange", json!({ "key": encode(key) }), None)
            .await?;
        Ok(response.deleted > 0)
    }

    async fn watch_prefix(&self, prefix: &str) -> OrchestratorResult<mpsc::Receiver<RawEvent>> {
        let body = json!({
            "create_request": {
                "key": encode(prefix),
                "range_end": encode_bytes(&prefix_range_end(prefix)),
            }
        });
        let response = self.send("/v3/watch", &body, None).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Store(format!(
                "创建watch失败: {status} {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(self.watch_buffer);
        let handle = tokio::spawn(Self::pump_watch(response, prefix.to_string(), tx));
        let mut watches = self
            .watches
            .lock()
            .map_err(|e| OrchestratorError::Internal(format!("watch列表锁异常: {e}")))?;
        watches.retain(|h| !h.is_finished());
        watches.push(handle);
        debug!("开始监听前缀: {}", prefix);
        Ok(rx)
    }

    async fn close(&self) -> OrchestratorResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handles: Vec<JoinHandle<()>> = self
            .watches
            .lock()
            .map_err(|e| OrchestratorError::Internal(format!("watch列表锁异常: {e}")))?
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
        info!("etcd 连接已关闭");
        Ok(())
    }
}
