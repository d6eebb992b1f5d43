// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用单元模块
//!
//! 宿主在某个目录收到第一个请求时创建应用实例并调用 `start`，之后的每个请求都交给
//! `handle` 处理，实例在两次调用之间保留内存中的状态。宿主重载或关闭时调用 `stop`，
//! 然后丢弃实例；下一个周期总是使用全新的实例。
//!
//! ```text
//! Constructed → Starting → Ready → (Handling)* → Stopping → Stopped
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::{
    exception::Exception,
    param::{APP_CONTENT_TYPE, APP_CONTENT_TYPE_HEADER},
    request::AppRequest,
    response::AppResponse,
    server::ServerHandle,
};

/// 宿主与应用之间的生命周期契约。
///
/// - `start` 在本实例的任何 `handle` 之前完成，且只调用一次。
/// - `handle` 可能被并发调用，请求与响应对象归单次调用独占。
/// - `stop` 在最后一个 `handle` 完成之后调用，且只调用一次。
///
/// 所有故障都原样返回给宿主，由宿主的恢复策略决定后续动作。
#[async_trait]
pub trait App: Send + Sync {
    async fn start(
        &mut self,
        server: &Arc<ServerHandle>,
        first_request: &dyn AppRequest,
        first_response: &mut dyn AppResponse,
    ) -> Result<(), Exception>;

    async fn stop(&mut self, server: &Arc<ServerHandle>) -> Result<(), Exception>;

    /// 处理一个请求。成功返回前必须恰好发送一次响应；失败时不得发送。
    async fn handle(
        &self,
        request: &dyn AppRequest,
        response: &mut dyn AppResponse,
    ) -> Result<(), Exception>;
}

/// 请求计数应用：把请求的各个 URL 片段、参数以及本实例处理过的请求数回显给客户端。
#[derive(Debug, Default)]
pub struct CounterApp {
    server: Option<Weak<ServerHandle>>,
    counter: AtomicU64,
    raise_test_error: bool,
}

/// 响应负载，字段顺序即输出顺序
#[derive(serde_derive::Serialize)]
#[serde(rename_all = "camelCase")]
struct AppPayload<'a> {
    base_path: &'a str,
    path: &'a str,
    domain_url: &'a str,
    base_url: String,
    request_url: String,
    full_url: String,
    params: BTreeMap<String, String>,
    app_requests: u64,
}

impl CounterApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个每次处理请求都会失败的实例，用于演示宿主的故障恢复。
    pub fn with_test_error(raise_test_error: bool) -> Self {
        Self {
            raise_test_error,
            ..Self::default()
        }
    }

    /// 本实例已成功处理的请求数
    pub fn requests(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// `start` 之后且宿主仍然存活时返回服务器句柄
    pub fn server(&self) -> Option<Arc<ServerHandle>> {
        self.server.as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl App for CounterApp {
    async fn start(
        &mut self,
        server: &Arc<ServerHandle>,
        first_request: &dyn AppRequest,
        _first_response: &mut dyn AppResponse,
    ) -> Result<(), Exception> {
        self.server = Some(Arc::downgrade(server));
        info!(
            "应用启动：挂载点 '{}'，首个请求 {}",
            first_request.base_path(),
            first_request.full_url()
        );
        Ok(())
    }

    async fn stop(&mut self, _server: &Arc<ServerHandle>) -> Result<(), Exception> {
        info!("应用停止：本周期共处理 {} 个请求", self.requests());
        Ok(())
    }

    async fn handle(
        &self,
        request: &dyn AppRequest,
        response: &mut dyn AppResponse,
    ) -> Result<(), Exception> {
        debug!("应用处理请求：{}", request.full_url());

        if self.raise_test_error {
            return Err(Exception::InjectedFault);
        }

        // 计数先于发送，负载里要带上本次的计数值；之后的序列化或发送失败不会回退计数
        let app_requests = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let payload = AppPayload {
            base_path: request.base_path(),
            path: request.path(),
            domain_url: request.domain_url(),
            base_url: request.base_url(),
            request_url: request.request_url(),
            full_url: request.full_url(),
            params: request.params(false, false),
            app_requests,
        };
        let body = to_tab_indented_json(&payload)?;

        response.set_header(APP_CONTENT_TYPE_HEADER, APP_CONTENT_TYPE);
        response.set_body(body);
        response.send()
    }
}

/// 以制表符缩进输出格式化 JSON
fn to_tab_indented_json<T: Serialize>(value: &T) -> Result<String, Exception> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"\t"));
    value
        .serialize(&mut serializer)
        .map_err(|e| Exception::PayloadSerialize(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Exception::PayloadSerialize(e.to_string()))
}
