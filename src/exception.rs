// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了宿主服务器与应用单元（App）在整个生命周期中可能出现的各类异常情况。
//!
//! ## 分类
//! - **协议解析错误**：请求字节流无法解析为受支持的 HTTP 请求。
//! - **响应契约错误**：响应被重复发送，或者 `handle` 返回时仍未发送。
//! - **生命周期故障**：`start` / `handle` 中未被处理的故障，由宿主的恢复策略接管。
//! - **配置错误**：配置文件缺失或无法解析。

use std::fmt;

/// 宿主与应用在处理请求过程中发生的异常类型。
///
/// 应用单元自身不做任何错误恢复，所有故障都以 `Err(Exception)` 的形式原样向上传播。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求行或标头结构不完整。
    MalformedRequest,
    /// 同一个响应对象被第二次 `send`。
    ResponseAlreadySent,
    /// `handle` 正常返回，但响应从未被发送。
    ResponseNotSent,
    /// 响应负载序列化失败。
    PayloadSerialize(String),
    /// 找不到配置文件。
    ConfigNotFound(String),
    /// 配置文件存在但无法读取。
    ConfigInvalid(String),
    /// 人为注入的测试故障，用于演示开发模式下的自动重启。
    InjectedFault,
    /// 应用在 `start` 阶段失败。
    AppStartFailed(String),
    /// 应用在 `handle` 阶段抛出的其他故障。
    AppFault(String),
    /// 宿主已关闭，不再开启新的应用周期。
    ServerShuttingDown,
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            MalformedRequest => write!(f, "Malformed HTTP request"),
            ResponseAlreadySent => write!(f, "Response has already been sent"),
            ResponseNotSent => write!(f, "Handler returned without sending the response"),
            PayloadSerialize(e) => write!(f, "Couldn't serialize response payload: {}", e),
            ConfigNotFound(name) => write!(f, "Config file {} not found", name),
            ConfigInvalid(e) => write!(f, "Couldn't read config file: {}", e),
            InjectedFault => write!(f, "Injected test fault"),
            AppStartFailed(e) => write!(f, "App start failed: {}", e),
            AppFault(e) => write!(f, "App fault: {}", e),
            ServerShuttingDown => write!(f, "Server is shutting down"),
        }
    }
}

impl std::error::Error for Exception {}
