// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了宿主服务器与应用单元共用的常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 应用响应所使用的标头名与内容类型。
//! - HTTP 方法与版本的强类型枚举。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "shaneyale-webserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 应用响应设置的内容类型标头名。大小写与旧版客户端保持一致，不做规范化。
pub const APP_CONTENT_TYPE_HEADER: &str = "content-Type";

/// 应用响应的内容类型
pub const APP_CONTENT_TYPE: &str = "text/javascript";

/// 表单请求体的内容类型，只有该类型的请求体会被解析进参数表
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(204, "No Content");

        // 3xx: 重定向 (Redirection)
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(304, "Not Modified");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(413, "Content Too Large");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.1 版本
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 获取资源的元数据（不包含响应体）
    Head,
    /// 查询服务器支持的选项
    Options,
    /// 提交数据或执行操作
    Post,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}
