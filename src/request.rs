// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节码解析为强类型的 `Request` 结构体，
//! 并通过 [`AppRequest`] 特征向应用单元暴露只读的访问器。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询串、版本）。
//! 2. 常用 HTTP 标头（Host、User-Agent、Content-Type、Content-Length）的提取。
//! 3. 应用挂载点（base path）的绑定，以及各类 URL 的推导。
//! 4. 查询串与表单请求体参数的合并。

use std::collections::BTreeMap;

use crate::{exception::Exception, param::*};
use log::error;
use url::form_urlencoded;

/// 报文头与报文体之间的分隔符
const HEADER_END: &[u8] = b"\r\n\r\n";

/// 应用单元可以读取的请求接口。
///
/// 请求对象由宿主创建并独占地交给单次 `handle` 调用，应用只读不写。
pub trait AppRequest: Send + Sync {
    /// 应用挂载点，不带结尾斜杠；挂载在根目录时为空字符串。
    fn base_path(&self) -> &str;

    /// 挂载点之后的请求路径，总是以 `/` 开头。
    fn path(&self) -> &str;

    /// 协议与主机部分，例如 `http://localhost:7878`。
    fn domain_url(&self) -> &str;

    fn base_url(&self) -> String {
        [self.domain_url(), self.base_path()].concat()
    }

    /// 挂载点与请求路径，不含查询串。
    fn request_url(&self) -> String {
        [self.base_path(), self.path()].concat()
    }

    fn full_url(&self) -> String;

    /// 读取请求参数。
    ///
    /// * `merge_route_params` - 是否合并路由定义的参数
    /// * `include_files` - 是否包含上传的文件
    fn params(&self, merge_route_params: bool, include_files: bool) -> BTreeMap<String, String>;
}

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 原始请求路径（不含查询串）
    target: String,
    /// `?` 之后的查询串
    query: Option<String>,
    /// HTTP 协议版本
    version: HttpVersion,
    /// Host 标头
    host: String,
    /// 客户端标识字符串
    user_agent: String,
    content_type: Option<String>,
    /// 请求体，按 Content-Length 截断
    body: String,
    base_path: String,
    path: String,
    domain_url: String,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径、查询串和协议版本。
    /// 3. 迭代解析标头：识别 `Host`, `User-Agent`, `Content-Type`, `Content-Length`。
    /// 4. 截取请求体。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let request_string = match String::from_utf8(buffer.to_vec()) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let (head, rest) = match request_string.split_once("\r\n\r\n") {
            Some((head, rest)) => (head, rest),
            None => (request_string.as_str(), ""),
        };
        let request_lines: Vec<&str> = head.split(CRLF).collect();

        // 解析请求行 (e.g., "GET /app/index?id=1 HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::MalformedRequest);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
        let raw_target = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };
        let (target, query) = match raw_target.split_once('?') {
            Some((t, q)) => (t.to_string(), Some(q.to_string())),
            None => (raw_target, None),
        };

        let mut host = String::new();
        let mut user_agent = String::new();
        let mut content_type = None;
        let mut content_length = 0usize;
        for line in &request_lines[1..] {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name.trim().to_lowercase().as_str() {
                "host" => host = value.to_string(),
                "user-agent" => user_agent = value.to_string(),
                "content-type" => content_type = Some(value.to_string()),
                "content-length" => {
                    content_length = match value.parse() {
                        Ok(len) => len,
                        Err(_) => {
                            error!("[ID{}]Content-Length不是合法的数字：{}", id, value);
                            return Err(Exception::MalformedRequest);
                        }
                    }
                }
                _ => {}
            }
        }

        // 按字节截取，跨越 Content-Length 的多字节字符整体丢弃
        let mut body_end = content_length.min(rest.len());
        while !rest.is_char_boundary(body_end) {
            body_end -= 1;
        }
        let body = rest[..body_end].to_string();

        let host_part = if host.is_empty() { "localhost" } else { host.as_str() };
        let domain_url = format!("http://{}", host_part);
        let path = target.clone();

        Ok(Self {
            method,
            target,
            query,
            version,
            host,
            user_agent,
            content_type,
            body,
            base_path: String::new(),
            path,
            domain_url,
        })
    }

    /// 将请求绑定到应用挂载点。
    ///
    /// 请求路径不在挂载点之下时返回 `None`，宿主据此返回 404。
    pub fn mount(mut self, base_path: &str) -> Option<Self> {
        let base = normalize_base_path(base_path);
        let rest = if base.is_empty() {
            self.target.as_str()
        } else if self.target == base {
            ""
        } else {
            match self.target.strip_prefix(&base) {
                Some(rest) if rest.starts_with('/') => rest,
                _ => return None,
            }
        };
        self.path = if rest.is_empty() {
            "/".to_string()
        } else {
            rest.to_string()
        };
        self.base_path = base;
        Some(self)
    }

    fn is_form(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(false, |t| t.to_lowercase().starts_with(FORM_URLENCODED))
    }
}

/// 判断缓冲区中的报文是否已经完整：标头已结束且请求体达到 Content-Length。
///
/// 返回完整报文的总字节数；标头尚未读完时返回 `None`。
/// 总长度溢出时饱和为 `usize::MAX`，调用方按超长报文处理。
pub fn expected_length(buffer: &[u8]) -> Option<usize> {
    let header_end = buffer
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)?
        + HEADER_END.len();
    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let content_length = head
        .split(CRLF)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    Some(header_end.saturating_add(content_length))
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        ["/", trimmed].concat()
    }
}

impl AppRequest for Request {
    fn base_path(&self) -> &str {
        &self.base_path
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn domain_url(&self) -> &str {
        &self.domain_url
    }

    fn full_url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}{}?{}", self.domain_url, self.request_url(), q),
            None => [self.domain_url.as_str(), &self.request_url()].concat(),
        }
    }

    /// 没有路由表，也不处理 multipart 上传，两个开关目前都不会增加任何参数。
    fn params(&self, _merge_route_params: bool, _include_files: bool) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(q) = &self.query {
            params.extend(form_urlencoded::parse(q.as_bytes()).into_owned());
        }
        if self.is_form() {
            params.extend(form_urlencoded::parse(self.body.as_bytes()).into_owned());
        }
        params
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取挂载前的原始请求路径（不含查询串）
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let request =
            parse("GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Browser\r\n\r\n");

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.target(), "/");
        assert_eq!(request.host(), "localhost:7878");
        assert_eq!(request.user_agent(), "Test-Browser");
        assert_eq!(request.domain_url(), "http://localhost:7878");
    }

    #[test]
    fn test_parse_head_and_options_request() {
        let head = parse("HEAD /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(head.method(), HttpRequestMethod::Head);

        let options = parse("OPTIONS * HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(options.method(), HttpRequestMethod::Options);
        assert_eq!(options.target(), "*");
    }

    /// 请求体按 Content-Length 截断
    #[test]
    fn test_parse_post_body() {
        let request = parse(
            "POST /submit HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\ntest=valueEXTRA",
        );

        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.body(), "test=value");
    }

    #[test]
    fn test_unsupported_method() {
        let result = Request::try_from(b"DELETE /resource HTTP/1.1\r\nHost: h\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    #[test]
    fn test_unsupported_http_version() {
        let result = Request::try_from(b"GET / HTTP/2.0\r\nHost: h\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::UnsupportedHttpVersion);
    }

    #[test]
    fn test_invalid_utf8() {
        let result = Request::try_from(&[0xFF, 0xFE, 0xFD], 0);
        assert_eq!(result.unwrap_err(), Exception::RequestIsNotUtf8);
    }

    #[test]
    fn test_malformed_request_line() {
        let result = Request::try_from(b"GET\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::MalformedRequest);

        let result = Request::try_from(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::MalformedRequest);
    }

    /// 验证 Header 字段名是否大小写不敏感
    #[test]
    fn test_case_insensitive_headers() {
        let request = parse("GET / HTTP/1.1\r\nhost: h\r\nuser-agent: Test\r\n\r\n");

        assert_eq!(request.user_agent(), "Test");
        assert_eq!(request.host(), "h");
    }

    #[test]
    fn test_lowercase_method() {
        let request = parse("get / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(request.method(), HttpRequestMethod::Get);
    }

    #[test]
    fn test_missing_host_falls_back_to_localhost() {
        let request = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(request.domain_url(), "http://localhost");
    }

    #[test]
    fn test_mount_derives_urls() {
        let request = parse("GET /app/x HTTP/1.1\r\nHost: h\r\n\r\n")
            .mount("/app")
            .unwrap();

        assert_eq!(request.base_path(), "/app");
        assert_eq!(request.path(), "/x");
        assert_eq!(request.domain_url(), "http://h");
        assert_eq!(request.base_url(), "http://h/app");
        assert_eq!(request.request_url(), "/app/x");
        assert_eq!(request.full_url(), "http://h/app/x");
    }

    #[test]
    fn test_full_url_keeps_query() {
        let request = parse("GET /app/x?a=1&b=two HTTP/1.1\r\nHost: h\r\n\r\n")
            .mount("/app/")
            .unwrap();

        assert_eq!(request.request_url(), "/app/x");
        assert_eq!(request.full_url(), "http://h/app/x?a=1&b=two");
        assert_eq!(request.query(), Some("a=1&b=two"));
    }

    #[test]
    fn test_mount_root_and_exact_base() {
        let root = parse("GET /x/y HTTP/1.1\r\nHost: h\r\n\r\n").mount("/").unwrap();
        assert_eq!(root.base_path(), "");
        assert_eq!(root.path(), "/x/y");

        let exact = parse("GET /app HTTP/1.1\r\nHost: h\r\n\r\n").mount("app").unwrap();
        assert_eq!(exact.base_path(), "/app");
        assert_eq!(exact.path(), "/");
    }

    #[test]
    fn test_mount_rejects_foreign_paths() {
        assert!(parse("GET /other HTTP/1.1\r\nHost: h\r\n\r\n")
            .mount("/app")
            .is_none());
        // 前缀相同但不是子路径
        assert!(parse("GET /application HTTP/1.1\r\nHost: h\r\n\r\n")
            .mount("/app")
            .is_none());
    }

    #[test]
    fn test_params_merge_query_and_form_body() {
        let request = parse(
            "POST /app/?a=1&name=query HTTP/1.1\r\nHost: h\r\n\
             Content-Type: application/x-www-form-urlencoded; charset=utf-8\r\n\
             Content-Length: 22\r\n\r\nname=body&msg=hi+there",
        );

        let params = request.params(false, false);
        assert_eq!(params.get("a").map(String::as_str), Some("1"));
        assert_eq!(params.get("name").map(String::as_str), Some("body"));
        assert_eq!(params.get("msg").map(String::as_str), Some("hi there"));
    }

    #[test]
    fn test_params_ignore_non_form_body() {
        let request = parse(
            "POST /app/ HTTP/1.1\r\nHost: h\r\nContent-Type: application/json\r\n\
             Content-Length: 7\r\n\r\n{\"a\":1}",
        );
        assert!(request.params(false, false).is_empty());
    }

    #[test]
    fn test_params_percent_decoding() {
        let request = parse("GET /app/?q=%E4%BD%A0%E5%A5%BD&x=a%20b HTTP/1.1\r\nHost: h\r\n\r\n");
        let params = request.params(false, false);
        assert_eq!(params.get("q").map(String::as_str), Some("你好"));
        assert_eq!(params.get("x").map(String::as_str), Some("a b"));
    }

    #[test]
    fn test_expected_length() {
        assert_eq!(expected_length(b"GET / HTTP/1.1\r\nHost: h"), None);
        assert_eq!(expected_length(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        let raw = b"POST / HTTP/1.1\r\ncontent-length: 5\r\n\r\n";
        assert_eq!(expected_length(raw), Some(raw.len() + 5));
    }

    #[test]
    fn test_body_never_exceeds_content_length() {
        // "é" 占两个字节，Content-Length 只覆盖到它的第一个字节
        let req = parse("POST /app HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\naé");
        assert_eq!(req.body(), "a");

        let req = parse("POST /app HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\naé");
        assert_eq!(req.body(), "aé");
    }

    #[test]
    fn test_expected_length_saturates_on_huge_content_length() {
        let head = b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n";
        assert_eq!(expected_length(head), Some(usize::MAX));
    }
}
