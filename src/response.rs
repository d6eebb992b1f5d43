// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应构建模块
//!
//! 应用单元通过 [`AppResponse`] 特征写入标头与响应体，并调用 `send` 完成响应。
//! 宿主在 `handle` 返回后检查响应是否已发送，再用 [`Response::as_bytes`] 写回 Socket。

use crate::{exception::Exception, param::*, request::Request, util::HtmlBuilder};

use bytes::Bytes;
use chrono::prelude::*;
use log::{debug, error};

/// 应用单元可以写入的响应接口。
///
/// `send` 是终结操作：每个响应只能发送一次，发送后不应再修改。
pub trait AppResponse: Send {
    /// 设置标头，同名标头会被覆盖（名称大小写不敏感）。
    fn set_header(&mut self, name: &str, value: &str);

    fn set_body(&mut self, body: String);

    /// 完成并发送响应。重复发送返回 [`Exception::ResponseAlreadySent`]。
    fn send(&mut self) -> Result<(), Exception>;
}

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    /// 保留原始大小写与插入顺序
    headers: Vec<(String, String)>,
    date: DateTime<Utc>,
    server_name: String,
    content: Option<Bytes>,
    sent: bool,
    /// HEAD 请求只发送标头
    head_only: bool,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            headers: Vec::new(),
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            content: None,
            sent: false,
            head_only: false,
        }
    }

    /// 为指定请求准备一个空白响应，HEAD 请求在输出时会省略响应体。
    pub fn for_request(request: &Request) -> Self {
        let mut response = Self::new();
        response.head_only = request.method() == HttpRequestMethod::Head;
        response
    }

    fn from_html(html: &str, head_only: bool) -> Self {
        let mut response = Self::new();
        response.head_only = head_only;
        response.set_header("Content-Type", "text/html;charset=utf-8");
        response.content = Some(Bytes::from(html.to_string()));
        response
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}，按500处理。", code);
                self.status_code = 500;
                "Internal Server Error".to_string()
            }
        };
        self
    }

    pub fn from_status_code(code: u16, head_only: bool) -> Self {
        let html = HtmlBuilder::from_status_code(code, None).build();
        Self::from_html(&html, head_only)
            .set_code(code)
            .set_date()
            .to_owned()
    }

    pub fn response_400(head_only: bool) -> Self {
        Self::from_status_code(400, head_only)
    }

    pub fn response_404(head_only: bool) -> Self {
        Self::from_status_code(404, head_only)
    }

    pub fn response_500(head_only: bool) -> Self {
        Self::from_status_code(500, head_only)
    }

    /// 开发模式下的错误页：把故障信息渲染给浏览器，并提示应用已重启。
    pub fn response_fault(fault: &Exception, id: u128, restarted: bool, head_only: bool) -> Self {
        debug!("[ID{}]渲染故障页面：{}", id, fault);
        let html = HtmlBuilder::from_fault(fault, restarted).build();
        Self::from_html(&html, head_only)
            .set_code(500)
            .set_date()
            .to_owned()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let content: &[u8] = match &self.content {
            Some(c) => c.as_ref(),
            None => b"",
        };
        let status_code: &str = &self.status_code.to_string();
        let information: &str = &self.information;
        let mut header = [version, " ", status_code, " ", information, CRLF].concat();
        for (name, value) in &self.headers {
            header.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", content.len(), CRLF));
        header.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        header.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        header.push_str(CRLF);

        if self.head_only {
            header.into_bytes()
        } else {
            [header.as_bytes(), content].concat()
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl AppResponse for Response {
    fn set_header(&mut self, name: &str, value: &str) {
        if self.sent {
            error!("响应已发送，忽略对标头{}的修改", name);
            return;
        }
        match self
            .headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(index) => self.headers[index].1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    fn set_body(&mut self, body: String) {
        if self.sent {
            error!("响应已发送，忽略对响应体的修改");
            return;
        }
        self.content = Some(Bytes::from(body));
    }

    fn send(&mut self) -> Result<(), Exception> {
        if self.sent {
            return Err(Exception::ResponseAlreadySent);
        }
        self.set_date();
        self.sent = true;
        Ok(())
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&str> {
        self.content
            .as_ref()
            .and_then(|c| std::str::from_utf8(c).ok())
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
