use crate::{exception::Exception, param::STATUS_CODES};

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let description = match note {
            Some(n) => n,
            None => STATUS_CODES.get(&code).copied().unwrap_or("Unknown Status"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code,
            escape_html(description)
        );
        Self {
            title,
            css: base_css(),
            body,
        }
    }

    /// 开发模式下展示给浏览器的故障页面
    pub fn from_fault(fault: &Exception, restarted: bool) -> Self {
        let title = "500 应用故障".to_string();
        let note = match restarted {
            true => "The app instance was stopped and will be restarted on the next request.",
            false => "The app instance keeps running.",
        };
        let body = format!(
            r"
            <h1>500</h1>
            <p>未处理的应用故障：</p>
            <pre>{}</pre>
            <p>{}</p>
            ",
            escape_html(&fault.to_string()),
            note
        );
        let css = [
            base_css().as_str(),
            r"
            pre {
                padding: 8px;
                background: #fbeaea;
                white-space: pre-wrap;
            }",
        ]
        .concat();
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <!-- 本文件由shaneyale的Rust Webserver自动生成 -->
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

fn base_css() -> String {
    r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
    .to_string()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
