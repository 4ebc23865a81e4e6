// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use log::warn;

use crate::param::STATUS_CODES;

/// 错误页面生成器
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => match STATUS_CODES.get(&code) {
                Some(d) => *d,
                None => {
                    warn!("未登记的状态码：{}", code);
                    "Unknown"
                }
            },
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <!-- 本文件由simplecdn源站自动生成 -->
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

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

/// 判断开关型取值是否表示“关闭”。空值同样视为关闭。
pub fn is_false(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// 去掉 Host 头中的端口并转为小写
pub fn host_without_port(host: &str) -> String {
    let host = host.trim().to_lowercase();
    // IPv6 字面量形如 [::1]:7878
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size() {
        assert_eq!(format_file_size(9926), "9.7 KB".to_string());
        assert_eq!(format_file_size(51800), "50.6 KB".to_string());
        assert_eq!(format_file_size(0), "0.0 B");
        assert_eq!(format_file_size(1024 * 1024 - 1), "1024.0 KB");
        assert_eq!(format_file_size(1073741824), "1.0 GB");
    }

    #[test]
    fn test_html_builder_from_status_code() {
        let html = HtmlBuilder::from_status_code(404, Some("测试404")).build();
        assert!(html.contains("404"));
        assert!(html.contains("测试404"));
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("charset=\"utf-8\""));
        assert!(html.contains("</html>"));
    }

    #[test]
    fn test_html_builder_from_status_code_no_note() {
        let html = HtmlBuilder::from_status_code(200, None).build();
        assert!(html.contains("OK"));
        let html = HtmlBuilder::from_status_code(999, None).build();
        assert!(html.contains("Unknown"));
    }

    #[test]
    fn test_is_false() {
        for value in ["0", "false", "FALSE", "no", "off", "", " Off "] {
            assert!(is_false(value), "{}", value);
        }
        for value in ["1", "true", "on", "yes"] {
            assert!(!is_false(value), "{}", value);
        }
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("MySite.com:7878"), "mysite.com");
        assert_eq!(host_without_port("mysite.com"), "mysite.com");
        assert_eq!(host_without_port("[::1]:7878"), "[::1]");
    }
}
