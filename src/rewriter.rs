// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 页面改写器
//!
//! 在渲染好的页面文本上做一次正则扫描，把符合文件类型与包含/排除规则的资源 URL
//! 改写为 CDN 地址。这里不构建 DOM，误匹配完全依靠边界字符与字符类来排除：
//!
//! - 左边界：引号、空白、`=`、`>`、`,`、`;`、`url(` 或文本开头
//! - 主体：不含引号、空白、`(`、`=`、`>`、`,`、`;` 的字符，以配置的扩展名结尾
//! - 可选的查询串 `?…`
//! - 右边界：`/?` 之后紧跟 `? \ " ' 空白 ) > , &`，或文本结尾
//!
//! 空白只包括 ASCII 空白，`U+00A0` 之类的字符属于 URL 主体。
//!
//! 右边界字符会被匹配消耗，下一次搜索从 `url` 组的结尾开始，
//! 这个字符仍可作为下一个 URL 的左边界。
//! 改写是单次前向扫描，改写后的文本不会被再次匹配。

use log::{debug, warn};
use regex::Regex;

use crate::filter::{RewriteFilterSet, SubstringMatcher};

/// 编译好的改写器。持有扫描正则和包含/排除匹配器，可以在多个请求之间共享。
#[derive(Debug, Clone)]
pub struct Rewriter {
    scanner: Option<Regex>,
    include: SubstringMatcher,
    exclude: SubstringMatcher,
    local_domains: Vec<String>,
}

/// ASCII 空白字符，用在字符类内部
const ASCII_SPACE: &str = r"\t\n\x0B\x0C\r ";

/// 根据文件类型交替串构造扫描正则
fn scanning_pattern(file_type_pattern: &str) -> String {
    format!(
        r#"(?i)(?:(?P<lead>["'{ws}=>,;]|url\()|^)(?P<url>[^"'{ws}(=>,;]+(?:{types})(?:\?[^/?\\"'{ws})>,]+)?)(?:/?[?\\"'{ws})>,&]|$)"#,
        ws = ASCII_SPACE,
        types = file_type_pattern
    )
}

impl Rewriter {
    /// 编译过滤条件。任何一个模式无法编译时改写器整体失效（原样返回页面）。
    pub fn new(filters: &RewriteFilterSet) -> Self {
        let disabled = Self {
            scanner: None,
            include: SubstringMatcher::empty(),
            exclude: SubstringMatcher::empty(),
            local_domains: filters.local_domains.clone(),
        };
        let file_types = filters.file_type_pattern.trim_matches('|');
        if file_types.is_empty() {
            debug!("未配置文件类型，改写器处于关闭状态");
            return disabled;
        }
        let scanner = match Regex::new(&scanning_pattern(file_types)) {
            Ok(re) => re,
            Err(e) => {
                warn!("文件类型模式无法编译：{}，改写器关闭", e);
                return disabled;
            }
        };
        let include = SubstringMatcher::compile(&filters.include_pattern);
        let exclude = SubstringMatcher::compile(&filters.exclude_pattern);
        match (include, exclude) {
            (Ok(include), Ok(exclude)) => Self {
                scanner: Some(scanner),
                include,
                exclude,
                local_domains: filters.local_domains.clone(),
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!("URL包含/排除模式无法编译：{}，改写器关闭", e);
                disabled
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.scanner.is_some()
    }

    /// 使用构造时给定的本地域名改写页面
    pub fn rewrite_page(&self, body: &str, cdn_host: &str) -> String {
        self.rewrite_buffer(body, cdn_host, &self.local_domains)
    }

    /// 改写整个页面缓冲区。
    ///
    /// CDN 地址为空、站点主机无法确定或没有文件类型时原样返回。
    pub fn rewrite_buffer(&self, body: &str, cdn_host: &str, local_domains: &[String]) -> String {
        let scanner = match &self.scanner {
            Some(s) => s,
            None => return body.to_string(),
        };
        if cdn_host.is_empty() {
            return body.to_string();
        }
        match local_domains.first() {
            Some(site) if !site.is_empty() => {}
            _ => {
                debug!("无法确定站点主机，跳过改写");
                return body.to_string();
            }
        }

        let mut output = String::with_capacity(body.len() + body.len() / 8);
        let mut last = 0;
        let mut rewritten = 0usize;
        let mut start = 0;
        while let Some(caps) = scanner.captures_at(body, start) {
            let url = match caps.name("url") {
                Some(m) => m,
                None => break,
            };
            let replacement = self.rewrite_url(url.as_str(), cdn_host, local_domains);
            if replacement != url.as_str() {
                rewritten += 1;
            }
            output.push_str(&body[last..url.start()]);
            output.push_str(&replacement);
            last = url.end();
            start = url.end();
        }
        output.push_str(&body[last..]);
        debug!("页面改写完成，共改写{}个URL", rewritten);
        output
    }

    /// 单个 URL 的改写决策
    pub fn rewrite_url(&self, url: &str, cdn_host: &str, local_domains: &[String]) -> String {
        decide(url, cdn_host, local_domains, &self.include, &self.exclude)
    }
}

/// 按顺序应用规则，第一条适用的规则决定结果
fn decide(
    url: &str,
    cdn_host: &str,
    local_domains: &[String],
    include: &SubstringMatcher,
    exclude: &SubstringMatcher,
) -> String {
    if !include.is_empty() && !include.matches(url) {
        return url.to_string();
    }
    if exclude.matches(url) {
        return url.to_string();
    }

    // 根相对路径 /wp-content/...
    if url.starts_with('/') && !url.starts_with("//") {
        return format!("//{}{}", cdn_host, url);
    }
    // JSON/JS 字符串中的转义形式 \/wp-content\/...
    if url.starts_with(r"\/") && !url.starts_with(r"\/\/") {
        return format!(r"\/\/{}{}", cdn_host, url);
    }

    // 完整 URL：(http:|https:)//www.site.com/...，只替换第一次出现的域名
    let lowered = url.to_ascii_lowercase();
    for domain in local_domains {
        if domain.is_empty() {
            continue;
        }
        let needle = domain.to_ascii_lowercase();
        let plain = format!("//{}", needle);
        let escaped = format!(r"\/\/{}", needle);
        if lowered.contains(&plain) || lowered.contains(&escaped) {
            if let Some(pos) = lowered.find(&needle) {
                return [&url[..pos], cdn_host, &url[pos + needle.len()..]].concat();
            }
        }
    }

    url.to_string()
}

/// 改写页面缓冲区。
///
/// `local_domains` 为空时使用 `filters.local_domains`。
pub fn rewrite_buffer(
    body: &str,
    cdn_host: &str,
    local_domains: &[String],
    filters: &RewriteFilterSet,
) -> String {
    let domains = if local_domains.is_empty() {
        filters.local_domains.as_slice()
    } else {
        local_domains
    };
    Rewriter::new(filters).rewrite_buffer(body, cdn_host, domains)
}

/// 单个 URL 的改写决策，包含/排除参数是已转义的交替串。
///
/// 模式无法编译时不做任何改写。
pub fn rewrite_url(
    url: &str,
    cdn_host: &str,
    local_domains: &[String],
    include_pattern: &str,
    exclude_pattern: &str,
) -> String {
    let include = SubstringMatcher::compile(include_pattern);
    let exclude = SubstringMatcher::compile(exclude_pattern);
    match (include, exclude) {
        (Ok(include), Ok(exclude)) => decide(url, cdn_host, local_domains, &include, &exclude),
        (Err(e), _) | (_, Err(e)) => {
            warn!("URL包含/排除模式无法编译：{}", e);
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CDN: &str = "cdn1.example.net";

    fn domains() -> Vec<String> {
        vec!["mysite.com".to_string()]
    }

    fn png_jpg() -> RewriteFilterSet {
        RewriteFilterSet::new(r"\.png|\.jpg|\.css|\.js")
    }

    #[test]
    fn test_rewrite_url_root_relative() {
        assert_eq!(
            rewrite_url("/wp-content/theme/style.css", CDN, &domains(), "", ""),
            "//cdn1.example.net/wp-content/theme/style.css"
        );
    }

    #[test]
    fn test_rewrite_url_full_domain() {
        assert_eq!(
            rewrite_url("https://mysite.com/img/logo.png", CDN, &domains(), "", ""),
            "https://cdn1.example.net/img/logo.png"
        );
        assert_eq!(
            rewrite_url("//MySite.com/img/logo.png?v=2", CDN, &domains(), "", ""),
            "//cdn1.example.net/img/logo.png?v=2"
        );
    }

    #[test]
    fn test_rewrite_url_escaped_forms() {
        assert_eq!(
            rewrite_url(r"\/wp-content\/a.png", CDN, &domains(), "", ""),
            r"\/\/cdn1.example.net\/wp-content\/a.png"
        );
        assert_eq!(
            rewrite_url(r"https:\/\/mysite.com\/a.png", CDN, &domains(), "", ""),
            r"https:\/\/cdn1.example.net\/a.png"
        );
        // 已经是转义的协议相对地址，但不是本地域名
        assert_eq!(
            rewrite_url(r"\/\/other.com\/a.png", CDN, &domains(), "", ""),
            r"\/\/other.com\/a.png"
        );
    }

    #[test]
    fn test_rewrite_url_include_exclude() {
        let url = "/wp-content/plugins/x/app.js";
        assert_eq!(rewrite_url(url, CDN, &domains(), "/uploads/", ""), url);
        assert_eq!(rewrite_url(url, CDN, &domains(), "", "/PLUGINS/"), url);
        assert_eq!(
            rewrite_url(url, CDN, &domains(), "/plugins/", "/uploads/"),
            "//cdn1.example.net/wp-content/plugins/x/app.js"
        );
    }

    #[test]
    fn test_rewrite_url_foreign_and_protocol_relative() {
        assert_eq!(
            rewrite_url("https://other.com/a.png", CDN, &domains(), "", ""),
            "https://other.com/a.png"
        );
        assert_eq!(rewrite_url("//other.com/a.png", CDN, &domains(), "", ""), "//other.com/a.png");
        assert_eq!(rewrite_url("images/a.png", CDN, &domains(), "", ""), "images/a.png");
    }

    #[test]
    fn test_rewrite_url_first_domain_wins() {
        let url = "https://b.com/x//a.com/y.png";
        let domains = vec!["a.com".to_string(), "b.com".to_string()];
        assert_eq!(
            rewrite_url(url, CDN, &domains, "", ""),
            "https://b.com/x//cdn1.example.net/y.png"
        );
        let domains = vec!["b.com".to_string(), "a.com".to_string()];
        assert_eq!(
            rewrite_url(url, CDN, &domains, "", ""),
            "https://cdn1.example.net/x//a.com/y.png"
        );
    }

    #[test]
    fn test_rewrite_url_bad_pattern_is_untouched() {
        assert_eq!(rewrite_url("/a.png", CDN, &domains(), "(", ""), "/a.png");
    }

    #[test]
    fn test_rewrite_buffer_img_tag() {
        let filters = RewriteFilterSet::new(r"\.png");
        assert_eq!(
            rewrite_buffer(r#"<img src="/a/b.png">"#, CDN, &domains(), &filters),
            r#"<img src="//cdn1.example.net/a/b.png">"#
        );
    }

    #[test]
    fn test_rewrite_buffer_file_type_mismatch() {
        let filters = RewriteFilterSet::new(r"\.png|\.jpg");
        let body = r#"<a href="/a/b.docx">doc</a>"#;
        assert_eq!(rewrite_buffer(body, CDN, &domains(), &filters), body);
    }

    #[test]
    fn test_rewrite_buffer_noop_conditions() {
        let body = r#"<img src="/a/b.png">"#;
        assert_eq!(rewrite_buffer(body, "", &domains(), &png_jpg()), body);
        assert_eq!(rewrite_buffer(body, CDN, &[String::new()], &png_jpg()), body);
        assert_eq!(rewrite_buffer(body, CDN, &[], &png_jpg()), body);
        assert_eq!(rewrite_buffer(body, CDN, &domains(), &RewriteFilterSet::default()), body);
    }

    #[test]
    fn test_rewrite_buffer_css_url_and_query() {
        let body = "body{background:url(/img/bg.jpg)} <link href='/css/site.css?ver=6.1'>";
        assert_eq!(
            rewrite_buffer(body, CDN, &domains(), &png_jpg()),
            "body{background:url(//cdn1.example.net/img/bg.jpg)} <link href='//cdn1.example.net/css/site.css?ver=6.1'>"
        );
    }

    #[test]
    fn test_rewrite_buffer_srcset_and_json() {
        let body = r#"<img srcset="/a.png 1x, /b.png 2x"><script>{"u":"https:\/\/mysite.com\/c.JPG"}</script>"#;
        assert_eq!(
            rewrite_buffer(body, CDN, &domains(), &png_jpg()),
            r#"<img srcset="//cdn1.example.net/a.png 1x, //cdn1.example.net/b.png 2x"><script>{"u":"https:\/\/cdn1.example.net\/c.JPG"}</script>"#
        );
    }

    #[test]
    fn test_rewrite_buffer_leaves_plain_text() {
        let body = "<p>Convert .png files at mysite.com today</p>";
        assert_eq!(rewrite_buffer(body, CDN, &domains(), &png_jpg()), body);
    }

    #[test]
    fn test_rewrite_buffer_requires_right_boundary() {
        let body = r#"<a href="/a/b.png.bak">x</a> <a href="/a/b.pngx">y</a>"#;
        assert_eq!(rewrite_buffer(body, CDN, &domains(), &png_jpg()), body);
    }

    #[test]
    fn test_rewrite_buffer_single_pass() {
        // CDN 主机本身包含站点域名，改写后的结果不会被再次改写
        let body = r#"<img src="https://mysite.com/a.png">"#;
        assert_eq!(
            rewrite_buffer(body, "cdn.mysite.com", &domains(), &png_jpg()),
            r#"<img src="https://cdn.mysite.com/a.png">"#
        );
    }

    #[test]
    fn test_rewrite_buffer_start_of_buffer() {
        assert_eq!(
            rewrite_buffer("/a.js", CDN, &domains(), &png_jpg()),
            "//cdn1.example.net/a.js"
        );
    }

    #[test]
    fn test_rewriter_uses_filter_domains() {
        let filters = png_jpg().with_domains(domains()).with_exclude(r"/private/");
        let rewriter = Rewriter::new(&filters);
        assert!(rewriter.is_active());
        assert_eq!(
            rewriter.rewrite_page(r#"<img src="http://mysite.com/x.png"><img src="/private/y.png">"#, CDN),
            r#"<img src="http://cdn1.example.net/x.png"><img src="/private/y.png">"#
        );
    }

    #[test]
    fn test_rewriter_with_bad_include_is_inactive() {
        let filters = png_jpg().with_include("[");
        assert!(!Rewriter::new(&filters).is_active());
    }

    #[test]
    fn test_rewrite_buffer_after_large_inline_data() {
        let filters = RewriteFilterSet::new(&crate::config::CdnSettings::default().derive().file_types);
        for size in [20_000, 300_000, 1_000_000] {
            let payload: String = "d09GMgABAAAAA+/".chars().cycle().take(size).collect();
            let css = format!(
                "@font-face{{src:url(data:font/woff2;base64,{})}} .a{{background:url(/img/a.png)}}",
                payload
            );
            let output = rewrite_buffer(&css, CDN, &domains(), &filters);
            assert!(output.ends_with(".a{background:url(//cdn1.example.net/img/a.png)}"));
            assert!(output.contains(&payload));
        }
    }

    #[test]
    fn test_rewrite_buffer_adjacent_urls_share_boundary() {
        assert_eq!(
            rewrite_buffer("/a.png,/b.png", CDN, &domains(), &png_jpg()),
            "//cdn1.example.net/a.png,//cdn1.example.net/b.png"
        );
    }

    #[test]
    fn test_rewrite_buffer_only_ascii_space_is_boundary() {
        for body in ["x\u{a0}/a.png ", "<p>\u{3000}/a.png </p>"] {
            assert_eq!(rewrite_buffer(body, CDN, &domains(), &png_jpg()), body);
        }
        assert_eq!(
            rewrite_buffer("<img\tsrc=/a.png\x0C>", CDN, &domains(), &png_jpg()),
            "<img\tsrc=//cdn1.example.net/a.png\x0C>"
        );
    }
}
