// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 过滤规则
//!
//! 运维人员在配置里填写的是人类可读的列表（换行、逗号或空格分隔），
//! 改写核心消费的是由这些列表派生出的正则交替串。本模块负责两者之间的转换，
//! 并提供页面级的准入判断。

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Regex, RegexBuilder};

use crate::param::{HttpRequestMethod, CACHEABLE_RECOMMENDED, CDN_OVERRIDE_HEADER};
use crate::request::Request;
use crate::util::is_false;

lazy_static! {
    static ref EXTENSION: Regex = Regex::new(r"^\.\w{1,7}$").unwrap();
}

/// 将分隔文本解析为列表。
///
/// `extensions_only` 为真时只保留形如 `.png` 的扩展名。
pub fn parse_list(text: &str, extensions_only: bool) -> Vec<String> {
    text.replace([',', ' '], "\n")
        .split('\n')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter(|item| {
            if extensions_only && !EXTENSION.is_match(item) {
                warn!("忽略非法的文件扩展名：{}", item);
                return false;
            }
            true
        })
        .map(str::to_string)
        .collect()
}

/// 把字面量列表转换为正则交替串，每一项都经过转义
pub fn to_alternation(items: &[String]) -> String {
    items
        .iter()
        .map(|item| regex::escape(item))
        .collect::<Vec<_>>()
        .join("|")
}

/// 合并静态资源与下载文件两个扩展名列表，生成文件类型正则
pub fn file_type_pattern(file_types: &str, download_types: &str) -> String {
    let mut items = parse_list(file_types, true);
    for item in parse_list(download_types, true) {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    if items.is_empty() {
        warn!(
            "没有配置任何可缓存的文件类型，CDN改写将不会生效。推荐至少包含：{}",
            CACHEABLE_RECOMMENDED.join(" ")
        );
    }
    to_alternation(&items)
}

/// 包含/排除字符串列表生成的正则
pub fn substring_pattern(text: &str) -> String {
    to_alternation(&parse_list(text, false))
}

/// 大小写不敏感的“包含任意子串”匹配器。空模式不匹配任何东西。
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    regex: Option<Regex>,
}

impl SubstringMatcher {
    /// 编译派生出的交替串，失败时返回正则错误
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self { regex: None });
        }
        let regex = RegexBuilder::new(&format!("(?:{})", pattern))
            .case_insensitive(true)
            .build()?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn empty() -> Self {
        Self { regex: None }
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(text),
            None => false,
        }
    }
}

/// 每次渲染页面时使用的一组改写过滤条件，构造后不再变化。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteFilterSet {
    /// 已转义的扩展名交替串，如 `\.png|\.jpg`
    pub file_type_pattern: String,
    pub include_pattern: String,
    pub exclude_pattern: String,
    /// 站点自身主机在前，其后是额外声明的本地域名
    pub local_domains: Vec<String>,
}

impl RewriteFilterSet {
    pub fn new(file_type_pattern: &str) -> Self {
        Self {
            file_type_pattern: file_type_pattern.to_string(),
            ..Default::default()
        }
    }

    pub fn with_include(mut self, include_pattern: &str) -> Self {
        self.include_pattern = include_pattern.to_string();
        self
    }

    pub fn with_exclude(mut self, exclude_pattern: &str) -> Self {
        self.exclude_pattern = exclude_pattern.to_string();
        self
    }

    pub fn with_domains(mut self, local_domains: Vec<String>) -> Self {
        self.local_domains = local_domains;
        self
    }
}

/// 本地域名列表：站点主机永远排在第一位，额外域名去重后按声明顺序追加
pub fn local_domains(site_host: &str, extra_domains: &[String]) -> Vec<String> {
    let site_host = site_host.trim().to_lowercase();
    let mut domains = vec![site_host.clone()];
    for domain in extra_domains {
        let domain = domain.to_lowercase();
        if !domain.is_empty() && !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    domains
}

/// 页面级准入条件。决定当前请求的响应是否交给改写器处理。
#[derive(Debug, Clone)]
pub struct PageFilter {
    include: SubstringMatcher,
    exclude: SubstringMatcher,
    admin_paths: Vec<String>,
}

impl PageFilter {
    pub fn new(include: SubstringMatcher, exclude: SubstringMatcher, admin_paths: Vec<String>) -> Self {
        Self {
            include,
            exclude,
            admin_paths,
        }
    }

    /// 仅依据请求路径判断：管理路径、页面包含/排除规则
    pub fn path_enabled(&self, path: &str) -> bool {
        if self.admin_paths.iter().any(|p| !p.is_empty() && path.starts_with(p.as_str())) {
            return false;
        }
        let included = self.include.is_empty() || self.include.matches(path);
        let excluded = self.exclude.matches(path);
        included && !excluded
    }

    /// 完整的页面准入判断，`id` 仅用于日志
    pub fn page_enabled(&self, request: &Request, id: u128) -> bool {
        if request.method() != HttpRequestMethod::Get {
            debug!("[ID{}]非GET请求，不进行CDN改写", id);
            return false;
        }
        if let Some(value) = request.cdn_override() {
            if is_false(value) {
                debug!("[ID{}]请求头{}关闭了CDN改写", id, CDN_OVERRIDE_HEADER);
                return false;
            }
        }
        let enabled = self.path_enabled(request.path());
        if !enabled {
            debug!("[ID{}]页面{}被包含/排除规则过滤", id, request.path());
        }
        enabled
    }
}

impl Default for PageFilter {
    fn default() -> Self {
        Self::new(SubstringMatcher::empty(), SubstringMatcher::empty(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_mixed_delimiters() {
        let list = parse_list("a.com, b.com\nc.com  d.com", false);
        assert_eq!(list, vec!["a.com", "b.com", "c.com", "d.com"]);
    }

    #[test]
    fn test_parse_list_filters_extensions() {
        let list = parse_list(".css .js png .toolongext .woff2 .a-b", true);
        assert_eq!(list, vec![".css", ".js", ".woff2"]);
    }

    #[test]
    fn test_file_type_pattern_merges_and_escapes() {
        let pattern = file_type_pattern(".png .jpg", ".zip .png");
        assert_eq!(pattern, r"\.png|\.jpg|\.zip");
        assert_eq!(file_type_pattern("", "png"), "");
    }

    #[test]
    fn test_substring_pattern_escapes_metacharacters() {
        assert_eq!(substring_pattern("/uploads/ a+b"), r"/uploads/|a\+b");
    }

    #[test]
    fn test_substring_matcher_case_insensitive() {
        let matcher = SubstringMatcher::compile(&substring_pattern("/Plugins/")).unwrap();
        assert!(matcher.matches("/wp-content/plugins/x.js"));
        assert!(!matcher.matches("/wp-content/themes/x.js"));
        assert!(!SubstringMatcher::empty().matches("anything"));
    }

    #[test]
    fn test_local_domains_site_first() {
        let extra = vec!["static.mysite.com".to_string(), "MYSITE.com".to_string()];
        let domains = local_domains("mysite.com", &extra);
        assert_eq!(domains, vec!["mysite.com", "static.mysite.com"]);
    }

    #[test]
    fn test_page_filter_paths() {
        let filter = PageFilter::new(
            SubstringMatcher::compile(&substring_pattern("/blog/")).unwrap(),
            SubstringMatcher::compile(&substring_pattern("/tag/")).unwrap(),
            vec!["/admin/".to_string()],
        );
        assert!(filter.path_enabled("/blog/post.html"));
        assert!(!filter.path_enabled("/about.html"));
        assert!(!filter.path_enabled("/blog/tag/rust.html"));
        assert!(!filter.path_enabled("/admin/blog/"));
        assert!(PageFilter::default().path_enabled("/anything"));
    }
}
