// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CDN 运行时状态
//!
//! 当前的 CDN 档案与由配置派生出的过滤条件组成一个不可变快照，
//! 通过 `arc-swap` 整体替换。处理请求的任务只读取快照，控制台修改配置时构造新快照再原子替换，
//! 读者看到的要么是旧快照，要么是新快照，不会出现一半新一半旧的情况。

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::{error, info, warn};

use crate::classifier::{classify, normalize_endpoint, CdnProfile};
use crate::config::{CdnSettings, DerivedPatterns};
use crate::filter::{local_domains, PageFilter, RewriteFilterSet, SubstringMatcher};
use crate::provider::PROVIDER_TABLE;
use crate::request::Request;
use crate::rewriter::Rewriter;
use crate::util::host_without_port;

/// 某一时刻的完整 CDN 配置
#[derive(Debug)]
pub struct CdnSnapshot {
    profile: Arc<CdnProfile>,
    settings: CdnSettings,
    patterns: DerivedPatterns,
    rewriter: Rewriter,
    /// 页面包含/排除规则无法编译时为 `None`，此时不改写任何页面
    page_filter: Option<PageFilter>,
    enabled: bool,
    generation: u64,
}

impl CdnSnapshot {
    fn build(profile: Arc<CdnProfile>, settings: CdnSettings, generation: u64) -> Self {
        let patterns = settings.derive();
        let filters = RewriteFilterSet::new(&patterns.file_types)
            .with_include(&patterns.url_include)
            .with_exclude(&patterns.url_exclude)
            .with_domains(local_domains(&settings.site_host(), &patterns.domains));
        let rewriter = Rewriter::new(&filters);

        let page_filter = match (
            SubstringMatcher::compile(&patterns.page_include),
            SubstringMatcher::compile(&patterns.page_exclude),
        ) {
            (Ok(include), Ok(exclude)) => {
                Some(PageFilter::new(include, exclude, settings.admin_paths.clone()))
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("页面包含/排除规则无法编译：{}，所有页面都不会被改写", e);
                None
            }
        };

        let enabled = settings.enabled && profile.is_configured();
        if settings.enabled && !enabled {
            warn!("未配置CDN地址，CDN改写无法启用");
        }

        Self {
            profile,
            settings,
            patterns,
            rewriter,
            page_filter,
            enabled,
            generation,
        }
    }

    pub fn profile(&self) -> &Arc<CdnProfile> {
        &self.profile
    }

    pub fn settings(&self) -> &CdnSettings {
        &self.settings
    }

    pub fn patterns(&self) -> &DerivedPatterns {
        &self.patterns
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 每次替换快照都会递增，页面缓存用它判断改写结果是否过期
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 改写时使用的 CDN 地址
    pub fn cdn_host(&self) -> &str {
        self.profile.endpoint()
    }

    /// 已启用、有 CDN 地址且改写器可用
    pub fn is_active(&self) -> bool {
        self.enabled && self.profile.is_configured() && self.rewriter.is_active()
    }

    /// 请求对应的站点主机：优先取 Host 头，否则使用配置中的 `site_url`
    pub fn site_host(&self, request: &Request) -> String {
        match request.host().map(host_without_port) {
            Some(host) if !host.is_empty() => host,
            _ => self.settings.site_host(),
        }
    }

    pub fn local_domains(&self, site_host: &str) -> Vec<String> {
        local_domains(site_host, &self.patterns.domains)
    }

    /// 当前请求的响应是否需要改写
    pub fn page_enabled(&self, request: &Request, id: u128) -> bool {
        if !self.is_active() {
            return false;
        }
        match &self.page_filter {
            Some(filter) => filter.page_enabled(request, id),
            None => false,
        }
    }

    /// 以给定站点主机改写页面
    pub fn rewrite(&self, body: &str, site_host: &str) -> String {
        if !self.is_active() {
            return body.to_string();
        }
        self.rewriter
            .rewrite_buffer(body, self.cdn_host(), &self.local_domains(site_host))
    }
}

/// 可在线程间共享的 CDN 状态
pub struct CdnState {
    current: ArcSwap<CdnSnapshot>,
    // 写者互斥，读者不加锁
    writer: Mutex<()>,
}

impl CdnState {
    /// 由配置构造初始状态
    pub fn load(settings: CdnSettings) -> Self {
        let profile = Arc::new(classify(&settings.host, &PROVIDER_TABLE));
        let snapshot = CdnSnapshot::build(profile, settings, 0);
        info!(
            "CDN状态已加载：provider={}, enabled={}",
            snapshot.profile.provider(),
            snapshot.enabled
        );
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<CdnSnapshot> {
        self.current.load_full()
    }

    pub fn profile(&self) -> Arc<CdnProfile> {
        Arc::clone(&self.current.load().profile)
    }

    /// 用新的设置替换当前快照，只有端点变化时才重新识别服务商
    pub fn replace_settings(&self, settings: CdnSettings) -> Arc<CdnSnapshot> {
        let _guard = match self.writer.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                error!("CDN状态写锁被污染，继续使用");
                poisoned.into_inner()
            }
        };
        let old = self.current.load_full();
        let profile = if normalize_endpoint(&settings.host) == old.profile.endpoint() {
            Arc::clone(&old.profile)
        } else {
            Arc::new(classify(&settings.host, &PROVIDER_TABLE))
        };
        let snapshot = Arc::new(CdnSnapshot::build(profile, settings, old.generation + 1));
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }

    /// 修改 CDN 地址，不做验证。空地址会同时关闭改写。
    pub fn set_host(&self, raw_host: &str) -> Arc<CdnProfile> {
        let enabled = self.current.load().settings.enabled;
        Arc::clone(&self.switch_host(raw_host, enabled).profile)
    }

    /// 在同一个快照里修改 CDN 地址与开关
    pub fn switch_host(&self, raw_host: &str, enabled: bool) -> Arc<CdnSnapshot> {
        let mut settings = self.current.load().settings.clone();
        settings.host = raw_host.trim().to_string();
        settings.enabled = enabled && !settings.host.is_empty();
        self.replace_settings(settings)
    }

    /// 打开或关闭改写，返回修改后的实际状态。没有 CDN 地址时无法打开。
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut settings = self.current.load().settings.clone();
        settings.enabled = enabled;
        self.replace_settings(settings).enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(host: &str, enabled: bool) -> CdnSettings {
        CdnSettings {
            host: host.to_string(),
            enabled,
            site_url: "http://mysite.com".to_string(),
            ..Default::default()
        }
    }

    fn request(raw: &str) -> Request {
        Request::try_from(&raw.as_bytes().to_vec(), 0).unwrap()
    }

    #[test]
    fn test_load_classifies_host() {
        let state = CdnState::load(settings("https://d123abc.cloudfront.net", true));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.profile().provider(), "CloudFront");
        assert_eq!(snapshot.cdn_host(), "d123abc.cloudfront.net");
        assert!(snapshot.is_active());
        assert_eq!(snapshot.generation(), 0);
    }

    #[test]
    fn test_enable_requires_host() {
        let state = CdnState::load(settings("", false));
        assert!(!state.set_enabled(true));
        assert!(!state.snapshot().is_active());

        state.set_host("cdn1.example.net");
        assert!(state.set_enabled(true));
        assert!(state.snapshot().is_active());
    }

    #[test]
    fn test_set_host_reuses_profile_when_unchanged() {
        let state = CdnState::load(settings("cdn1.example.net", true));
        let before = state.profile();
        let after = state.set_host("HTTPS://cdn1.example.net/");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(state.snapshot().generation(), 1);

        let changed = state.set_host("abc.kxcdn.com");
        assert_eq!(changed.provider(), "KeyCDN");
        assert!(!Arc::ptr_eq(&before, &changed));
    }

    #[test]
    fn test_clearing_host_disables() {
        let state = CdnState::load(settings("cdn1.example.net", true));
        let profile = state.set_host("");
        assert!(!profile.is_configured());
        assert!(!state.snapshot().enabled());
    }

    #[test]
    fn test_switch_host_sets_both_in_one_snapshot() {
        let state = CdnState::load(settings("", false));
        let snapshot = state.switch_host("abc.kxcdn.com", true);
        assert_eq!(snapshot.profile().provider(), "KeyCDN");
        assert!(snapshot.is_active());
        assert_eq!(snapshot.generation(), 1);
        assert!(!state.switch_host("  ", true).enabled());
    }

    #[test]
    fn test_old_snapshot_survives_swap() {
        let state = CdnState::load(settings("cdn1.example.net", true));
        let old = state.snapshot();
        state.set_host("cdn2.example.net");
        assert_eq!(old.cdn_host(), "cdn1.example.net");
        assert_eq!(state.snapshot().cdn_host(), "cdn2.example.net");
        let body = r#"<img src="/a/b.png">"#;
        assert_eq!(old.rewrite(body, "mysite.com"), r#"<img src="//cdn1.example.net/a/b.png">"#);
    }

    #[test]
    fn test_site_host_from_request_or_settings() {
        let state = CdnState::load(settings("cdn1.example.net", true));
        let snapshot = state.snapshot();
        let with_host = request("GET / HTTP/1.1\r\nHost: WWW.Other.com:7878\r\n\r\n");
        assert_eq!(snapshot.site_host(&with_host), "www.other.com");
        let without_host = request("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(snapshot.site_host(&without_host), "mysite.com");
    }

    #[test]
    fn test_page_enabled_gates() {
        let mut s = settings("cdn1.example.net", true);
        s.page_exclude = "/private/".to_string();
        let state = CdnState::load(s);
        let snapshot = state.snapshot();
        assert!(snapshot.page_enabled(&request("GET /index.html HTTP/1.1\r\n\r\n"), 0));
        assert!(!snapshot.page_enabled(&request("HEAD /index.html HTTP/1.1\r\n\r\n"), 0));
        assert!(!snapshot.page_enabled(&request("GET /private/a.html HTTP/1.1\r\n\r\n"), 0));
        assert!(!snapshot.page_enabled(&request("GET /admin/ HTTP/1.1\r\n\r\n"), 0));
        assert!(!snapshot.page_enabled(
            &request("GET /index.html HTTP/1.1\r\nX-Simple-CDN: 0\r\n\r\n"),
            0
        ));

        state.set_enabled(false);
        assert!(!state
            .snapshot()
            .page_enabled(&request("GET /index.html HTTP/1.1\r\n\r\n"), 0));
    }
}
