// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CDN 地址验证
//!
//! 运维人员更换 CDN 地址时，改写先被关闭，然后经由新地址请求一个已知资源：
//!
//! - 状态码 > 499：拒绝新地址，保留原地址，改写保持关闭
//! - 状态码 > 399：给出警告，但仍然接受
//! - 其余：接受
//!
//! 接受后新地址与改写开关在同一个快照里生效。网络请求交给 [`HeadTransport`]。

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::classifier::normalize_endpoint;
use crate::purge::{DryRunTransport, NoticeBoard, PurgeContext, TransportError, TransportReply};
use crate::rewriter::rewrite_url;
use crate::state::CdnState;

/// 经由 CDN 发出的 `HEAD` 请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadRequest {
    pub url: String,
    /// 部分 CDN 按来源做防盗链，带上站点地址
    pub referer: String,
}

/// 负责发出验证请求
#[cfg_attr(test, mockall::automock)]
pub trait HeadTransport: Send + Sync {
    fn head(&self, request: &HeadRequest, timeout: Duration) -> Result<TransportReply, TransportError>;
}

impl HeadTransport for DryRunTransport {
    fn head(&self, request: &HeadRequest, timeout: Duration) -> Result<TransportReply, TransportError> {
        info!(
            "[dry-run]HEAD {}，Referer {}（超时{}s）",
            request.url,
            request.referer,
            timeout.as_secs()
        );
        Ok(TransportReply::new(200, "OK"))
    }
}

/// 一次地址更换的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVerdict {
    /// 与当前地址相同，什么也没做
    Unchanged,
    /// 地址被清空，改写关闭
    Cleared,
    /// 验证失败，保留原地址，改写关闭
    Rejected,
    /// 新地址已生效，改写打开
    Accepted,
}

pub struct HostVerifier {
    transport: Arc<dyn HeadTransport>,
    notices: Arc<NoticeBoard>,
}

impl HostVerifier {
    pub fn new(transport: Arc<dyn HeadTransport>, notices: Arc<NoticeBoard>) -> Self {
        Self { transport, notices }
    }

    pub fn notices(&self) -> &Arc<NoticeBoard> {
        &self.notices
    }

    /// 验证并切换到新的 CDN 地址
    pub fn change_host(&self, state: &CdnState, raw_host: &str, context: PurgeContext) -> HostVerdict {
        let snapshot = state.snapshot();
        let endpoint = normalize_endpoint(raw_host);
        if raw_host.trim().is_empty() {
            state.set_host("");
            info!("[{}]CDN地址已清除", context);
            return HostVerdict::Cleared;
        }
        if endpoint == snapshot.cdn_host() {
            debug!("[{}]CDN地址未变化：{}", context, endpoint);
            return HostVerdict::Unchanged;
        }

        state.set_enabled(false);
        if endpoint.is_empty() {
            self.notices
                .error(context, format!("Error: Invalid CDN host {}", raw_host.trim()));
            return HostVerdict::Rejected;
        }

        let settings = snapshot.settings();
        let site_host = settings.site_host();
        if site_host.is_empty() {
            self.notices.error(
                context,
                format!("Error: Site URL is not configured, cannot verify {}", endpoint),
            );
            return HostVerdict::Rejected;
        }
        let scheme = match settings.site_url.trim().to_lowercase().starts_with("https://") {
            true => "https",
            false => "http",
        };
        let asset = format!(
            "{}://{}/{}",
            scheme,
            site_host,
            settings.verify_path.trim().trim_start_matches('/')
        );
        let request = HeadRequest {
            url: rewrite_url(&asset, &endpoint, &[site_host], "", ""),
            referer: settings.site_url.trim().to_string(),
        };
        let timeout = Duration::from_secs(settings.purge_timeout_secs.max(1));
        debug!("[{}]验证CDN地址：HEAD {}", context, request.url);

        match self.transport.head(&request, timeout) {
            Err(e) => {
                self.notices
                    .error(context, format!("Error: Accessing {}, {}", endpoint, e));
                HostVerdict::Rejected
            }
            Ok(reply) if reply.status > 499 => {
                self.notices.error(
                    context,
                    format!(
                        "Error: status {}, Accessing {}, {}",
                        reply.status, endpoint, reply.reason
                    ),
                );
                HostVerdict::Rejected
            }
            Ok(reply) => {
                if reply.status > 399 {
                    self.notices.warning(
                        context,
                        format!(
                            "Warning: status {}, Accessing {}, {}",
                            reply.status, endpoint, reply.reason
                        ),
                    );
                } else {
                    self.notices.success(
                        context,
                        format!("Success: status {}, Accessing {}", reply.status, endpoint),
                    );
                }
                state.switch_host(raw_host, true);
                HostVerdict::Accepted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdnSettings;
    use crate::purge::NoticeLevel;

    fn state(host: &str) -> CdnState {
        CdnState::load(CdnSettings {
            host: host.to_string(),
            enabled: !host.is_empty(),
            site_url: "https://mysite.com/".to_string(),
            ..Default::default()
        })
    }

    fn replying(status: u16, reason: &'static str) -> Arc<dyn HeadTransport> {
        let mut transport = MockHeadTransport::new();
        transport
            .expect_head()
            .times(1)
            .returning(move |_, _| Ok(TransportReply::new(status, reason)));
        Arc::new(transport)
    }

    fn verifier(transport: Arc<dyn HeadTransport>) -> HostVerifier {
        HostVerifier::new(transport, Arc::new(NoticeBoard::new()))
    }

    #[test]
    fn test_accepts_reachable_host() {
        let mut transport = MockHeadTransport::new();
        transport
            .expect_head()
            .withf(|request, timeout| {
                request.url == "https://abc.kxcdn.com/css/site.css"
                    && request.referer == "https://mysite.com/"
                    && *timeout == Duration::from_secs(10)
            })
            .times(1)
            .returning(|_, _| Ok(TransportReply::new(200, "OK")));
        let state = state("cdn1.example.net");
        let verifier = verifier(Arc::new(transport));

        assert_eq!(
            verifier.change_host(&state, "https://abc.kxcdn.com/", PurgeContext::Console),
            HostVerdict::Accepted
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.profile().provider(), "KeyCDN");
        assert!(snapshot.is_active());
        let notices = verifier.notices().drain();
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert_eq!(notices[0].message, "Success: status 200, Accessing abc.kxcdn.com");
    }

    #[test]
    fn test_client_error_warns_but_accepts() {
        let state = state("");
        let verifier = verifier(replying(403, "Forbidden"));
        assert_eq!(
            verifier.change_host(&state, "d123abc.cloudfront.net", PurgeContext::Button),
            HostVerdict::Accepted
        );
        assert!(state.snapshot().is_active());
        let notices = verifier.notices().drain();
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(
            notices[0].message,
            "Warning: status 403, Accessing d123abc.cloudfront.net, Forbidden"
        );
    }

    #[test]
    fn test_server_error_rejects_and_keeps_old_host() {
        let state = state("cdn1.example.net");
        let verifier = verifier(replying(502, "Bad Gateway"));
        assert_eq!(
            verifier.change_host(&state, "broken.example.org", PurgeContext::Console),
            HostVerdict::Rejected
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.cdn_host(), "cdn1.example.net");
        assert!(!snapshot.is_active());
        assert_eq!(verifier.notices().drain()[0].level, NoticeLevel::Error);
    }

    #[test]
    fn test_transport_failure_rejects() {
        let mut transport = MockHeadTransport::new();
        transport
            .expect_head()
            .returning(|_, timeout| Err(TransportError::Timeout(timeout)));
        let state = state("cdn1.example.net");
        let verifier = verifier(Arc::new(transport));
        assert_eq!(
            verifier.change_host(&state, "slow.example.org", PurgeContext::Console),
            HostVerdict::Rejected
        );
        assert_eq!(
            verifier.notices().drain()[0].message,
            "Error: Accessing slow.example.org, request timed out after 10s"
        );
    }

    #[test]
    fn test_unchanged_and_cleared_skip_request() {
        let state = state("cdn1.example.net");
        let verifier = verifier(Arc::new(MockHeadTransport::new()));
        assert_eq!(
            verifier.change_host(&state, "HTTP://CDN1.example.net/", PurgeContext::Console),
            HostVerdict::Unchanged
        );
        assert!(state.snapshot().is_active());
        assert_eq!(
            verifier.change_host(&state, "", PurgeContext::Console),
            HostVerdict::Cleared
        );
        assert!(!state.snapshot().profile().is_configured());
        assert!(verifier.notices().is_empty());
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let state = state("cdn1.example.net");
        let verifier = verifier(Arc::new(MockHeadTransport::new()));
        assert_eq!(
            verifier.change_host(&state, "ftp://files.example.org", PurgeContext::Console),
            HostVerdict::Rejected
        );
        assert_eq!(state.snapshot().cdn_host(), "cdn1.example.net");
        assert!(!state.snapshot().is_active());
    }
}
