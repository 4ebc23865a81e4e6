// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CDN 缓存清除
//!
//! 每个服务商对应一个 [`ProviderIntegration`]，由档案中的 `helper` 标签选择。
//! 真正的网络调用交给 [`PurgeTransport`]，集成本身只负责拼装请求、解释响应，
//! 并把结果以提示消息的形式记录到 [`NoticeBoard`]。清除失败不会向调用方传播。

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::classifier::CdnProfile;
use crate::config::CdnSettings;
use crate::provider::ProviderHelper;
use crate::state::CdnState;

/// 触发清除的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurgeContext {
    /// 设置页面上的按钮
    Button,
    /// 管理菜单
    Menu,
    /// 源站控制台
    Console,
    /// 后台任务等无人值守的场景，提示只写入日志
    NonInteractive,
}

impl PurgeContext {
    pub fn tag(&self) -> &'static str {
        match self {
            PurgeContext::Button => "button",
            PurgeContext::Menu => "menu",
            PurgeContext::Console => "console",
            PurgeContext::NonInteractive => "non-interactive",
        }
    }

    pub fn is_interactive(&self) -> bool {
        *self != PurgeContext::NonInteractive
    }
}

impl fmt::Display for PurgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Warning,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub context: PurgeContext,
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            NoticeLevel::Error => "error",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Success => "success",
        };
        write!(f, "[{}][{}] {}", self.context, level, self.message)
    }
}

/// 清除结果提示。所有提示都会同步写入日志，非交互来源的提示不保留。
#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, context: PurgeContext, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => error!("[{}]{}", context, message),
            NoticeLevel::Warning => warn!("[{}]{}", context, message),
            NoticeLevel::Success => info!("[{}]{}", context, message),
        }
        if !context.is_interactive() {
            return;
        }
        let notice = Notice {
            context,
            level,
            message,
        };
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }

    pub fn error(&self, context: PurgeContext, message: impl Into<String>) {
        self.add(context, NoticeLevel::Error, message);
    }

    pub fn warning(&self, context: PurgeContext, message: impl Into<String>) {
        self.add(context, NoticeLevel::Warning, message);
    }

    pub fn success(&self, context: PurgeContext, message: impl Into<String>) {
        self.add(context, NoticeLevel::Success, message);
    }

    /// 取出并清空所有提示
    pub fn drain(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(mut notices) => notices.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.notices.lock() {
            Ok(notices) => notices.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 发往服务商 API 的清除请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeRequest {
    /// `GET https://api.keycdn.com/zones/purge/{zone_id}.json`，以 API Key 作 Basic 认证
    KeyCdnZone { zone_id: String, api_key: String },
    /// CloudFront `CreateInvalidation`
    CloudFrontInvalidation {
        distribution_id: String,
        paths: Vec<String>,
        caller_reference: String,
    },
}

/// 服务商的应答：状态码与原因短语
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub reason: String,
}

impl TransportReply {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 缺少凭据，内容是展示给运维人员的完整消息
    MissingCredentials(String),
    /// 网络或 SDK 层面的失败
    Transport(String),
    /// 超过 `purge_timeout_secs`
    Timeout(Duration),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::MissingCredentials(message) => write!(f, "{}", message),
            TransportError::Transport(message) => write!(f, "{}", message),
            TransportError::Timeout(timeout) => {
                write!(f, "request timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// 负责把清除请求发送给服务商
#[cfg_attr(test, mockall::automock)]
pub trait PurgeTransport: Send + Sync {
    fn send(&self, request: &PurgeRequest, timeout: Duration) -> Result<TransportReply, TransportError>;
}

/// 不访问网络的传输层，只把请求写入日志。源站没有配置真实通道时使用。
#[derive(Debug, Default)]
pub struct DryRunTransport;

impl PurgeTransport for DryRunTransport {
    fn send(&self, request: &PurgeRequest, timeout: Duration) -> Result<TransportReply, TransportError> {
        match request {
            PurgeRequest::KeyCdnZone { zone_id, .. } => {
                info!("[dry-run]清除KeyCDN区域{}（超时{}s）", zone_id, timeout.as_secs())
            }
            PurgeRequest::CloudFrontInvalidation {
                distribution_id,
                paths,
                caller_reference,
            } => info!(
                "[dry-run]CloudFront分发{}失效{:?}，caller reference {}",
                distribution_id, paths, caller_reference
            ),
        }
        Ok(TransportReply::new(200, "OK"))
    }
}

/// 服务商集成
pub trait ProviderIntegration: Send + Sync {
    fn helper(&self) -> ProviderHelper;

    /// 检查凭据是否齐全
    fn check(&self) -> Result<(), TransportError>;

    fn can_purge(&self) -> bool {
        self.check().is_ok()
    }

    /// 执行清除，返回是否成功。失败原因写入 `notices`。
    fn purge(&self, profile: &CdnProfile, context: PurgeContext, notices: &NoticeBoard) -> bool;
}

/// 未知服务商：没有清除能力
pub struct GenericIntegration;

impl ProviderIntegration for GenericIntegration {
    fn helper(&self) -> ProviderHelper {
        ProviderHelper::Generic
    }

    fn check(&self) -> Result<(), TransportError> {
        Err(TransportError::MissingCredentials(
            "This CDN provider does not support cache purging".to_string(),
        ))
    }

    fn purge(&self, profile: &CdnProfile, _context: PurgeContext, _notices: &NoticeBoard) -> bool {
        debug!("服务商{}不支持清除缓存", profile.provider());
        false
    }
}

pub struct CloudFrontIntegration {
    distribution_id: String,
    timeout: Duration,
    transport: Arc<dyn PurgeTransport>,
}

impl CloudFrontIntegration {
    pub fn new(distribution_id: &str, timeout: Duration, transport: Arc<dyn PurgeTransport>) -> Self {
        Self {
            distribution_id: distribution_id.trim().to_string(),
            timeout,
            transport,
        }
    }
}

impl ProviderIntegration for CloudFrontIntegration {
    fn helper(&self) -> ProviderHelper {
        ProviderHelper::CloudFront
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.distribution_id.is_empty() {
            return Err(TransportError::MissingCredentials(
                "AWS Error: You must provide your CloudFront distribution ID to invalidate"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn purge(&self, profile: &CdnProfile, context: PurgeContext, notices: &NoticeBoard) -> bool {
        if let Err(e) = self.check() {
            notices.error(context, e.to_string());
            return false;
        }
        let request = PurgeRequest::CloudFrontInvalidation {
            distribution_id: self.distribution_id.clone(),
            paths: vec!["/*".to_string()],
            caller_reference: Utc::now().timestamp().to_string(),
        };
        debug!("向CloudFront发送失效请求：{}", profile.hostname());
        match self.transport.send(&request, self.timeout) {
            Ok(reply) if reply.status > 399 => {
                notices.error(context, format!("CloudFront Error: {}", reply.reason));
                false
            }
            Ok(_) => {
                notices.success(
                    context,
                    "Purge CDN Success: The CloudFront Invalidation is in progress and may take a few minutes",
                );
                true
            }
            Err(e) => {
                notices.error(context, format!("CloudFront Error: {}", e));
                false
            }
        }
    }
}

pub struct KeyCdnIntegration {
    zone_id: String,
    api_key: String,
    timeout: Duration,
    transport: Arc<dyn PurgeTransport>,
}

impl KeyCdnIntegration {
    pub fn new(
        zone_id: &str,
        api_key: &str,
        timeout: Duration,
        transport: Arc<dyn PurgeTransport>,
    ) -> Self {
        Self {
            zone_id: zone_id.trim().to_string(),
            api_key: api_key.trim().to_string(),
            timeout,
            transport,
        }
    }
}

/// KeyCDN 的错误状态码说明，未登记的状态码使用服务端给出的原因短语
fn keycdn_status_message(status: u16, reason: &str) -> String {
    match status {
        401 => "Invalid API key".to_string(),
        403 => "Invalid Zone Id".to_string(),
        429 => "API rate limit exceeded".to_string(),
        451 => "Too many failed attempts".to_string(),
        _ => reason.to_string(),
    }
}

impl ProviderIntegration for KeyCdnIntegration {
    fn helper(&self) -> ProviderHelper {
        ProviderHelper::KeyCdn
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.api_key.is_empty() {
            return Err(TransportError::MissingCredentials(
                "KeyCDN Error: You must provide your KeyCDN API Key".to_string(),
            ));
        }
        if self.zone_id.is_empty() {
            return Err(TransportError::MissingCredentials(
                "KeyCDN Error: You must provide your KeyCDN Zone Id".to_string(),
            ));
        }
        Ok(())
    }

    fn purge(&self, profile: &CdnProfile, context: PurgeContext, notices: &NoticeBoard) -> bool {
        if let Err(e) = self.check() {
            notices.error(context, e.to_string());
            return false;
        }
        let request = PurgeRequest::KeyCdnZone {
            zone_id: self.zone_id.clone(),
            api_key: self.api_key.clone(),
        };
        debug!("向KeyCDN发送清除请求：{}", profile.hostname());
        match self.transport.send(&request, self.timeout) {
            Ok(reply) if reply.status > 399 => {
                notices.error(
                    context,
                    format!(
                        "KeyCDN Error: status {}, {}",
                        reply.status,
                        keycdn_status_message(reply.status, &reply.reason)
                    ),
                );
                false
            }
            Ok(_) => {
                notices.success(
                    context,
                    "Purge CDN Success: The KeyCDN purge is in progress and may take a few minutes",
                );
                true
            }
            Err(e) => {
                notices.error(context, format!("KeyCDN Error: {}", e));
                false
            }
        }
    }
}

/// 按 `helper` 标签选择集成
pub fn integration_for(
    helper: ProviderHelper,
    settings: &CdnSettings,
    transport: Arc<dyn PurgeTransport>,
) -> Box<dyn ProviderIntegration> {
    let timeout = Duration::from_secs(settings.purge_timeout_secs.max(1));
    match helper {
        ProviderHelper::CloudFront => {
            let distribution_id = settings
                .cloudfront
                .as_ref()
                .map(|c| c.distribution_id.as_str())
                .unwrap_or("");
            Box::new(CloudFrontIntegration::new(distribution_id, timeout, transport))
        }
        ProviderHelper::KeyCdn => {
            let (zone_id, api_key) = settings
                .keycdn
                .as_ref()
                .map(|k| (k.zone_id.as_str(), k.api_key.as_str()))
                .unwrap_or(("", ""));
            Box::new(KeyCdnIntegration::new(zone_id, api_key, timeout, transport))
        }
        ProviderHelper::Generic => Box::new(GenericIntegration),
    }
}

/// 清除尝试结束后收到通知
pub trait FlushListener: Send + Sync {
    fn on_flushed(&self, profile: &CdnProfile, context: PurgeContext, succeeded: bool);
}

/// 缓存清除入口
pub struct CdnPurger {
    state: Arc<CdnState>,
    transport: Arc<dyn PurgeTransport>,
    notices: Arc<NoticeBoard>,
    listeners: Vec<Arc<dyn FlushListener>>,
}

impl CdnPurger {
    pub fn new(state: Arc<CdnState>, transport: Arc<dyn PurgeTransport>) -> Self {
        Self {
            state,
            transport,
            notices: Arc::new(NoticeBoard::new()),
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn FlushListener>) {
        self.listeners.push(listener);
    }

    pub fn notices(&self) -> &Arc<NoticeBoard> {
        &self.notices
    }

    /// 当前服务商是否支持清除
    pub fn can_purge(&self) -> bool {
        let snapshot = self.state.snapshot();
        snapshot.profile().is_configured()
            && integration_for(
                snapshot.profile().helper(),
                snapshot.settings(),
                Arc::clone(&self.transport),
            )
            .can_purge()
    }

    /// 清除 CDN 缓存，返回是否发起了清除。
    ///
    /// 发起过清除（无论成败）都会通知所有监听者。
    pub fn flush(&self, context: PurgeContext) -> bool {
        let snapshot = self.state.snapshot();
        let profile = snapshot.profile();
        if !profile.is_configured() {
            debug!("[{}]未配置CDN地址，跳过清除", context);
            return false;
        }
        let integration = integration_for(
            profile.helper(),
            snapshot.settings(),
            Arc::clone(&self.transport),
        );
        if let Err(e) = integration.check() {
            if integration.helper() == ProviderHelper::Generic {
                debug!("[{}]{}：{}", context, profile.provider(), e);
            } else {
                self.notices.error(context, e.to_string());
            }
            return false;
        }

        info!("[{}]开始清除{}缓存", context, profile.provider());
        let succeeded = integration.purge(profile, context, &self.notices);
        for listener in &self.listeners {
            listener.on_flushed(profile, context, succeeded);
        }
        true
    }
}
