// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod exception;
pub mod filter;
pub mod param;
pub mod provider;
pub mod purge;
pub mod request;
pub mod response;
pub mod rewriter;
pub mod state;
pub mod util;
pub mod verify;

pub use cache::PageCache;
pub use classifier::{classify, CdnProfile};
pub use config::{CdnSettings, Config};
pub use exception::Exception;
pub use filter::{file_type_pattern, parse_list, substring_pattern, RewriteFilterSet};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use provider::{ProviderHelper, ProviderPattern, PROVIDER_TABLE};
pub use purge::{CdnPurger, PurgeContext, PurgeTransport};
pub use request::Request;
pub use response::Response;
pub use rewriter::{rewrite_buffer, rewrite_url, Rewriter};
pub use state::CdnState;
pub use util::HtmlBuilder;
pub use verify::{HeadTransport, HostVerdict, HostVerifier};
