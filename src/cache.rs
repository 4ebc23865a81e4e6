// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::num::NonZeroUsize;
use std::time::SystemTime;

use bytes::Bytes;
use log::warn;
use lru::LruCache;

/// 同一个文件在不同站点主机下改写结果不同，因此主机也是键的一部分
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    path: String,
    site_host: String,
}

#[derive(Clone)]
struct PageEntry {
    content: Bytes,
    modified_time: SystemTime,
    generation: u64,
}

/// 已改写页面的 LRU 缓存。
///
/// 文件修改时间或 CDN 快照代数变化后，旧条目自动失效。
pub struct PageCache {
    cache: LruCache<PageKey, PageEntry>,
}

impl PageCache {
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                warn!("页面缓存容量为0，按1处理");
                NonZeroUsize::MIN
            }
        };
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn push(
        &mut self,
        path: &str,
        site_host: &str,
        bytes: Bytes,
        modified_time: SystemTime,
        generation: u64,
    ) {
        let key = PageKey {
            path: path.to_string(),
            site_host: site_host.to_string(),
        };
        let entry = PageEntry {
            content: bytes,
            modified_time,
            generation,
        };
        self.cache.put(key, entry);
    }

    // 查询有效缓存
    pub fn find(
        &mut self,
        path: &str,
        site_host: &str,
        current_modified_time: SystemTime,
        current_generation: u64,
    ) -> Option<Bytes> {
        let key = PageKey {
            path: path.to_string(),
            site_host: site_host.to_string(),
        };
        match self.cache.get(&key) {
            Some(entry)
                if entry.modified_time == current_modified_time
                    && entry.generation == current_generation =>
            {
                Some(entry.content.clone())
            }
            _ => None,
        }
    }

    /// 清空缓存，CDN 缓存被清除后调用
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// 缓存内容的总字节数
    pub fn total_bytes(&self) -> u64 {
        self.cache.iter().map(|(_, e)| e.content.len() as u64).sum()
    }
}
