//! URL 解析模块
//!
//! # 设计思路
//!
//! 图片 `src` 在真正加载前可能需要经过宿主提供的代理能力改写。本模块只做决策：
//!
//! - 含不支持格式标记（默认 `x-emf`）的地址直接返回空串，表示“跳过，不加载”；
//! - 代理能力缺失、谓词为假或地址为空时原样返回；
//! - 否则调用 `get_proxy`，失败或 panic 时回退到原始地址。
//!
//! 解析永不失败，调用方无需处理错误分支。

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::image_handler::redact_url_for_log;

/// 默认的不支持格式标记（矢量图元文件，无法栅格化）。
pub const DEFAULT_UNSUPPORTED_MARKER: &str = "x-emf";

/// 宿主代理能力返回的错误，只在本模块内被消化。
#[derive(Debug, Clone, thiserror::Error)]
#[error("代理地址获取失败: {0}")]
pub struct ProxyError(pub String);

pub type CanProxyFn = dyn Fn(&str) -> bool + Send + Sync;
pub type GetProxyFn = dyn Fn(&str) -> BoxFuture<'static, Result<String, ProxyError>> + Send + Sync;

/// 宿主按会话提供的代理能力，两个成员均可缺失。
#[derive(Clone, Default)]
pub struct ProxyCapability {
    pub can_proxy: Option<Arc<CanProxyFn>>,
    pub get_proxy: Option<Arc<GetProxyFn>>,
}

impl ProxyCapability {
    pub fn new<C, G>(can_proxy: C, get_proxy: G) -> Self
    where
        C: Fn(&str) -> bool + Send + Sync + 'static,
        G: Fn(&str) -> BoxFuture<'static, Result<String, ProxyError>> + Send + Sync + 'static,
    {
        Self {
            can_proxy: Some(Arc::new(can_proxy)),
            get_proxy: Some(Arc::new(get_proxy)),
        }
    }
}

impl fmt::Debug for ProxyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCapability")
            .field("can_proxy", &self.can_proxy.is_some())
            .field("get_proxy", &self.get_proxy.is_some())
            .finish()
    }
}

/// 将图片 `src` 解析为可加载的地址。
///
/// 返回空串表示该图片不应被加载。
pub async fn resolve_url(proxy: Option<&ProxyCapability>, url: &str, marker: &str) -> String {
    if !marker.is_empty() && url.contains(marker) {
        log::debug!("⏭️ 不支持的图片格式，跳过: {}", redact_url_for_log(url));
        return String::new();
    }

    let Some(proxy) = proxy else {
        return url.to_string();
    };

    let (Some(can_proxy), Some(get_proxy)) = (&proxy.can_proxy, &proxy.get_proxy) else {
        return url.to_string();
    };

    if url.is_empty() {
        return url.to_string();
    }

    match catch_unwind(AssertUnwindSafe(|| can_proxy(url))) {
        Ok(true) => {}
        Ok(false) => return url.to_string(),
        Err(_) => {
            log::warn!("⚠️ can_proxy 发生 panic，使用原始地址: {}", redact_url_for_log(url));
            return url.to_string();
        }
    }

    let future = match catch_unwind(AssertUnwindSafe(|| get_proxy(url))) {
        Ok(future) => future,
        Err(_) => {
            log::warn!("⚠️ get_proxy 同步 panic，使用原始地址: {}", redact_url_for_log(url));
            return url.to_string();
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(proxied)) => {
            log::debug!(
                "🔀 代理地址解析完成: {} -> {}",
                redact_url_for_log(url),
                redact_url_for_log(&proxied)
            );
            proxied
        }
        Ok(Err(e)) => {
            log::debug!("🔀 {}，使用原始地址: {}", e, redact_url_for_log(url));
            url.to_string()
        }
        Err(_) => {
            log::warn!("⚠️ get_proxy 执行中 panic，使用原始地址: {}", redact_url_for_log(url));
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime init failed")
            .block_on(future)
    }

    fn counting_capability(
        allow: bool,
        result: Result<&'static str, &'static str>,
    ) -> (ProxyCapability, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let predicate_calls = Arc::new(AtomicUsize::new(0));
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&predicate_calls);
        let f = Arc::clone(&fetch_calls);

        let capability = ProxyCapability::new(
            move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                allow
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
                let out = result.map(str::to_string).map_err(|e| ProxyError(e.to_string()));
                async move { out }.boxed()
            },
        );

        (capability, predicate_calls, fetch_calls)
    }

    proptest! {
        #[test]
        fn marker_urls_always_resolve_empty(prefix in "[a-z/:.]{0,16}", suffix in "[a-z.]{0,8}", with_proxy in any::<bool>()) {
            let url = format!("{}x-emf{}", prefix, suffix);
            let (capability, _, fetch_calls) = counting_capability(true, Ok("http://proxy/p"));
            let proxy = with_proxy.then_some(&capability);

            let resolved = block_on(resolve_url(proxy, &url, DEFAULT_UNSUPPORTED_MARKER));

            prop_assert_eq!(resolved, "");
            prop_assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn refused_predicate_keeps_url_and_skips_fetch(url in "https?://[a-z]{1,10}\\.com/[a-z]{0,10}\\.png") {
            let (capability, predicate_calls, fetch_calls) = counting_capability(false, Ok("http://proxy/p"));

            let resolved = block_on(resolve_url(Some(&capability), &url, DEFAULT_UNSUPPORTED_MARKER));

            prop_assert_eq!(resolved, url);
            prop_assert_eq!(predicate_calls.load(Ordering::SeqCst), 1);
            prop_assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn rejected_fetch_falls_back_and_is_stable(url in "[a-z]{1,12}\\.(png|jpg|gif)") {
            let (capability, _, _) = counting_capability(true, Err("offline"));

            let first = block_on(resolve_url(Some(&capability), &url, DEFAULT_UNSUPPORTED_MARKER));
            let second = block_on(resolve_url(Some(&capability), &url, DEFAULT_UNSUPPORTED_MARKER));

            prop_assert_eq!(&first, &url);
            prop_assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn no_capability_returns_url_unchanged() {
        assert_eq!(resolve_url(None, "image.jpg", DEFAULT_UNSUPPORTED_MARKER).await, "image.jpg");
    }

    #[tokio::test]
    async fn proxied_url_is_returned_and_callbacks_see_original() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_predicate = Arc::clone(&seen);
        let seen_fetch = Arc::clone(&seen);

        let capability = ProxyCapability::new(
            move |url| {
                seen_predicate.lock().expect("lock").push(url.to_string());
                true
            },
            move |url| {
                seen_fetch.lock().expect("lock").push(url.to_string());
                async { Ok::<_, ProxyError>("https://proxy.local/img?id=1".to_string()) }.boxed()
            },
        );

        let resolved = resolve_url(Some(&capability), "https://cdn.test/a.png", "x-emf").await;

        assert_eq!(resolved, "https://proxy.local/img?id=1");
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["https://cdn.test/a.png", "https://cdn.test/a.png"]
        );
    }

    #[tokio::test]
    async fn partial_capability_returns_url_unchanged() {
        let capability = ProxyCapability {
            can_proxy: Some(Arc::new(|_: &str| true)),
            get_proxy: None,
        };

        assert_eq!(resolve_url(Some(&capability), "a.png", "x-emf").await, "a.png");
    }

    #[tokio::test]
    async fn empty_url_skips_predicate() {
        let (capability, predicate_calls, _) = counting_capability(true, Ok("http://proxy/p"));

        assert_eq!(resolve_url(Some(&capability), "", "x-emf").await, "");
        assert_eq!(predicate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn synchronous_panic_in_get_proxy_is_contained() {
        let capability = ProxyCapability::new(|_| true, |_| panic!("proxy exploded"));

        assert_eq!(resolve_url(Some(&capability), "a.png", "x-emf").await, "a.png");
    }

    #[tokio::test]
    async fn panic_while_polling_get_proxy_is_contained() {
        let capability = ProxyCapability::new(
            |_| true,
            |_| {
                futures_util::future::lazy(|_| -> Result<String, ProxyError> {
                    panic!("proxy exploded later")
                })
                .boxed()
            },
        );

        assert_eq!(resolve_url(Some(&capability), "a.png", "x-emf").await, "a.png");
    }
}
