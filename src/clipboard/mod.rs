//! # 剪贴板模块
//!
//! # 设计思路
//!
//! 嵌入流程本身不协商剪贴板格式，只需要“触发一次复制”：向系统剪贴板写入一段
//! 占位文本，让宿主框架的复制管线（已安装 `EmbeddingSerializer`）执行自己的序列化。
//!
//! # 实现思路
//!
//! - 写入在阻塞线程中进行，避免阻塞 async 运行时。
//! - 剪贴板可能被其他进程短暂占用，按 `retry` 子模块的指数退避策略有限重试。
//! - 失败返回 `AppError::Clipboard`，由调用方记录日志，不影响后续导出。

mod retry;

use std::time::Instant;

use crate::error::AppError;
use crate::settings::EmbedSettings;

use retry::{CopyFailure, FailureKind, RetryPolicy, run_with_retry};

const COPY_RETRY_MAX_DELAY_MS: u64 = 800;
const COPY_RETRY_BUDGET_MS: u64 = 2_000;

/// 通过 arboard 写入占位文本来触发系统复制。
#[derive(Debug, Clone)]
pub struct ArboardCopyTrigger {
    policy: RetryPolicy,
}

impl ArboardCopyTrigger {
    /// 写入剪贴板的占位文本。
    pub const COPY_TEXT: &'static str = "copy";

    pub fn new(retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            policy: RetryPolicy {
                attempts: retries.max(1),
                base_delay_ms: retry_delay_ms.max(1),
                max_delay_ms: COPY_RETRY_MAX_DELAY_MS,
                budget_ms: COPY_RETRY_BUDGET_MS,
            },
        }
    }

    pub fn from_settings(settings: &EmbedSettings) -> Self {
        Self::new(settings.copy_retries, settings.copy_retry_delay_ms)
    }

    pub async fn trigger(&self) -> Result<(), AppError> {
        let policy = self.policy;
        let started = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || run_with_retry(&policy, write_copy_text))
            .await
            .map_err(|e| AppError::Clipboard(format!("线程执行失败：{}", e)))?;

        match outcome {
            Ok(attempt) => {
                log::info!(
                    "📋 已触发系统复制 (尝试 {}，耗时 {}ms)",
                    attempt,
                    started.elapsed().as_millis()
                );
                Ok(())
            }
            Err(failure) if failure.kind == FailureKind::Busy => Err(AppError::Clipboard(format!(
                "剪贴板被占用：{}",
                failure.message
            ))),
            Err(failure) => Err(AppError::Clipboard(failure.message)),
        }
    }
}

impl Default for ArboardCopyTrigger {
    fn default() -> Self {
        Self::from_settings(&EmbedSettings::default())
    }
}

fn write_copy_text() -> Result<(), CopyFailure> {
    let mut clipboard = arboard::Clipboard::new().map_err(classify_arboard_error)?;
    clipboard
        .set_text(ArboardCopyTrigger::COPY_TEXT)
        .map_err(classify_arboard_error)
}

fn classify_arboard_error(error: arboard::Error) -> CopyFailure {
    match error {
        arboard::Error::ClipboardOccupied => CopyFailure::busy("剪贴板正被其他程序占用"),
        arboard::Error::ClipboardNotSupported => CopyFailure::fatal("当前环境不支持剪贴板"),
        other => CopyFailure::transient(format!("写入剪贴板失败：{}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arboard_errors_are_classified() {
        assert_eq!(
            classify_arboard_error(arboard::Error::ClipboardOccupied).kind,
            FailureKind::Busy
        );
        assert_eq!(
            classify_arboard_error(arboard::Error::ClipboardNotSupported).kind,
            FailureKind::Fatal
        );
        assert_eq!(
            classify_arboard_error(arboard::Error::ContentNotAvailable).kind,
            FailureKind::Transient
        );
    }

    #[test]
    fn settings_drive_retry_policy() {
        let settings = EmbedSettings {
            copy_retries: 0,
            copy_retry_delay_ms: 40,
            ..EmbedSettings::default()
        };

        let trigger = ArboardCopyTrigger::from_settings(&settings);

        assert_eq!(trigger.policy.attempts, 1);
        assert_eq!(trigger.policy.base_delay_ms, 40);
    }
}
