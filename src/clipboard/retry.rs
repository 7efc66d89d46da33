//! 剪贴板写入重试：指数退避 + 抖动 + 总时长预算。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// 剪贴板被其他进程占用
    Busy,
    Transient,
    Fatal,
}

#[derive(Debug, Clone)]
pub(crate) struct CopyFailure {
    pub(crate) kind: FailureKind,
    pub(crate) message: String,
}

impl CopyFailure {
    pub(crate) fn busy(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Busy,
            message: message.into(),
        }
    }

    pub(crate) fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    fn is_retryable(&self) -> bool {
        self.kind != FailureKind::Fatal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) attempts: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
    pub(crate) budget_ms: u64,
}

static JITTER_STATE: AtomicU64 = AtomicU64::new(0);

fn jitter_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (nanos ^ ((std::process::id() as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15).max(1)
}

/// xorshift64，多线程下以 CAS 推进状态。
fn next_jitter() -> u64 {
    let mut current = JITTER_STATE.load(Ordering::Relaxed);
    loop {
        let mut next = if current == 0 { jitter_seed() } else { current };
        next ^= next << 13;
        next ^= next >> 7;
        next ^= next << 17;

        match JITTER_STATE.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

/// 第 `retry` 次重试前的等待时长：`base * 2^(retry-1)`，封顶后叠加至多 1/3 的抖动。
pub(crate) fn backoff_delay_ms(base_delay_ms: u64, retry: u32, max_delay_ms: u64) -> u64 {
    let exp = base_delay_ms.saturating_mul(1_u64 << retry.saturating_sub(1).min(8));
    let capped = exp.min(max_delay_ms.max(base_delay_ms));
    let jitter_bound = (capped / 3).max(1);
    capped.saturating_add(next_jitter() % (jitter_bound + 1))
}

fn exceeds_budget(elapsed_ms: u64, wait_ms: u64, budget_ms: u64) -> bool {
    elapsed_ms.saturating_add(wait_ms) > budget_ms
}

/// 在当前（阻塞）线程中执行 `op`，按策略重试。
pub(crate) fn run_with_retry<F>(policy: &RetryPolicy, mut op: F) -> Result<u32, CopyFailure>
where
    F: FnMut() -> Result<(), CopyFailure>,
{
    let attempts = policy.attempts.max(1);
    let started = Instant::now();
    let mut last_failure = CopyFailure::transient("未执行任何写入");

    for attempt in 1..=attempts {
        if attempt > 1 {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let wait_ms = backoff_delay_ms(policy.base_delay_ms.max(1), attempt - 1, policy.max_delay_ms);

            if exceeds_budget(elapsed_ms, wait_ms, policy.budget_ms) {
                log::warn!(
                    "⏱️ 放弃第 {} 次重试：已耗时 {}ms，再等待 {}ms 会超过预算 {}ms",
                    attempt,
                    elapsed_ms,
                    wait_ms,
                    policy.budget_ms
                );
                break;
            }

            log::debug!("🔄 重试 {}/{}，等待 {}ms", attempt, attempts, wait_ms);
            std::thread::sleep(Duration::from_millis(wait_ms));
        }

        match op() {
            Ok(()) => return Ok(attempt),
            Err(failure) => {
                log::warn!(
                    "❌ 剪贴板写入第 {} 次失败: {}（kind={:?}）",
                    attempt,
                    failure.message,
                    failure.kind
                );
                let retryable = failure.is_retryable();
                last_failure = failure;
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_failure)
}
