//! # 触发控制模块
//!
//! ## 设计思路
//!
//! 键盘组合键驱动的小型状态机：
//!
//! ```text
//! Ctrl+Alt+Shift+E/Ē ─→ Base64ExportPending ─→ 预加载 → 导出 ───────────→ Idle
//! Ctrl+Alt+C         ─→ CopySpecialPending  ─→ 预加载 → 系统复制 ────────→ Idle
//! Ctrl+Alt+E/Ē       ─→ ExportPending       ─→ 预加载 → 系统复制 → 导出 ─→ Idle
//! ```
//!
//! ## 实现思路
//!
//! - 嵌入 / 导出标志由 `ModeGuard` 以 RAII 方式置位，任何路径（包括 panic）离开作用域都会复位。
//! - 同一时间只运行一个操作，忙碌期间的新触发直接拒绝，避免复位互相覆盖。
//! - 预加载失败只记录日志，复制与导出照常进行，缺失的图片保留原始地址。
//! - `on_key_down` 永远返回 `false`，宿主默认按键行为不受影响。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use chrono::Local;
use futures_util::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};

use crate::cache::Base64Cache;
use crate::document::DocNode;
use crate::error::AppError;
use crate::export::{EXPORT_CONTENT_TYPE, ExportWriter, export_file_name};
use crate::host::{EditorHost, EditorSnapshot};
use crate::image_handler::{ImageError, ImageLoader, redact_url_for_log};
use crate::resolver::{ProxyCapability, resolve_url};
use crate::serializer::{EmbeddingSerializer, Schema};
use crate::settings::EmbedSettings;

// ============================================================================
// 组合键
// ============================================================================

/// 宿主派发的键盘事件。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    fn upper_key(&self) -> String {
        self.key.to_uppercase()
    }

    fn is_export_letter(&self) -> bool {
        matches!(self.upper_key().as_str(), "E" | "Ē")
    }

    pub fn is_copy_special(&self) -> bool {
        self.ctrl && self.alt && self.upper_key() == "C"
    }

    pub fn is_export(&self) -> bool {
        self.ctrl && self.alt && self.is_export_letter()
    }

    pub fn is_base64_export(&self) -> bool {
        self.ctrl && self.alt && self.shift && self.is_export_letter()
    }

    /// 解析出本次按键对应的命令，Base64 导出优先。
    pub fn command(&self) -> Option<TriggerCommand> {
        if self.is_base64_export() {
            return Some(TriggerCommand::Base64Export);
        }

        let copy_special = self.is_copy_special();
        let export = self.is_export();
        match (copy_special, export) {
            (_, true) => Some(TriggerCommand::Export),
            (true, false) => Some(TriggerCommand::CopySpecial),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    CopySpecial,
    /// 复制并导出当前文档
    Export,
    Base64Export,
}

// ============================================================================
// 状态与模式标志
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerState {
    Idle = 0,
    CopySpecialPending = 1,
    ExportPending = 2,
    Base64ExportPending = 3,
}

impl TriggerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::CopySpecialPending,
            2 => Self::ExportPending,
            3 => Self::Base64ExportPending,
            _ => Self::Idle,
        }
    }
}

/// 离开作用域时把状态复位为 `Idle`。
struct StateGuard<'a> {
    cell: &'a AtomicU8,
}

impl<'a> StateGuard<'a> {
    fn enter(cell: &'a AtomicU8, state: TriggerState) -> Self {
        cell.store(state as u8, Ordering::SeqCst);
        log::debug!("🔁 状态切换: {:?}", state);
        Self { cell }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.cell.store(TriggerState::Idle as u8, Ordering::SeqCst);
    }
}

/// 嵌入模式与导出挂起标志，插件与序列化器共享。
#[derive(Debug, Default)]
pub struct ModeFlags {
    embed: AtomicBool,
    export_doc: AtomicBool,
}

impl ModeFlags {
    pub fn is_embedding(&self) -> bool {
        self.embed.load(Ordering::SeqCst)
    }

    pub fn is_export_pending(&self) -> bool {
        self.export_doc.load(Ordering::SeqCst)
    }

    pub fn set_embed(&self, on: bool) {
        self.embed.store(on, Ordering::SeqCst);
    }

    pub fn set_export_pending(&self, on: bool) {
        self.export_doc.store(on, Ordering::SeqCst);
    }

    /// 置位嵌入模式，返回的守卫在 `Drop` 时复位。
    pub fn embed_guard(&self) -> ModeGuard<'_> {
        ModeGuard::set(&self.embed, "embed")
    }

    pub fn export_guard(&self) -> ModeGuard<'_> {
        ModeGuard::set(&self.export_doc, "export_doc")
    }
}

/// 模式标志的 RAII 守卫。
#[must_use]
pub struct ModeGuard<'a> {
    flag: &'a AtomicBool,
    name: &'static str,
}

impl<'a> ModeGuard<'a> {
    fn set(flag: &'a AtomicBool, name: &'static str) -> Self {
        flag.store(true, Ordering::SeqCst);
        log::debug!("🚩 {} = true", name);
        Self { flag, name }
    }
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        log::debug!("🏳️ {} = false", self.name);
    }
}

// ============================================================================
// 批量预加载
// ============================================================================

/// 批量预加载中单张图片失败时的处理方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// 任一图片失败即整批失败，本批不写缓存
    #[default]
    FailFast,
    /// 所有图片各自结算，成功的写入缓存
    BestEffort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// 本批实际发起加载的不同 `src` 数
    pub scheduled: usize,
    pub embedded: usize,
    /// 解析结果为空（不支持的格式）而跳过的数量
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// 解析 `src` 并加载为 PNG Data URI。
///
/// 解析结果为空串时不加载，直接返回空串。
pub async fn load_image(
    loader: &dyn ImageLoader,
    proxy: Option<&ProxyCapability>,
    src: &str,
    marker: &str,
) -> Result<String, ImageError> {
    let resolved = resolve_url(proxy, src, marker).await;
    if resolved.is_empty() {
        return Ok(String::new());
    }
    loader.load(&resolved).await
}

// ============================================================================
// 插件
// ============================================================================

/// 组合键处理结果。
#[derive(Debug)]
pub enum TriggerOutcome {
    /// 不是本插件关心的组合键
    Ignored,
    /// 已有操作在进行中
    Busy,
    Finished(TriggerReport),
}

#[derive(Debug)]
pub struct TriggerReport {
    pub command: TriggerCommand,
    pub populate: Result<PopulateReport, ImageError>,
    /// 是否成功触发了系统复制（导出专用路径为 `false`）
    pub copied: bool,
    pub export: Option<Result<PathBuf, AppError>>,
}

pub struct EmbedImagePlugin {
    host: Arc<dyn EditorHost>,
    loader: Arc<dyn ImageLoader>,
    writer: Arc<dyn ExportWriter>,
    cache: Base64Cache,
    flags: Arc<ModeFlags>,
    serializer: EmbeddingSerializer,
    state: AtomicU8,
    busy: tokio::sync::Mutex<()>,
    marker: String,
    export_prefix: String,
    policy: BatchFailurePolicy,
}

impl EmbedImagePlugin {
    pub fn new(
        host: Arc<dyn EditorHost>,
        loader: Arc<dyn ImageLoader>,
        writer: Arc<dyn ExportWriter>,
        settings: &EmbedSettings,
    ) -> Self {
        let cache = Base64Cache::new();
        let flags = Arc::new(ModeFlags::default());
        let serializer = EmbeddingSerializer::from_schema(
            Schema::basic(),
            cache.clone(),
            Arc::clone(&flags),
            Arc::clone(&loader),
            settings.unsupported_marker.clone(),
        );

        Self {
            host,
            loader,
            writer,
            cache,
            flags,
            serializer,
            state: AtomicU8::new(TriggerState::Idle as u8),
            busy: tokio::sync::Mutex::new(()),
            marker: settings.unsupported_marker.clone(),
            export_prefix: settings.export_prefix.clone(),
            policy: settings.batch_failure_policy,
        }
    }

    /// 用宿主自己的规则表重建剪贴板序列化器（图片规则仍会被替换）。
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.serializer = EmbeddingSerializer::from_schema(
            schema,
            self.cache.clone(),
            Arc::clone(&self.flags),
            Arc::clone(&self.loader),
            self.marker.clone(),
        );
        self
    }

    /// 宿主在会话开始时安装的剪贴板序列化器。
    pub fn clipboard_serializer(&self) -> EmbeddingSerializer {
        self.serializer.clone()
    }

    pub fn cache(&self) -> &Base64Cache {
        &self.cache
    }

    pub fn flags(&self) -> Arc<ModeFlags> {
        Arc::clone(&self.flags)
    }

    pub fn state(&self) -> TriggerState {
        TriggerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_embedding(&self) -> bool {
        self.flags.is_embedding()
    }

    pub fn is_export_pending(&self) -> bool {
        self.flags.is_export_pending()
    }

    /// 键盘事件入口：命中组合键时在后台执行，始终返回 `false`（不消费事件）。
    pub fn on_key_down(self: &Arc<Self>, event: &KeyEvent) -> bool {
        if event.command().is_none() {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("⚠️ 无可用异步运行时，忽略组合键: {:?}", event);
            return false;
        };

        let plugin = Arc::clone(self);
        let event = event.clone();
        runtime.spawn(async move {
            plugin.handle_key(&event).await;
        });

        false
    }

    /// 可等待的按键处理。
    pub async fn handle_key(&self, event: &KeyEvent) -> TriggerOutcome {
        let Some(command) = event.command() else {
            return TriggerOutcome::Ignored;
        };

        let Ok(_busy) = self.busy.try_lock() else {
            log::warn!("⏳ 上一个操作尚未完成，忽略 {:?}", command);
            return TriggerOutcome::Busy;
        };

        log::info!("⌨️ 收到组合键命令: {:?}", command);
        let report = match command {
            TriggerCommand::Base64Export => {
                let snapshot = EditorSnapshot::capture(self.host.as_ref()).await;
                self.run_base64_export(snapshot).await
            }
            TriggerCommand::CopySpecial => self.run_copy_special(false).await,
            TriggerCommand::Export => self.run_copy_special(true).await,
        };

        TriggerOutcome::Finished(report)
    }

    /// 以嵌入模式导出任意文档，等同于不经按键的 Base64 导出。
    pub async fn export_document(&self, doc: DocNode) -> TriggerOutcome {
        let Ok(_busy) = self.busy.try_lock() else {
            log::warn!("⏳ 上一个操作尚未完成，忽略导出请求");
            return TriggerOutcome::Busy;
        };

        TriggerOutcome::Finished(self.run_base64_export(EditorSnapshot::new(doc)).await)
    }

    async fn run_base64_export(&self, snapshot: EditorSnapshot) -> TriggerReport {
        let _state = StateGuard::enter(&self.state, TriggerState::Base64ExportPending);
        let _embed = self.flags.embed_guard();

        let populate = self.populate_cache(snapshot.doc()).await;
        log_populate_result(&populate);

        let export = self.write_export(snapshot.doc()).await;
        log_export_result(&export);

        TriggerReport {
            command: TriggerCommand::Base64Export,
            populate,
            copied: false,
            export: Some(export),
        }
    }

    async fn run_copy_special(&self, export: bool) -> TriggerReport {
        let state = if export {
            TriggerState::ExportPending
        } else {
            TriggerState::CopySpecialPending
        };
        let _state = StateGuard::enter(&self.state, state);
        let _export = export.then(|| self.flags.export_guard());
        let _embed = self.flags.embed_guard();

        let snapshot = EditorSnapshot::capture(self.host.as_ref()).await;
        let populate = self.populate_cache(snapshot.doc()).await;
        log_populate_result(&populate);

        let copied = match self.host.trigger_native_copy().await {
            Ok(()) => true,
            Err(e) => {
                log::error!("❌ 触发系统复制失败: {}", e);
                false
            }
        };

        let export = if export {
            let result = self.write_export(snapshot.doc()).await;
            log_export_result(&result);
            Some(result)
        } else {
            None
        };

        TriggerReport {
            command: if export.is_some() {
                TriggerCommand::Export
            } else {
                TriggerCommand::CopySpecial
            },
            populate,
            copied,
            export,
        }
    }

    /// 为文档中所有尚未缓存的图片并发加载，按 `src`（解析前）写入缓存。
    pub async fn populate_cache(&self, doc: &DocNode) -> Result<PopulateReport, ImageError> {
        let started = Instant::now();
        let mut report = PopulateReport::default();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for image in doc.images() {
            let Some(src) = image.src().filter(|s| !s.is_empty()) else {
                continue;
            };
            if seen.insert(src) && !self.cache.contains(src)? {
                pending.push(src.to_string());
            }
        }

        report.scheduled = pending.len();
        if pending.is_empty() {
            return Ok(report);
        }

        log::info!("🖼️ 开始预加载 {} 张图片", pending.len());
        let proxy = self.host.proxy_capability();
        let loader = self.loader.as_ref();
        let marker = self.marker.as_str();

        let loads = pending.iter().map(|src| {
            let proxy = proxy.as_ref();
            async move {
                load_image(loader, proxy, src, marker)
                    .await
                    .map(|data_uri| (src.as_str(), data_uri))
                    .map_err(|e| (src.as_str(), e))
            }
        });

        let loaded = match self.policy {
            BatchFailurePolicy::FailFast => try_join_all(loads).await.map_err(|(src, e)| {
                log::warn!(
                    "❌ 图片加载失败，本批放弃写入 - 地址: {} code={} stage={}",
                    redact_url_for_log(src),
                    e.code(),
                    e.stage()
                );
                e
            })?,
            BatchFailurePolicy::BestEffort => {
                let mut ok = Vec::new();
                for result in join_all(loads).await {
                    match result {
                        Ok(entry) => ok.push(entry),
                        Err((src, e)) => {
                            log::warn!(
                                "⚠️ 图片加载失败，保留原始地址 - 地址: {} code={} err={}",
                                redact_url_for_log(src),
                                e.code(),
                                e
                            );
                            report.failed.push(src.to_string());
                        }
                    }
                }
                ok
            }
        };

        for (src, data_uri) in loaded {
            if data_uri.is_empty() {
                report.skipped += 1;
            } else if self.cache.insert_if_absent(src, data_uri)? {
                report.embedded += 1;
            }
        }

        log::info!(
            "✅ 预加载完成 - 嵌入: {} 跳过: {} 失败: {} 耗时: {}ms",
            report.embedded,
            report.skipped,
            report.failed.len(),
            started.elapsed().as_millis()
        );
        Ok(report)
    }

    async fn write_export(&self, doc: &DocNode) -> Result<PathBuf, AppError> {
        let resolved = self
            .serializer
            .resolve_document(doc, self.flags.is_embedding())?;
        let content = serde_json::to_string(&resolved)?;
        let filename = export_file_name(&self.export_prefix, &Local::now());

        self.writer
            .write(&content, &filename, EXPORT_CONTENT_TYPE)
            .await
    }
}

fn log_populate_result(result: &Result<PopulateReport, ImageError>) {
    if let Err(e) = result {
        log::error!(
            "❌ 图片预加载失败，继续使用已有缓存 - code={} stage={} err={}",
            e.code(),
            e.stage(),
            e
        );
    }
}

fn log_export_result(result: &Result<PathBuf, AppError>) {
    if let Err(e) = result {
        log::error!("❌ 导出 JSON 失败: {}", e);
    }
}
