//! # embed-export — 命令行入口
//!
//! 无界面宿主：读取文档 JSON，把所有图片嵌入为 PNG Data URI 后写出导出文件。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use rich_copy_embed::export::FileExportWriter;
use rich_copy_embed::image_handler::ImageHandler;
use rich_copy_embed::settings::EmbedSettings;
use rich_copy_embed::trigger::{BatchFailurePolicy, TriggerOutcome};
use rich_copy_embed::{AppError, DocNode, EditorHost, EmbedImagePlugin};

#[derive(Parser, Debug)]
#[command(name = "embed-export", version, about, long_about = None)]
struct Cli {
    /// 文档 JSON 文件（ProseMirror `toJSON` 形状）
    input: PathBuf,

    /// 导出目录，覆盖设置中的 export_dir
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// 设置文件（JSON）
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// 单张图片失败时继续处理其余图片
    #[arg(long)]
    best_effort: bool,

    /// 允许嵌入 `file://` 与本地路径图片
    #[arg(long)]
    allow_local_files: bool,
}

/// 以文件内容作为“当前文档”的宿主，只支持导出。
struct FileHost {
    doc: DocNode,
}

#[async_trait]
impl EditorHost for FileHost {
    fn current_doc(&self) -> DocNode {
        self.doc.clone()
    }

    async fn trigger_native_copy(&self) -> Result<(), AppError> {
        Err(AppError::Host("命令行宿主不支持系统复制".to_string()))
    }
}

async fn run(cli: Cli) -> Result<PathBuf, AppError> {
    let mut settings = match &cli.settings {
        Some(path) => EmbedSettings::load(path)?,
        None => EmbedSettings::default(),
    };
    if let Some(dir) = cli.out_dir {
        settings.export_dir = dir;
    }
    if cli.best_effort {
        settings.batch_failure_policy = BatchFailurePolicy::BestEffort;
    }
    if cli.allow_local_files {
        settings.image.allow_local_files = true;
    }
    settings.validate()?;

    let content = tokio::fs::read_to_string(&cli.input).await?;
    let doc = DocNode::from_json(serde_json::from_str(&content)?)?;
    log::info!("📄 已读取文档: {} (图片 {} 张)", cli.input.display(), doc.images().len());

    let host = Arc::new(FileHost { doc: doc.clone() });
    let loader = Arc::new(ImageHandler::new(settings.image.clone())?);
    let writer = Arc::new(FileExportWriter::new(settings.export_dir.clone()));
    let plugin = EmbedImagePlugin::new(host, loader, writer, &settings);

    let TriggerOutcome::Finished(report) = plugin.export_document(doc).await else {
        return Err(AppError::Host("导出未执行".to_string()));
    };

    let path = report
        .export
        .unwrap_or_else(|| Err(AppError::Export("未生成导出文件".to_string())))?;

    if let Err(e) = report.populate {
        log::warn!("⚠️ 部分图片未能嵌入，导出文件保留了原始地址: {}", e);
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("❌ 导出失败: {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
