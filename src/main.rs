// 该文件是 Wuding （屋顶） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wuding::{
  FromUrl,
  config::RunConfig,
  input::InputWrapper,
  model::TemplateClassifierBuilder,
  output::OutputWrapper,
  task::{BatchTask, CancelToken, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输入来源: {}", args.input);

  let mut config = RunConfig::from_path(&args.config)
    .with_context(|| format!("无法加载配置 {}", args.config.display()))?;
  args.apply(&mut config);

  let orchestrator = config
    .build_orchestrator(|url| TemplateClassifierBuilder::from_url(url)?.build())
    .context("无法构建检测器")?;

  let input = InputWrapper::from_url(&args.input).context("无法打开输入")?;
  info!("共 {} 幅图像待检测", input.len());
  let output = args
    .render
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()
    .context("无法创建输出")?;

  let cancel = CancelToken::new();
  cancel.cancel_on_ctrlc().context("无法设置 Ctrl-C 处理")?;

  let report = BatchTask::default()
    .with_workers(config.workers.unwrap_or(1))
    .with_cancel(cancel)
    .run_task(input.into_images(config.downsized), &orchestrator, output)?;

  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}
