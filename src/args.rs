// 该文件是 Wuding （屋顶） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use wuding::config::RunConfig;

/// Wuding 屋顶检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测配置文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub config: PathBuf,

  /// 输入来源
  /// - 单幅图像: image:///path/to/a.jpg
  /// - 图像目录: folder:///path/to/images
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 绘制结果的输出目录，例如 folder:///path/to/out 或 folder:///path/to/out?always
  #[arg(long, value_name = "OUTPUT")]
  pub render: Option<Url>,

  /// 并行处理图像的工作线程数
  #[arg(long, value_name = "COUNT")]
  pub workers: Option<usize>,

  /// 覆盖配置中的合并重叠阈值，并启用抑制合并
  #[arg(long, value_name = "THRESHOLD")]
  pub overlap: Option<f32>,

  /// 覆盖配置中的最小相邻候选数
  #[arg(long, value_name = "COUNT")]
  pub min_neighbors: Option<u32>,

  /// 覆盖配置中的金字塔缩放比例
  #[arg(long, value_name = "FACTOR")]
  pub scale_factor: Option<f64>,

  /// 在缩小一半的图像上检测
  #[arg(long)]
  pub downsized: bool,

  /// 只在 0 度检测
  #[arg(long)]
  pub no_rotate: bool,
}

impl Args {
  /// 命令行参数优先于配置文件
  pub fn apply(&self, config: &mut RunConfig) {
    if let Some(overlap) = self.overlap {
      config.merge = wuding::config::MergePolicy::Suppress { overlap };
    }
    if let Some(min_neighbors) = self.min_neighbors {
      config.min_neighbors = min_neighbors;
    }
    if let Some(scale_factor) = self.scale_factor {
      config.scale_factor = scale_factor;
    }
    if let Some(workers) = self.workers {
      config.workers = Some(workers);
    }
    if self.downsized {
      config.downsized = true;
    }
    if self.no_rotate {
      config.rotate = false;
      config.angles = None;
    }
  }
}
