// 该文件是 Wuding （屋顶） 项目的一部分。
// src/output/directory_render.rs - 目录绘制输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::ImageItem,
  output::{Render, draw::Draw},
  store::Detection,
};

#[derive(Error, Debug)]
pub enum DirectoryRenderOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 在原图上绘制检测多边形，保存为目录下的 `<图像名>.png`。
///
/// 默认跳过没有检测的图像，`folder:///out?always` 则全部输出。
pub struct DirectoryRenderOutput {
  directory: PathBuf,
  draw: Draw,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRenderOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRenderOutput {
  type Error = DirectoryRenderOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRenderOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRenderOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::default(),
      always,
    })
  }
}

impl DirectoryRenderOutput {
  fn render_path(&self, image_id: &str) -> Result<PathBuf, DirectoryRenderOutputError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }
    Ok(self.directory.join(image_id).with_extension("png"))
  }
}

impl Render for DirectoryRenderOutput {
  type Error = DirectoryRenderOutputError;

  fn render_result(&self, item: &ImageItem, detections: &[Detection]) -> Result<(), Self::Error> {
    if !self.always && detections.is_empty() {
      return Ok(());
    }

    // 检测坐标在原始分辨率下，直接画在彩色原图上
    let mut image = image::open(&item.path)?.to_rgb8();
    self.draw.draw_detections_on_image(&mut image, detections);

    let path = self.render_path(&item.id)?;
    debug!("输出图像 {} 的结果到 {}", item.id, path.display());
    image.save(&path)?;
    Ok(())
  }
}
