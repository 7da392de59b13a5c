// 该文件是 Wuding （屋顶） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::ImageItem, store::Detection};

/// 单幅图像处理完成后接收其全部检测结果
pub trait Render {
  type Error;
  fn render_result(&self, item: &ImageItem, detections: &[Detection]) -> Result<(), Self::Error>;
}

impl<R: Render> Render for Option<R> {
  type Error = R::Error;

  fn render_result(&self, item: &ImageItem, detections: &[Detection]) -> Result<(), Self::Error> {
    match self {
      Some(output) => output.render_result(item, detections),
      None => Ok(()),
    }
  }
}

pub mod draw;

mod directory_render;
pub use self::directory_render::{DirectoryRenderOutput, DirectoryRenderOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("目录绘制输出错误: {0}")]
  DirectoryRenderOutputError(#[from] DirectoryRenderOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  DirectoryRenderOutput(DirectoryRenderOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryRenderOutput::SCHEME => {
        let output = DirectoryRenderOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRenderOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, item: &ImageItem, detections: &[Detection]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::DirectoryRenderOutput(output) => output
        .render_result(item, detections)
        .map_err(OutputError::from),
    }
  }
}
